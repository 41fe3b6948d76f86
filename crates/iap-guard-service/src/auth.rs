//! Authentication extractors.
//!
//! - `AuthUser` - end-user bearer JWT, validated against the identity
//!   provider's JWKS
//! - `AdminAuth` - bearer token checked by the configured [`AdminAuthorizer`]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use iap_guard_core::UserId;

use crate::crypto::constant_time_eq;
use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// Constants
// ============================================================================

/// How long to cache JWKS keys before refreshing.
const JWKS_CACHE_DURATION: Duration = Duration::from_secs(3600);

/// Timeout for JWKS fetch requests.
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Prefix of development tokens (`test-token:<uuid>`), honored only when
/// `allow_test_tokens` is set.
pub const TEST_TOKEN_PREFIX: &str = "test-token:";

fn bearer(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

// ============================================================================
// End users
// ============================================================================

/// An authenticated end user.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user ID.
    pub user_id: UserId,
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        state: &'life1 Arc<AppState>,
    ) -> ::core::pin::Pin<
        Box<
            dyn ::core::future::Future<Output = Result<Self, Self::Rejection>>
                + ::core::marker::Send
                + 'async_trait,
        >,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            let token = bearer(parts).ok_or(ApiError::Unauthenticated)?;

            if state.config.allow_test_tokens {
                if let Some(user_id) = token.strip_prefix(TEST_TOKEN_PREFIX) {
                    let user_id = user_id
                        .parse::<UserId>()
                        .map_err(|_| ApiError::Unauthenticated)?;
                    return Ok(AuthUser { user_id });
                }
            }

            let claims = state.jwks.validate(token).await?;
            let user_id = claims
                .sub
                .parse::<UserId>()
                .map_err(|_| ApiError::Unauthenticated)?;

            Ok(AuthUser { user_id })
        })
    }
}

/// JWT claims of an identity provider token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID).
    pub sub: String,
    /// Audience (string or array).
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
    /// Issuer.
    pub iss: String,
    /// Expiration time.
    pub exp: i64,
    /// Issued at.
    #[serde(default)]
    pub iat: i64,
}

// ============================================================================
// Administrators
// ============================================================================

/// Decides whether a bearer token carries the admin capability.
pub trait AdminAuthorizer: Send + Sync {
    /// Whether `token` may use the admin surface.
    fn is_admin(&self, token: &str) -> bool;
}

/// Compares the bearer token with one configured key. Without a key the
/// admin surface is closed.
#[derive(Clone)]
pub struct StaticKeyAuthorizer {
    key: Option<String>,
}

impl StaticKeyAuthorizer {
    /// Create an authorizer.
    #[must_use]
    pub fn new(key: Option<String>) -> Self {
        Self {
            key: key.filter(|k| !k.is_empty()),
        }
    }
}

impl AdminAuthorizer for StaticKeyAuthorizer {
    fn is_admin(&self, token: &str) -> bool {
        self.key
            .as_deref()
            .is_some_and(|key| constant_time_eq(key, token))
    }
}

/// An authenticated administrator.
///
/// `X-Admin-Id` names the operator in audit records; it defaults to `admin`.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    /// Admin identifier (for audit logging).
    pub admin_id: String,
}

impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = ApiError;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        state: &'life1 Arc<AppState>,
    ) -> ::core::pin::Pin<
        Box<
            dyn ::core::future::Future<Output = Result<Self, Self::Rejection>>
                + ::core::marker::Send
                + 'async_trait,
        >,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            let token = bearer(parts).ok_or(ApiError::Unauthenticated)?;

            if !state.admin.is_admin(token) {
                tracing::warn!("Admin request with insufficient privileges");
                return Err(ApiError::permission_denied("admin privileges required"));
            }

            let admin_id = parts
                .headers
                .get("x-admin-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("admin")
                .to_string();

            tracing::info!(admin_id = %admin_id, "Admin authenticated");

            Ok(AdminAuth { admin_id })
        })
    }
}

// ============================================================================
// JWKS Client and JWT Validation
// ============================================================================

/// JWKS (JSON Web Key Set) response structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwks {
    /// List of JWK keys.
    pub keys: Vec<Jwk>,
}

/// Single JSON Web Key.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA").
    pub kty: String,
    /// Key ID.
    pub kid: Option<String>,
    /// RSA public key modulus (base64url encoded).
    pub n: Option<String>,
    /// RSA public key exponent (base64url encoded).
    pub e: Option<String>,
}

struct CachedKeys {
    keys: HashMap<String, DecodingKey>,
    default_key: Option<DecodingKey>,
    last_updated: Instant,
}

impl CachedKeys {
    fn is_expired(&self) -> bool {
        self.last_updated.elapsed() >= JWKS_CACHE_DURATION
    }

    fn lookup(&self, kid: Option<&str>) -> Option<DecodingKey> {
        match kid {
            Some(kid) => self.keys.get(kid).cloned(),
            None => self.default_key.clone(),
        }
    }
}

/// Validates user JWTs with keys fetched from the identity provider.
pub struct JwksCache {
    client: reqwest::Client,
    base_url: String,
    audience: String,
    cached: RwLock<CachedKeys>,
}

impl JwksCache {
    /// Create an empty cache; keys are fetched on first use.
    #[must_use]
    pub fn new(base_url: impl Into<String>, audience: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(JWKS_FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into(),
            audience: audience.into(),
            cached: RwLock::new(CachedKeys {
                keys: HashMap::new(),
                default_key: None,
                last_updated: Instant::now()
                    .checked_sub(JWKS_CACHE_DURATION)
                    .unwrap_or_else(Instant::now),
            }),
        }
    }

    /// Validate a token's signature, audience, issuer and expiry.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Unauthenticated` for any invalid token and
    /// `ApiError::Internal` if the key set cannot be fetched.
    pub async fn validate(&self, token: &str) -> Result<JwtClaims, ApiError> {
        let header = decode_header(token).map_err(|e| {
            tracing::debug!(error = %e, "Failed to decode JWT header");
            ApiError::Unauthenticated
        })?;

        let decoding_key = self.decoding_key(header.kid.as_deref()).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[&self.base_url]);

        let token_data = decode::<JwtClaims>(token, &decoding_key, &validation).map_err(|e| {
            tracing::debug!(error = %e, "JWT validation failed");
            ApiError::Unauthenticated
        })?;

        Ok(token_data.claims)
    }

    async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, ApiError> {
        {
            let cached = self.cached.read().await;
            if !cached.is_expired() {
                if let Some(key) = cached.lookup(kid) {
                    return Ok(key);
                }
            }
        }

        let jwks = self.fetch().await?;

        let mut cached = self.cached.write().await;
        cached.keys.clear();
        cached.default_key = None;
        cached.last_updated = Instant::now();

        for jwk in &jwks.keys {
            if let Some(decoding_key) = jwk_to_decoding_key(jwk) {
                if let Some(key_kid) = &jwk.kid {
                    cached.keys.insert(key_kid.clone(), decoding_key.clone());
                }
                if cached.default_key.is_none() {
                    cached.default_key = Some(decoding_key);
                }
            }
        }

        cached.lookup(kid).ok_or(ApiError::Unauthenticated)
    }

    async fn fetch(&self) -> Result<Jwks, ApiError> {
        let jwks_url = format!("{}/.well-known/jwks.json", self.base_url);
        tracing::debug!(url = %jwks_url, "Fetching JWKS");

        let response = self.client.get(&jwks_url).send().await.map_err(|e| {
            tracing::error!(error = %e, url = %jwks_url, "Failed to fetch JWKS");
            ApiError::Internal("failed to fetch authentication keys".into())
        })?;

        if !response.status().is_success() {
            tracing::error!(
                status = %response.status(),
                url = %jwks_url,
                "JWKS fetch returned non-success status"
            );
            return Err(ApiError::Internal(
                "failed to fetch authentication keys".into(),
            ));
        }

        let jwks: Jwks = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to parse JWKS response");
            ApiError::Internal("failed to parse authentication keys".into())
        })?;

        tracing::info!(keys_count = jwks.keys.len(), "JWKS fetched");
        Ok(jwks)
    }
}

/// Convert a JWK to a `DecodingKey`. Only RSA keys are supported.
fn jwk_to_decoding_key(jwk: &Jwk) -> Option<DecodingKey> {
    if jwk.kty != "RSA" {
        tracing::debug!(kty = %jwk.kty, "Skipping non-RSA JWK");
        return None;
    }

    let n = jwk.n.as_ref()?;
    let e = jwk.e.as_ref()?;

    DecodingKey::from_rsa_components(n, e).ok()
}
