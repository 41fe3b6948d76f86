//! Signature verification for inbound server notifications.
//!
//! The only way to obtain a [`VerifiedPayload`] is [`SignatureVerifier::verify`],
//! so notification decoding cannot run on claims whose signature was not
//! checked.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::apple::NotificationEnvelope;
use crate::config::ServiceConfig;

/// Why a notification was not accepted as authentic.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// The body is not a `{"signedPayload": ...}` envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// No verification key is configured; every notification is refused.
    #[error("no notification verification key configured")]
    NotConfigured,

    /// The configured key could not be parsed.
    #[error("invalid verification key: {0}")]
    Key(String),

    /// Signature, algorithm or token structure check failed.
    #[error("signature verification failed: {0}")]
    Invalid(String),

    /// The payload is for a different app.
    #[error("bundle id mismatch: expected {expected}, got {actual:?}")]
    BundleMismatch {
        /// Configured bundle id.
        expected: String,
        /// Bundle id in the payload.
        actual: Option<String>,
    },
}

/// Claims of a notification whose signature has been verified.
#[derive(Debug, Clone)]
pub struct VerifiedPayload {
    claims: serde_json::Value,
}

impl VerifiedPayload {
    /// The verified claims.
    #[must_use]
    pub fn claims(&self) -> &serde_json::Value {
        &self.claims
    }
}

/// Verifies signed notification envelopes against a pinned key.
pub struct SignatureVerifier {
    key: Option<(DecodingKey, Algorithm)>,
    bundle_id: Option<String>,
}

impl SignatureVerifier {
    /// Verifier for HS256-signed payloads.
    #[must_use]
    pub fn hs256(secret: &str, bundle_id: Option<String>) -> Self {
        Self {
            key: Some((DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256)),
            bundle_id,
        }
    }

    /// Verifier for ES256-signed payloads with a PEM public key.
    ///
    /// # Errors
    ///
    /// Returns `SignatureError::Key` if the PEM cannot be parsed.
    pub fn es256_pem(pem: &str, bundle_id: Option<String>) -> Result<Self, SignatureError> {
        let key = DecodingKey::from_ec_pem(pem.as_bytes())
            .map_err(|e| SignatureError::Key(e.to_string()))?;
        Ok(Self {
            key: Some((key, Algorithm::ES256)),
            bundle_id,
        })
    }

    /// Verifier that refuses everything.
    #[must_use]
    pub fn unconfigured() -> Self {
        Self {
            key: None,
            bundle_id: None,
        }
    }

    /// Build from configuration. The ES256 key wins when both are set.
    ///
    /// # Errors
    ///
    /// Returns `SignatureError::Key` if the configured PEM is invalid.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, SignatureError> {
        let bundle_id = config.bundle_id.clone();
        if let Some(pem) = &config.webhook_public_key_pem {
            return Self::es256_pem(pem, bundle_id);
        }
        if let Some(secret) = &config.webhook_signing_secret {
            return Ok(Self::hs256(secret, bundle_id));
        }
        tracing::warn!("No webhook verification key configured - notifications will be rejected");
        Ok(Self::unconfigured())
    }

    /// Verify a raw request body.
    ///
    /// # Errors
    ///
    /// Returns a `SignatureError` for any envelope, key, signature or bundle
    /// failure.
    pub fn verify(&self, body: &[u8]) -> Result<VerifiedPayload, SignatureError> {
        let envelope: NotificationEnvelope = serde_json::from_slice(body)
            .map_err(|e| SignatureError::MalformedEnvelope(e.to_string()))?;

        let (key, algorithm) = self.key.as_ref().ok_or(SignatureError::NotConfigured)?;

        // Notifications carry no exp/aud; authenticity comes from the key alone.
        let mut validation = Validation::new(*algorithm);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_aud = false;

        let token = decode::<serde_json::Value>(&envelope.signed_payload, key, &validation)
            .map_err(|e| SignatureError::Invalid(e.to_string()))?;
        let claims = token.claims;

        if let Some(expected) = &self.bundle_id {
            let actual = claims
                .pointer("/data/bundleId")
                .and_then(serde_json::Value::as_str);
            if actual != Some(expected.as_str()) {
                return Err(SignatureError::BundleMismatch {
                    expected: expected.clone(),
                    actual: actual.map(str::to_string),
                });
            }
        }

        Ok(VerifiedPayload { claims })
    }
}
