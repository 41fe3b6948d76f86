//! Service configuration.

use serde::Deserialize;
use std::path::Path;

use iap_guard_core::{FraudPolicy, GuardError};

/// Production receipt verification endpoint.
pub const APPLE_VERIFY_RECEIPT_URL: &str = "https://buy.itunes.apple.com/verifyReceipt";

/// Sandbox receipt verification endpoint.
pub const APPLE_SANDBOX_VERIFY_RECEIPT_URL: &str =
    "https://sandbox.itunes.apple.com/verifyReceipt";

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to the data directory (default: "/data/iap-guard").
    pub data_dir: String,

    /// JWT issuer base URL; JWKS is fetched from `/.well-known/jwks.json`.
    pub auth_base_url: String,

    /// Expected JWT audience (default: "iap-guard").
    pub auth_audience: String,

    /// Accept `test-token:<uuid>` bearer tokens. Never enable in production.
    pub allow_test_tokens: bool,

    /// Admin API key. The admin surface is closed when unset.
    pub admin_api_key: Option<String>,

    /// App Store shared secret sent with receipt verification requests.
    pub app_store_shared_secret: Option<String>,

    /// Primary receipt verification endpoint.
    pub verify_receipt_url: String,

    /// Sandbox endpoint used when the primary answers status 21007.
    pub verify_receipt_sandbox_url: String,

    /// Timeout for each verification request in seconds.
    pub verify_timeout_seconds: u64,

    /// HS256 secret for signed notifications.
    pub webhook_signing_secret: Option<String>,

    /// ES256 public key (PEM) for signed notifications.
    pub webhook_public_key_pem: Option<String>,

    /// Expected bundle id in notifications. Not enforced when unset.
    pub bundle_id: Option<String>,

    /// Fraud scoring weights and thresholds.
    pub fraud_policy: FraudPolicy,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

/// App Store secrets file structure.
#[derive(Debug, Default, Deserialize)]
struct AppStoreSecrets {
    #[serde(default)]
    shared_secret: Option<String>,
    #[serde(default)]
    webhook_signing_secret: Option<String>,
    #[serde(default)]
    webhook_public_key_pem: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::Configuration` if the fraud policy file cannot be
    /// read or the resulting policy is invalid.
    pub fn from_env() -> Result<Self, GuardError> {
        let secrets = load_app_store_secrets();
        let defaults = Self::default();

        let mut fraud_policy = match std::env::var("FRAUD_POLICY_FILE") {
            Ok(path) => load_fraud_policy(&path)?,
            Err(_) => FraudPolicy::default(),
        };
        if let Some(review) = env_parse("FRAUD_REVIEW_THRESHOLD") {
            fraud_policy.review_threshold = review;
        }
        if let Some(reject) = env_parse("FRAUD_REJECT_THRESHOLD") {
            fraud_policy.hard_reject_threshold = reject;
        }
        fraud_policy.validate()?;

        Ok(Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            auth_base_url: std::env::var("AUTH_BASE_URL").unwrap_or(defaults.auth_base_url),
            auth_audience: std::env::var("AUTH_AUDIENCE").unwrap_or(defaults.auth_audience),
            allow_test_tokens: env_parse("ALLOW_TEST_TOKENS").unwrap_or(false),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            app_store_shared_secret: secrets
                .shared_secret
                .or_else(|| std::env::var("APP_STORE_SHARED_SECRET").ok()),
            verify_receipt_url: std::env::var("VERIFY_RECEIPT_URL")
                .unwrap_or(defaults.verify_receipt_url),
            verify_receipt_sandbox_url: std::env::var("VERIFY_RECEIPT_SANDBOX_URL")
                .unwrap_or(defaults.verify_receipt_sandbox_url),
            verify_timeout_seconds: env_parse("VERIFY_TIMEOUT_SECONDS")
                .unwrap_or(defaults.verify_timeout_seconds),
            webhook_signing_secret: secrets
                .webhook_signing_secret
                .or_else(|| std::env::var("WEBHOOK_SIGNING_SECRET").ok()),
            webhook_public_key_pem: secrets
                .webhook_public_key_pem
                .or_else(|| std::env::var("WEBHOOK_PUBLIC_KEY_PEM").ok()),
            bundle_id: std::env::var("BUNDLE_ID").ok(),
            fraud_policy,
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .collect()
                })
                .unwrap_or(defaults.cors_origins),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Load App Store secrets from the first secrets file found.
fn load_app_store_secrets() -> AppStoreSecrets {
    let secret_paths = [
        ".secrets/appstore.json",
        "iap-guard/.secrets/appstore.json",
        "../.secrets/appstore.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<AppStoreSecrets>(path) {
            tracing::info!(path = %path, "Loaded App Store secrets from file");
            return secrets;
        }
    }

    tracing::debug!("App Store secrets file not found, using environment variables");
    AppStoreSecrets::default()
}

/// Load a fraud policy from a JSON file. Missing fields take their defaults.
///
/// # Errors
///
/// Returns `GuardError::Configuration` if the file cannot be read or parsed.
pub fn load_fraud_policy(path: impl AsRef<Path>) -> Result<FraudPolicy, GuardError> {
    let path = path.as_ref();
    let policy: FraudPolicy = load_secrets_file(path).map_err(|e| {
        GuardError::Configuration(format!("fraud policy {}: {e}", path.display()))
    })?;
    tracing::info!(path = %path.display(), "Loaded fraud policy");
    Ok(policy)
}

/// Load a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(
    path: impl AsRef<Path>,
) -> Result<T, std::io::Error> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/iap-guard".into(),
            auth_base_url: "https://auth.example.com".into(),
            auth_audience: "iap-guard".into(),
            allow_test_tokens: false,
            admin_api_key: None,
            app_store_shared_secret: None,
            verify_receipt_url: APPLE_VERIFY_RECEIPT_URL.into(),
            verify_receipt_sandbox_url: APPLE_SANDBOX_VERIFY_RECEIPT_URL.into(),
            verify_timeout_seconds: 10,
            webhook_signing_secret: None,
            webhook_public_key_pem: None,
            bundle_id: None,
            fraud_policy: FraudPolicy::default(),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
        }
    }
}
