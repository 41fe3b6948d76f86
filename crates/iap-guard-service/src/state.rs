//! Application state.

use std::sync::Arc;
use std::time::Duration;

use iap_guard_core::{GuardError, ProductCatalog};
use iap_guard_store::Store;

use crate::apple::{AppStoreClient, ReceiptVerifier};
use crate::auth::{AdminAuthorizer, JwksCache, StaticKeyAuthorizer};
use crate::config::ServiceConfig;
use crate::locks::UserLocks;
use crate::services::{
    AdminReview, EntitlementUpdater, LogNoticeSender, NoticeSender, ReceiptValidator,
    RefundAbuseDetector, WebhookProcessor,
};
use crate::signature::SignatureVerifier;

/// Application state shared across handlers.
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Entitlement writer (also serves `/v1/entitlements/me`).
    pub entitlements: EntitlementUpdater,

    /// Synchronous purchase path.
    pub validator: ReceiptValidator,

    /// Server notification pipeline.
    pub webhooks: WebhookProcessor,

    /// Admin operations.
    pub review: AdminReview,

    /// Admin capability check.
    pub admin: Arc<dyn AdminAuthorizer>,

    /// User token validation.
    pub jwks: JwksCache,
}

/// Collaborators that tests and embedders may replace.
pub struct Collaborators {
    /// Receipt verification service.
    pub verifier: Arc<dyn ReceiptVerifier>,
    /// Notification signature check.
    pub signature: SignatureVerifier,
    /// User notice delivery.
    pub notices: Arc<dyn NoticeSender>,
    /// Admin capability check.
    pub admin: Arc<dyn AdminAuthorizer>,
    /// Product catalog.
    pub catalog: ProductCatalog,
}

impl Collaborators {
    /// Build the production collaborators from configuration.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::Configuration` if the verification client or the
    /// notification key cannot be built.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, GuardError> {
        let client = AppStoreClient::new(
            &config.verify_receipt_url,
            &config.verify_receipt_sandbox_url,
            config.app_store_shared_secret.clone(),
            Duration::from_secs(config.verify_timeout_seconds),
        )
        .map_err(|e| GuardError::Configuration(format!("verification client: {e}")))?;

        if config.app_store_shared_secret.is_none() {
            tracing::warn!("App Store shared secret not configured - subscription receipts may fail");
        }
        if config.admin_api_key.is_none() {
            tracing::warn!("Admin API key not configured - admin endpoints are closed");
        }

        let signature = SignatureVerifier::from_config(config)
            .map_err(|e| GuardError::Configuration(format!("webhook key: {e}")))?;

        Ok(Self {
            verifier: Arc::new(client),
            signature,
            notices: Arc::new(LogNoticeSender),
            admin: Arc::new(StaticKeyAuthorizer::new(config.admin_api_key.clone())),
            catalog: ProductCatalog::default(),
        })
    }
}

impl AppState {
    /// Wire the services together.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig, collaborators: Collaborators) -> Self {
        let locks = Arc::new(UserLocks::default());
        let entitlements = EntitlementUpdater::new(store.clone(), Arc::new(collaborators.catalog));
        let refunds = RefundAbuseDetector::new(store.clone(), entitlements.clone(), locks.clone());

        let validator = ReceiptValidator::new(
            collaborators.verifier,
            store.clone(),
            entitlements.clone(),
            config.fraud_policy.clone(),
            locks.clone(),
        );
        let webhooks = WebhookProcessor::new(
            collaborators.signature,
            store.clone(),
            entitlements.clone(),
            refunds,
            collaborators.notices,
            locks.clone(),
        );
        let review = AdminReview::new(store.clone(), entitlements.clone(), locks);
        let jwks = JwksCache::new(&config.auth_base_url, &config.auth_audience);

        Self {
            store,
            config,
            entitlements,
            validator,
            webhooks,
            review,
            admin: collaborators.admin,
            jwks,
        }
    }

    /// Build state with production collaborators.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::Configuration` if a collaborator cannot be built.
    pub fn from_config(store: Arc<dyn Store>, config: ServiceConfig) -> Result<Self, GuardError> {
        let collaborators = Collaborators::from_config(&config)?;
        Ok(Self::new(store, config, collaborators))
    }
}
