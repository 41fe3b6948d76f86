//! Common test utilities for iap-guard integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::http::header::AUTHORIZATION;
use axum::Router;
use axum_test::{TestResponse, TestServer};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use iap_guard_core::{FraudPolicy, UserId};
use iap_guard_service::{create_router, AppState, ServiceConfig};
use iap_guard_store::MemoryStore;

/// HS256 secret the harness signs notifications with.
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

/// Admin bearer token accepted by the harness.
pub const ADMIN_KEY: &str = "test-admin-key";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Stand-in for the receipt verification service.
    pub apple: MockServer,
    /// The store behind the service, for direct assertions.
    pub store: Arc<MemoryStore>,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
}

impl TestHarness {
    /// Create a harness with the default fraud policy.
    pub async fn new() -> Self {
        Self::with_policy(FraudPolicy::default()).await
    }

    /// Create a harness with a custom fraud policy.
    pub async fn with_policy(fraud_policy: FraudPolicy) -> Self {
        let apple = MockServer::start().await;
        let store = Arc::new(MemoryStore::new());

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            auth_base_url: "http://localhost".into(),
            allow_test_tokens: true,
            admin_api_key: Some(ADMIN_KEY.into()),
            app_store_shared_secret: Some("shared-secret".into()),
            verify_receipt_url: format!("{}/verifyReceipt", apple.uri()),
            verify_receipt_sandbox_url: format!("{}/sandbox/verifyReceipt", apple.uri()),
            verify_timeout_seconds: 5,
            webhook_signing_secret: Some(WEBHOOK_SECRET.into()),
            fraud_policy,
            cors_origins: vec!["*".into()],
            ..ServiceConfig::default()
        };

        let state = AppState::from_config(store.clone(), config).expect("Failed to build state");
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            apple,
            store,
            test_user_id: UserId::generate(),
        }
    }

    /// Get the authorization header for user authentication.
    pub fn user_auth_header(&self) -> String {
        user_auth_header(&self.test_user_id)
    }

    /// Get the authorization header for admin requests.
    pub fn admin_auth_header() -> String {
        format!("Bearer {ADMIN_KEY}")
    }

    // ========================================================================
    // Receipt verification
    // ========================================================================

    /// Answer `receipt` with a successful verification containing `entries`.
    pub async fn mock_receipt(&self, receipt: &str, entries: Vec<Value>) {
        Mock::given(method("POST"))
            .and(path("/verifyReceipt"))
            .and(body_partial_json(json!({ "receipt-data": receipt })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": 0,
                "environment": "Production",
                "latest_receipt_info": entries
            })))
            .mount(&self.apple)
            .await;
    }

    /// Answer `receipt` with a failure status.
    pub async fn mock_receipt_status(&self, receipt: &str, status: i64) {
        Mock::given(method("POST"))
            .and(path("/verifyReceipt"))
            .and(body_partial_json(json!({ "receipt-data": receipt })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": status })))
            .mount(&self.apple)
            .await;
    }

    /// Validate `receipt` for `product_id` as `user_id`.
    pub async fn validate(
        &self,
        user_id: &UserId,
        receipt: &str,
        product_id: &str,
        jailbreak_risk: Option<f64>,
    ) -> TestResponse {
        self.server
            .post("/v1/receipts/validate")
            .add_header(AUTHORIZATION, user_auth_header(user_id))
            .json(&json!({
                "receipt_data": receipt,
                "product_id": product_id,
                "jailbreak_risk": jailbreak_risk
            }))
            .await
    }

    /// Mock and validate a fresh subscription purchase in one step.
    pub async fn purchase(&self, user_id: &UserId, transaction_id: &str) -> TestResponse {
        let receipt = format!("receipt-{transaction_id}");
        self.mock_receipt(&receipt, vec![in_app(transaction_id, "premium_monthly")])
            .await;
        self.validate(user_id, &receipt, "premium_monthly", None).await
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    /// Post a signed notification.
    pub async fn notify(
        &self,
        notification_type: &str,
        subtype: Option<&str>,
        uuid: &str,
        transaction: &Value,
    ) -> TestResponse {
        let payload = json!({
            "notificationType": notification_type,
            "subtype": subtype,
            "notificationUUID": uuid,
            "data": {
                "environment": "Production",
                "signedTransactionInfo": sign(transaction, WEBHOOK_SECRET)
            }
        });
        self.server
            .post("/webhooks/app-store")
            .json(&json!({ "signedPayload": sign(&payload, WEBHOOK_SECRET) }))
            .await
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Fetch a user's entitlement via the client API.
    pub async fn entitlement(&self, user_id: &UserId) -> Value {
        let response = self
            .server
            .get("/v1/entitlements/me")
            .add_header(AUTHORIZATION, user_auth_header(user_id))
            .await;
        response.assert_status_ok();
        response.json()
    }

    /// Fetch a user's risk summary via the admin API.
    pub async fn summary(&self, user_id: &UserId) -> Value {
        let response = self
            .server
            .get(&format!("/v1/admin/users/{user_id}"))
            .add_header(AUTHORIZATION, Self::admin_auth_header())
            .await;
        response.assert_status_ok();
        response.json()
    }
}

/// Bearer header for a test user.
pub fn user_auth_header(user_id: &UserId) -> String {
    format!("Bearer test-token:{user_id}")
}

/// A `verifyReceipt` in-app entry purchased now, expiring in 30 days.
pub fn in_app(transaction_id: &str, product_id: &str) -> Value {
    let now = Utc::now().timestamp_millis();
    json!({
        "transaction_id": transaction_id,
        "original_transaction_id": transaction_id,
        "product_id": product_id,
        "purchase_date_ms": now.to_string(),
        "expires_date_ms": (now + Duration::days(30).num_milliseconds()).to_string()
    })
}

/// Claims of a `signedTransactionInfo` token.
pub fn transaction(transaction_id: &str, original_transaction_id: &str, expires_in_days: i64) -> Value {
    json!({
        "transactionId": transaction_id,
        "originalTransactionId": original_transaction_id,
        "productId": "premium_monthly",
        "purchaseDate": Utc::now().timestamp_millis(),
        "expiresDate": (Utc::now() + Duration::days(expires_in_days)).timestamp_millis(),
        "type": "Auto-Renewable Subscription"
    })
}

/// Sign claims with HS256.
pub fn sign(claims: &Value, secret: &str) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("Failed to sign claims")
}
