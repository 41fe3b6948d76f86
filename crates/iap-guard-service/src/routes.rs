//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, health, receipts, webhooks};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for client API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for admin endpoints.
const ADMIN_MAX_CONCURRENT_REQUESTS: usize = 10;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Client (user JWT auth)
/// - `POST /v1/receipts/validate` - Validate a purchase receipt
/// - `GET /v1/entitlements/me` - Current entitlement
///
/// ## Admin (admin bearer token)
/// - `GET /v1/admin/flagged` - Pending flagged transactions
/// - `POST /v1/admin/flagged/review` - Approve or reject
/// - `GET /v1/admin/refunds` - Refund history
/// - `GET /v1/admin/alerts` - Unacknowledged alerts
/// - `GET /v1/admin/users/:user_id` - Per-user risk summary
///
/// ## Webhooks (signature verification)
/// - `POST /webhooks/app-store` - App Store server notifications
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let state = Arc::new(state);

    let admin_routes = Router::new()
        .route("/flagged", get(admin::list_flagged))
        .route("/flagged/review", post(admin::review_flagged))
        .route("/refunds", get(admin::list_refunds))
        .route("/alerts", get(admin::list_alerts))
        .route("/users/:user_id", get(admin::get_user_summary))
        .layer(ConcurrencyLimitLayer::new(ADMIN_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        .route("/receipts/validate", post(receipts::validate_receipt))
        .route("/entitlements/me", get(receipts::get_entitlement))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        .nest("/admin", admin_routes);

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        // Webhooks (no rate limit - redelivered by the platform)
        .route("/webhooks/app-store", post(webhooks::app_store_webhook))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
