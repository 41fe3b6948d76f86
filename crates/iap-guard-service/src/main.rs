//! iap-guard service - in-app purchase protection over HTTP.
//!
//! This is the main entry point for the iap-guard service.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use iap_guard_service::{create_router, AppState, ServiceConfig};
use iap_guard_store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,iap_guard=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting iap-guard service");

    let config = ServiceConfig::from_env()?;

    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir,
        shared_secret_configured = config.app_store_shared_secret.is_some(),
        webhook_key_configured = config.webhook_public_key_pem.is_some()
            || config.webhook_signing_secret.is_some(),
        review_threshold = config.fraud_policy.review_threshold,
        hard_reject_threshold = config.fraud_policy.hard_reject_threshold,
        "Service configuration loaded"
    );

    let store = open_store(&config)?;
    let state = AppState::from_config(store, config.clone())?;

    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(feature = "rocksdb-backend")]
fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    tracing::info!(path = %config.data_dir, "Opening RocksDB store");
    Ok(Arc::new(iap_guard_store::RocksStore::open(&config.data_dir)?))
}

#[cfg(not(feature = "rocksdb-backend"))]
fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    tracing::warn!(
        data_dir = %config.data_dir,
        "Built without rocksdb-backend - using in-memory store, data is lost on restart"
    );
    Ok(Arc::new(iap_guard_store::MemoryStore::new()))
}
