//! iap-guard HTTP API service.
//!
//! This crate provides the HTTP API for in-app purchase protection:
//!
//! - Synchronous receipt validation at purchase time
//! - Signed server notification processing (renewals, expiries, refunds)
//! - Fraud scoring and refund abuse detection
//! - Admin review of flagged transactions
//!
//! # Authentication
//!
//! 1. **User JWT tokens** - for client requests, validated against the
//!    identity provider's JWKS
//! 2. **Admin bearer tokens** - checked by an [`auth::AdminAuthorizer`]
//! 3. **Signed payloads** - server notifications carry their own signature

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Axum handlers all return Result
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::unused_async)]

pub mod apple;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod decoder;
pub mod error;
pub mod handlers;
pub mod locks;
pub mod routes;
pub mod services;
pub mod signature;
pub mod state;

#[cfg(test)]
mod testing;

pub use apple::{AppStoreClient, ReceiptVerifier, VerifyError};
pub use config::ServiceConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use signature::{SignatureVerifier, VerifiedPayload};
pub use state::{AppState, Collaborators};
