//! App Store integration.
//!
//! - `verifyReceipt` client used by the synchronous purchase path
//! - Wire types for receipts and signed server notifications

pub mod client;
pub mod types;

pub use client::{AppStoreClient, ReceiptVerifier, VerifyError};
pub use types::*;
