//! Error types for iap-guard.

use crate::ids::IdError;

/// Result type for iap-guard operations.
pub type Result<T> = std::result::Result<T, GuardError>;

/// Errors that can occur in iap-guard operations.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// The payment platform did not accept the receipt.
    #[error("invalid receipt: {reason}")]
    InvalidReceipt {
        /// Why the receipt was refused.
        reason: String,
    },

    /// The receipt is for a different product than claimed.
    #[error("product mismatch: claimed {claimed}, receipt has {actual}")]
    ProductMismatch {
        /// Product the client claimed.
        claimed: String,
        /// Product found in the receipt.
        actual: String,
    },

    /// The product is not in the catalog.
    #[error("unknown product: {0}")]
    UnknownProduct(String),

    /// The fraud score reached the hard-reject threshold.
    #[error("purchase rejected by fraud checks (score {score})")]
    FraudRejected {
        /// Composite fraud score.
        score: u8,
    },

    /// The transaction was already validated.
    #[error("duplicate receipt: {transaction_id}")]
    DuplicateReceipt {
        /// Transaction that was already recorded.
        transaction_id: String,
    },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Key that was looked up.
        id: String,
    },

    /// A flagged transaction already has a decision.
    #[error("flagged transaction already reviewed: {transaction_id}")]
    AlreadyReviewed {
        /// The reviewed transaction.
        transaction_id: String,
    },

    /// External service error (verification service).
    #[error("external service error: {service} - {message}")]
    ExternalService {
        /// The service that failed.
        service: String,
        /// Error message.
        message: String,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}
