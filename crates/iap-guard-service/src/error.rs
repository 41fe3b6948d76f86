//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use iap_guard_core::GuardError;

/// API error type.
///
/// Each variant maps to one wire `code`. `reason` lets clients tell apart
/// failures that share a code (e.g. a fraud block from a plain permission
/// failure).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or invalid credentials.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Valid credentials but the action is not allowed.
    #[error("{message}")]
    PermissionDenied {
        /// Human-readable message.
        message: String,
        /// Machine-readable reason.
        reason: Option<&'static str>,
    },

    /// Bad request - invalid input.
    #[error("{message}")]
    InvalidArgument {
        /// Human-readable message.
        message: String,
        /// Machine-readable reason.
        reason: Option<&'static str>,
    },

    /// The resource already exists or is in a terminal state.
    #[error("{message}")]
    AlreadyExists {
        /// Human-readable message.
        message: String,
        /// Machine-readable reason.
        reason: Option<&'static str>,
    },

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Internal server error. The message is logged, never returned.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Invalid argument without a reason tag.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
            reason: None,
        }
    }

    /// Permission denied without a reason tag.
    #[must_use]
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
            reason: None,
        }
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

fn reason_details(reason: Option<&'static str>) -> Option<serde_json::Value> {
    reason.map(|r| serde_json::json!({ "reason": r }))
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match self {
            Self::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "missing or invalid credentials".to_string(),
                None,
            ),
            Self::PermissionDenied { message, reason } => (
                StatusCode::FORBIDDEN,
                "permission-denied",
                message,
                reason_details(reason),
            ),
            Self::InvalidArgument { message, reason } => (
                StatusCode::BAD_REQUEST,
                "invalid-argument",
                message,
                reason_details(reason),
            ),
            Self::AlreadyExists { message, reason } => (
                StatusCode::CONFLICT,
                "already-exists",
                message,
                reason_details(reason),
            ),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, "not-found", message, None),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code,
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<GuardError> for ApiError {
    fn from(err: GuardError) -> Self {
        let message = err.to_string();
        match err {
            GuardError::InvalidReceipt { .. } => Self::InvalidArgument {
                message,
                reason: Some("invalid_receipt"),
            },
            GuardError::ProductMismatch { .. } => Self::InvalidArgument {
                message,
                reason: Some("product_mismatch"),
            },
            GuardError::UnknownProduct(_) => Self::InvalidArgument {
                message,
                reason: Some("unknown_product"),
            },
            GuardError::InvalidId(_) => Self::invalid_argument(message),
            GuardError::FraudRejected { .. } => Self::PermissionDenied {
                message: "purchase blocked by security checks".into(),
                reason: Some("fraud_rejected"),
            },
            GuardError::DuplicateReceipt { .. } => Self::AlreadyExists {
                message,
                reason: Some("duplicate_receipt"),
            },
            GuardError::AlreadyReviewed { .. } => Self::AlreadyExists {
                message,
                reason: Some("already_reviewed"),
            },
            GuardError::NotFound { .. } => Self::NotFound(message),
            GuardError::ExternalService { .. }
            | GuardError::Storage(_)
            | GuardError::Configuration(_) => Self::Internal(message),
        }
    }
}

impl From<iap_guard_store::StoreError> for ApiError {
    fn from(err: iap_guard_store::StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}
