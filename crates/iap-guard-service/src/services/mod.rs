//! Domain services.
//!
//! Each service owns one step of the purchase lifecycle and receives its
//! collaborators (store, locks, other services) at construction.

pub mod entitlements;
pub mod notices;
pub mod receipts;
pub mod refunds;
pub mod review;
pub mod webhooks;

pub use entitlements::EntitlementUpdater;
pub use notices::{LogNoticeSender, NoticeSender};
pub use receipts::{ReceiptValidator, ValidationOutcome, ValidationRequest};
pub use refunds::{RefundAbuseDetector, RefundEvent, RefundOutcome};
pub use review::{AdminReview, RefundReport, UserRefundCount, UserRiskSummary};
pub use webhooks::{status_for, WebhookError, WebhookOutcome, WebhookProcessor};
