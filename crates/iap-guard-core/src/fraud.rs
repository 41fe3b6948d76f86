//! Audit and review records.
//!
//! Everything in this module is append-only except `FlaggedTransaction`
//! (reviewed once) and `AdminAlert` (acknowledged once).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{RecordId, TransactionId, UserId};

/// Severity of a fraud log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational.
    Low,
    /// Worth a look.
    Medium,
    /// Action was taken against the user.
    High,
    /// Purchase blocked or abuse threshold crossed.
    Critical,
}

/// Kinds of fraud log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FraudEventType {
    /// Receipt rejected by the fraud scorer.
    FraudRejected,
    /// Receipt accepted but queued for human review.
    FlaggedForReview,
    /// Refund count crossed the abuse threshold.
    RefundAbuse,
    /// Account suspended.
    AccountSuspended,
    /// Administrator rejected a flagged transaction.
    ReviewRejected,
}

/// An append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudLogEntry {
    /// Entry identifier (time-ordered).
    pub id: RecordId,
    /// Affected user.
    pub user_id: UserId,
    /// Transaction involved, if any.
    pub transaction_id: Option<TransactionId>,
    /// What happened.
    pub event_type: FraudEventType,
    /// Structured context (score breakdown, counts).
    pub details: serde_json::Value,
    /// How serious it is.
    pub severity: Severity,
    /// When it was recorded.
    pub timestamp: DateTime<Utc>,
}

impl FraudLogEntry {
    /// Create a new entry timestamped now.
    #[must_use]
    pub fn new(
        user_id: UserId,
        transaction_id: Option<TransactionId>,
        event_type: FraudEventType,
        severity: Severity,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: RecordId::generate(),
            user_id,
            transaction_id,
            event_type,
            details,
            severity,
            timestamp: Utc::now(),
        }
    }
}

/// A confirmed refund or revocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundHistoryEntry {
    /// Entry identifier (time-ordered).
    pub id: RecordId,
    /// User who received the refund.
    pub user_id: UserId,
    /// Refunded transaction.
    pub transaction_id: TransactionId,
    /// Refunded product.
    pub product_id: String,
    /// When the refund was processed.
    pub timestamp: DateTime<Utc>,
}

impl RefundHistoryEntry {
    /// Create a new entry timestamped now.
    #[must_use]
    pub fn new(user_id: UserId, transaction_id: TransactionId, product_id: String) -> Self {
        Self {
            id: RecordId::generate(),
            user_id,
            transaction_id,
            product_id,
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of a human review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    /// The transaction is legitimate.
    Approved,
    /// The transaction is fraudulent.
    Rejected,
}

/// A transaction queued for human review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlaggedTransaction {
    /// Flagged transaction.
    pub transaction_id: TransactionId,
    /// Owner of the transaction.
    pub user_id: UserId,
    /// Product purchased.
    pub product_id: String,
    /// Score that triggered the flag.
    pub fraud_score: u8,
    /// Whether a decision has been recorded.
    pub reviewed: bool,
    /// Decision, once reviewed.
    pub decision: Option<ReviewDecision>,
    /// Free-form note from the reviewer.
    pub admin_note: Option<String>,
    /// Administrator who made the decision.
    pub reviewed_by: Option<String>,
    /// When the decision was recorded.
    pub reviewed_at: Option<DateTime<Utc>>,
    /// When the flag was raised.
    pub created_at: DateTime<Utc>,
}

impl FlaggedTransaction {
    /// Create a pending flag.
    #[must_use]
    pub fn pending(
        transaction_id: TransactionId,
        user_id: UserId,
        product_id: String,
        fraud_score: u8,
    ) -> Self {
        Self {
            transaction_id,
            user_id,
            product_id,
            fraud_score,
            reviewed: false,
            decision: None,
            admin_note: None,
            reviewed_by: None,
            reviewed_at: None,
            created_at: Utc::now(),
        }
    }

    /// Record a decision. Returns `false` if already reviewed.
    pub fn review(
        &mut self,
        decision: ReviewDecision,
        admin_note: Option<String>,
        reviewed_by: &str,
    ) -> bool {
        if self.reviewed {
            return false;
        }
        self.reviewed = true;
        self.decision = Some(decision);
        self.admin_note = admin_note;
        self.reviewed_by = Some(reviewed_by.to_string());
        self.reviewed_at = Some(Utc::now());
        true
    }
}

/// Priority of an administrator alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    /// Can wait.
    Low,
    /// Look today.
    Medium,
    /// Look soon.
    High,
    /// Look now.
    Critical,
}

/// An alert for the admin dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminAlert {
    /// Alert identifier (time-ordered).
    pub alert_id: RecordId,
    /// Alert category (e.g. `refund_abuse`).
    pub alert_type: String,
    /// User the alert is about, if any.
    pub user_id: Option<UserId>,
    /// Structured context.
    pub details: serde_json::Value,
    /// Urgency.
    pub priority: AlertPriority,
    /// Whether an administrator has acknowledged it.
    pub acknowledged: bool,
    /// When it was raised.
    pub timestamp: DateTime<Utc>,
}

impl AdminAlert {
    /// Create an unacknowledged alert timestamped now.
    #[must_use]
    pub fn new(
        alert_type: impl Into<String>,
        user_id: Option<UserId>,
        priority: AlertPriority,
        details: serde_json::Value,
    ) -> Self {
        Self {
            alert_id: RecordId::generate(),
            alert_type: alert_type.into(),
            user_id,
            details,
            priority,
            acknowledged: false,
            timestamp: Utc::now(),
        }
    }
}

/// Kind of user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// The subscription price is going up.
    PriceIncrease,
}

/// A notice to surface to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserNotice {
    /// Notice identifier (time-ordered).
    pub notice_id: RecordId,
    /// Recipient.
    pub user_id: UserId,
    /// What the notice is about.
    pub kind: NoticeKind,
    /// Product concerned.
    pub product_id: String,
    /// Platform subtype (e.g. `PENDING`, `ACCEPTED`).
    pub subtype: Option<String>,
    /// When it was created.
    pub created_at: DateTime<Utc>,
}

impl UserNotice {
    /// Create a notice timestamped now.
    #[must_use]
    pub fn new(
        user_id: UserId,
        kind: NoticeKind,
        product_id: String,
        subtype: Option<String>,
    ) -> Self {
        Self {
            notice_id: RecordId::generate(),
            user_id,
            kind,
            product_id,
            subtype,
            created_at: Utc::now(),
        }
    }
}
