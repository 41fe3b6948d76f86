//! Purchase ledger types.
//!
//! A [`PurchaseRecord`] is written once per platform transaction when a receipt
//! is validated. [`TransactionFacts`] is the decoder's view of a transaction
//! before anything is persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{RecordId, TransactionId, UserId};

/// Structured facts extracted from a receipt or signed transaction token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionFacts {
    /// Platform transaction identifier.
    pub transaction_id: TransactionId,

    /// First transaction of the renewal chain.
    pub original_transaction_id: TransactionId,

    /// Product identifier as configured in the store.
    pub product_id: String,

    /// When the transaction was purchased.
    pub purchase_date: DateTime<Utc>,

    /// Subscription expiry, absent for consumables.
    pub expiry_date: Option<DateTime<Utc>>,

    /// Whether this transaction belongs to an auto-renewable subscription.
    pub is_subscription: bool,

    /// Whether a promotional or intro offer was applied.
    pub is_promotional: bool,

    /// Whether the transaction is a free trial period.
    pub is_trial_period: bool,

    /// Whether the subscription will renew.
    pub auto_renew_status: bool,

    /// Set when the platform revoked the transaction.
    pub revocation_date: Option<DateTime<Utc>>,

    /// Platform environment (`Production` or `Sandbox`).
    pub environment: Option<String>,
}

impl TransactionFacts {
    /// Whether the transaction started a trial or used a promotional offer.
    #[must_use]
    pub const fn is_introductory(&self) -> bool {
        self.is_trial_period || self.is_promotional
    }
}

/// The durable record of a validated purchase.
///
/// Only `refunded`, `refund_date` and `auto_renew_status` change after
/// creation; records are never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    /// Local identifier returned to the client.
    pub purchase_id: RecordId,

    /// Platform transaction identifier (unique across the ledger).
    pub transaction_id: TransactionId,

    /// First transaction of the renewal chain.
    pub original_transaction_id: TransactionId,

    /// Owner of the purchase.
    pub user_id: UserId,

    /// Product identifier.
    pub product_id: String,

    /// When the transaction was purchased.
    pub purchase_date: DateTime<Utc>,

    /// Subscription expiry, absent for consumables.
    pub expiry_date: Option<DateTime<Utc>>,

    /// Whether this is a subscription purchase.
    pub is_subscription: bool,

    /// Whether a promotional offer was applied.
    pub is_promotional: bool,

    /// Whether this was a free trial.
    pub is_trial_period: bool,

    /// Last known auto-renew status.
    pub auto_renew_status: bool,

    /// Whether the receipt passed platform verification.
    pub validated: bool,

    /// Whether the purchase was refunded or revoked.
    pub refunded: bool,

    /// When the refund was recorded.
    pub refund_date: Option<DateTime<Utc>>,

    /// Fraud score at validation time (0..=100).
    pub fraud_score: u8,

    /// Client-reported device integrity risk (0.0..=1.0).
    pub jailbreak_risk: f64,

    /// Device the purchase was made from, if reported.
    pub device_id: Option<String>,

    /// Platform environment the receipt was verified against.
    pub environment: Option<String>,

    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl PurchaseRecord {
    /// Build a validated record from decoded transaction facts.
    #[must_use]
    pub fn from_facts(
        user_id: UserId,
        facts: &TransactionFacts,
        fraud_score: u8,
        jailbreak_risk: f64,
        device_id: Option<String>,
    ) -> Self {
        Self {
            purchase_id: RecordId::generate(),
            transaction_id: facts.transaction_id.clone(),
            original_transaction_id: facts.original_transaction_id.clone(),
            user_id,
            product_id: facts.product_id.clone(),
            purchase_date: facts.purchase_date,
            expiry_date: facts.expiry_date,
            is_subscription: facts.is_subscription,
            is_promotional: facts.is_promotional,
            is_trial_period: facts.is_trial_period,
            auto_renew_status: facts.auto_renew_status,
            validated: true,
            refunded: false,
            refund_date: None,
            fraud_score: fraud_score.min(100),
            jailbreak_risk: jailbreak_risk.clamp(0.0, 1.0),
            device_id,
            environment: facts.environment.clone(),
            created_at: Utc::now(),
        }
    }

    /// Whether the record started a trial or used a promotional offer.
    #[must_use]
    pub const fn is_introductory(&self) -> bool {
        self.is_trial_period || self.is_promotional
    }
}
