//! Storage layer for iap-guard.
//!
//! This crate provides persistent storage for the purchase ledger, user
//! entitlements and the fraud audit trail.
//!
//! # Backends
//!
//! - [`MemoryStore`]: a single `RwLock` over in-process maps. Always built;
//!   used by tests and local development.
//! - `RocksStore`: `RocksDB` with column families, behind the
//!   `rocksdb-backend` feature.
//!
//! # Atomicity
//!
//! Every conditional write (`*_if_absent`) and every read-modify-write
//! (`update_*`) is atomic with respect to other calls on the same store. The
//! check-then-write of a receipt is therefore a single call and two
//! concurrent deliveries of the same transaction cannot both succeed.
//!
//! # Example
//!
//! ```
//! use iap_guard_store::{MemoryStore, Store};
//! use iap_guard_core::{PremiumTier, TransactionId, UserId};
//!
//! let store = MemoryStore::new();
//! let user_id = UserId::generate();
//! let tx = TransactionId::new("1000000001").unwrap();
//!
//! let mutation = store
//!     .update_entitlement(&user_id, &mut |e| {
//!         e.grant_subscription(&tx, PremiumTier::Premium, None, true)
//!     })
//!     .unwrap();
//! assert!(mutation.changed);
//! assert!(store.get_entitlement(&user_id).unwrap().unwrap().is_premium);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
#[cfg(feature = "rocksdb-backend")]
pub mod keys;
pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use chrono::{DateTime, Utc};
use iap_guard_core::{
    AdminAlert, FlaggedTransaction, FraudLogEntry, PurchaseRecord, RefundHistoryEntry,
    TransactionId, UserEntitlement, UserId, UserNotice,
};

/// Result of an atomic read-modify-write.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation<T> {
    /// The record after the update closure ran.
    pub record: T,
    /// Whether the closure reported a change (and the record was written).
    pub changed: bool,
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different
/// implementations (`RocksDB`, in-memory for testing). Update closures must
/// return `true` when they changed the record; unchanged records are not
/// rewritten.
pub trait Store: Send + Sync {
    // =========================================================================
    // Purchase Ledger
    // =========================================================================

    /// Insert a purchase record unless its `transaction_id` already exists.
    ///
    /// Returns `true` if the record was inserted, `false` if a record with the
    /// same transaction id was already present (nothing is written).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn insert_purchase_if_absent(&self, record: &PurchaseRecord) -> Result<bool>;

    /// Get a purchase by platform transaction id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_purchase(&self, transaction_id: &TransactionId) -> Result<Option<PurchaseRecord>>;

    /// Find the most recent purchase of a renewal chain.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_purchase_by_original(
        &self,
        original_transaction_id: &TransactionId,
    ) -> Result<Option<PurchaseRecord>>;

    /// Atomically update a purchase record.
    ///
    /// Returns `None` if no record exists for the transaction id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn update_purchase(
        &self,
        transaction_id: &TransactionId,
        apply: &mut dyn FnMut(&mut PurchaseRecord) -> bool,
    ) -> Result<Option<Mutation<PurchaseRecord>>>;

    /// List a user's purchases made at or after `since`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_purchases_by_user(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PurchaseRecord>>;

    /// List all purchases reported from a device.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_purchases_by_device(&self, device_id: &str) -> Result<Vec<PurchaseRecord>>;

    // =========================================================================
    // Entitlements
    // =========================================================================

    /// Get a user's entitlement, if one was ever written.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_entitlement(&self, user_id: &UserId) -> Result<Option<UserEntitlement>>;

    /// Atomically update a user's entitlement, starting from an empty one if
    /// none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn update_entitlement(
        &self,
        user_id: &UserId,
        apply: &mut dyn FnMut(&mut UserEntitlement) -> bool,
    ) -> Result<Mutation<UserEntitlement>>;

    // =========================================================================
    // Audit Trail
    // =========================================================================

    /// Append a fraud log entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn append_fraud_log(&self, entry: &FraudLogEntry) -> Result<()>;

    /// List a user's fraud log, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_fraud_log_by_user(&self, user_id: &UserId, limit: usize)
        -> Result<Vec<FraudLogEntry>>;

    /// Append a refund entry unless one already exists for its
    /// transaction. Returns the user's lifetime refund count including the
    /// new entry, or `None` if the transaction was already recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn append_refund_if_absent(&self, entry: &RefundHistoryEntry) -> Result<Option<u32>>;

    /// Whether a refund has been recorded for `transaction_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn refund_recorded(&self, transaction_id: &TransactionId) -> Result<bool>;

    /// Count a user's lifetime refunds.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn count_refunds(&self, user_id: &UserId) -> Result<u32>;

    /// List refunds recorded at or after `since`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_refunds(&self, since: DateTime<Utc>, limit: usize)
        -> Result<Vec<RefundHistoryEntry>>;

    // =========================================================================
    // Review Queue
    // =========================================================================

    /// Insert a flagged transaction unless one exists for the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn insert_flagged_if_absent(&self, flagged: &FlaggedTransaction) -> Result<bool>;

    /// Get a flagged transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_flagged(&self, transaction_id: &TransactionId) -> Result<Option<FlaggedTransaction>>;

    /// List unreviewed flagged transactions, highest score first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_pending_flagged(&self, limit: usize) -> Result<Vec<FlaggedTransaction>>;

    /// Atomically update a flagged transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn update_flagged(
        &self,
        transaction_id: &TransactionId,
        apply: &mut dyn FnMut(&mut FlaggedTransaction) -> bool,
    ) -> Result<Option<Mutation<FlaggedTransaction>>>;

    // =========================================================================
    // Alerts and Notices
    // =========================================================================

    /// Store an admin alert.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_alert(&self, alert: &AdminAlert) -> Result<()>;

    /// List unacknowledged alerts, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_unacknowledged_alerts(&self, limit: usize) -> Result<Vec<AdminAlert>>;

    /// Store a user-facing notice.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_notice(&self, notice: &UserNotice) -> Result<()>;

    /// List a user's notices, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_notices_by_user(&self, user_id: &UserId) -> Result<Vec<UserNotice>>;

    // =========================================================================
    // Webhook Deduplication
    // =========================================================================

    /// Record a processed notification id.
    ///
    /// Returns `false` if the id was already recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn record_notification_if_absent(&self, notification_id: &str) -> Result<bool>;

    /// Forget a recorded notification id so a redelivery is processed again.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn release_notification(&self, notification_id: &str) -> Result<()>;
}
