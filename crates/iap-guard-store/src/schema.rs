//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Purchase records, keyed by platform `transaction_id`.
    pub const PURCHASES: &str = "purchases";

    /// Index: purchases by renewal chain, keyed by
    /// `original_transaction_id || 0x00 || transaction_id`. Value is empty.
    pub const PURCHASES_BY_ORIGINAL: &str = "purchases_by_original";

    /// Index: purchases by user, keyed by
    /// `user_id || created_at_ms (BE) || transaction_id`. Value is empty.
    pub const PURCHASES_BY_USER: &str = "purchases_by_user";

    /// Index: purchases by device, keyed by
    /// `device_id || 0x00 || transaction_id`. Value is empty.
    pub const PURCHASES_BY_DEVICE: &str = "purchases_by_device";

    /// User entitlements, keyed by `user_id`.
    pub const ENTITLEMENTS: &str = "entitlements";

    /// Fraud log entries, keyed by `user_id || entry_id` (ULID).
    pub const FRAUD_LOG_BY_USER: &str = "fraud_log_by_user";

    /// Refund history, keyed by `entry_id` (ULID).
    pub const REFUNDS: &str = "refunds";

    /// Lifetime refund counters, keyed by `user_id`. Value is a BE `u32`.
    pub const REFUND_COUNTS: &str = "refund_counts";

    /// Transactions with a recorded refund, keyed by `transaction_id`.
    /// Value is empty.
    pub const REFUNDED_TRANSACTIONS: &str = "refunded_transactions";

    /// Flagged transactions, keyed by `transaction_id`.
    pub const FLAGGED: &str = "flagged";

    /// Admin alerts, keyed by `alert_id` (ULID).
    pub const ALERTS: &str = "alerts";

    /// User notices, keyed by `user_id || notice_id` (ULID).
    pub const NOTICES_BY_USER: &str = "notices_by_user";

    /// Processed webhook notification ids. Value is empty.
    pub const NOTIFICATIONS: &str = "notifications";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::PURCHASES,
        cf::PURCHASES_BY_ORIGINAL,
        cf::PURCHASES_BY_USER,
        cf::PURCHASES_BY_DEVICE,
        cf::ENTITLEMENTS,
        cf::FRAUD_LOG_BY_USER,
        cf::REFUNDS,
        cf::REFUND_COUNTS,
        cf::REFUNDED_TRANSACTIONS,
        cf::FLAGGED,
        cf::ALERTS,
        cf::NOTICES_BY_USER,
        cf::NOTIFICATIONS,
    ]
}
