//! Key encoding utilities for `RocksDB`.
//!
//! Variable-length components are followed by a `0x00` separator so that a
//! prefix scan for one id never matches a longer id sharing its prefix.
//! Transaction ids cannot contain `0x00`.

use chrono::{DateTime, Utc};
use iap_guard_core::{RecordId, TransactionId, UserId};

const SEPARATOR: u8 = 0x00;

/// Create a purchase key from a transaction ID.
#[must_use]
pub fn purchase_key(transaction_id: &TransactionId) -> Vec<u8> {
    transaction_id.as_str().as_bytes().to_vec()
}

/// Create a renewal-chain prefix for an original transaction.
#[must_use]
pub fn original_prefix(original_transaction_id: &TransactionId) -> Vec<u8> {
    let mut key = original_transaction_id.as_str().as_bytes().to_vec();
    key.push(SEPARATOR);
    key
}

/// Create a renewal-chain index key.
///
/// Format: `original_transaction_id || 0x00 || transaction_id`
#[must_use]
pub fn original_index_key(
    original_transaction_id: &TransactionId,
    transaction_id: &TransactionId,
) -> Vec<u8> {
    let mut key = original_prefix(original_transaction_id);
    key.extend_from_slice(transaction_id.as_str().as_bytes());
    key
}

/// Create a user-purchase index key.
///
/// Format: `user_id (16 bytes) || created_at_ms (8 bytes BE) || transaction_id`
///
/// Purchases for a user are sorted by creation time.
#[must_use]
pub fn user_purchase_key(
    user_id: &UserId,
    created_at: DateTime<Utc>,
    transaction_id: &TransactionId,
) -> Vec<u8> {
    let mut key = user_time_prefix(user_id, created_at);
    key.extend_from_slice(transaction_id.as_str().as_bytes());
    key
}

/// Create the seek key for a user's purchases created at or after `since`.
#[must_use]
pub fn user_time_prefix(user_id: &UserId, since: DateTime<Utc>) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(&millis_be(since));
    key
}

/// Create a device prefix.
#[must_use]
pub fn device_prefix(device_id: &str) -> Vec<u8> {
    let mut key = device_id.as_bytes().to_vec();
    key.push(SEPARATOR);
    key
}

/// Create a device-purchase index key.
#[must_use]
pub fn device_index_key(device_id: &str, transaction_id: &TransactionId) -> Vec<u8> {
    let mut key = device_prefix(device_id);
    key.extend_from_slice(transaction_id.as_str().as_bytes());
    key
}

/// Extract the trailing transaction id from an index key.
///
/// Returns `None` if the suffix is not a valid transaction id.
#[must_use]
pub fn transaction_suffix(key: &[u8], prefix_len: usize) -> Option<TransactionId> {
    let suffix = key.get(prefix_len..)?;
    let text = std::str::from_utf8(suffix).ok()?;
    TransactionId::new(text).ok()
}

/// Create a user key.
#[must_use]
pub fn user_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Create a `user_id || record_id` key.
#[must_use]
pub fn user_record_key(user_id: &UserId, record_id: &RecordId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(&record_id.to_bytes());
    key
}

/// Create a record key from a ULID.
#[must_use]
pub fn record_key(record_id: &RecordId) -> Vec<u8> {
    record_id.to_bytes().to_vec()
}

/// Create a notification key.
#[must_use]
pub fn notification_key(notification_id: &str) -> Vec<u8> {
    notification_id.as_bytes().to_vec()
}

fn millis_be(at: DateTime<Utc>) -> [u8; 8] {
    // Pre-epoch timestamps clamp to zero so the encoding stays order-preserving.
    u64::try_from(at.timestamp_millis())
        .unwrap_or(0)
        .to_be_bytes()
}
