//! Cryptographic helpers.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `data`.
///
/// Used to fingerprint receipts in logs so the receipt itself is never
/// written out.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Short receipt fingerprint (first 16 hex characters of the SHA-256).
#[must_use]
pub fn receipt_fingerprint(receipt_data: &str) -> String {
    let mut digest = sha256_hex(receipt_data.as_bytes());
    digest.truncate(16);
    digest
}

/// Constant-time string comparison to prevent timing attacks.
///
/// Length differences return early; only equal-length inputs are compared
/// byte by byte without short-circuiting.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
