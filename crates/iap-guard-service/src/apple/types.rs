//! App Store wire types.
//!
//! Two families: the legacy `verifyReceipt` request/response, and the JWS
//! payloads carried by server notifications (camelCase, millisecond dates).

use serde::{Deserialize, Serialize};

/// Status: success.
pub const STATUS_OK: i64 = 0;

/// Status: a sandbox receipt was sent to the production endpoint.
pub const STATUS_SANDBOX_RECEIPT: i64 = 21007;

/// Whether a non-zero status means the platform had a transient problem
/// rather than refusing the receipt.
#[must_use]
pub fn is_retryable_status(status: i64) -> bool {
    matches!(status, 21005 | 21009) || (21100..=21199).contains(&status)
}

// ============================================================================
// verifyReceipt
// ============================================================================

/// Request body for `verifyReceipt`.
#[derive(Debug, Serialize)]
pub struct VerifyReceiptRequest<'a> {
    /// Base64 receipt.
    #[serde(rename = "receipt-data")]
    pub receipt_data: &'a str,
    /// App-specific shared secret.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<&'a str>,
    /// Only return the latest renewal of each subscription.
    #[serde(rename = "exclude-old-transactions")]
    pub exclude_old_transactions: bool,
}

/// Response body from `verifyReceipt`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyReceiptResponse {
    /// Zero on success.
    pub status: i64,
    /// `Sandbox` or `Production`.
    #[serde(default)]
    pub environment: Option<String>,
    /// Decoded receipt.
    #[serde(default)]
    pub receipt: Option<ReceiptBody>,
    /// Latest transactions for auto-renewable subscriptions.
    #[serde(default)]
    pub latest_receipt_info: Vec<InAppEntry>,
    /// Renewal state per subscription.
    #[serde(default)]
    pub pending_renewal_info: Vec<PendingRenewalInfo>,
}

/// The `receipt` object of a `verifyReceipt` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReceiptBody {
    /// App bundle id.
    #[serde(default)]
    pub bundle_id: Option<String>,
    /// In-app purchase transactions.
    #[serde(default)]
    pub in_app: Vec<InAppEntry>,
}

/// One in-app transaction. Dates are millisecond strings, flags are
/// `"true"`/`"false"` strings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InAppEntry {
    /// Transaction id.
    pub transaction_id: String,
    /// First transaction of the renewal chain.
    #[serde(default)]
    pub original_transaction_id: Option<String>,
    /// Product id.
    pub product_id: String,
    /// Purchase time (ms since epoch).
    pub purchase_date_ms: String,
    /// Subscription expiry (ms since epoch).
    #[serde(default)]
    pub expires_date_ms: Option<String>,
    /// Free trial flag.
    #[serde(default)]
    pub is_trial_period: Option<String>,
    /// Introductory price flag.
    #[serde(default)]
    pub is_in_intro_offer_period: Option<String>,
    /// Promotional offer redeemed.
    #[serde(default)]
    pub promotional_offer_id: Option<String>,
    /// Refund/revocation time (ms since epoch).
    #[serde(default)]
    pub cancellation_date_ms: Option<String>,
}

/// Renewal state of one subscription.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PendingRenewalInfo {
    /// First transaction of the renewal chain.
    #[serde(default)]
    pub original_transaction_id: Option<String>,
    /// Product that will renew.
    #[serde(default)]
    pub auto_renew_product_id: Option<String>,
    /// `"1"` when auto-renew is on.
    #[serde(default)]
    pub auto_renew_status: Option<String>,
}

// ============================================================================
// Server notifications (JWS payloads)
// ============================================================================

/// Envelope posted by the platform.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEnvelope {
    /// Compact JWS.
    pub signed_payload: String,
}

/// Decoded `signedPayload` claims.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    /// e.g. `DID_RENEW`.
    pub notification_type: String,
    /// e.g. `BILLING_RECOVERY`.
    #[serde(default)]
    pub subtype: Option<String>,
    /// Unique per notification; redeliveries repeat it.
    #[serde(rename = "notificationUUID")]
    pub notification_uuid: String,
    /// Transaction data.
    #[serde(default)]
    pub data: Option<NotificationData>,
    /// Signing time (ms since epoch).
    #[serde(default)]
    pub signed_date: Option<i64>,
}

/// The `data` object of a notification.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    /// App bundle id.
    #[serde(default)]
    pub bundle_id: Option<String>,
    /// `Sandbox` or `Production`.
    #[serde(default)]
    pub environment: Option<String>,
    /// Nested JWS with transaction info.
    #[serde(default)]
    pub signed_transaction_info: Option<String>,
    /// Nested JWS with renewal info.
    #[serde(default)]
    pub signed_renewal_info: Option<String>,
}

/// Claims of `signedTransactionInfo`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPayload {
    /// Transaction id.
    pub transaction_id: String,
    /// First transaction of the renewal chain.
    #[serde(default)]
    pub original_transaction_id: Option<String>,
    /// Product id.
    pub product_id: String,
    /// Purchase time (ms since epoch).
    pub purchase_date: i64,
    /// Subscription expiry (ms since epoch).
    #[serde(default)]
    pub expires_date: Option<i64>,
    /// 1 = introductory, 2 = promotional, 3 = offer code.
    #[serde(default)]
    pub offer_type: Option<i64>,
    /// e.g. `Auto-Renewable Subscription`, `Consumable`.
    #[serde(default, rename = "type")]
    pub product_type: Option<String>,
    /// Refund/revocation time (ms since epoch).
    #[serde(default)]
    pub revocation_date: Option<i64>,
    /// `Sandbox` or `Production`.
    #[serde(default)]
    pub environment: Option<String>,
}

/// Claims of `signedRenewalInfo`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewalPayload {
    /// First transaction of the renewal chain.
    #[serde(default)]
    pub original_transaction_id: Option<String>,
    /// Product that will renew.
    #[serde(default)]
    pub auto_renew_product_id: Option<String>,
    /// 1 when auto-renew is on.
    #[serde(default)]
    pub auto_renew_status: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(21005));
        assert!(is_retryable_status(21150));
        assert!(!is_retryable_status(21003));
        assert!(!is_retryable_status(STATUS_SANDBOX_RECEIPT));
    }

    #[test]
    fn parses_minimal_verify_response() {
        let response: VerifyReceiptResponse =
            serde_json::from_str(r#"{"status": 21003}"#).unwrap();
        assert_eq!(response.status, 21003);
        assert!(response.latest_receipt_info.is_empty());
    }
}
