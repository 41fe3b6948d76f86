//! Transaction decoding.
//!
//! Turns a `verifyReceipt` response or a verified notification into
//! [`TransactionFacts`]. Decoding never checks signatures; notification
//! decoding only accepts a [`VerifiedPayload`], whose nested transaction and
//! renewal tokens are covered by the outer signature.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde::de::DeserializeOwned;

use iap_guard_core::{NotificationSubtype, NotificationType, TransactionFacts, TransactionId};

use crate::apple::{
    InAppEntry, NotificationPayload, RenewalPayload, TransactionPayload, VerifyReceiptResponse,
};
use crate::signature::VerifiedPayload;

/// Offer type for introductory offers (free trials included).
const OFFER_TYPE_INTRODUCTORY: i64 = 1;

/// Errors while extracting transaction facts.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The receipt contains no in-app transactions.
    #[error("receipt contains no transactions")]
    NoTransactions,

    /// A field had an unusable value.
    #[error("invalid {field}: {value}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: String,
    },

    /// A nested token could not be parsed.
    #[error("invalid token: {0}")]
    Token(String),

    /// The notification claims do not have the expected shape.
    #[error("invalid notification payload: {0}")]
    Payload(String),
}

/// Renewal state carried by a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenewalFacts {
    /// First transaction of the renewal chain.
    pub original_transaction_id: Option<TransactionId>,
    /// Product that will renew.
    pub auto_renew_product_id: Option<String>,
    /// Whether auto-renew is on.
    pub auto_renew_enabled: Option<bool>,
}

/// A decoded server notification.
#[derive(Debug, Clone)]
pub struct DecodedNotification {
    /// Lifecycle event.
    pub notification_type: NotificationType,
    /// Event detail.
    pub subtype: Option<NotificationSubtype>,
    /// Redelivery key.
    pub notification_uuid: String,
    /// `Sandbox` or `Production`.
    pub environment: Option<String>,
    /// Transaction the event is about.
    pub transaction: Option<TransactionFacts>,
    /// Renewal state, when supplied.
    pub renewal: Option<RenewalFacts>,
}

// ============================================================================
// Receipt path
// ============================================================================

/// Extract the transaction a client is claiming from a verified receipt.
///
/// Picks the newest transaction for `claimed_product`. When none matches, the
/// newest transaction overall is returned so the caller can report a product
/// mismatch.
///
/// # Errors
///
/// Returns `DecodeError` if the receipt has no transactions or a field of
/// the chosen transaction is malformed.
pub fn decode_receipt(
    response: &VerifyReceiptResponse,
    claimed_product: &str,
) -> Result<TransactionFacts, DecodeError> {
    let entries: &[InAppEntry] = if response.latest_receipt_info.is_empty() {
        response
            .receipt
            .as_ref()
            .map_or(&[][..], |receipt| receipt.in_app.as_slice())
    } else {
        &response.latest_receipt_info
    };

    let entry = newest(entries.iter().filter(|e| e.product_id == claimed_product))
        .or_else(|| newest(entries.iter()))
        .ok_or(DecodeError::NoTransactions)?;

    let mut facts = facts_from_entry(entry)?;
    facts.environment.clone_from(&response.environment);
    facts.auto_renew_status = response.pending_renewal_info.iter().any(|info| {
        info.original_transaction_id.as_deref() == Some(facts.original_transaction_id.as_str())
            && info.auto_renew_status.as_deref() == Some("1")
    });
    Ok(facts)
}

fn newest<'a>(candidates: impl Iterator<Item = &'a InAppEntry>) -> Option<&'a InAppEntry> {
    candidates.max_by_key(|entry| entry.purchase_date_ms.parse::<i64>().unwrap_or(i64::MIN))
}

fn facts_from_entry(entry: &InAppEntry) -> Result<TransactionFacts, DecodeError> {
    let transaction_id = transaction_id("transaction_id", &entry.transaction_id)?;
    let original_transaction_id = match &entry.original_transaction_id {
        Some(original) => self::transaction_id("original_transaction_id", original)?,
        None => transaction_id.clone(),
    };
    let expiry_date = entry
        .expires_date_ms
        .as_deref()
        .map(|ms| millis_str("expires_date_ms", ms))
        .transpose()?;

    Ok(TransactionFacts {
        transaction_id,
        original_transaction_id,
        product_id: entry.product_id.clone(),
        purchase_date: millis_str("purchase_date_ms", &entry.purchase_date_ms)?,
        expiry_date,
        is_subscription: expiry_date.is_some(),
        is_promotional: entry.promotional_offer_id.is_some()
            || flag(entry.is_in_intro_offer_period.as_deref()),
        is_trial_period: flag(entry.is_trial_period.as_deref()),
        auto_renew_status: false,
        revocation_date: entry
            .cancellation_date_ms
            .as_deref()
            .map(|ms| millis_str("cancellation_date_ms", ms))
            .transpose()?,
        environment: None,
    })
}

fn flag(value: Option<&str>) -> bool {
    value == Some("true")
}

// ============================================================================
// Notification path
// ============================================================================

/// Decode a verified notification and its nested tokens.
///
/// # Errors
///
/// Returns `DecodeError` if the claims or a nested token are malformed.
pub fn decode_notification(payload: &VerifiedPayload) -> Result<DecodedNotification, DecodeError> {
    let claims: NotificationPayload = serde_json::from_value(payload.claims().clone())
        .map_err(|e| DecodeError::Payload(e.to_string()))?;
    let data = claims.data.unwrap_or_default();

    let renewal = data
        .signed_renewal_info
        .as_deref()
        .map(decode_renewal_token)
        .transpose()?;

    let mut transaction = data
        .signed_transaction_info
        .as_deref()
        .map(decode_transaction_token)
        .transpose()?;

    if let (Some(facts), Some(renewal)) = (transaction.as_mut(), renewal.as_ref()) {
        let same_chain = renewal
            .original_transaction_id
            .as_ref()
            .map_or(true, |original| *original == facts.original_transaction_id);
        if same_chain {
            facts.auto_renew_status = renewal.auto_renew_enabled.unwrap_or(false);
        }
    }
    if let Some(facts) = transaction.as_mut() {
        if facts.environment.is_none() {
            facts.environment.clone_from(&data.environment);
        }
    }

    Ok(DecodedNotification {
        notification_type: NotificationType::parse(&claims.notification_type),
        subtype: claims.subtype.as_deref().map(NotificationSubtype::parse),
        notification_uuid: claims.notification_uuid,
        environment: data.environment,
        transaction,
        renewal,
    })
}

/// Decode a `signedTransactionInfo` token.
///
/// # Errors
///
/// Returns `DecodeError` if the token or its fields are malformed.
pub fn decode_transaction_token(token: &str) -> Result<TransactionFacts, DecodeError> {
    let claims: TransactionPayload = decode_claims(token)?;

    let transaction_id = transaction_id("transactionId", &claims.transaction_id)?;
    let original_transaction_id = match &claims.original_transaction_id {
        Some(original) => self::transaction_id("originalTransactionId", original)?,
        None => transaction_id.clone(),
    };
    let expiry_date = claims
        .expires_date
        .map(|ms| millis("expiresDate", ms))
        .transpose()?;
    let is_subscription = expiry_date.is_some()
        || claims
            .product_type
            .as_deref()
            .is_some_and(|kind| kind.contains("Subscription"));

    Ok(TransactionFacts {
        transaction_id,
        original_transaction_id,
        product_id: claims.product_id,
        purchase_date: millis("purchaseDate", claims.purchase_date)?,
        expiry_date,
        is_subscription,
        is_promotional: matches!(claims.offer_type, Some(kind) if kind > OFFER_TYPE_INTRODUCTORY),
        is_trial_period: claims.offer_type == Some(OFFER_TYPE_INTRODUCTORY),
        auto_renew_status: false,
        revocation_date: claims
            .revocation_date
            .map(|ms| millis("revocationDate", ms))
            .transpose()?,
        environment: claims.environment,
    })
}

fn decode_renewal_token(token: &str) -> Result<RenewalFacts, DecodeError> {
    let claims: RenewalPayload = decode_claims(token)?;
    Ok(RenewalFacts {
        original_transaction_id: claims
            .original_transaction_id
            .as_deref()
            .map(|original| transaction_id("originalTransactionId", original))
            .transpose()?,
        auto_renew_product_id: claims.auto_renew_product_id,
        auto_renew_enabled: claims.auto_renew_status.map(|status| status == 1),
    })
}

/// Parse JWS claims without checking the signature.
fn decode_claims<T: DeserializeOwned>(token: &str) -> Result<T, DecodeError> {
    let header = decode_header(token).map_err(|e| DecodeError::Token(e.to_string()))?;

    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_aud = false;

    decode::<T>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| DecodeError::Token(e.to_string()))
}

// ============================================================================
// Field helpers
// ============================================================================

fn transaction_id(field: &'static str, value: &str) -> Result<TransactionId, DecodeError> {
    TransactionId::new(value).map_err(|_| DecodeError::InvalidField {
        field,
        value: value.to_string(),
    })
}

fn millis(field: &'static str, ms: i64) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| DecodeError::InvalidField {
        field,
        value: ms.to_string(),
    })
}

fn millis_str(field: &'static str, ms: &str) -> Result<DateTime<Utc>, DecodeError> {
    let parsed = ms.trim().parse::<i64>().map_err(|_| DecodeError::InvalidField {
        field,
        value: ms.to_string(),
    })?;
    millis(field, parsed)
}
