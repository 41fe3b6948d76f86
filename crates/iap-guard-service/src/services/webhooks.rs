//! Server notification processing.
//!
//! Verify, decode, deduplicate, then dispatch on the notification type. The
//! HTTP status is derived from the result after dispatch by [`status_for`]:
//! anything processed (including no-ops) is acknowledged, a bad signature is
//! `401`, and an internal failure is `500` so the platform redelivers.

use std::sync::Arc;

use axum::http::StatusCode;

use iap_guard_core::{
    GuardError, NoticeKind, NotificationSubtype, NotificationType, PurchaseRecord,
    UserEntitlement, UserNotice,
};
use iap_guard_store::{Store, StoreError};

use crate::decoder::{decode_notification, DecodedNotification};
use crate::locks::UserLocks;
use crate::services::{
    EntitlementUpdater, NoticeSender, RefundAbuseDetector, RefundEvent, RefundOutcome,
};
use crate::signature::{SignatureError, SignatureVerifier};

/// What happened to an authentic notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// State changed.
    Applied,
    /// The transition was already in effect.
    NoOp,
    /// The notification id was processed before.
    Duplicate,
    /// No ledger record matches the transaction.
    UnknownTransaction,
    /// Signed but undecodable; redelivery cannot help.
    Malformed,
    /// Logged only.
    Ignored,
}

/// Notification processing failure.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The notification is not authentic.
    #[error("signature invalid: {0}")]
    SignatureInvalid(#[from] SignatureError),

    /// Processing failed; the platform should redeliver.
    #[error("internal error: {0}")]
    Internal(#[from] GuardError),
}

impl From<StoreError> for WebhookError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.into())
    }
}

/// HTTP status for a processing result.
#[must_use]
pub fn status_for(result: &Result<WebhookOutcome, WebhookError>) -> StatusCode {
    match result {
        Ok(_) => StatusCode::OK,
        Err(WebhookError::SignatureInvalid(_)) => StatusCode::UNAUTHORIZED,
        Err(WebhookError::Internal(_)) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Reconciles subscription lifecycle state from server notifications.
pub struct WebhookProcessor {
    signature: SignatureVerifier,
    store: Arc<dyn Store>,
    entitlements: EntitlementUpdater,
    refunds: RefundAbuseDetector,
    notices: Arc<dyn NoticeSender>,
    locks: Arc<UserLocks>,
}

impl WebhookProcessor {
    /// Create a processor.
    #[must_use]
    pub fn new(
        signature: SignatureVerifier,
        store: Arc<dyn Store>,
        entitlements: EntitlementUpdater,
        refunds: RefundAbuseDetector,
        notices: Arc<dyn NoticeSender>,
        locks: Arc<UserLocks>,
    ) -> Self {
        Self {
            signature,
            store,
            entitlements,
            refunds,
            notices,
            locks,
        }
    }

    /// Process a raw notification body.
    ///
    /// # Errors
    ///
    /// - `SignatureInvalid` if the envelope is not authentic
    /// - `Internal` if a store operation failed; the notification id is
    ///   released so a redelivery is processed
    pub async fn process(&self, body: &[u8]) -> Result<WebhookOutcome, WebhookError> {
        let verified = self.signature.verify(body)?;

        let notification = match decode_notification(&verified) {
            Ok(notification) => notification,
            Err(err) => {
                tracing::warn!(reason = %err, "Signed notification could not be decoded");
                return Ok(WebhookOutcome::Malformed);
            }
        };

        let uuid = notification.notification_uuid.clone();
        if !self.store.record_notification_if_absent(&uuid)? {
            tracing::info!(notification_uuid = %uuid, "Duplicate notification ignored");
            return Ok(WebhookOutcome::Duplicate);
        }

        let result = self.dispatch(&notification).await;
        match &result {
            Ok(outcome) => tracing::info!(
                notification_uuid = %uuid,
                notification_type = notification.notification_type.as_str(),
                outcome = ?outcome,
                "Notification processed"
            ),
            Err(err) => {
                tracing::error!(notification_uuid = %uuid, error = %err, "Notification failed");
                if let Err(release) = self.store.release_notification(&uuid) {
                    tracing::error!(notification_uuid = %uuid, error = %release, "Failed to release notification id");
                }
            }
        }
        result
    }

    async fn dispatch(
        &self,
        notification: &DecodedNotification,
    ) -> Result<WebhookOutcome, WebhookError> {
        let subtype = notification.subtype.as_ref();

        match &notification.notification_type {
            NotificationType::Subscribed
            | NotificationType::ConsumptionRequest
            | NotificationType::RenewalExtended
            | NotificationType::RefundDeclined
            | NotificationType::Test => {
                tracing::info!(
                    notification_type = notification.notification_type.as_str(),
                    subtype = subtype.map(NotificationSubtype::as_str),
                    "Notification logged"
                );
                Ok(WebhookOutcome::Ignored)
            }
            NotificationType::Unknown(kind) => {
                tracing::warn!(notification_type = %kind, "Unrecognized notification type");
                Ok(WebhookOutcome::Ignored)
            }
            NotificationType::Refund | NotificationType::Revoke => self.refund(notification).await,
            NotificationType::DidRenew => {
                let restore = subtype == Some(&NotificationSubtype::BillingRecovery);
                self.transition(notification, |record, entitlement, this| {
                    let mut changed = false;
                    if let Some(expiry) = notification.transaction.as_ref().and_then(|t| t.expiry_date) {
                        changed |= entitlement.extend_expiry(expiry);
                    }
                    if restore && (record.refunded || entitlement.suspended) {
                        tracing::warn!(
                            user_id = %record.user_id,
                            transaction_id = %record.transaction_id,
                            refunded = record.refunded,
                            suspended = entitlement.suspended,
                            "Billing recovery ignored"
                        );
                    } else if restore {
                        if let Some(tier) = this.entitlements.catalog().tier_for(&record.product_id) {
                            changed |= entitlement.restore_premium(tier);
                        }
                    }
                    changed
                })
                .await
            }
            NotificationType::DidFailToRenew => {
                let grace = subtype == Some(&NotificationSubtype::GracePeriod);
                self.transition(notification, |_, entitlement, _| {
                    entitlement.clear_premium() | (grace && entitlement.set_grace_period(true))
                })
                .await
            }
            NotificationType::DidChangeRenewalStatus => self.renewal_status(notification).await,
            NotificationType::Expired => {
                self.transition(notification, |_, entitlement, _| entitlement.clear_premium())
                    .await
            }
            NotificationType::GracePeriodExpired => {
                self.transition(notification, |_, entitlement, _| {
                    entitlement.clear_premium() | entitlement.set_grace_period(false)
                })
                .await
            }
            NotificationType::PriceIncrease => self.price_increase(notification).await,
        }
    }

    /// Find the ledger record a notification refers to.
    fn resolve(
        &self,
        notification: &DecodedNotification,
    ) -> Result<Option<PurchaseRecord>, GuardError> {
        if let Some(facts) = &notification.transaction {
            if let Some(record) = self.store.get_purchase(&facts.transaction_id)? {
                return Ok(Some(record));
            }
            return Ok(self
                .store
                .find_purchase_by_original(&facts.original_transaction_id)?);
        }
        match notification
            .renewal
            .as_ref()
            .and_then(|renewal| renewal.original_transaction_id.as_ref())
        {
            Some(original) => Ok(self.store.find_purchase_by_original(original)?),
            None => Ok(None),
        }
    }

    fn unknown(notification: &DecodedNotification) -> WebhookOutcome {
        let transaction_id = notification
            .transaction
            .as_ref()
            .map(|facts| facts.transaction_id.to_string());
        tracing::info!(
            notification_type = notification.notification_type.as_str(),
            transaction_id = ?transaction_id,
            "Notification for unknown transaction ignored"
        );
        WebhookOutcome::UnknownTransaction
    }

    /// Apply an entitlement transition under the owner's lock.
    async fn transition<F>(
        &self,
        notification: &DecodedNotification,
        mut apply: F,
    ) -> Result<WebhookOutcome, WebhookError>
    where
        F: FnMut(&PurchaseRecord, &mut UserEntitlement, &Self) -> bool,
    {
        let Some(record) = self.resolve(notification)? else {
            return Ok(Self::unknown(notification));
        };

        let _guard = self.locks.lock(&record.user_id).await;
        // Re-read under the lock so a refund applied meanwhile is visible.
        let record = self
            .store
            .get_purchase(&record.transaction_id)?
            .unwrap_or(record);
        let mutation = self
            .entitlements
            .update(&record.user_id, &mut |entitlement| {
                apply(&record, entitlement, self)
            })?;

        Ok(if mutation.changed {
            WebhookOutcome::Applied
        } else {
            WebhookOutcome::NoOp
        })
    }

    async fn renewal_status(
        &self,
        notification: &DecodedNotification,
    ) -> Result<WebhookOutcome, WebhookError> {
        let enabled = match notification.subtype {
            Some(NotificationSubtype::AutoRenewEnabled) => Some(true),
            Some(NotificationSubtype::AutoRenewDisabled) => Some(false),
            _ => notification
                .renewal
                .as_ref()
                .and_then(|renewal| renewal.auto_renew_enabled),
        };
        let Some(enabled) = enabled else {
            tracing::warn!("Renewal status change without a status");
            return Ok(WebhookOutcome::Malformed);
        };

        let Some(record) = self.resolve(notification)? else {
            return Ok(Self::unknown(notification));
        };

        let _guard = self.locks.lock(&record.user_id).await;
        let purchase_changed = self
            .store
            .update_purchase(&record.transaction_id, &mut |purchase| {
                if purchase.auto_renew_status == enabled {
                    return false;
                }
                purchase.auto_renew_status = enabled;
                true
            })?
            .is_some_and(|mutation| mutation.changed);
        let entitlement_changed = self
            .entitlements
            .update(&record.user_id, &mut |entitlement| {
                entitlement.set_auto_renew(enabled)
            })?
            .changed;

        Ok(if purchase_changed | entitlement_changed {
            WebhookOutcome::Applied
        } else {
            WebhookOutcome::NoOp
        })
    }

    async fn refund(
        &self,
        notification: &DecodedNotification,
    ) -> Result<WebhookOutcome, WebhookError> {
        let Some(facts) = &notification.transaction else {
            tracing::warn!(
                notification_type = notification.notification_type.as_str(),
                "Refund notification without transaction info"
            );
            return Ok(WebhookOutcome::Malformed);
        };

        let event = RefundEvent {
            transaction_id: facts.transaction_id.clone(),
            original_transaction_id: Some(facts.original_transaction_id.clone()),
            user_hint: None,
            revocation_date: facts.revocation_date,
        };

        Ok(match self.refunds.handle(&event).await? {
            RefundOutcome::UnknownTransaction => WebhookOutcome::UnknownTransaction,
            RefundOutcome::Redelivered { .. } => WebhookOutcome::NoOp,
            RefundOutcome::Recorded { .. } => WebhookOutcome::Applied,
        })
    }

    async fn price_increase(
        &self,
        notification: &DecodedNotification,
    ) -> Result<WebhookOutcome, WebhookError> {
        let Some(record) = self.resolve(notification)? else {
            return Ok(Self::unknown(notification));
        };

        let product_id = notification
            .renewal
            .as_ref()
            .and_then(|renewal| renewal.auto_renew_product_id.clone())
            .unwrap_or_else(|| record.product_id.clone());
        let notice = UserNotice::new(
            record.user_id,
            NoticeKind::PriceIncrease,
            product_id,
            notification
                .subtype
                .as_ref()
                .map(|subtype| subtype.as_str().to_string()),
        );
        self.store.put_notice(&notice)?;

        if let Err(err) = self.notices.send(&notice).await {
            tracing::warn!(user_id = %record.user_id, error = %err, "Notice delivery failed");
        }
        Ok(WebhookOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::LogNoticeSender;
    use chrono::{Duration, Utc};
    use iap_guard_core::{PremiumTier, ProductCatalog, TransactionFacts, TransactionId, UserId};
    use iap_guard_store::MemoryStore;
    use crate::testing::FailingStore;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde_json::{json, Value};

    const SECRET: &str = "webhook-secret";

    struct Fixture {
        store: Arc<MemoryStore>,
        entitlements: EntitlementUpdater,
        processor: WebhookProcessor,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let (entitlements, processor) = processor_on(store.clone());
        Fixture {
            store,
            entitlements,
            processor,
        }
    }

    fn processor_on(store: Arc<dyn Store>) -> (EntitlementUpdater, WebhookProcessor) {
        let locks = Arc::new(UserLocks::default());
        let entitlements =
            EntitlementUpdater::new(store.clone(), Arc::new(ProductCatalog::default()));
        let refunds = RefundAbuseDetector::new(store.clone(), entitlements.clone(), locks.clone());
        let processor = WebhookProcessor::new(
            SignatureVerifier::hs256(SECRET, None),
            store,
            entitlements.clone(),
            refunds,
            Arc::new(LogNoticeSender),
            locks,
        );
        (entitlements, processor)
    }

    fn sign(claims: &Value) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn body(kind: &str, subtype: Option<&str>, uuid: &str, transaction: &Value) -> Vec<u8> {
        let payload = json!({
            "notificationType": kind,
            "subtype": subtype,
            "notificationUUID": uuid,
            "data": { "signedTransactionInfo": sign(transaction) }
        });
        serde_json::to_vec(&json!({ "signedPayload": sign(&payload) })).unwrap()
    }

    fn transaction(id: &str, expires: chrono::DateTime<Utc>) -> Value {
        json!({
            "transactionId": id,
            "originalTransactionId": "500",
            "productId": "premium_monthly",
            "purchaseDate": Utc::now().timestamp_millis(),
            "expiresDate": expires.timestamp_millis(),
            "type": "Auto-Renewable Subscription"
        })
    }

    fn seed(f: &Fixture, user_id: UserId) {
        seed_into(&*f.store, &f.entitlements, user_id);
    }

    fn seed_into(store: &dyn Store, entitlements: &EntitlementUpdater, user_id: UserId) {
        let facts = TransactionFacts {
            transaction_id: TransactionId::new("500").unwrap(),
            original_transaction_id: TransactionId::new("500").unwrap(),
            product_id: "premium_monthly".into(),
            purchase_date: Utc::now(),
            expiry_date: Some(Utc::now() + Duration::days(30)),
            is_subscription: true,
            is_promotional: false,
            is_trial_period: false,
            auto_renew_status: true,
            revocation_date: None,
            environment: None,
        };
        let record = PurchaseRecord::from_facts(user_id, &facts, 0, 0.0, None);
        store.insert_purchase_if_absent(&record).unwrap();
        entitlements.grant(&user_id, &facts).unwrap();
    }

    #[tokio::test]
    async fn renewal_extends_expiry_via_original_transaction() {
        let f = fixture();
        let user_id = UserId::generate();
        seed(&f, user_id);
        let expires = Utc::now() + Duration::days(60);

        let outcome = f
            .processor
            .process(&body("DID_RENEW", None, "n-1", &transaction("501", expires)))
            .await
            .unwrap();

        assert_eq!(outcome, WebhookOutcome::Applied);
        let entitlement = f.store.get_entitlement(&user_id).unwrap().unwrap();
        assert_eq!(
            entitlement.subscription_expiry_date.map(|d| d.timestamp_millis()),
            Some(expires.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn duplicate_notification_is_acknowledged_once() {
        let f = fixture();
        let user_id = UserId::generate();
        seed(&f, user_id);
        let payload = body("EXPIRED", None, "n-2", &transaction("500", Utc::now()));

        assert_eq!(f.processor.process(&payload).await.unwrap(), WebhookOutcome::Applied);
        assert_eq!(f.processor.process(&payload).await.unwrap(), WebhookOutcome::Duplicate);
    }

    #[tokio::test]
    async fn grace_period_then_expiry() {
        let f = fixture();
        let user_id = UserId::generate();
        seed(&f, user_id);
        let tx = transaction("500", Utc::now());

        f.processor
            .process(&body("DID_FAIL_TO_RENEW", Some("GRACE_PERIOD"), "n-3", &tx))
            .await
            .unwrap();
        let entitlement = f.store.get_entitlement(&user_id).unwrap().unwrap();
        assert!(!entitlement.is_premium);
        assert!(entitlement.in_grace_period);

        f.processor
            .process(&body("GRACE_PERIOD_EXPIRED", None, "n-4", &tx))
            .await
            .unwrap();
        assert!(!f.store.get_entitlement(&user_id).unwrap().unwrap().in_grace_period);
    }

    #[tokio::test]
    async fn billing_recovery_restores_tier() {
        let f = fixture();
        let user_id = UserId::generate();
        seed(&f, user_id);
        let tx = transaction("502", Utc::now() + Duration::days(30));

        f.processor
            .process(&body("EXPIRED", None, "n-5", &tx))
            .await
            .unwrap();
        f.processor
            .process(&body("DID_RENEW", Some("BILLING_RECOVERY"), "n-6", &tx))
            .await
            .unwrap();

        let entitlement = f.store.get_entitlement(&user_id).unwrap().unwrap();
        assert!(entitlement.is_premium);
        assert_eq!(entitlement.premium_tier, Some(PremiumTier::Premium));
    }

    #[tokio::test]
    async fn auto_renew_disabled_updates_ledger_and_entitlement() {
        let f = fixture();
        let user_id = UserId::generate();
        seed(&f, user_id);
        let tx = transaction("500", Utc::now());

        let outcome = f
            .processor
            .process(&body("DID_CHANGE_RENEWAL_STATUS", Some("AUTO_RENEW_DISABLED"), "n-7", &tx))
            .await
            .unwrap();

        assert_eq!(outcome, WebhookOutcome::Applied);
        assert!(!f.store.get_entitlement(&user_id).unwrap().unwrap().auto_renew_enabled);
        let record = f
            .store
            .get_purchase(&TransactionId::new("500").unwrap())
            .unwrap()
            .unwrap();
        assert!(!record.auto_renew_status);
    }

    #[tokio::test]
    async fn price_increase_creates_notice() {
        let f = fixture();
        let user_id = UserId::generate();
        seed(&f, user_id);

        f.processor
            .process(&body("PRICE_INCREASE", Some("PENDING"), "n-8", &transaction("500", Utc::now())))
            .await
            .unwrap();

        let notices = f.store.list_notices_by_user(&user_id).unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].subtype.as_deref(), Some("PENDING"));
    }

    #[tokio::test]
    async fn unknown_transaction_is_acknowledged() {
        let f = fixture();
        let result = f
            .processor
            .process(&body("REFUND", None, "n-9", &json!({
                "transactionId": "999",
                "productId": "premium_monthly",
                "purchaseDate": 0
            })))
            .await;
        assert_eq!(status_for(&result), StatusCode::OK);
        assert_eq!(result.unwrap(), WebhookOutcome::UnknownTransaction);
    }

    #[tokio::test]
    async fn forged_signature_is_unauthorized() {
        let f = fixture();
        let forged = encode(
            &Header::new(Algorithm::HS256),
            &json!({ "notificationType": "REFUND", "notificationUUID": "n-10" }),
            &EncodingKey::from_secret(b"wrong"),
        )
        .unwrap();
        let body = serde_json::to_vec(&json!({ "signedPayload": forged })).unwrap();

        let result = f.processor.process(&body).await;
        assert_eq!(status_for(&result), StatusCode::UNAUTHORIZED);
        assert!(f.store.record_notification_if_absent("n-10").unwrap());
    }

    #[tokio::test]
    async fn undecodable_transaction_is_malformed() {
        let f = fixture();
        let payload = json!({
            "notificationType": "REFUND",
            "notificationUUID": "n-11",
            "data": { "signedTransactionInfo": "garbage" }
        });
        let body = serde_json::to_vec(&json!({ "signedPayload": sign(&payload) })).unwrap();
        assert_eq!(f.processor.process(&body).await.unwrap(), WebhookOutcome::Malformed);
    }

    #[tokio::test]
    async fn out_of_order_renewals_keep_latest_expiry() {
        let f = fixture();
        let user_id = UserId::generate();
        seed(&f, user_id);
        let later = Utc::now() + Duration::days(90);
        let earlier = Utc::now() + Duration::days(60);

        f.processor
            .process(&body("DID_RENEW", None, "n-12", &transaction("502", later)))
            .await
            .unwrap();
        let stale = f
            .processor
            .process(&body("DID_RENEW", None, "n-13", &transaction("501", earlier)))
            .await
            .unwrap();

        assert_eq!(stale, WebhookOutcome::NoOp);
        let entitlement = f.store.get_entitlement(&user_id).unwrap().unwrap();
        assert_eq!(
            entitlement.subscription_expiry_date.map(|d| d.timestamp_millis()),
            Some(later.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn billing_recovery_after_refund_keeps_premium_revoked() {
        let f = fixture();
        let user_id = UserId::generate();
        seed(&f, user_id);
        let tx = transaction("500", Utc::now() + Duration::days(30));

        f.processor.process(&body("REFUND", None, "n-14", &tx)).await.unwrap();
        f.processor
            .process(&body("DID_RENEW", Some("BILLING_RECOVERY"), "n-15", &tx))
            .await
            .unwrap();

        let entitlement = f.store.get_entitlement(&user_id).unwrap().unwrap();
        assert!(!entitlement.is_premium);
        assert_eq!(entitlement.premium_tier, None);
    }

    #[tokio::test]
    async fn billing_recovery_for_suspended_account_keeps_premium_revoked() {
        let f = fixture();
        let user_id = UserId::generate();
        seed(&f, user_id);
        f.entitlements
            .update(&user_id, &mut |entitlement| {
                entitlement.suspend("fraud review rejected") | entitlement.clear_premium()
            })
            .unwrap();

        f.processor
            .process(&body(
                "DID_RENEW",
                Some("BILLING_RECOVERY"),
                "n-16",
                &transaction("503", Utc::now() + Duration::days(30)),
            ))
            .await
            .unwrap();

        let entitlement = f.store.get_entitlement(&user_id).unwrap().unwrap();
        assert!(entitlement.suspended);
        assert!(!entitlement.is_premium);
    }

    #[tokio::test]
    async fn concurrent_renewal_and_refund_end_revoked() {
        let f = fixture();
        let user_id = UserId::generate();
        seed(&f, user_id);
        let tx = transaction("500", Utc::now() + Duration::days(30));
        let renewal = body("DID_RENEW", Some("BILLING_RECOVERY"), "n-17", &tx);
        let refund = body("REFUND", None, "n-18", &tx);

        let (renewed, refunded) =
            tokio::join!(f.processor.process(&renewal), f.processor.process(&refund));
        renewed.unwrap();
        refunded.unwrap();

        let entitlement = f.store.get_entitlement(&user_id).unwrap().unwrap();
        assert!(!entitlement.is_premium);
        assert_eq!(f.store.count_refunds(&user_id).unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_refund_is_counted_on_redelivery() {
        let store = Arc::new(FailingStore::new());
        let (entitlements, processor) = processor_on(store.clone());
        let user_id = UserId::generate();
        seed_into(&*store, &entitlements, user_id);
        let refund = body("REFUND", None, "n-19", &transaction("500", Utc::now()));

        store.fail_once("append_refund_if_absent");
        let result = processor.process(&refund).await;
        assert_eq!(status_for(&result), StatusCode::INTERNAL_SERVER_ERROR);

        assert_eq!(processor.process(&refund).await.unwrap(), WebhookOutcome::Applied);
        assert_eq!(store.inner.count_refunds(&user_id).unwrap(), 1);
        assert_eq!(processor.process(&refund).await.unwrap(), WebhookOutcome::Duplicate);
    }
}
