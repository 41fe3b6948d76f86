//! Refund abuse detection.
//!
//! Every refund or revocation revokes premium at once and is counted against
//! the user. More than two lifetime refunds raise a critical alert; more than
//! three suspend the account.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use iap_guard_core::{
    AdminAlert, AlertPriority, FraudEventType, FraudLogEntry, GuardError, PurchaseRecord,
    RefundHistoryEntry, Severity, TransactionId, UserId,
};
use iap_guard_store::Store;

use crate::locks::UserLocks;
use crate::services::EntitlementUpdater;

/// Refund count above which an alert is raised.
pub const REFUND_ALERT_THRESHOLD: u32 = 2;

/// Refund count above which the account is suspended.
pub const REFUND_SUSPEND_THRESHOLD: u32 = 3;

/// Suspension reason recorded for refund abuse.
pub const REFUND_ABUSE_REASON: &str = "refund abuse";

/// A refund or revocation reported by the payment platform.
#[derive(Debug, Clone)]
pub struct RefundEvent {
    /// Refunded transaction.
    pub transaction_id: TransactionId,
    /// First transaction of its renewal chain.
    pub original_transaction_id: Option<TransactionId>,
    /// User the caller believes owns the transaction.
    pub user_hint: Option<UserId>,
    /// When the platform revoked the transaction.
    pub revocation_date: Option<DateTime<Utc>>,
}

/// What the detector did with a refund.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundOutcome {
    /// No ledger record matches; nothing was changed.
    UnknownTransaction,
    /// The transaction was already refunded; premium was cleared again but
    /// nothing was counted.
    Redelivered {
        /// Owner of the transaction.
        user_id: UserId,
    },
    /// The refund was recorded.
    Recorded {
        /// Owner of the transaction.
        user_id: UserId,
        /// Lifetime refunds including this one.
        refund_count: u32,
        /// Whether an admin alert was raised.
        alerted: bool,
        /// Whether the count is past the suspension threshold.
        suspended: bool,
    },
}

/// Records refunds and escalates repeat refunders.
#[derive(Clone)]
pub struct RefundAbuseDetector {
    store: Arc<dyn Store>,
    entitlements: EntitlementUpdater,
    locks: Arc<UserLocks>,
}

impl RefundAbuseDetector {
    /// Create a detector.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        entitlements: EntitlementUpdater,
        locks: Arc<UserLocks>,
    ) -> Self {
        Self {
            store,
            entitlements,
            locks,
        }
    }

    /// Handle one refund. Takes the owner's lock; callers must not hold it.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::Storage` if a store operation fails.
    pub async fn handle(&self, event: &RefundEvent) -> Result<RefundOutcome, GuardError> {
        let Some(record) = self.resolve(event)? else {
            tracing::warn!(
                transaction_id = %event.transaction_id,
                user_hint = ?event.user_hint,
                "Refund for unknown transaction ignored"
            );
            return Ok(RefundOutcome::UnknownTransaction);
        };

        let user_id = record.user_id;
        if event.user_hint.is_some_and(|hint| hint != user_id) {
            tracing::warn!(
                transaction_id = %record.transaction_id,
                user_id = %user_id,
                user_hint = ?event.user_hint,
                "Refund user hint does not match ledger owner"
            );
        }

        let _guard = self.locks.lock(&user_id).await;

        let refund_date = event.revocation_date.unwrap_or_else(Utc::now);
        self.store
            .update_purchase(&record.transaction_id, &mut |purchase| {
                if purchase.refunded {
                    return false;
                }
                purchase.refunded = true;
                purchase.refund_date = Some(refund_date);
                true
            })?;

        self.entitlements
            .update(&user_id, &mut |entitlement| entitlement.clear_premium())?;

        // The history entry is written last and alone marks the refund as
        // counted.
        if self.store.refund_recorded(&record.transaction_id)? {
            return Ok(Self::redelivered(&record));
        }

        let refund_count = self.store.count_refunds(&user_id)?.saturating_add(1);

        let alerted = refund_count > REFUND_ALERT_THRESHOLD;
        if alerted {
            self.raise_alert(&record, refund_count)?;
        }

        let suspended = refund_count > REFUND_SUSPEND_THRESHOLD;
        if suspended {
            self.suspend(&record, refund_count)?;
        }

        let entry = RefundHistoryEntry::new(
            user_id,
            record.transaction_id.clone(),
            record.product_id.clone(),
        );
        let Some(refund_count) = self.store.append_refund_if_absent(&entry)? else {
            return Ok(Self::redelivered(&record));
        };

        tracing::info!(
            user_id = %user_id,
            transaction_id = %record.transaction_id,
            refund_count,
            "Refund recorded, premium revoked"
        );

        Ok(RefundOutcome::Recorded {
            user_id,
            refund_count,
            alerted,
            suspended,
        })
    }

    fn redelivered(record: &PurchaseRecord) -> RefundOutcome {
        tracing::info!(
            user_id = %record.user_id,
            transaction_id = %record.transaction_id,
            "Refund redelivered, premium revoked without counting"
        );
        RefundOutcome::Redelivered {
            user_id: record.user_id,
        }
    }

    fn suspend(&self, record: &PurchaseRecord, refund_count: u32) -> Result<(), GuardError> {
        let mutation = self.entitlements.update(&record.user_id, &mut |entitlement| {
            entitlement.suspend(REFUND_ABUSE_REASON)
        })?;
        if !mutation.changed {
            return Ok(());
        }

        self.store.append_fraud_log(&FraudLogEntry::new(
            record.user_id,
            Some(record.transaction_id.clone()),
            FraudEventType::AccountSuspended,
            Severity::Critical,
            json!({ "reason": REFUND_ABUSE_REASON, "refund_count": refund_count }),
        ))?;
        tracing::warn!(
            user_id = %record.user_id,
            refund_count,
            "Account suspended for refund abuse"
        );
        Ok(())
    }

    fn resolve(&self, event: &RefundEvent) -> Result<Option<PurchaseRecord>, GuardError> {
        if let Some(record) = self.store.get_purchase(&event.transaction_id)? {
            return Ok(Some(record));
        }
        match &event.original_transaction_id {
            Some(original) => Ok(self.store.find_purchase_by_original(original)?),
            None => Ok(None),
        }
    }

    fn raise_alert(&self, record: &PurchaseRecord, refund_count: u32) -> Result<(), GuardError> {
        let details = json!({
            "refund_count": refund_count,
            "transaction_id": record.transaction_id,
            "product_id": record.product_id,
        });

        self.store.append_fraud_log(&FraudLogEntry::new(
            record.user_id,
            Some(record.transaction_id.clone()),
            FraudEventType::RefundAbuse,
            Severity::Critical,
            details.clone(),
        ))?;
        self.store.put_alert(&AdminAlert::new(
            "refund_abuse",
            Some(record.user_id),
            AlertPriority::Critical,
            details,
        ))?;

        tracing::warn!(
            user_id = %record.user_id,
            refund_count,
            "Refund abuse threshold exceeded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use iap_guard_core::{PremiumTier, ProductCatalog, TransactionFacts};
    use iap_guard_store::MemoryStore;

    use crate::testing::FailingStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        entitlements: EntitlementUpdater,
        detector: RefundAbuseDetector,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let entitlements =
            EntitlementUpdater::new(store.clone(), Arc::new(ProductCatalog::default()));
        let detector = RefundAbuseDetector::new(
            store.clone(),
            entitlements.clone(),
            Arc::new(UserLocks::default()),
        );
        Fixture {
            store,
            entitlements,
            detector,
        }
    }

    fn failing_fixture() -> (Arc<FailingStore>, EntitlementUpdater, RefundAbuseDetector) {
        let store = Arc::new(FailingStore::new());
        let entitlements =
            EntitlementUpdater::new(store.clone(), Arc::new(ProductCatalog::default()));
        let detector = RefundAbuseDetector::new(
            store.clone(),
            entitlements.clone(),
            Arc::new(UserLocks::default()),
        );
        (store, entitlements, detector)
    }

    fn tx(id: &str) -> TransactionId {
        TransactionId::new(id).unwrap()
    }

    fn purchase(fixture: &Fixture, user_id: UserId, id: &str) {
        seed(&*fixture.store, &fixture.entitlements, user_id, id);
    }

    fn seed(store: &dyn Store, entitlements: &EntitlementUpdater, user_id: UserId, id: &str) {
        let facts = TransactionFacts {
            transaction_id: tx(id),
            original_transaction_id: tx(id),
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
        assert!(store.insert_purchase_if_absent(&record).unwrap());
        entitlements.grant(&user_id, &facts).unwrap();
    }

    fn refund(id: &str) -> RefundEvent {
        RefundEvent {
            transaction_id: tx(id),
            original_transaction_id: None,
            user_hint: None,
            revocation_date: None,
        }
    }

    #[tokio::test]
    async fn refund_revokes_premium_immediately() {
        let f = fixture();
        let user_id = UserId::generate();
        purchase(&f, user_id, "100");

        let outcome = f.detector.handle(&refund("100")).await.unwrap();

        assert_eq!(
            outcome,
            RefundOutcome::Recorded {
                user_id,
                refund_count: 1,
                alerted: false,
                suspended: false,
            }
        );
        let entitlement = f.store.get_entitlement(&user_id).unwrap().unwrap();
        assert!(!entitlement.is_premium);
        assert_eq!(entitlement.premium_tier, None::<PremiumTier>);
        let record = f.store.get_purchase(&tx("100")).unwrap().unwrap();
        assert!(record.refunded);
        assert!(record.refund_date.is_some());
    }

    #[tokio::test]
    async fn three_refunds_alert_without_suspension() {
        let f = fixture();
        let user_id = UserId::generate();
        for id in ["201", "202", "203"] {
            purchase(&f, user_id, id);
            f.detector.handle(&refund(id)).await.unwrap();
        }

        let entitlement = f.store.get_entitlement(&user_id).unwrap().unwrap();
        assert!(!entitlement.suspended);
        assert_eq!(f.store.list_unacknowledged_alerts(10).unwrap().len(), 1);
        let log = f.store.list_fraud_log_by_user(&user_id, 10).unwrap();
        assert!(log
            .iter()
            .any(|e| e.event_type == FraudEventType::RefundAbuse && e.severity == Severity::Critical));
    }

    #[tokio::test]
    async fn fourth_refund_suspends() {
        let f = fixture();
        let user_id = UserId::generate();
        let mut last = None;
        for id in ["301", "302", "303", "304"] {
            purchase(&f, user_id, id);
            last = Some(f.detector.handle(&refund(id)).await.unwrap());
        }

        assert!(matches!(
            last,
            Some(RefundOutcome::Recorded {
                refund_count: 4,
                suspended: true,
                ..
            })
        ));
        let entitlement = f.store.get_entitlement(&user_id).unwrap().unwrap();
        assert!(entitlement.suspended);
        assert_eq!(entitlement.suspension_reason.as_deref(), Some(REFUND_ABUSE_REASON));
    }

    #[tokio::test]
    async fn redelivery_is_not_counted_twice() {
        let f = fixture();
        let user_id = UserId::generate();
        purchase(&f, user_id, "400");

        f.detector.handle(&refund("400")).await.unwrap();
        let again = f.detector.handle(&refund("400")).await.unwrap();

        assert_eq!(again, RefundOutcome::Redelivered { user_id });
        assert_eq!(f.store.count_refunds(&user_id).unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_transaction_changes_nothing() {
        let f = fixture();
        let outcome = f.detector.handle(&refund("999")).await.unwrap();
        assert_eq!(outcome, RefundOutcome::UnknownTransaction);
        assert!(f.store.list_refunds(Utc::now() - Duration::days(1), 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn falls_back_to_original_transaction() {
        let f = fixture();
        let user_id = UserId::generate();
        purchase(&f, user_id, "500");

        let event = RefundEvent {
            original_transaction_id: Some(tx("500")),
            ..refund("501")
        };
        let outcome = f.detector.handle(&event).await.unwrap();
        assert!(matches!(outcome, RefundOutcome::Recorded { refund_count: 1, .. }));
    }

    #[tokio::test]
    async fn failed_history_write_is_counted_on_retry() {
        let (store, entitlements, detector) = failing_fixture();
        let user_id = UserId::generate();
        seed(&*store, &entitlements, user_id, "600");

        store.fail_once("append_refund_if_absent");
        assert!(detector.handle(&refund("600")).await.is_err());
        assert!(store.inner.get_purchase(&tx("600")).unwrap().unwrap().refunded);
        assert_eq!(store.inner.count_refunds(&user_id).unwrap(), 0);

        let outcome = detector.handle(&refund("600")).await.unwrap();
        assert!(matches!(outcome, RefundOutcome::Recorded { refund_count: 1, .. }));
        assert_eq!(store.inner.count_refunds(&user_id).unwrap(), 1);

        let again = detector.handle(&refund("600")).await.unwrap();
        assert_eq!(again, RefundOutcome::Redelivered { user_id });
    }

    #[tokio::test]
    async fn failed_premium_revocation_is_counted_on_retry() {
        let (store, entitlements, detector) = failing_fixture();
        let user_id = UserId::generate();
        seed(&*store, &entitlements, user_id, "610");

        store.fail_once("update_entitlement");
        assert!(detector.handle(&refund("610")).await.is_err());

        let outcome = detector.handle(&refund("610")).await.unwrap();
        assert!(matches!(outcome, RefundOutcome::Recorded { refund_count: 1, .. }));
        let entitlement = store.inner.get_entitlement(&user_id).unwrap().unwrap();
        assert!(!entitlement.is_premium);
    }

    #[tokio::test]
    async fn suspension_survives_failed_history_write() {
        let (store, entitlements, detector) = failing_fixture();
        let user_id = UserId::generate();
        for id in ["621", "622", "623"] {
            seed(&*store, &entitlements, user_id, id);
            detector.handle(&refund(id)).await.unwrap();
        }
        seed(&*store, &entitlements, user_id, "624");

        store.fail_once("append_refund_if_absent");
        assert!(detector.handle(&refund("624")).await.is_err());
        assert!(store.inner.get_entitlement(&user_id).unwrap().unwrap().suspended);

        let outcome = detector.handle(&refund("624")).await.unwrap();
        assert_eq!(
            outcome,
            RefundOutcome::Recorded {
                user_id,
                refund_count: 4,
                alerted: true,
                suspended: true,
            }
        );
        let suspensions = store
            .inner
            .list_fraud_log_by_user(&user_id, 50)
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == FraudEventType::AccountSuspended)
            .count();
        assert_eq!(suspensions, 1);
    }
}
