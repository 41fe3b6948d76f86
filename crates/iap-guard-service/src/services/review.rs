//! Admin review of flagged transactions and refund activity.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::json;

use iap_guard_core::{
    AdminAlert, FlaggedTransaction, FraudEventType, FraudLogEntry, GuardError,
    RefundHistoryEntry, ReviewDecision, Severity, TransactionId, UserEntitlement, UserId,
};
use iap_guard_store::Store;

use crate::locks::UserLocks;
use crate::services::EntitlementUpdater;

/// Suspension reason recorded when a reviewer rejects a transaction.
pub const REVIEW_REJECTED_REASON: &str = "fraud review rejected";

/// Fraud log entries included in a user summary.
const SUMMARY_LOG_LIMIT: usize = 50;

/// Refunds in a period with per-user totals.
#[derive(Debug, Clone, Serialize)]
pub struct RefundReport {
    /// Entries, newest first.
    pub entries: Vec<RefundHistoryEntry>,
    /// Refunds per user within the period, most refunds first.
    pub per_user: Vec<UserRefundCount>,
}

/// Refund total for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRefundCount {
    /// The user.
    pub user_id: UserId,
    /// Refunds in the period.
    pub refund_count: u32,
}

/// Everything an administrator needs to judge one user.
#[derive(Debug, Clone, Serialize)]
pub struct UserRiskSummary {
    /// The user.
    pub user_id: UserId,
    /// Current entitlement, if one exists.
    pub entitlement: Option<UserEntitlement>,
    /// Lifetime refunds.
    pub refund_count: u32,
    /// Recent fraud log, newest first.
    pub fraud_log: Vec<FraudLogEntry>,
}

/// Operations behind the admin endpoints.
pub struct AdminReview {
    store: Arc<dyn Store>,
    entitlements: EntitlementUpdater,
    locks: Arc<UserLocks>,
}

impl AdminReview {
    /// Create the review surface.
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

    /// Unreviewed flagged transactions, highest score first.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::Storage` if the read fails.
    pub fn list_pending(&self, limit: usize) -> Result<Vec<FlaggedTransaction>, GuardError> {
        Ok(self.store.list_pending_flagged(limit)?)
    }

    /// Record a decision on a flagged transaction.
    ///
    /// Rejecting suspends the user and revokes premium.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the transaction was never flagged
    /// - `AlreadyReviewed` if it already has a decision
    /// - `Storage` if a write fails
    pub async fn review(
        &self,
        transaction_id: &TransactionId,
        decision: ReviewDecision,
        admin_note: Option<String>,
        admin_id: &str,
    ) -> Result<FlaggedTransaction, GuardError> {
        let not_found = || GuardError::NotFound {
            entity: "flagged transaction",
            id: transaction_id.to_string(),
        };
        let already_reviewed = || GuardError::AlreadyReviewed {
            transaction_id: transaction_id.to_string(),
        };

        let owner = self.store.get_flagged(transaction_id)?.ok_or_else(not_found)?.user_id;
        let _guard = self.locks.lock(&owner).await;

        // The decision is stored last; a failed consequence leaves the flag
        // pending.
        let pending = self.store.get_flagged(transaction_id)?.ok_or_else(not_found)?;
        if pending.reviewed {
            return Err(already_reviewed());
        }
        if decision == ReviewDecision::Rejected {
            self.reject(&pending, admin_note.as_deref(), admin_id)?;
        }

        let mutation = self
            .store
            .update_flagged(transaction_id, &mut |flagged| {
                flagged.review(decision, admin_note.clone(), admin_id)
            })?
            .ok_or_else(not_found)?;
        if !mutation.changed {
            return Err(already_reviewed());
        }

        tracing::info!(
            transaction_id = %transaction_id,
            user_id = %owner,
            admin_id,
            decision = ?decision,
            "Flagged transaction reviewed"
        );
        Ok(mutation.record)
    }

    fn reject(
        &self,
        flagged: &FlaggedTransaction,
        admin_note: Option<&str>,
        admin_id: &str,
    ) -> Result<(), GuardError> {
        self.entitlements.update(&flagged.user_id, &mut |entitlement| {
            entitlement.suspend(REVIEW_REJECTED_REASON) | entitlement.clear_premium()
        })?;
        self.store.append_fraud_log(&FraudLogEntry::new(
            flagged.user_id,
            Some(flagged.transaction_id.clone()),
            FraudEventType::ReviewRejected,
            Severity::High,
            json!({
                "admin_id": admin_id,
                "admin_note": admin_note,
                "fraud_score": flagged.fraud_score,
            }),
        ))?;
        tracing::warn!(
            transaction_id = %flagged.transaction_id,
            user_id = %flagged.user_id,
            admin_id,
            "Flagged transaction rejected, user suspended"
        );
        Ok(())
    }

    /// Refunds in the last `period_days` days.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::Storage` if the read fails.
    pub fn refund_history(
        &self,
        period_days: u32,
        limit: usize,
    ) -> Result<RefundReport, GuardError> {
        let since = Utc::now() - Duration::days(i64::from(period_days));
        let entries = self.store.list_refunds(since, limit)?;

        let mut counts: HashMap<UserId, u32> = HashMap::new();
        for entry in &entries {
            *counts.entry(entry.user_id).or_insert(0) += 1;
        }
        let mut per_user: Vec<UserRefundCount> = counts
            .into_iter()
            .map(|(user_id, refund_count)| UserRefundCount {
                user_id,
                refund_count,
            })
            .collect();
        per_user.sort_by(|a, b| {
            b.refund_count
                .cmp(&a.refund_count)
                .then_with(|| a.user_id.to_string().cmp(&b.user_id.to_string()))
        });

        Ok(RefundReport { entries, per_user })
    }

    /// Unacknowledged alerts, newest first.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::Storage` if the read fails.
    pub fn alerts(&self, limit: usize) -> Result<Vec<AdminAlert>, GuardError> {
        Ok(self.store.list_unacknowledged_alerts(limit)?)
    }

    /// Risk summary for one user.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::Storage` if a read fails.
    pub fn user_summary(&self, user_id: &UserId) -> Result<UserRiskSummary, GuardError> {
        Ok(UserRiskSummary {
            user_id: *user_id,
            entitlement: self.store.get_entitlement(user_id)?,
            refund_count: self.store.count_refunds(user_id)?,
            fraud_log: self.store.list_fraud_log_by_user(user_id, SUMMARY_LOG_LIMIT)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iap_guard_core::{PremiumTier, ProductCatalog};
    use iap_guard_store::MemoryStore;

    use crate::testing::FailingStore;

    fn tx(id: &str) -> TransactionId {
        TransactionId::new(id).unwrap()
    }

    fn review() -> (Arc<MemoryStore>, AdminReview) {
        let store = Arc::new(MemoryStore::new());
        let entitlements =
            EntitlementUpdater::new(store.clone(), Arc::new(ProductCatalog::default()));
        let review = AdminReview::new(store.clone(), entitlements, Arc::new(UserLocks::default()));
        (store, review)
    }

    fn flag(store: &dyn Store, id: &str, user_id: UserId, score: u8) {
        store
            .insert_flagged_if_absent(&FlaggedTransaction::pending(
                tx(id),
                user_id,
                "premium_monthly".into(),
                score,
            ))
            .unwrap();
    }

    #[tokio::test]
    async fn reject_suspends_and_revokes() {
        let (store, review) = review();
        let user_id = UserId::generate();
        store
            .update_entitlement(&user_id, &mut |e| {
                e.grant_subscription(&tx("10"), PremiumTier::Vip, None, true)
            })
            .unwrap();
        flag(&*store, "10", user_id, 60);

        let flagged = review
            .review(&tx("10"), ReviewDecision::Rejected, Some("chargeback ring".into()), "ops")
            .await
            .unwrap();

        assert_eq!(flagged.decision, Some(ReviewDecision::Rejected));
        assert_eq!(flagged.reviewed_by.as_deref(), Some("ops"));
        let entitlement = store.get_entitlement(&user_id).unwrap().unwrap();
        assert!(entitlement.suspended);
        assert!(!entitlement.is_premium);
        assert_eq!(entitlement.suspension_reason.as_deref(), Some(REVIEW_REJECTED_REASON));
        let log = store.list_fraud_log_by_user(&user_id, 10).unwrap();
        assert_eq!(log[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn second_review_is_refused() {
        let (store, review) = review();
        flag(&*store, "20", UserId::generate(), 55);

        review
            .review(&tx("20"), ReviewDecision::Approved, None, "ops")
            .await
            .unwrap();
        let err = review
            .review(&tx("20"), ReviewDecision::Rejected, None, "ops")
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::AlreadyReviewed { .. }));
        assert!(review.list_pending(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_flag_is_not_found() {
        let (_, review) = review();
        let err = review
            .review(&tx("30"), ReviewDecision::Approved, None, "ops")
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::NotFound { .. }));
    }

    #[test]
    fn refund_report_counts_per_user() {
        let (store, review) = review();
        let heavy = UserId::generate();
        let light = UserId::generate();
        for (user, id) in [(heavy, "1"), (heavy, "2"), (light, "3")] {
            store
                .append_refund_if_absent(&RefundHistoryEntry::new(user, tx(id), "premium_monthly".into()))
                .unwrap();
        }

        let report = review.refund_history(30, 100).unwrap();
        assert_eq!(report.entries.len(), 3);
        assert_eq!(
            report.per_user[0],
            UserRefundCount {
                user_id: heavy,
                refund_count: 2
            }
        );
    }

    #[test]
    fn pending_sorted_by_score() {
        let (store, review) = review();
        let user_id = UserId::generate();
        flag(&*store, "40", user_id, 52);
        flag(&*store, "41", user_id, 70);

        let pending = review.list_pending(10).unwrap();
        assert_eq!(pending[0].fraud_score, 70);
    }

    #[tokio::test]
    async fn failed_suspension_leaves_flag_pending() {
        let store = Arc::new(FailingStore::new());
        let entitlements =
            EntitlementUpdater::new(store.clone(), Arc::new(ProductCatalog::default()));
        let review = AdminReview::new(store.clone(), entitlements, Arc::new(UserLocks::default()));
        let user_id = UserId::generate();
        flag(&*store, "60", user_id, 70);

        store.fail_once("update_entitlement");
        review
            .review(&tx("60"), ReviewDecision::Rejected, None, "ops")
            .await
            .unwrap_err();
        assert_eq!(store.inner.list_pending_flagged(10).unwrap().len(), 1);

        let flagged = review
            .review(&tx("60"), ReviewDecision::Rejected, None, "ops")
            .await
            .unwrap();
        assert_eq!(flagged.decision, Some(ReviewDecision::Rejected));
        assert!(store.inner.get_entitlement(&user_id).unwrap().unwrap().suspended);
    }

    #[tokio::test]
    async fn failed_decision_write_can_be_repeated() {
        let store = Arc::new(FailingStore::new());
        let entitlements =
            EntitlementUpdater::new(store.clone(), Arc::new(ProductCatalog::default()));
        let review = AdminReview::new(store.clone(), entitlements, Arc::new(UserLocks::default()));
        let user_id = UserId::generate();
        flag(&*store, "61", user_id, 70);

        store.fail_once("update_flagged");
        review
            .review(&tx("61"), ReviewDecision::Rejected, None, "ops")
            .await
            .unwrap_err();
        assert!(store.inner.get_entitlement(&user_id).unwrap().unwrap().suspended);

        review
            .review(&tx("61"), ReviewDecision::Rejected, None, "ops")
            .await
            .unwrap();
        assert!(store.inner.list_pending_flagged(10).unwrap().is_empty());
        let err = review
            .review(&tx("61"), ReviewDecision::Approved, None, "ops")
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::AlreadyReviewed { .. }));
    }
}
