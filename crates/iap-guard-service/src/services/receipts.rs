//! Synchronous receipt validation.
//!
//! The purchase path: verify the receipt with the platform, decode the
//! transaction, score it, record it exactly once and grant the entitlement.
//! Receipts are never logged; a short fingerprint identifies them instead.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use iap_guard_core::{
    FlaggedTransaction, FraudAssessment, FraudEventType, FraudLogEntry, FraudPolicy,
    FraudSignals, GuardError, PurchaseRecord, RecordId, Severity, TransactionFacts,
    TransactionId, UserId, Verdict,
};
use iap_guard_store::Store;

use crate::apple::{ReceiptVerifier, VerifyError};
use crate::crypto::receipt_fingerprint;
use crate::decoder::decode_receipt;
use crate::locks::UserLocks;
use crate::services::EntitlementUpdater;

/// How many fraud log entries are inspected for prior critical events.
const FRAUD_HISTORY_LOOKBACK: usize = 100;

/// A client's claim that it bought something.
#[derive(Debug, Clone)]
pub struct ValidationRequest {
    /// Authenticated caller.
    pub user_id: UserId,
    /// Base64 receipt.
    pub receipt_data: String,
    /// Product the client says it bought.
    pub product_id: String,
    /// Client device identifier.
    pub device_id: Option<String>,
    /// Client-reported device compromise risk in `0..=1`.
    pub jailbreak_risk: Option<f64>,
}

/// A validated, recorded and granted purchase.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    /// Ledger record id.
    pub purchase_id: RecordId,
    /// Platform transaction id.
    pub transaction_id: TransactionId,
    /// Subscription expiry, if any.
    pub expiry_date: Option<DateTime<Utc>>,
    /// Composite fraud score.
    pub fraud_score: u8,
    /// Whether the purchase was queued for manual review.
    pub flagged: bool,
}

/// Validates client receipts.
pub struct ReceiptValidator {
    verifier: Arc<dyn ReceiptVerifier>,
    store: Arc<dyn Store>,
    entitlements: EntitlementUpdater,
    policy: FraudPolicy,
    locks: Arc<UserLocks>,
}

impl ReceiptValidator {
    /// Create a validator.
    #[must_use]
    pub fn new(
        verifier: Arc<dyn ReceiptVerifier>,
        store: Arc<dyn Store>,
        entitlements: EntitlementUpdater,
        policy: FraudPolicy,
        locks: Arc<UserLocks>,
    ) -> Self {
        Self {
            verifier,
            store,
            entitlements,
            policy,
            locks,
        }
    }

    /// The active fraud policy.
    #[must_use]
    pub fn policy(&self) -> &FraudPolicy {
        &self.policy
    }

    /// Validate a receipt and grant what it unlocks.
    ///
    /// # Errors
    ///
    /// - `InvalidReceipt` if the platform refuses the receipt or it cannot be decoded
    /// - `ProductMismatch` / `UnknownProduct` for a bad product claim
    /// - `FraudRejected` if the score reaches the hard-reject threshold
    /// - `DuplicateReceipt` if the transaction was already recorded
    /// - `ExternalService` / `Storage` for transient failures
    pub async fn validate(
        &self,
        request: &ValidationRequest,
    ) -> Result<ValidationOutcome, GuardError> {
        let user_id = request.user_id;
        let fingerprint = receipt_fingerprint(&request.receipt_data);

        let response = self
            .verifier
            .verify(&request.receipt_data)
            .await
            .map_err(|err| {
                tracing::warn!(
                    user_id = %user_id,
                    receipt = %fingerprint,
                    reason = %err,
                    "Receipt verification failed"
                );
                match err {
                    VerifyError::Rejected(status) => GuardError::InvalidReceipt {
                        reason: format!("verification status {status}"),
                    },
                    other => GuardError::ExternalService {
                        service: "app_store".into(),
                        message: other.to_string(),
                    },
                }
            })?;

        let facts = decode_receipt(&response, &request.product_id).map_err(|err| {
            tracing::warn!(user_id = %user_id, receipt = %fingerprint, reason = %err, "Receipt not decodable");
            GuardError::InvalidReceipt {
                reason: err.to_string(),
            }
        })?;

        self.check_claim(user_id, request, &facts)?;

        let _guard = self.locks.lock(&user_id).await;

        if let Some(existing) = self.store.get_purchase(&facts.transaction_id)? {
            return self.resume(user_id, existing, &facts, request.device_id.as_deref());
        }

        let jailbreak_risk = request.jailbreak_risk.unwrap_or(0.0);
        let signals = self.signals(user_id, &facts, request.device_id.as_deref(), jailbreak_risk)?;
        let assessment = self.policy.assess(&signals);

        if assessment.verdict == Verdict::Reject {
            self.store.append_fraud_log(&FraudLogEntry::new(
                user_id,
                Some(facts.transaction_id.clone()),
                FraudEventType::FraudRejected,
                Severity::Critical,
                assessment_details(&facts, &assessment, request.device_id.as_deref()),
            ))?;
            tracing::warn!(
                user_id = %user_id,
                transaction_id = %facts.transaction_id,
                fraud_score = assessment.score,
                reason = "fraud_rejected",
                "Purchase blocked"
            );
            return Err(GuardError::FraudRejected {
                score: assessment.score,
            });
        }

        let record = PurchaseRecord::from_facts(
            user_id,
            &facts,
            assessment.score,
            jailbreak_risk,
            request.device_id.clone(),
        );
        if !self.store.insert_purchase_if_absent(&record)? {
            return Err(self.duplicate(user_id, &facts.transaction_id));
        }

        self.entitlements.grant(&user_id, &facts)?;

        let flagged = assessment.verdict == Verdict::Review;
        if flagged {
            self.flag(
                user_id,
                &facts,
                assessment.score,
                assessment_details(&facts, &assessment, request.device_id.as_deref()),
            )?;
        }

        Ok(Self::validated(record, flagged))
    }

    /// Finish a validation whose purchase was recorded but whose grant or
    /// review flag was not written. Anything else is a duplicate.
    fn resume(
        &self,
        user_id: UserId,
        existing: PurchaseRecord,
        facts: &TransactionFacts,
        device_id: Option<&str>,
    ) -> Result<ValidationOutcome, GuardError> {
        if existing.user_id != user_id || existing.refunded {
            return Err(self.duplicate(user_id, &facts.transaction_id));
        }

        let granted = self
            .store
            .get_entitlement(&user_id)?
            .is_some_and(|entitlement| entitlement.has_applied(&facts.transaction_id));
        let flagged = self.policy.verdict(existing.fraud_score) == Verdict::Review;
        let flag_missing = flagged && self.store.get_flagged(&facts.transaction_id)?.is_none();

        if granted && !flag_missing {
            return Err(self.duplicate(user_id, &facts.transaction_id));
        }

        tracing::warn!(
            user_id = %user_id,
            transaction_id = %facts.transaction_id,
            granted,
            flag_missing,
            "Completing interrupted validation"
        );

        if !granted {
            self.entitlements.grant(&user_id, facts)?;
        }
        if flag_missing {
            self.flag(
                user_id,
                facts,
                existing.fraud_score,
                json!({
                    "fraud_score": existing.fraud_score,
                    "product_id": facts.product_id,
                    "device_id": device_id,
                }),
            )?;
        }

        Ok(Self::validated(existing, flagged))
    }

    fn validated(record: PurchaseRecord, flagged: bool) -> ValidationOutcome {
        tracing::info!(
            user_id = %record.user_id,
            transaction_id = %record.transaction_id,
            product_id = %record.product_id,
            fraud_score = record.fraud_score,
            flagged,
            "Receipt validated"
        );

        ValidationOutcome {
            purchase_id: record.purchase_id,
            transaction_id: record.transaction_id,
            expiry_date: record.expiry_date,
            fraud_score: record.fraud_score,
            flagged,
        }
    }

    fn check_claim(
        &self,
        user_id: UserId,
        request: &ValidationRequest,
        facts: &TransactionFacts,
    ) -> Result<(), GuardError> {
        if facts.product_id != request.product_id {
            tracing::warn!(
                user_id = %user_id,
                transaction_id = %facts.transaction_id,
                claimed = %request.product_id,
                actual = %facts.product_id,
                reason = "product_mismatch",
                "Receipt rejected"
            );
            return Err(GuardError::ProductMismatch {
                claimed: request.product_id.clone(),
                actual: facts.product_id.clone(),
            });
        }
        if self.entitlements.catalog().get(&facts.product_id).is_none() {
            tracing::warn!(
                user_id = %user_id,
                transaction_id = %facts.transaction_id,
                product_id = %facts.product_id,
                reason = "unknown_product",
                "Receipt rejected"
            );
            return Err(GuardError::UnknownProduct(facts.product_id.clone()));
        }
        if facts.revocation_date.is_some() {
            tracing::warn!(
                user_id = %user_id,
                transaction_id = %facts.transaction_id,
                reason = "revoked",
                "Receipt rejected"
            );
            return Err(GuardError::InvalidReceipt {
                reason: "transaction was refunded or revoked".into(),
            });
        }
        Ok(())
    }

    fn signals(
        &self,
        user_id: UserId,
        facts: &TransactionFacts,
        device_id: Option<&str>,
        jailbreak_risk: f64,
    ) -> Result<FraudSignals, GuardError> {
        let introductory_offer = facts.is_trial_period || facts.is_promotional;

        let other_accounts_on_device = match device_id {
            Some(device_id) if introductory_offer => {
                let others: HashSet<UserId> = self
                    .store
                    .list_purchases_by_device(device_id)?
                    .into_iter()
                    .filter(|p| p.user_id != user_id && p.is_introductory())
                    .map(|p| p.user_id)
                    .collect();
                u32::try_from(others.len()).unwrap_or(u32::MAX)
            }
            _ => 0,
        };

        let window_start = Utc::now() - Duration::seconds(self.policy.velocity_window_seconds);
        let recent = self.store.list_purchases_by_user(&user_id, window_start)?.len();

        let prior_critical = self
            .store
            .list_fraud_log_by_user(&user_id, FRAUD_HISTORY_LOOKBACK)?
            .iter()
            .filter(|entry| entry.severity == Severity::Critical)
            .count();

        Ok(FraudSignals {
            jailbreak_risk,
            introductory_offer,
            other_accounts_on_device,
            refund_count: self.store.count_refunds(&user_id)?,
            purchases_in_window: u32::try_from(recent).unwrap_or(u32::MAX).saturating_add(1),
            prior_critical_events: u32::try_from(prior_critical).unwrap_or(u32::MAX),
        })
    }

    fn duplicate(&self, user_id: UserId, transaction_id: &TransactionId) -> GuardError {
        match self.store.get_purchase(transaction_id) {
            Ok(Some(existing)) if existing.user_id != user_id => tracing::warn!(
                user_id = %user_id,
                owner = %existing.user_id,
                transaction_id = %transaction_id,
                reason = "duplicate_receipt",
                "Receipt replayed by a different user"
            ),
            _ => tracing::info!(
                user_id = %user_id,
                transaction_id = %transaction_id,
                reason = "duplicate_receipt",
                "Receipt already validated"
            ),
        }
        GuardError::DuplicateReceipt {
            transaction_id: transaction_id.to_string(),
        }
    }

    fn flag(
        &self,
        user_id: UserId,
        facts: &TransactionFacts,
        score: u8,
        details: serde_json::Value,
    ) -> Result<(), GuardError> {
        let flagged = FlaggedTransaction::pending(
            facts.transaction_id.clone(),
            user_id,
            facts.product_id.clone(),
            score,
        );
        if self.store.insert_flagged_if_absent(&flagged)? {
            self.store.append_fraud_log(&FraudLogEntry::new(
                user_id,
                Some(facts.transaction_id.clone()),
                FraudEventType::FlaggedForReview,
                Severity::Medium,
                details,
            ))?;
            tracing::info!(
                user_id = %user_id,
                transaction_id = %facts.transaction_id,
                fraud_score = score,
                "Purchase flagged for review"
            );
        }
        Ok(())
    }
}

fn assessment_details(
    facts: &TransactionFacts,
    assessment: &FraudAssessment,
    device_id: Option<&str>,
) -> serde_json::Value {
    json!({
        "fraud_score": assessment.score,
        "breakdown": assessment.breakdown,
        "product_id": facts.product_id,
        "device_id": device_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apple::{InAppEntry, VerifyReceiptResponse};
    use async_trait::async_trait;
    use iap_guard_core::{PremiumTier, ProductCatalog};
    use iap_guard_store::MemoryStore;
    use std::sync::Mutex;

    use crate::testing::FailingStore;

    /// Answers every receipt with a canned single-transaction response.
    struct StubVerifier {
        entries: Mutex<Vec<InAppEntry>>,
        fail_with: Option<i64>,
    }

    impl StubVerifier {
        fn with(entry: InAppEntry) -> Self {
            Self {
                entries: Mutex::new(vec![entry]),
                fail_with: None,
            }
        }

        fn set(&self, entry: InAppEntry) {
            *self.entries.lock().unwrap() = vec![entry];
        }
    }

    #[async_trait]
    impl ReceiptVerifier for StubVerifier {
        async fn verify(&self, _: &str) -> Result<VerifyReceiptResponse, VerifyError> {
            if let Some(status) = self.fail_with {
                return Err(VerifyError::Rejected(status));
            }
            Ok(VerifyReceiptResponse {
                status: 0,
                latest_receipt_info: self.entries.lock().unwrap().clone(),
                ..VerifyReceiptResponse::default()
            })
        }
    }

    fn entry(id: &str, product: &str) -> InAppEntry {
        let now = Utc::now().timestamp_millis();
        InAppEntry {
            transaction_id: id.into(),
            original_transaction_id: Some(id.into()),
            product_id: product.into(),
            purchase_date_ms: now.to_string(),
            expires_date_ms: Some((now + 2_592_000_000).to_string()),
            ..InAppEntry::default()
        }
    }

    fn validator(verifier: Arc<StubVerifier>, store: Arc<dyn Store>, policy: FraudPolicy) -> ReceiptValidator {
        let entitlements =
            EntitlementUpdater::new(store.clone(), Arc::new(ProductCatalog::default()));
        ReceiptValidator::new(verifier, store, entitlements, policy, Arc::new(UserLocks::default()))
    }

    fn request(user_id: UserId, product: &str) -> ValidationRequest {
        ValidationRequest {
            user_id,
            receipt_data: "cmVjZWlwdA==".into(),
            product_id: product.into(),
            device_id: None,
            jailbreak_risk: None,
        }
    }

    #[tokio::test]
    async fn validates_and_grants() {
        let store = Arc::new(MemoryStore::new());
        let verifier = Arc::new(StubVerifier::with(entry("1000", "premium_monthly")));
        let validator = validator(verifier, store.clone(), FraudPolicy::default());
        let user_id = UserId::generate();

        let outcome = validator.validate(&request(user_id, "premium_monthly")).await.unwrap();

        assert_eq!(outcome.fraud_score, 0);
        assert!(!outcome.flagged);
        assert!(outcome.expiry_date.is_some());
        let entitlement = store.get_entitlement(&user_id).unwrap().unwrap();
        assert_eq!(entitlement.premium_tier, Some(PremiumTier::Premium));
    }

    #[tokio::test]
    async fn second_validation_is_duplicate() {
        let store = Arc::new(MemoryStore::new());
        let verifier = Arc::new(StubVerifier::with(entry("1001", "premium_monthly")));
        let validator = validator(verifier, store.clone(), FraudPolicy::default());
        let user_id = UserId::generate();

        validator.validate(&request(user_id, "premium_monthly")).await.unwrap();
        let before = store.get_entitlement(&user_id).unwrap();
        let err = validator
            .validate(&request(user_id, "premium_monthly"))
            .await
            .unwrap_err();

        assert!(matches!(err, GuardError::DuplicateReceipt { .. }));
        assert_eq!(store.get_entitlement(&user_id).unwrap(), before);
    }

    #[tokio::test]
    async fn product_mismatch_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let verifier = Arc::new(StubVerifier::with(entry("1002", "premium_monthly")));
        let validator = validator(verifier, store.clone(), FraudPolicy::default());

        let err = validator
            .validate(&request(UserId::generate(), "vip_monthly"))
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::ProductMismatch { .. }));
        assert!(store.get_purchase(&TransactionId::new("1002").unwrap()).unwrap().is_none());
    }

    #[tokio::test]
    async fn platform_rejection_is_invalid_receipt() {
        let store = Arc::new(MemoryStore::new());
        let verifier = Arc::new(StubVerifier {
            entries: Mutex::new(Vec::new()),
            fail_with: Some(21003),
        });
        let validator = validator(verifier, store, FraudPolicy::default());

        let err = validator
            .validate(&request(UserId::generate(), "premium_monthly"))
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::InvalidReceipt { .. }));
    }

    #[tokio::test]
    async fn hard_reject_boundary() {
        let policy = FraudPolicy {
            device_integrity_weight: 100,
            ..FraudPolicy::default()
        };
        let store = Arc::new(MemoryStore::new());
        let verifier = Arc::new(StubVerifier::with(entry("2000", "premium_monthly")));
        let validator = validator(verifier.clone(), store.clone(), policy);

        let blocked_user = UserId::generate();
        let mut blocked = request(blocked_user, "premium_monthly");
        blocked.jailbreak_risk = Some(0.75);
        let err = validator.validate(&blocked).await.unwrap_err();
        assert!(matches!(err, GuardError::FraudRejected { score: 75 }));
        assert!(store.get_purchase(&TransactionId::new("2000").unwrap()).unwrap().is_none());
        assert!(store.get_entitlement(&blocked_user).unwrap().is_none());
        let log = store.list_fraud_log_by_user(&blocked_user, 10).unwrap();
        assert_eq!(log[0].severity, Severity::Critical);

        verifier.set(entry("2001", "premium_monthly"));
        let mut accepted = request(UserId::generate(), "premium_monthly");
        accepted.jailbreak_risk = Some(0.74);
        let outcome = validator.validate(&accepted).await.unwrap();
        assert_eq!(outcome.fraud_score, 74);
        assert!(outcome.flagged);
        assert_eq!(store.list_pending_flagged(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn trial_on_shared_device_scores_promotional_abuse() {
        let store = Arc::new(MemoryStore::new());
        let mut trial = entry("3000", "premium_monthly");
        trial.is_trial_period = Some("true".into());
        let verifier = Arc::new(StubVerifier::with(trial.clone()));
        let validator = validator(verifier.clone(), store, FraudPolicy::default());

        let mut first = request(UserId::generate(), "premium_monthly");
        first.device_id = Some("device-1".into());
        assert_eq!(validator.validate(&first).await.unwrap().fraud_score, 0);

        verifier.set(InAppEntry {
            transaction_id: "3001".into(),
            original_transaction_id: Some("3001".into()),
            ..trial
        });
        let mut second = request(UserId::generate(), "premium_monthly");
        second.device_id = Some("device-1".into());
        assert_eq!(validator.validate(&second).await.unwrap().fraud_score, 20);
    }

    #[tokio::test]
    async fn failed_grant_is_completed_on_retry() {
        let store = Arc::new(FailingStore::new());
        let verifier = Arc::new(StubVerifier::with(entry("4000", "premium_monthly")));
        let validator = validator(verifier, store.clone(), FraudPolicy::default());
        let user_id = UserId::generate();

        store.fail_once("update_entitlement");
        let err = validator
            .validate(&request(user_id, "premium_monthly"))
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::Storage(_)));
        let recorded = store
            .inner
            .get_purchase(&TransactionId::new("4000").unwrap())
            .unwrap()
            .unwrap();
        assert!(store.inner.get_entitlement(&user_id).unwrap().is_none());

        let outcome = validator.validate(&request(user_id, "premium_monthly")).await.unwrap();
        assert_eq!(outcome.purchase_id, recorded.purchase_id);
        let entitlement = store.inner.get_entitlement(&user_id).unwrap().unwrap();
        assert_eq!(entitlement.premium_tier, Some(PremiumTier::Premium));

        let err = validator
            .validate(&request(user_id, "premium_monthly"))
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::DuplicateReceipt { .. }));
    }

    #[tokio::test]
    async fn interrupted_validation_is_not_completed_for_another_user() {
        let store = Arc::new(FailingStore::new());
        let verifier = Arc::new(StubVerifier::with(entry("4100", "premium_monthly")));
        let validator = validator(verifier, store.clone(), FraudPolicy::default());

        store.fail_once("update_entitlement");
        validator
            .validate(&request(UserId::generate(), "premium_monthly"))
            .await
            .unwrap_err();

        let thief = UserId::generate();
        let err = validator.validate(&request(thief, "premium_monthly")).await.unwrap_err();
        assert!(matches!(err, GuardError::DuplicateReceipt { .. }));
        assert!(store.inner.get_entitlement(&thief).unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_review_flag_is_completed_on_retry() {
        let policy = FraudPolicy {
            device_integrity_weight: 100,
            ..FraudPolicy::default()
        };
        let store = Arc::new(FailingStore::new());
        let verifier = Arc::new(StubVerifier::with(entry("4200", "premium_monthly")));
        let validator = validator(verifier, store.clone(), policy);
        let mut risky = request(UserId::generate(), "premium_monthly");
        risky.jailbreak_risk = Some(0.6);

        store.fail_once("insert_flagged_if_absent");
        validator.validate(&risky).await.unwrap_err();
        assert!(store.inner.list_pending_flagged(10).unwrap().is_empty());

        let outcome = validator.validate(&risky).await.unwrap();
        assert!(outcome.flagged);
        assert_eq!(outcome.fraud_score, 60);
        let pending = store.inner.list_pending_flagged(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].fraud_score, 60);
    }
}
