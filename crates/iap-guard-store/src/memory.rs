//! In-memory storage implementation.
//!
//! All state sits behind one `RwLock`, so every trait method is atomic with
//! respect to every other. Data is lost on restart.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use iap_guard_core::{
    AdminAlert, FlaggedTransaction, FraudLogEntry, PurchaseRecord, RefundHistoryEntry,
    TransactionId, UserEntitlement, UserId, UserNotice,
};

use crate::error::Result;
use crate::{Mutation, Store};

#[derive(Default)]
struct Inner {
    purchases: HashMap<TransactionId, PurchaseRecord>,
    purchases_by_original: HashMap<TransactionId, Vec<TransactionId>>,
    entitlements: HashMap<UserId, UserEntitlement>,
    fraud_log: Vec<FraudLogEntry>,
    refunds: Vec<RefundHistoryEntry>,
    refund_counts: HashMap<UserId, u32>,
    refunded_transactions: HashSet<TransactionId>,
    flagged: HashMap<TransactionId, FlaggedTransaction>,
    alerts: Vec<AdminAlert>,
    notices: Vec<UserNotice>,
    notifications: HashSet<String>,
}

/// In-memory store for tests and local development.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave a half-applied write: every
    // method mutates only after all fallible work is done.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for MemoryStore {
    // =========================================================================
    // Purchase Ledger
    // =========================================================================

    fn insert_purchase_if_absent(&self, record: &PurchaseRecord) -> Result<bool> {
        let mut inner = self.write();
        if inner.purchases.contains_key(&record.transaction_id) {
            return Ok(false);
        }

        inner
            .purchases_by_original
            .entry(record.original_transaction_id.clone())
            .or_default()
            .push(record.transaction_id.clone());
        inner
            .purchases
            .insert(record.transaction_id.clone(), record.clone());
        Ok(true)
    }

    fn get_purchase(&self, transaction_id: &TransactionId) -> Result<Option<PurchaseRecord>> {
        Ok(self.read().purchases.get(transaction_id).cloned())
    }

    fn find_purchase_by_original(
        &self,
        original_transaction_id: &TransactionId,
    ) -> Result<Option<PurchaseRecord>> {
        let inner = self.read();
        let latest = inner
            .purchases_by_original
            .get(original_transaction_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.purchases.get(id))
            .max_by_key(|record| record.purchase_date)
            .cloned();
        Ok(latest)
    }

    fn update_purchase(
        &self,
        transaction_id: &TransactionId,
        apply: &mut dyn FnMut(&mut PurchaseRecord) -> bool,
    ) -> Result<Option<Mutation<PurchaseRecord>>> {
        let mut inner = self.write();
        let Some(record) = inner.purchases.get_mut(transaction_id) else {
            return Ok(None);
        };

        let mut updated = record.clone();
        let changed = apply(&mut updated);
        if changed {
            *record = updated.clone();
        }
        Ok(Some(Mutation {
            record: updated,
            changed,
        }))
    }

    fn list_purchases_by_user(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PurchaseRecord>> {
        let inner = self.read();
        let mut records: Vec<_> = inner
            .purchases
            .values()
            .filter(|r| r.user_id == *user_id && r.created_at >= since)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    fn list_purchases_by_device(&self, device_id: &str) -> Result<Vec<PurchaseRecord>> {
        let inner = self.read();
        let mut records: Vec<_> = inner
            .purchases
            .values()
            .filter(|r| r.device_id.as_deref() == Some(device_id))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    // =========================================================================
    // Entitlements
    // =========================================================================

    fn get_entitlement(&self, user_id: &UserId) -> Result<Option<UserEntitlement>> {
        Ok(self.read().entitlements.get(user_id).cloned())
    }

    fn update_entitlement(
        &self,
        user_id: &UserId,
        apply: &mut dyn FnMut(&mut UserEntitlement) -> bool,
    ) -> Result<Mutation<UserEntitlement>> {
        let mut inner = self.write();
        let mut entitlement = inner
            .entitlements
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| UserEntitlement::new(*user_id));

        let changed = apply(&mut entitlement);
        if changed {
            inner.entitlements.insert(*user_id, entitlement.clone());
        }
        Ok(Mutation {
            record: entitlement,
            changed,
        })
    }

    // =========================================================================
    // Audit Trail
    // =========================================================================

    fn append_fraud_log(&self, entry: &FraudLogEntry) -> Result<()> {
        self.write().fraud_log.push(entry.clone());
        Ok(())
    }

    fn list_fraud_log_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<FraudLogEntry>> {
        let inner = self.read();
        Ok(inner
            .fraud_log
            .iter()
            .rev()
            .filter(|e| e.user_id == *user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    fn append_refund_if_absent(&self, entry: &RefundHistoryEntry) -> Result<Option<u32>> {
        let mut inner = self.write();
        if !inner.refunded_transactions.insert(entry.transaction_id.clone()) {
            return Ok(None);
        }
        inner.refunds.push(entry.clone());
        let count = inner.refund_counts.entry(entry.user_id).or_insert(0);
        *count = count.saturating_add(1);
        Ok(Some(*count))
    }

    fn refund_recorded(&self, transaction_id: &TransactionId) -> Result<bool> {
        Ok(self.read().refunded_transactions.contains(transaction_id))
    }

    fn count_refunds(&self, user_id: &UserId) -> Result<u32> {
        Ok(self
            .read()
            .refund_counts
            .get(user_id)
            .copied()
            .unwrap_or(0))
    }

    fn list_refunds(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RefundHistoryEntry>> {
        let inner = self.read();
        Ok(inner
            .refunds
            .iter()
            .rev()
            .filter(|e| e.timestamp >= since)
            .take(limit)
            .cloned()
            .collect())
    }

    // =========================================================================
    // Review Queue
    // =========================================================================

    fn insert_flagged_if_absent(&self, flagged: &FlaggedTransaction) -> Result<bool> {
        let mut inner = self.write();
        if inner.flagged.contains_key(&flagged.transaction_id) {
            return Ok(false);
        }
        inner
            .flagged
            .insert(flagged.transaction_id.clone(), flagged.clone());
        Ok(true)
    }

    fn get_flagged(&self, transaction_id: &TransactionId) -> Result<Option<FlaggedTransaction>> {
        Ok(self.read().flagged.get(transaction_id).cloned())
    }

    fn list_pending_flagged(&self, limit: usize) -> Result<Vec<FlaggedTransaction>> {
        let inner = self.read();
        let mut pending: Vec<_> = inner
            .flagged
            .values()
            .filter(|f| !f.reviewed)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            b.fraud_score
                .cmp(&a.fraud_score)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        pending.truncate(limit);
        Ok(pending)
    }

    fn update_flagged(
        &self,
        transaction_id: &TransactionId,
        apply: &mut dyn FnMut(&mut FlaggedTransaction) -> bool,
    ) -> Result<Option<Mutation<FlaggedTransaction>>> {
        let mut inner = self.write();
        let Some(flagged) = inner.flagged.get_mut(transaction_id) else {
            return Ok(None);
        };

        let mut updated = flagged.clone();
        let changed = apply(&mut updated);
        if changed {
            *flagged = updated.clone();
        }
        Ok(Some(Mutation {
            record: updated,
            changed,
        }))
    }

    // =========================================================================
    // Alerts and Notices
    // =========================================================================

    fn put_alert(&self, alert: &AdminAlert) -> Result<()> {
        let mut inner = self.write();
        if let Some(existing) = inner
            .alerts
            .iter_mut()
            .find(|a| a.alert_id == alert.alert_id)
        {
            *existing = alert.clone();
        } else {
            inner.alerts.push(alert.clone());
        }
        Ok(())
    }

    fn list_unacknowledged_alerts(&self, limit: usize) -> Result<Vec<AdminAlert>> {
        let inner = self.read();
        Ok(inner
            .alerts
            .iter()
            .rev()
            .filter(|a| !a.acknowledged)
            .take(limit)
            .cloned()
            .collect())
    }

    fn put_notice(&self, notice: &UserNotice) -> Result<()> {
        self.write().notices.push(notice.clone());
        Ok(())
    }

    fn list_notices_by_user(&self, user_id: &UserId) -> Result<Vec<UserNotice>> {
        let inner = self.read();
        Ok(inner
            .notices
            .iter()
            .rev()
            .filter(|n| n.user_id == *user_id)
            .cloned()
            .collect())
    }

    // =========================================================================
    // Webhook Deduplication
    // =========================================================================

    fn record_notification_if_absent(&self, notification_id: &str) -> Result<bool> {
        Ok(self.write().notifications.insert(notification_id.to_string()))
    }

    fn release_notification(&self, notification_id: &str) -> Result<()> {
        self.write().notifications.remove(notification_id);
        Ok(())
    }
}
