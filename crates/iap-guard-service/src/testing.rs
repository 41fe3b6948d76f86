//! Store wrapper that fails chosen write operations once.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use iap_guard_core::{
    AdminAlert, FlaggedTransaction, FraudLogEntry, PurchaseRecord, RefundHistoryEntry,
    TransactionId, UserEntitlement, UserId, UserNotice,
};
use iap_guard_store::{MemoryStore, Mutation, Result, Store, StoreError};

/// Delegates to a [`MemoryStore`], failing each armed write exactly once.
#[derive(Default)]
pub struct FailingStore {
    /// Backing store, for assertions.
    pub inner: Arc<MemoryStore>,
    armed: Mutex<HashSet<&'static str>>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call to `operation` fail.
    pub fn fail_once(&self, operation: &'static str) {
        self.armed.lock().unwrap().insert(operation);
    }

    fn trip(&self, operation: &'static str) -> Result<()> {
        if self.armed.lock().unwrap().remove(operation) {
            return Err(StoreError::Database(format!("{operation}: injected failure")));
        }
        Ok(())
    }
}

impl Store for FailingStore {
    fn insert_purchase_if_absent(&self, record: &PurchaseRecord) -> Result<bool> {
        self.trip("insert_purchase_if_absent")?;
        self.inner.insert_purchase_if_absent(record)
    }

    fn get_purchase(&self, transaction_id: &TransactionId) -> Result<Option<PurchaseRecord>> {
        self.inner.get_purchase(transaction_id)
    }

    fn find_purchase_by_original(
        &self,
        original_transaction_id: &TransactionId,
    ) -> Result<Option<PurchaseRecord>> {
        self.inner.find_purchase_by_original(original_transaction_id)
    }

    fn update_purchase(
        &self,
        transaction_id: &TransactionId,
        apply: &mut dyn FnMut(&mut PurchaseRecord) -> bool,
    ) -> Result<Option<Mutation<PurchaseRecord>>> {
        self.trip("update_purchase")?;
        self.inner.update_purchase(transaction_id, apply)
    }

    fn list_purchases_by_user(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PurchaseRecord>> {
        self.inner.list_purchases_by_user(user_id, since)
    }

    fn list_purchases_by_device(&self, device_id: &str) -> Result<Vec<PurchaseRecord>> {
        self.inner.list_purchases_by_device(device_id)
    }

    fn get_entitlement(&self, user_id: &UserId) -> Result<Option<UserEntitlement>> {
        self.inner.get_entitlement(user_id)
    }

    fn update_entitlement(
        &self,
        user_id: &UserId,
        apply: &mut dyn FnMut(&mut UserEntitlement) -> bool,
    ) -> Result<Mutation<UserEntitlement>> {
        self.trip("update_entitlement")?;
        self.inner.update_entitlement(user_id, apply)
    }

    fn append_fraud_log(&self, entry: &FraudLogEntry) -> Result<()> {
        self.trip("append_fraud_log")?;
        self.inner.append_fraud_log(entry)
    }

    fn list_fraud_log_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<FraudLogEntry>> {
        self.inner.list_fraud_log_by_user(user_id, limit)
    }

    fn append_refund_if_absent(&self, entry: &RefundHistoryEntry) -> Result<Option<u32>> {
        self.trip("append_refund_if_absent")?;
        self.inner.append_refund_if_absent(entry)
    }

    fn refund_recorded(&self, transaction_id: &TransactionId) -> Result<bool> {
        self.inner.refund_recorded(transaction_id)
    }

    fn count_refunds(&self, user_id: &UserId) -> Result<u32> {
        self.inner.count_refunds(user_id)
    }

    fn list_refunds(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RefundHistoryEntry>> {
        self.inner.list_refunds(since, limit)
    }

    fn insert_flagged_if_absent(&self, flagged: &FlaggedTransaction) -> Result<bool> {
        self.trip("insert_flagged_if_absent")?;
        self.inner.insert_flagged_if_absent(flagged)
    }

    fn get_flagged(&self, transaction_id: &TransactionId) -> Result<Option<FlaggedTransaction>> {
        self.inner.get_flagged(transaction_id)
    }

    fn list_pending_flagged(&self, limit: usize) -> Result<Vec<FlaggedTransaction>> {
        self.inner.list_pending_flagged(limit)
    }

    fn update_flagged(
        &self,
        transaction_id: &TransactionId,
        apply: &mut dyn FnMut(&mut FlaggedTransaction) -> bool,
    ) -> Result<Option<Mutation<FlaggedTransaction>>> {
        self.trip("update_flagged")?;
        self.inner.update_flagged(transaction_id, apply)
    }

    fn put_alert(&self, alert: &AdminAlert) -> Result<()> {
        self.trip("put_alert")?;
        self.inner.put_alert(alert)
    }

    fn list_unacknowledged_alerts(&self, limit: usize) -> Result<Vec<AdminAlert>> {
        self.inner.list_unacknowledged_alerts(limit)
    }

    fn put_notice(&self, notice: &UserNotice) -> Result<()> {
        self.trip("put_notice")?;
        self.inner.put_notice(notice)
    }

    fn list_notices_by_user(&self, user_id: &UserId) -> Result<Vec<UserNotice>> {
        self.inner.list_notices_by_user(user_id)
    }

    fn record_notification_if_absent(&self, notification_id: &str) -> Result<bool> {
        self.inner.record_notification_if_absent(notification_id)
    }

    fn release_notification(&self, notification_id: &str) -> Result<()> {
        self.inner.release_notification(notification_id)
    }
}
