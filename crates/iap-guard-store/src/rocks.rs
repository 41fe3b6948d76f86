//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//! Conditional writes and read-modify-write cycles run under a store-wide
//! write lock and commit through a single `WriteBatch`.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use iap_guard_core::{
    AdminAlert, FlaggedTransaction, FraudLogEntry, PurchaseRecord, RefundHistoryEntry,
    TransactionId, UserEntitlement, UserId, UserNotice,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{Mutation, Store};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tracing::debug!("opened RocksDB store");
        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get_value<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        key: &[u8],
    ) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn exists(&self, cf_name: &str, key: &[u8]) -> Result<bool> {
        let cf = self.cf(cf_name)?;
        Ok(self
            .db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some())
    }

    fn put_value<T: serde::Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let value = Self::serialize(value)?;
        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Collect keys under `prefix`, starting the scan at `from`.
    fn scan_keys(&self, cf_name: &str, prefix: &[u8], from: &[u8]) -> Result<Vec<Vec<u8>>> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(from, Direction::Forward));

        let mut found = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            found.push(key.to_vec());
        }
        Ok(found)
    }

    /// Collect values under `prefix`, newest (highest key) first.
    fn scan_values_rev<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        prefix: &[u8],
    ) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut values = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            values.push(Self::deserialize(&value)?);
        }
        values.reverse();
        Ok(values)
    }

    fn purchases_for_index(
        &self,
        cf_name: &str,
        prefix: &[u8],
        from: &[u8],
        id_offset: usize,
    ) -> Result<Vec<PurchaseRecord>> {
        let mut records = Vec::new();
        for key in self.scan_keys(cf_name, prefix, from)? {
            let Some(tx_id) = keys::transaction_suffix(&key, id_offset) else {
                tracing::warn!(cf = cf_name, "skipping malformed index key");
                continue;
            };
            if let Some(record) = self.get_purchase(&tx_id)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Purchase Ledger
    // =========================================================================

    fn insert_purchase_if_absent(&self, record: &PurchaseRecord) -> Result<bool> {
        let _guard = self.lock();

        let tx_key = keys::purchase_key(&record.transaction_id);
        if self.exists(cf::PURCHASES, &tx_key)? {
            return Ok(false);
        }

        let cf_purchases = self.cf(cf::PURCHASES)?;
        let cf_by_original = self.cf(cf::PURCHASES_BY_ORIGINAL)?;
        let cf_by_user = self.cf(cf::PURCHASES_BY_USER)?;
        let cf_by_device = self.cf(cf::PURCHASES_BY_DEVICE)?;

        let value = Self::serialize(record)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_purchases, &tx_key, &value);
        batch.put_cf(
            &cf_by_original,
            keys::original_index_key(&record.original_transaction_id, &record.transaction_id),
            [],
        );
        batch.put_cf(
            &cf_by_user,
            keys::user_purchase_key(&record.user_id, record.created_at, &record.transaction_id),
            [],
        );
        if let Some(device_id) = &record.device_id {
            batch.put_cf(
                &cf_by_device,
                keys::device_index_key(device_id, &record.transaction_id),
                [],
            );
        }
        self.write(batch)?;

        Ok(true)
    }

    fn get_purchase(&self, transaction_id: &TransactionId) -> Result<Option<PurchaseRecord>> {
        self.get_value(cf::PURCHASES, &keys::purchase_key(transaction_id))
    }

    fn find_purchase_by_original(
        &self,
        original_transaction_id: &TransactionId,
    ) -> Result<Option<PurchaseRecord>> {
        let prefix = keys::original_prefix(original_transaction_id);
        let records =
            self.purchases_for_index(cf::PURCHASES_BY_ORIGINAL, &prefix, &prefix, prefix.len())?;
        Ok(records.into_iter().max_by_key(|r| r.purchase_date))
    }

    fn update_purchase(
        &self,
        transaction_id: &TransactionId,
        apply: &mut dyn FnMut(&mut PurchaseRecord) -> bool,
    ) -> Result<Option<Mutation<PurchaseRecord>>> {
        let _guard = self.lock();

        let Some(mut record) = self.get_purchase(transaction_id)? else {
            return Ok(None);
        };
        let changed = apply(&mut record);
        if changed {
            self.put_value(cf::PURCHASES, &keys::purchase_key(transaction_id), &record)?;
        }
        Ok(Some(Mutation { record, changed }))
    }

    fn list_purchases_by_user(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PurchaseRecord>> {
        let prefix = keys::user_key(user_id);
        let from = keys::user_time_prefix(user_id, since);
        self.purchases_for_index(cf::PURCHASES_BY_USER, &prefix, &from, from.len())
    }

    fn list_purchases_by_device(&self, device_id: &str) -> Result<Vec<PurchaseRecord>> {
        let prefix = keys::device_prefix(device_id);
        self.purchases_for_index(cf::PURCHASES_BY_DEVICE, &prefix, &prefix, prefix.len())
    }

    // =========================================================================
    // Entitlements
    // =========================================================================

    fn get_entitlement(&self, user_id: &UserId) -> Result<Option<UserEntitlement>> {
        self.get_value(cf::ENTITLEMENTS, &keys::user_key(user_id))
    }

    fn update_entitlement(
        &self,
        user_id: &UserId,
        apply: &mut dyn FnMut(&mut UserEntitlement) -> bool,
    ) -> Result<Mutation<UserEntitlement>> {
        let _guard = self.lock();

        let mut record = self
            .get_entitlement(user_id)?
            .unwrap_or_else(|| UserEntitlement::new(*user_id));
        let changed = apply(&mut record);
        if changed {
            self.put_value(cf::ENTITLEMENTS, &keys::user_key(user_id), &record)?;
        }
        Ok(Mutation { record, changed })
    }

    // =========================================================================
    // Audit Trail
    // =========================================================================

    fn append_fraud_log(&self, entry: &FraudLogEntry) -> Result<()> {
        self.put_value(
            cf::FRAUD_LOG_BY_USER,
            &keys::user_record_key(&entry.user_id, &entry.id),
            entry,
        )
    }

    fn list_fraud_log_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<FraudLogEntry>> {
        let mut entries: Vec<FraudLogEntry> =
            self.scan_values_rev(cf::FRAUD_LOG_BY_USER, &keys::user_key(user_id))?;
        entries.truncate(limit);
        Ok(entries)
    }

    fn append_refund_if_absent(&self, entry: &RefundHistoryEntry) -> Result<Option<u32>> {
        let _guard = self.lock();

        let marker = keys::purchase_key(&entry.transaction_id);
        if self.exists(cf::REFUNDED_TRANSACTIONS, &marker)? {
            return Ok(None);
        }
        let count = self.count_refunds(&entry.user_id)?.saturating_add(1);

        let cf_refunds = self.cf(cf::REFUNDS)?;
        let cf_counts = self.cf(cf::REFUND_COUNTS)?;
        let cf_refunded = self.cf(cf::REFUNDED_TRANSACTIONS)?;
        let value = Self::serialize(entry)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_refunds, keys::record_key(&entry.id), &value);
        batch.put_cf(&cf_counts, keys::user_key(&entry.user_id), count.to_be_bytes());
        batch.put_cf(&cf_refunded, marker, []);
        self.write(batch)?;

        Ok(Some(count))
    }

    fn refund_recorded(&self, transaction_id: &TransactionId) -> Result<bool> {
        self.exists(cf::REFUNDED_TRANSACTIONS, &keys::purchase_key(transaction_id))
    }

    fn count_refunds(&self, user_id: &UserId) -> Result<u32> {
        let cf = self.cf(cf::REFUND_COUNTS)?;
        let Some(raw) = self
            .db
            .get_cf(&cf, keys::user_key(user_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
        else {
            return Ok(0);
        };

        let bytes: [u8; 4] = raw
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Serialization("refund counter is not 4 bytes".into()))?;
        Ok(u32::from_be_bytes(bytes))
    }

    fn list_refunds(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RefundHistoryEntry>> {
        let cf = self.cf(cf::REFUNDS)?;
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::End) {
            if entries.len() >= limit {
                break;
            }
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let entry: RefundHistoryEntry = Self::deserialize(&value)?;
            if entry.timestamp < since {
                break;
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    // =========================================================================
    // Review Queue
    // =========================================================================

    fn insert_flagged_if_absent(&self, flagged: &FlaggedTransaction) -> Result<bool> {
        let _guard = self.lock();

        let key = keys::purchase_key(&flagged.transaction_id);
        if self.exists(cf::FLAGGED, &key)? {
            return Ok(false);
        }
        self.put_value(cf::FLAGGED, &key, flagged)?;
        Ok(true)
    }

    fn get_flagged(&self, transaction_id: &TransactionId) -> Result<Option<FlaggedTransaction>> {
        self.get_value(cf::FLAGGED, &keys::purchase_key(transaction_id))
    }

    fn list_pending_flagged(&self, limit: usize) -> Result<Vec<FlaggedTransaction>> {
        let cf = self.cf(cf::FLAGGED)?;
        let mut pending = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let flagged: FlaggedTransaction = Self::deserialize(&value)?;
            if !flagged.reviewed {
                pending.push(flagged);
            }
        }

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
        let _guard = self.lock();

        let Some(mut record) = self.get_flagged(transaction_id)? else {
            return Ok(None);
        };
        let changed = apply(&mut record);
        if changed {
            self.put_value(cf::FLAGGED, &keys::purchase_key(transaction_id), &record)?;
        }
        Ok(Some(Mutation { record, changed }))
    }

    // =========================================================================
    // Alerts and Notices
    // =========================================================================

    fn put_alert(&self, alert: &AdminAlert) -> Result<()> {
        self.put_value(cf::ALERTS, &keys::record_key(&alert.alert_id), alert)
    }

    fn list_unacknowledged_alerts(&self, limit: usize) -> Result<Vec<AdminAlert>> {
        let cf = self.cf(cf::ALERTS)?;
        let mut alerts = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::End) {
            if alerts.len() >= limit {
                break;
            }
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let alert: AdminAlert = Self::deserialize(&value)?;
            if !alert.acknowledged {
                alerts.push(alert);
            }
        }
        Ok(alerts)
    }

    fn put_notice(&self, notice: &UserNotice) -> Result<()> {
        self.put_value(
            cf::NOTICES_BY_USER,
            &keys::user_record_key(&notice.user_id, &notice.notice_id),
            notice,
        )
    }

    fn list_notices_by_user(&self, user_id: &UserId) -> Result<Vec<UserNotice>> {
        self.scan_values_rev(cf::NOTICES_BY_USER, &keys::user_key(user_id))
    }

    // =========================================================================
    // Webhook Deduplication
    // =========================================================================

    fn record_notification_if_absent(&self, notification_id: &str) -> Result<bool> {
        let _guard = self.lock();

        let key = keys::notification_key(notification_id);
        if self.exists(cf::NOTIFICATIONS, &key)? {
            return Ok(false);
        }
        let cf = self.cf(cf::NOTIFICATIONS)?;
        self.db
            .put_cf(&cf, key, [])
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(true)
    }

    fn release_notification(&self, notification_id: &str) -> Result<()> {
        let _guard = self.lock();

        let cf = self.cf(cf::NOTIFICATIONS)?;
        self.db
            .delete_cf(&cf, keys::notification_key(notification_id))
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}
