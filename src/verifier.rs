//! The verification store: pool membership, duplicate detection, counters
//! and scan history, persisted through an injected [`SnapshotStorage`].

use crate::config::PoolConfig;
use crate::error::StorageError;
use crate::models::{ClearConfirmation, ScanRecord, ScanStatus, StatsSnapshot};
use crate::storage::{Snapshot, SnapshotStorage, SnapshotView};
use crate::utils;
use chrono::{SecondsFormat, Utc};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, error, info, warn};

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

pub struct VerificationStore {
    pool_config: PoolConfig,
    storage: Box<dyn SnapshotStorage>,

    pool: BTreeSet<String>,
    // membership for duplicate checks; `scanned_order` keeps first-seen order for the snapshot
    scanned: HashSet<String>,
    scanned_order: Vec<String>,
    valid_count: u64,
    invalid_count: u64,
    duplicate_count: u64,
    history: Vec<ScanRecord>,
}

impl VerificationStore {
    /// Build a store and restore it from `storage`. Any load failure is
    /// logged and the store starts from the canonical defaults instead.
    pub fn open(pool_config: PoolConfig, storage: Box<dyn SnapshotStorage>) -> Self {
        let mut store = Self::with_defaults(pool_config, storage);
        store.load();
        store
    }

    /// Fresh store with the full canonical pool. Does not read `storage`.
    pub fn with_defaults(pool_config: PoolConfig, storage: Box<dyn SnapshotStorage>) -> Self {
        Self {
            pool: utils::canonical_pool(pool_config.size, pool_config.width),
            pool_config,
            storage,
            scanned: HashSet::new(),
            scanned_order: Vec::new(),
            valid_count: 0,
            invalid_count: 0,
            duplicate_count: 0,
            history: Vec::new(),
        }
    }

    /// Classify `serial_number`, record the outcome and persist.
    ///
    /// Callers are expected to have trimmed the input and rejected empty
    /// strings; anything else is accepted and simply judged against the pool.
    pub fn verify(&mut self, serial_number: &str) -> ScanRecord {
        let status = if self.scanned.contains(serial_number) {
            ScanStatus::Duplicate
        } else if self.pool.contains(serial_number) {
            ScanStatus::Valid
        } else {
            ScanStatus::Invalid
        };
        let record = ScanRecord::new(serial_number, status, now_iso8601());

        match status {
            ScanStatus::Duplicate => self.duplicate_count += 1,
            ScanStatus::Valid => {
                self.pool.remove(serial_number);
                self.mark_scanned(serial_number);
                self.valid_count += 1;
            }
            ScanStatus::Invalid => {
                self.mark_scanned(serial_number);
                self.invalid_count += 1;
            }
        }
        self.history.push(record.clone());
        debug!(serial = %serial_number, status = %status, "serial verified");

        self.persist();
        record
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            valid_count: self.valid_count,
            invalid_count: self.invalid_count,
            duplicate_count: self.duplicate_count,
            total_scanned: self.scanned.len(),
            remaining_valid: self.pool.len(),
        }
    }

    /// The most recent `limit` records, oldest first.
    pub fn history(&self, limit: usize) -> &[ScanRecord] {
        let start = self.history.len().saturating_sub(limit);
        &self.history[start..]
    }

    /// Full reset back to the canonical pool.
    pub fn clear(&mut self) -> ClearConfirmation {
        self.scanned.clear();
        self.scanned_order.clear();
        self.history.clear();
        self.valid_count = 0;
        self.invalid_count = 0;
        self.duplicate_count = 0;
        self.pool = utils::canonical_pool(self.pool_config.size, self.pool_config.width);
        info!("scan history cleared");

        self.persist();
        ClearConfirmation {
            message: "History cleared successfully".to_string(),
        }
    }

    /// Write the full state to storage.
    pub fn save(&self) -> Result<(), StorageError> {
        self.storage.save(&SnapshotView {
            scanned_barcodes: &self.scanned_order,
            valid_count: self.valid_count,
            invalid_count: self.invalid_count,
            duplicate_count: self.duplicate_count,
            scan_history: &self.history,
            serial_numbers: &self.pool,
        })
    }

    fn persist(&self) {
        // the in-memory transition stands even if the write fails
        if let Err(e) = self.save() {
            error!(error = %e, "failed to save snapshot");
        }
    }

    fn load(&mut self) {
        match self.storage.load() {
            Ok(Some(snapshot)) => {
                self.restore(snapshot);
                info!(
                    scanned = self.scanned.len(),
                    history = self.history.len(),
                    remaining = self.pool.len(),
                    "restored snapshot"
                );
            }
            Ok(None) => info!("no snapshot found, starting with a fresh pool"),
            Err(e) => warn!(error = %e, "failed to load snapshot, starting with a fresh pool"),
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        for serial in snapshot.scanned_barcodes {
            self.mark_owned(serial);
        }
        self.valid_count = snapshot.valid_count;
        self.invalid_count = snapshot.invalid_count;
        self.duplicate_count = snapshot.duplicate_count;
        self.history = snapshot.scan_history;
        if let Some(serials) = snapshot.serial_numbers {
            self.pool = serials.into_iter().collect();
        }
    }

    fn mark_scanned(&mut self, serial_number: &str) {
        self.mark_owned(serial_number.to_string());
    }

    fn mark_owned(&mut self, serial_number: String) {
        if self.scanned.insert(serial_number.clone()) {
            self.scanned_order.push(serial_number);
        }
    }
}

/// Current time as RFC 3339 UTC with microseconds, e.g. `2024-05-01T10:00:00.000000Z`.
pub(crate) fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
