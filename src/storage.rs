use crate::error::StorageError;
use crate::models::ScanRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_DB_FILE: &str = "data.json";

/// On-disk form of the store. Every field is optional in the file; a missing
/// `serial_numbers` means "the canonical pool", which only the store knows.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub scanned_barcodes: Vec<String>,
    #[serde(default)]
    pub valid_count: u64,
    #[serde(default)]
    pub invalid_count: u64,
    #[serde(default)]
    pub duplicate_count: u64,
    #[serde(default)]
    pub scan_history: Vec<ScanRecord>,
    #[serde(default)]
    pub serial_numbers: Option<Vec<String>>,
}

/// Borrowed view of the live state, serialized with the same keys as
/// [`Snapshot`] so a save never has to clone the pool or history.
#[derive(Debug, Serialize)]
pub struct SnapshotView<'a> {
    pub scanned_barcodes: &'a [String],
    pub valid_count: u64,
    pub invalid_count: u64,
    pub duplicate_count: u64,
    pub scan_history: &'a [ScanRecord],
    pub serial_numbers: &'a BTreeSet<String>,
}

/// Persistence dependency injected into the verification store.
pub trait SnapshotStorage: Send + Sync {
    /// `Ok(None)` when no snapshot has been written yet.
    fn load(&self) -> Result<Option<Snapshot>, StorageError>;

    fn save(&self, snapshot: &SnapshotView<'_>) -> Result<(), StorageError>;
}

/// Pretty-printed JSON document on the local filesystem.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| DEFAULT_DB_FILE.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotStorage for JsonFileStorage {
    fn load(&self) -> Result<Option<Snapshot>, StorageError> {
        let s = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::from_io_with_path(&e, &self.path)),
        };
        serde_json::from_str(&s)
            .map(Some)
            .map_err(|e| StorageError::Malformed {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })
    }

    fn save(&self, snapshot: &SnapshotView<'_>) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.temp_path();
        fs::write(&tmp, bytes).map_err(|e| StorageError::from_io_with_path(&e, &tmp))?;
        fs::rename(&tmp, &self.path).map_err(|e| StorageError::from_io_with_path(&e, &self.path))?;
        Ok(())
    }
}
