use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Valid,
    Invalid,
    Duplicate,
}

impl ScanStatus {
    pub fn name(&self) -> &'static str {
        match self {
            ScanStatus::Valid => "valid",
            ScanStatus::Invalid => "invalid",
            ScanStatus::Duplicate => "duplicate",
        }
    }

    /// Human-readable message stored alongside the outcome.
    pub fn message(&self) -> &'static str {
        match self {
            ScanStatus::Valid => "Serial number is valid",
            ScanStatus::Invalid => "Serial number is invalid",
            ScanStatus::Duplicate => "Serial number has already been scanned",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Outcome of a single verify call. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub serial_number: String,
    /// ISO-8601 submission time. Kept as text so snapshots written by older
    /// deployments (naive local timestamps) still load.
    pub timestamp: String,
    pub status: ScanStatus,
    pub message: String,
    pub is_duplicate: bool,
}

impl ScanRecord {
    pub fn new(serial_number: impl Into<String>, status: ScanStatus, timestamp: String) -> Self {
        Self {
            serial_number: serial_number.into(),
            timestamp,
            status,
            message: status.message().to_string(),
            is_duplicate: status == ScanStatus::Duplicate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub valid_count: u64,
    pub invalid_count: u64,
    pub duplicate_count: u64,
    pub total_scanned: usize,
    pub remaining_valid: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearConfirmation {
    pub message: String,
}
