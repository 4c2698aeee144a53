//! Append-only ledger of accepted scans for the current session.

use chrono::Local;
use tracing::{debug, warn};

use crate::types::{ScanRecord, ScanSession};

/// Source of the human-readable time stamp stored with each scan.
pub trait Clock: Send + Sync {
    fn timestamp(&self) -> String;
}

/// Local wall-clock time as `h:mm:ss AM/PM`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn timestamp(&self) -> String {
        Local::now().format("%-I:%M:%S %p").to_string()
    }
}

/// A stored record together with its 1-based position in the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedScan {
    pub sequence: usize,
    pub record: ScanRecord,
}

#[derive(Debug, Default)]
pub struct ScanLedger {
    records: Vec<ScanRecord>,
    units_scanned: usize,
}

impl ScanLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record. Earlier entries are never touched.
    pub fn record(
        &mut self,
        code: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> RecordedScan {
        let record = ScanRecord::new(code, timestamp);
        self.records.push(record.clone());
        self.units_scanned = self.records.len();
        debug!(code = %record.code, units = self.units_scanned, "scan recorded");
        RecordedScan { sequence: self.units_scanned, record }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Replaces the ledger wholesale. The count is derived from the records,
    /// never taken from the caller.
    pub fn restore(&mut self, records: Vec<ScanRecord>, units_scanned: usize) {
        if units_scanned != records.len() {
            warn!(
                stored = units_scanned,
                actual = records.len(),
                "stored unit count disagrees with records; using record count"
            );
        }
        self.units_scanned = records.len();
        self.records = records;
    }

    pub fn records(&self) -> &[ScanRecord] {
        &self.records
    }

    pub fn units_scanned(&self) -> usize {
        self.units_scanned
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains_code(&self, code: &str) -> bool {
        self.records.iter().any(|r| r.code == code)
    }

    pub fn snapshot(&self) -> ScanSession {
        ScanSession { units_scanned: self.units_scanned, records: self.records.clone() }
    }
}
