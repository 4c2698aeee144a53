//! Durable scan progress.
//!
//! The whole session lives in one fixed slot as deflate-compressed JSON,
//! base64-encoded so the slot value stays text. Writes are best-effort: a
//! failed save is logged and counted, and the in-memory ledger stays the
//! source of truth. A slot that cannot be decoded is cleared on restore so a
//! poisoned value cannot fail every start-up.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error_handling::{ErrorHandler, PersistenceError};
use crate::types::ScanSession;

/// Key/value slot storage. Implementations must replace values atomically.
pub trait SlotStorage: Send + Sync {
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>>;
    fn write(&self, key: &str, value: &str) -> io::Result<()>;
    fn remove(&self, key: &str) -> io::Result<()>;
}

/// One file per slot inside a directory; writes go through a temp file and rename.
#[derive(Debug, Clone)]
pub struct FileSlotStorage {
    dir: PathBuf,
}

impl FileSlotStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl SlotStorage for FileSlotStorage {
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, key: &str, value: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(value.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path(key)).map_err(|e| e.error)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemorySlotStorage {
    slots: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySlotStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts raw bytes in a slot, bypassing the codec.
    pub fn insert_raw(&self, key: &str, value: impl Into<Vec<u8>>) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.insert(key.to_string(), value.into());
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.lock().map(|s| s.contains_key(key)).unwrap_or(false)
    }
}

fn poisoned() -> io::Error {
    io::Error::other("slot storage lock poisoned")
}

impl SlotStorage for MemorySlotStorage {
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        let slots = self.slots.lock().map_err(|_| poisoned())?;
        Ok(slots.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> io::Result<()> {
        let mut slots = self.slots.lock().map_err(|_| poisoned())?;
        slots.insert(key.to_string(), value.as_bytes().to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        let mut slots = self.slots.lock().map_err(|_| poisoned())?;
        slots.remove(key);
        Ok(())
    }
}

pub fn encode_snapshot(session: &ScanSession) -> Result<String, PersistenceError> {
    let json = serde_json::to_vec(session).map_err(|e| PersistenceError::Encode(e.to_string()))?;
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;
    Ok(STANDARD.encode(compressed))
}

pub fn decode_snapshot(raw: &[u8]) -> Result<ScanSession, PersistenceError> {
    let text = std::str::from_utf8(raw).map_err(|e| PersistenceError::Decode(e.to_string()))?;
    let compressed = STANDARD
        .decode(text.trim())
        .map_err(|e| PersistenceError::Decode(e.to_string()))?;

    let mut json = Vec::new();
    DeflateDecoder::new(compressed.as_slice())
        .read_to_end(&mut json)
        .map_err(|e| PersistenceError::Decode(e.to_string()))?;

    serde_json::from_slice(&json).map_err(|e| PersistenceError::Decode(e.to_string()))
}

pub struct PersistenceStore {
    storage: Arc<dyn SlotStorage>,
    slot: String,
    errors: Option<Arc<ErrorHandler>>,
}

impl PersistenceStore {
    pub fn new(storage: Arc<dyn SlotStorage>, slot: impl Into<String>) -> Self {
        Self { storage, slot: slot.into(), errors: None }
    }

    pub fn with_error_handler(mut self, handler: Arc<ErrorHandler>) -> Self {
        self.errors = Some(handler);
        self
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    /// Best-effort write; failures are reported, never returned.
    pub fn save(&self, session: &ScanSession) {
        if let Err(err) = self.try_save(session) {
            self.report(&err);
        }
    }

    fn try_save(&self, session: &ScanSession) -> Result<(), PersistenceError> {
        let encoded = encode_snapshot(session)?;
        self.storage.write(&self.slot, &encoded)?;
        debug!(
            slot = %self.slot,
            units = session.units_scanned,
            bytes = encoded.len(),
            "progress saved"
        );
        Ok(())
    }

    /// Never fails: absent, empty or undecodable slots all yield an empty session.
    pub fn restore(&self) -> ScanSession {
        let raw = match self.storage.read(&self.slot) {
            Ok(Some(raw)) if !raw.is_empty() => raw,
            Ok(_) => {
                info!(slot = %self.slot, "no saved progress found");
                return ScanSession::default();
            }
            Err(err) => {
                self.report(&PersistenceError::Storage(err));
                return ScanSession::default();
            }
        };

        match decode_snapshot(&raw) {
            Ok(mut session) => {
                session.units_scanned = session.records.len();
                info!(slot = %self.slot, units = session.units_scanned, "progress restored");
                session
            }
            Err(err) => {
                warn!(slot = %self.slot, "saved progress is corrupt; clearing slot");
                self.report(&err);
                self.clear();
                ScanSession::default()
            }
        }
    }

    pub fn clear(&self) {
        if let Err(err) = self.storage.remove(&self.slot) {
            self.report(&PersistenceError::Storage(err));
        }
    }

    fn report(&self, err: &PersistenceError) {
        match &self.errors {
            Some(handler) => handler.handle_persistence_error(err),
            None => warn!(error = %err, "scan progress could not be persisted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsCollector;
    use crate::types::ScanRecord;

    const SLOT: &str = "scanProgress";

    fn sample() -> ScanSession {
        ScanSession::from_records(vec![
            ScanRecord::new("ABC123", "9:01:02 AM"),
            ScanRecord::new("ABC123", "9:01:05 AM"),
            ScanRecord::new("LOT-9", "9:02:00 AM"),
        ])
    }

    fn memory_store() -> (Arc<MemorySlotStorage>, PersistenceStore) {
        let storage = Arc::new(MemorySlotStorage::new());
        let store = PersistenceStore::new(storage.clone(), SLOT);
        (storage, store)
    }

    #[test]
    fn save_then_restore_round_trips() {
        let (_, store) = memory_store();
        let session = sample();
        store.save(&session);
        assert_eq!(store.restore(), session);
    }

    #[test]
    fn restore_from_empty_slot_is_empty() {
        let (_, store) = memory_store();
        assert!(store.restore().is_empty());
    }

    #[test]
    fn corrupt_payload_is_cleared() {
        let (storage, store) = memory_store();
        storage.insert_raw(SLOT, "definitely not base64 deflate!!");
        assert_eq!(store.restore(), ScanSession::default());
        assert!(!storage.contains(SLOT));
    }

    #[test]
    fn corrupt_slot_is_counted() {
        let metrics = Arc::new(MetricsCollector::new());
        let storage = Arc::new(MemorySlotStorage::new());
        storage.insert_raw(SLOT, "definitely not base64 deflate!!");
        let store = PersistenceStore::new(storage.clone(), SLOT)
            .with_error_handler(Arc::new(ErrorHandler::new(metrics.clone())));

        assert!(store.restore().is_empty());
        assert_eq!(metrics.get_metrics().persistence_errors, 1);
        assert!(!storage.contains(SLOT));
    }

    #[test]
    fn legacy_record_without_time_is_kept() {
        let (storage, store) = memory_store();
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(br#"{"globalUnitsScanned":null,"codigosCorrectos":[{"codigo":"A"}]}"#)
            .unwrap();
        storage.insert_raw(SLOT, STANDARD.encode(encoder.finish().unwrap()));

        let restored = store.restore();
        assert_eq!(restored.records, vec![ScanRecord::new("A", "")]);
        assert_eq!(restored.units_scanned, 1);
        assert!(storage.contains(SLOT));
    }

    #[test]
    fn non_array_records_are_treated_as_corrupt() {
        let (storage, store) = memory_store();
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(br#"{"unitsScanned":2,"records":"oops"}"#).unwrap();
        storage.insert_raw(SLOT, STANDARD.encode(encoder.finish().unwrap()));

        assert!(store.restore().is_empty());
        assert!(!storage.contains(SLOT));
    }

    #[test]
    fn partial_shape_defaults_missing_fields() {
        let (storage, store) = memory_store();
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"{}").unwrap();
        storage.insert_raw(SLOT, STANDARD.encode(encoder.finish().unwrap()));

        let restored = store.restore();
        assert_eq!(restored, ScanSession::default());
        // a valid but sparse payload is kept
        assert!(storage.contains(SLOT));
    }

    #[test]
    fn stale_count_is_recomputed() {
        let (storage, store) = memory_store();
        let mut session = sample();
        session.units_scanned = 99;
        storage.insert_raw(SLOT, encode_snapshot(&session).unwrap());

        assert_eq!(store.restore().units_scanned, 3);
    }

    struct FullDisk;

    impl SlotStorage for FullDisk {
        fn read(&self, _key: &str) -> io::Result<Option<Vec<u8>>> {
            Ok(None)
        }
        fn write(&self, _key: &str, _value: &str) -> io::Result<()> {
            Err(io::Error::other("quota exceeded"))
        }
        fn remove(&self, _key: &str) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_write_is_reported_not_raised() {
        let metrics = Arc::new(MetricsCollector::new());
        let handler = Arc::new(ErrorHandler::new(metrics.clone()));
        let store = PersistenceStore::new(Arc::new(FullDisk), SLOT).with_error_handler(handler);

        store.save(&sample());
        assert_eq!(metrics.get_metrics().persistence_errors, 1);
    }

    #[test]
    fn file_slot_round_trips_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FileSlotStorage::new(dir.path().join("nested")));
        let store = PersistenceStore::new(storage.clone(), SLOT);

        store.save(&sample());
        assert!(dir.path().join("nested").join(SLOT).exists());
        assert_eq!(store.restore(), sample());

        store.clear();
        assert!(storage.read(SLOT).unwrap().is_none());
        // clearing twice is fine
        store.clear();
    }

    #[test]
    fn file_slot_with_garbage_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SLOT), [0xff, 0xfe, 0x00]).unwrap();
        let store = PersistenceStore::new(Arc::new(FileSlotStorage::new(dir.path())), SLOT);

        assert!(store.restore().is_empty());
        assert!(!dir.path().join(SLOT).exists());
    }
}
