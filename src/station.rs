use std::sync::Arc;

use tracing::info;

use crate::error_handling::{ErrorHandler, ScanError};
use crate::ledger::{Clock, RecordedScan, ScanLedger};
use crate::metrics::MetricsCollector;
use crate::persistence::PersistenceStore;
use crate::policy::DuplicatePolicy;
use crate::render::RowRenderer;
use crate::types::{ScanRecord, ScanSession};

/// The one owner of the scan session. Every change to the ledger goes
/// through here, followed by a save and a render.
pub struct ScanStation {
    ledger: ScanLedger,
    policy: DuplicatePolicy,
    store: PersistenceStore,
    renderer: Box<dyn RowRenderer>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
    errors: Arc<ErrorHandler>,
}

impl ScanStation {
    pub fn new(
        policy: DuplicatePolicy,
        store: PersistenceStore,
        renderer: Box<dyn RowRenderer>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let errors = Arc::new(ErrorHandler::new(metrics.clone()));
        let store = store.with_error_handler(errors.clone());
        Self { ledger: ScanLedger::new(), policy, store, renderer, clock, metrics, errors }
    }

    pub fn error_handler(&self) -> Arc<ErrorHandler> {
        self.errors.clone()
    }

    /// Loads saved progress and redraws every row. Returns the restored count.
    pub fn restore(&mut self) -> usize {
        let ScanSession { units_scanned, records } = self.store.restore();
        self.ledger.restore(records, units_scanned);

        self.renderer.clear();
        for (i, record) in self.ledger.records().iter().enumerate() {
            self.renderer.append_row(i + 1, &record.code, &record.timestamp);
        }
        self.metrics.set_units_in_session(self.ledger.units_scanned());
        self.ledger.units_scanned()
    }

    /// Runs a committed code through the duplicate policy and records it.
    pub fn accept(&mut self, raw: &str) -> Result<RecordedScan, ScanError> {
        let code = raw.trim();
        if code.is_empty() {
            return Err(ScanError::EmptyCode);
        }

        if let Err(err) = self.policy.check(code, &self.ledger) {
            self.metrics.record_scan(false);
            self.errors.handle_scan_error(&err);
            return Err(err);
        }

        let recorded = self.ledger.record(code, self.clock.timestamp());
        self.store.save(&self.ledger.snapshot());
        let RecordedScan { sequence, record } = &recorded;
        self.renderer.append_row(*sequence, &record.code, &record.timestamp);

        self.metrics.record_scan(true);
        self.metrics.set_units_in_session(self.ledger.units_scanned());
        Ok(recorded)
    }

    /// Clears the session everywhere: memory, durable slot and rendered rows.
    pub fn reset(&mut self) {
        self.ledger.reset();
        self.store.clear();
        self.store.save(&self.ledger.snapshot());
        self.renderer.clear();
        self.metrics.set_units_in_session(0);
        info!("scan session reset");
    }

    pub fn ledger(&self) -> &ScanLedger {
        &self.ledger
    }

    pub fn units_scanned(&self) -> usize {
        self.ledger.units_scanned()
    }

    /// Copy of the records for a submission running alongside new scans.
    pub fn records(&self) -> Vec<ScanRecord> {
        self.ledger.records().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemorySlotStorage;
    use crate::render::RecordingRenderer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TickClock(AtomicUsize);

    impl Clock for TickClock {
        fn timestamp(&self) -> String {
            format!("9:00:{:02} AM", self.0.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn station(
        storage: Arc<MemorySlotStorage>,
    ) -> (ScanStation, RecordingRenderer, Arc<MetricsCollector>) {
        let renderer = RecordingRenderer::new();
        let metrics = Arc::new(MetricsCollector::new());
        let station = ScanStation::new(
            DuplicatePolicy::default(),
            PersistenceStore::new(storage, "scanProgress"),
            Box::new(renderer.clone()),
            Arc::new(TickClock(AtomicUsize::new(0))),
            metrics.clone(),
        );
        (station, renderer, metrics)
    }

    #[test]
    fn walkthrough_of_mixed_codes() {
        let (mut st, renderer, metrics) = station(Arc::new(MemorySlotStorage::new()));

        assert_eq!(st.accept("ABC123").unwrap().sequence, 1);
        assert_eq!(st.accept("ABC123").unwrap().sequence, 2);
        assert_eq!(st.accept("LOT-9").unwrap().sequence, 3);
        assert!(matches!(st.accept("LOT-9"), Err(ScanError::Duplicate { .. })));

        assert_eq!(st.units_scanned(), 3);
        let rows = renderer.rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].code, "LOT-9");

        let m = metrics.get_metrics();
        assert_eq!(m.scans_accepted, 3);
        assert_eq!(m.scans_rejected, 1);
        assert_eq!(m.duplicate_errors, 1);
        assert_eq!(m.units_in_session, 3);
    }

    #[test]
    fn blank_input_is_ignored() {
        let (mut st, _, _) = station(Arc::new(MemorySlotStorage::new()));
        assert_eq!(st.accept("   "), Err(ScanError::EmptyCode));
        assert_eq!(st.units_scanned(), 0);
    }

    #[test]
    fn every_accept_is_persisted_and_restorable() {
        let storage = Arc::new(MemorySlotStorage::new());
        let (mut st, _, _) = station(storage.clone());
        st.accept(" ABC123 ").unwrap();
        st.accept("LOT-9").unwrap();
        let before = st.records();

        let (mut reloaded, renderer, _) = station(storage);
        assert_eq!(reloaded.restore(), 2);
        assert_eq!(reloaded.records(), before);
        assert_eq!(reloaded.records()[0].code, "ABC123");
        let rows = renderer.rows();
        assert_eq!(rows.iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![1, 2]);

        // duplicate check sees restored history
        assert!(reloaded.accept("LOT-9").is_err());
    }

    #[test]
    fn reset_clears_memory_slot_and_rows() {
        let storage = Arc::new(MemorySlotStorage::new());
        let (mut st, renderer, _) = station(storage.clone());
        st.accept("ABC123").unwrap();
        st.reset();

        assert_eq!(st.units_scanned(), 0);
        assert!(renderer.rows().is_empty());

        let (mut reloaded, _, _) = station(storage);
        assert_eq!(reloaded.restore(), 0);
        // suffixed code accepted again in a fresh session
        st.accept("LOT-9").unwrap();
        assert_eq!(st.accept("ABC123").unwrap().sequence, 2);
    }
}
