use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};

use crate::metrics::Metrics;

/// Prometheus text view over a [`Metrics`] snapshot.
pub struct PrometheusMetrics {
    registry: Registry,

    // Counters
    scans_accepted: Counter,
    scans_rejected: Counter,
    submissions_succeeded: Counter,
    submissions_failed: Counter,
    validation_errors: Counter,
    already_submitted_errors: Counter,
    persistence_errors: Counter,
    backend_errors: Counter,

    // Gauges
    units_in_session: Gauge<i64>,
    uptime_seconds: Gauge<i64>,
    consecutive_failures: Gauge<i64>,
}

impl Default for PrometheusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let scans_accepted = Counter::default();
        let scans_rejected = Counter::default();
        let submissions_succeeded = Counter::default();
        let submissions_failed = Counter::default();
        let validation_errors = Counter::default();
        let already_submitted_errors = Counter::default();
        let persistence_errors = Counter::default();
        let backend_errors = Counter::default();

        let units_in_session = Gauge::default();
        let uptime_seconds = Gauge::default();
        let consecutive_failures = Gauge::default();

        registry.register(
            "scan_tally_scans_accepted",
            "Scans accepted into the ledger",
            scans_accepted.clone(),
        );
        registry.register(
            "scan_tally_scans_rejected",
            "Scans refused as duplicates",
            scans_rejected.clone(),
        );
        registry.register(
            "scan_tally_submissions_succeeded",
            "Submissions acknowledged by the backend",
            submissions_succeeded.clone(),
        );
        registry.register(
            "scan_tally_submissions_failed",
            "Submissions that reached the backend and failed",
            submissions_failed.clone(),
        );
        registry.register(
            "scan_tally_validation_errors",
            "Submissions refused by validation",
            validation_errors.clone(),
        );
        registry.register(
            "scan_tally_already_submitted_errors",
            "Submissions refused because the content was already acknowledged",
            already_submitted_errors.clone(),
        );
        registry.register(
            "scan_tally_persistence_errors",
            "Failed progress saves",
            persistence_errors.clone(),
        );
        registry.register(
            "scan_tally_backend_errors",
            "Backend failures",
            backend_errors.clone(),
        );
        registry.register(
            "scan_tally_units_in_session",
            "Units in the current session",
            units_in_session.clone(),
        );
        registry.register(
            "scan_tally_uptime_seconds",
            "Process uptime in seconds",
            uptime_seconds.clone(),
        );
        registry.register(
            "scan_tally_consecutive_failures",
            "Consecutive failed submissions",
            consecutive_failures.clone(),
        );

        Self {
            registry,
            scans_accepted,
            scans_rejected,
            submissions_succeeded,
            submissions_failed,
            validation_errors,
            already_submitted_errors,
            persistence_errors,
            backend_errors,
            units_in_session,
            uptime_seconds,
            consecutive_failures,
        }
    }

    /// Brings every series up to the snapshot. Counters only move forward.
    pub fn update_from_metrics(&self, metrics: &Metrics) {
        catch_up(&self.scans_accepted, metrics.scans_accepted);
        catch_up(&self.scans_rejected, metrics.scans_rejected);
        catch_up(&self.submissions_succeeded, metrics.submissions_succeeded);
        catch_up(&self.submissions_failed, metrics.submissions_failed);
        catch_up(&self.validation_errors, metrics.validation_errors);
        catch_up(&self.already_submitted_errors, metrics.already_submitted_errors);
        catch_up(&self.persistence_errors, metrics.persistence_errors);
        catch_up(&self.backend_errors, metrics.backend_errors);

        self.units_in_session.set(metrics.units_in_session as i64);
        self.uptime_seconds.set(metrics.uptime_seconds as i64);
        self.consecutive_failures.set(i64::from(metrics.consecutive_failures));
    }

    pub fn export_metrics(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

fn catch_up(counter: &Counter, target: u64) {
    let current = counter.get();
    if target > current {
        counter.inc_by(target - current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsCollector;

    #[test]
    fn exports_current_values() {
        let collector = MetricsCollector::new();
        collector.record_scan(true);
        collector.record_scan(true);
        collector.set_units_in_session(2);

        let prom = PrometheusMetrics::new();
        prom.update_from_metrics(&collector.get_metrics());
        // repeated updates must not double count
        prom.update_from_metrics(&collector.get_metrics());

        let text = prom.export_metrics().unwrap();
        assert!(text.contains("scan_tally_scans_accepted_total 2"), "{text}");
        assert!(text.contains("scan_tally_units_in_session 2"), "{text}");
    }
}
