use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::metrics::{HealthStatus, MetricsCollector};
use crate::prometheus_metrics::PrometheusMetrics;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub metrics: crate::metrics::Metrics,
    pub health_status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DetailedStatus {
    pub health: String,
    pub units_in_session: u64,
    pub scans_accepted: u64,
    pub scans_rejected: u64,
    pub submissions_succeeded: u64,
    pub submissions_failed: u64,
    pub consecutive_failures: u32,
    pub config_summary: ConfigSummary,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub backend_configured: bool,
    pub storage_slot: String,
    pub scanner_delay_ms: u64,
    pub code_separator: String,
}

pub struct HealthChecker {
    metrics: Arc<MetricsCollector>,
    prometheus: PrometheusMetrics,
    config: Config,
}

impl HealthChecker {
    pub fn new(metrics: Arc<MetricsCollector>, config: Config) -> Self {
        Self { metrics, prometheus: PrometheusMetrics::new(), config }
    }

    pub fn get_health(&self) -> HealthResponse {
        HealthResponse {
            status: self.metrics.get_health_status().to_string(),
            uptime_seconds: self.metrics.get_metrics().uptime_seconds,
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn get_metrics(&self) -> MetricsResponse {
        MetricsResponse {
            metrics: self.metrics.get_metrics(),
            health_status: self.metrics.get_health_status().to_string(),
        }
    }

    pub fn get_prometheus(&self) -> Result<String, std::fmt::Error> {
        self.prometheus.update_from_metrics(&self.metrics.get_metrics());
        self.prometheus.export_metrics()
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.metrics.get_health_status(), HealthStatus::Healthy)
    }

    pub fn get_detailed_status(&self) -> DetailedStatus {
        let metrics = self.metrics.get_metrics();

        DetailedStatus {
            health: self.metrics.get_health_status().to_string(),
            units_in_session: metrics.units_in_session,
            scans_accepted: metrics.scans_accepted,
            scans_rejected: metrics.scans_rejected,
            submissions_succeeded: metrics.submissions_succeeded,
            submissions_failed: metrics.submissions_failed,
            consecutive_failures: metrics.consecutive_failures,
            config_summary: ConfigSummary {
                backend_configured: self.config.backend_configured(),
                storage_slot: self.config.storage_slot.clone(),
                scanner_delay_ms: self.config.scanner_delay_ms,
                code_separator: self.config.code_separator.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reflects_session_counters() {
        let metrics = Arc::new(MetricsCollector::new());
        metrics.record_scan(true);
        metrics.set_units_in_session(1);
        let checker = HealthChecker::new(metrics, Config::default());

        let status = checker.get_detailed_status();
        assert_eq!(status.units_in_session, 1);
        assert_eq!(status.health, "healthy");
        assert!(!status.config_summary.backend_configured);
        assert!(checker.is_healthy());
        assert!(checker.get_prometheus().unwrap().contains("scan_tally_units_in_session 1"));
    }
}
