use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    // Session
    pub units_in_session: u64,
    pub scans_accepted: u64,
    pub scans_rejected: u64,

    // Submissions
    pub submissions_attempted: u64,
    pub submissions_succeeded: u64,
    pub submissions_failed: u64,
    pub average_submit_ms: f64,
    pub max_submit_ms: u64,

    // Errors
    pub validation_errors: u64,
    pub duplicate_errors: u64,
    pub already_submitted_errors: u64,
    pub persistence_errors: u64,
    pub backend_errors: u64,

    // Health
    pub uptime_seconds: u64,
    pub last_successful_submit: Option<u64>,
    pub consecutive_failures: u32,
}

#[derive(Debug)]
pub struct MetricsCollector {
    units_in_session: AtomicU64,
    scans_accepted: AtomicU64,
    scans_rejected: AtomicU64,

    submissions_attempted: AtomicU64,
    submissions_succeeded: AtomicU64,
    submissions_failed: AtomicU64,
    consecutive_failures: AtomicU32,

    validation_errors: AtomicU64,
    duplicate_errors: AtomicU64,
    already_submitted_errors: AtomicU64,
    persistence_errors: AtomicU64,
    backend_errors: AtomicU64,

    start_time: Instant,
    last_success_time: Mutex<Option<Instant>>,

    total_submit_ms: AtomicU64,
    max_submit_ms: AtomicU64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            units_in_session: AtomicU64::new(0),
            scans_accepted: AtomicU64::new(0),
            scans_rejected: AtomicU64::new(0),
            submissions_attempted: AtomicU64::new(0),
            submissions_succeeded: AtomicU64::new(0),
            submissions_failed: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            validation_errors: AtomicU64::new(0),
            duplicate_errors: AtomicU64::new(0),
            already_submitted_errors: AtomicU64::new(0),
            persistence_errors: AtomicU64::new(0),
            backend_errors: AtomicU64::new(0),
            start_time: Instant::now(),
            last_success_time: Mutex::new(None),
            total_submit_ms: AtomicU64::new(0),
            max_submit_ms: AtomicU64::new(0),
        }
    }

    pub fn record_scan(&self, accepted: bool) {
        if accepted {
            self.scans_accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.scans_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn set_units_in_session(&self, units: usize) {
        self.units_in_session.store(units as u64, Ordering::Relaxed);
    }

    /// Only called for attempts that actually reached the network.
    pub fn record_submission(&self, time_ms: u64, success: bool) {
        self.submissions_attempted.fetch_add(1, Ordering::Relaxed);

        if success {
            self.submissions_succeeded.fetch_add(1, Ordering::Relaxed);
            self.consecutive_failures.store(0, Ordering::Relaxed);
            if let Ok(mut last_success) = self.last_success_time.lock() {
                *last_success = Some(Instant::now());
            }
        } else {
            self.submissions_failed.fetch_add(1, Ordering::Relaxed);
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        }

        self.total_submit_ms.fetch_add(time_ms, Ordering::Relaxed);
        self.max_submit_ms.fetch_max(time_ms, Ordering::Relaxed);
    }

    pub fn record_error(&self, error_type: ErrorType) {
        let counter = match error_type {
            ErrorType::Validation => &self.validation_errors,
            ErrorType::Duplicate => &self.duplicate_errors,
            ErrorType::AlreadySubmitted => &self.already_submitted_errors,
            ErrorType::Persistence => &self.persistence_errors,
            ErrorType::Backend => &self.backend_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self) -> Metrics {
        let submissions_attempted = self.submissions_attempted.load(Ordering::Relaxed);
        let total_submit_ms = self.total_submit_ms.load(Ordering::Relaxed);

        let average_submit_ms = if submissions_attempted > 0 {
            total_submit_ms as f64 / submissions_attempted as f64
        } else {
            0.0
        };

        let last_successful_submit = match self.last_success_time.lock() {
            Ok(last_success) => last_success.map(|t| t.duration_since(self.start_time).as_secs()),
            Err(_) => None,
        };

        Metrics {
            units_in_session: self.units_in_session.load(Ordering::Relaxed),
            scans_accepted: self.scans_accepted.load(Ordering::Relaxed),
            scans_rejected: self.scans_rejected.load(Ordering::Relaxed),
            submissions_attempted,
            submissions_succeeded: self.submissions_succeeded.load(Ordering::Relaxed),
            submissions_failed: self.submissions_failed.load(Ordering::Relaxed),
            average_submit_ms,
            max_submit_ms: self.max_submit_ms.load(Ordering::Relaxed),
            validation_errors: self.validation_errors.load(Ordering::Relaxed),
            duplicate_errors: self.duplicate_errors.load(Ordering::Relaxed),
            already_submitted_errors: self.already_submitted_errors.load(Ordering::Relaxed),
            persistence_errors: self.persistence_errors.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            last_successful_submit,
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
        }
    }

    pub fn get_health_status(&self) -> HealthStatus {
        let consecutive_failures = self.consecutive_failures.load(Ordering::Relaxed);
        let persistence_errors = self.persistence_errors.load(Ordering::Relaxed);

        if consecutive_failures >= 5 {
            HealthStatus::Unhealthy
        } else if consecutive_failures >= 2 || persistence_errors > 0 {
            // scans are still held in memory, but progress may not survive a restart
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    Validation,
    Duplicate,
    AlreadySubmitted,
    Persistence,
    Backend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}
