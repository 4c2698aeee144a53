use std::sync::Arc;

use thiserror::Error;
use tracing::{error, warn};

use crate::metrics::{ErrorType, MetricsCollector};

/// A submission field the operator must fix before sending.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("operation type is required (CARGUE/DESCARGUE/INVENTARIO/NOVEDADES)")]
    MissingOperationType,
    #[error("plate is required for {0}")]
    MissingPlate(String),
    #[error("there are no scanned codes to send")]
    NoRecords,
    #[error("unknown operation type: {0}")]
    UnknownOperationType(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("code {code} was already scanned")]
    Duplicate { code: String },
    #[error("empty scan ignored")]
    EmptyCode,
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("backend rejected submission: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Transport(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("this session was already submitted with identical content")]
    AlreadySubmitted,
    #[error("a submission is already in progress")]
    InFlight,
    /// The session could not be fingerprinted, so nothing was sent. Resending
    /// the same content fails the same way.
    #[error("could not sign the session: {0}")]
    Signing(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl SubmitError {
    /// Only backend failures are worth retrying as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubmitError::Backend(_))
    }
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
    #[error("failed to encode snapshot: {0}")]
    Encode(String),
    #[error("failed to decode snapshot: {0}")]
    Decode(String),
}

/// Logs surfaced errors and counts them by class.
pub struct ErrorHandler {
    metrics: Arc<MetricsCollector>,
}

impl ErrorHandler {
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self { metrics }
    }

    pub fn handle_scan_error(&self, err: &ScanError) {
        match err {
            ScanError::Duplicate { code } => {
                warn!(code = %code, "duplicate scan refused");
                self.metrics.record_error(ErrorType::Duplicate);
            }
            ScanError::EmptyCode => {}
        }
    }

    pub fn handle_submit_error(&self, err: &SubmitError) {
        match err {
            SubmitError::Validation(e) => {
                warn!(error = %e, "submission validation failed");
                self.metrics.record_error(ErrorType::Validation);
            }
            SubmitError::AlreadySubmitted => {
                warn!("submission refused: content already acknowledged");
                self.metrics.record_error(ErrorType::AlreadySubmitted);
            }
            SubmitError::InFlight => {
                warn!("submission refused: another one is in flight");
            }
            SubmitError::Signing(e) => {
                error!(error = %e, "submission not signed; nothing was sent");
            }
            SubmitError::Backend(e) => {
                error!(error = %e, "submission failed");
                self.metrics.record_error(ErrorType::Backend);
            }
        }
    }

    pub fn handle_persistence_error(&self, err: &PersistenceError) {
        warn!(error = %err, "scan progress could not be persisted");
        self.metrics.record_error(ErrorType::Persistence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_backend_errors_are_retryable() {
        assert!(SubmitError::Backend(BackendError::Rejected("busy".into())).is_retryable());
        assert!(!SubmitError::AlreadySubmitted.is_retryable());
        assert!(!SubmitError::InFlight.is_retryable());
        assert!(!SubmitError::Validation(ValidationError::NoRecords).is_retryable());
    }

    #[test]
    fn signing_failure_is_not_retryable_and_not_a_backend_error() {
        let metrics = Arc::new(MetricsCollector::new());
        let err = SubmitError::Signing("key must be a string".into());
        assert!(!err.is_retryable());

        ErrorHandler::new(metrics.clone()).handle_submit_error(&err);
        assert_eq!(metrics.get_metrics().backend_errors, 0);
        assert_eq!(err.to_string(), "could not sign the session: key must be a string");
    }

    #[test]
    fn handler_counts_by_class() {
        let metrics = Arc::new(MetricsCollector::new());
        let handler = ErrorHandler::new(metrics.clone());

        handler.handle_scan_error(&ScanError::Duplicate { code: "LOT-9".into() });
        handler.handle_scan_error(&ScanError::EmptyCode);
        handler.handle_submit_error(&SubmitError::Validation(ValidationError::NoRecords));
        let down = BackendError::Transport("down".into());
        handler.handle_submit_error(&SubmitError::Backend(down));
        handler.handle_persistence_error(&PersistenceError::Encode("x".into()));

        let m = metrics.get_metrics();
        assert_eq!(m.duplicate_errors, 1);
        assert_eq!(m.validation_errors, 1);
        assert_eq!(m.backend_errors, 1);
        assert_eq!(m.persistence_errors, 1);
        assert_eq!(m.already_submitted_errors, 0);
    }

    #[test]
    fn error_display() {
        let err = ValidationError::MissingPlate("CARGUE".into());
        assert_eq!(err.to_string(), "plate is required for CARGUE");
        let err = BackendError::Status { status: 500, body: "boom".into() };
        assert_eq!(err.to_string(), "HTTP 500: boom");
    }
}
