//! Single-flight, idempotent submission of a finished session.
//!
//! Flow per call: claim the in-flight flag, validate, sign, compare against
//! the last acknowledged signature, send. The acknowledged signature only
//! moves after the backend confirms `ok: true`, so a failed attempt can be
//! retried with the same content while an accepted one cannot be re-sent.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error_handling::{BackendError, SubmitError, ValidationError};
use crate::metrics::MetricsCollector;
use crate::signing::SubmissionSignature;
use crate::types::{
    ScanRecord, SubmissionMetadata, SubmissionRequest, SubmissionResponse, UnitEntry,
};

/// The remote end of a submission: one request, one response.
pub trait SubmissionBackend: Send + Sync {
    fn send(
        &self,
        request: &SubmissionRequest,
    ) -> impl Future<Output = Result<SubmissionResponse, BackendError>> + Send;
}

/// POSTs the request as JSON.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
}

impl HttpBackend {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url: url.into() })
    }
}

impl SubmissionBackend for HttpBackend {
    async fn send(&self, request: &SubmissionRequest) -> Result<SubmissionResponse, BackendError> {
        let resp = self.client.post(&self.url).json(request).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(BackendError::Status { status: status.as_u16(), body });
        }
        serde_json::from_str(&body).map_err(|e| BackendError::Malformed(e.to_string()))
    }
}

/// What the caller learns from an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub signature: SubmissionSignature,
    pub total_units: u64,
    pub sheet: Option<String>,
    pub target: Option<String>,
    pub start_col: Option<String>,
}

/// Checks the fields the operator has to fill before anything is sent.
pub fn validate(
    metadata: &SubmissionMetadata,
    records: &[ScanRecord],
) -> Result<(), ValidationError> {
    let operation = metadata.operation_type.ok_or(ValidationError::MissingOperationType)?;
    if operation.requires_plate() && metadata.plate.trim().is_empty() {
        return Err(ValidationError::MissingPlate(operation.to_string()));
    }
    if records.is_empty() {
        return Err(ValidationError::NoRecords);
    }
    Ok(())
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SubmissionCoordinator<B> {
    backend: B,
    in_flight: AtomicBool,
    acknowledged: Mutex<Option<SubmissionSignature>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl<B: SubmissionBackend> SubmissionCoordinator<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            in_flight: AtomicBool::new(false),
            acknowledged: Mutex::new(None),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn acknowledged(&self) -> Option<SubmissionSignature> {
        self.ack().clone()
    }

    /// Forgets the acknowledged signature. Does not touch a request in flight.
    pub fn reset(&self) {
        *self.ack() = None;
    }

    pub async fn submit(
        &self,
        metadata: &SubmissionMetadata,
        records: &[ScanRecord],
    ) -> Result<SubmissionReceipt, SubmitError> {
        let _guard = InFlightGuard::acquire(&self.in_flight).ok_or(SubmitError::InFlight)?;

        let metadata = metadata.normalized();
        validate(&metadata, records)?;

        let signature = SubmissionSignature::compute(&metadata, records)
            .map_err(|e| SubmitError::Signing(e.to_string()))?;
        if self.ack().as_ref() == Some(&signature) {
            return Err(SubmitError::AlreadySubmitted);
        }

        let request = build_request(&metadata, records)?;
        info!(
            signature = signature.short(),
            units = request.total_units,
            operation = %request.operation_type,
            "sending submission"
        );

        let started = Instant::now();
        let outcome = self.backend.send(&request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let response = match outcome {
            Ok(resp) if resp.ok => resp,
            Ok(resp) => {
                self.record(elapsed_ms, false);
                let reason = resp.error.unwrap_or_else(|| "no reason given".to_string());
                return Err(BackendError::Rejected(reason).into());
            }
            Err(err) => {
                self.record(elapsed_ms, false);
                return Err(err.into());
            }
        };

        // The send-time signature is what the backend accepted, even if the
        // session was reset while waiting.
        *self.ack() = Some(signature.clone());
        self.record(elapsed_ms, true);

        let receipt = SubmissionReceipt {
            signature,
            total_units: response.total_unidades.unwrap_or(records.len() as u64),
            sheet: response.sheet,
            target: response.target,
            start_col: response.start_col.map(|v| match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            }),
        };
        info!(
            signature = receipt.signature.short(),
            total_units = receipt.total_units,
            sheet = receipt.sheet.as_deref().unwrap_or("-"),
            "submission acknowledged"
        );
        Ok(receipt)
    }

    fn ack(&self) -> MutexGuard<'_, Option<SubmissionSignature>> {
        match self.acknowledged.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("acknowledged signature lock was poisoned");
                poisoned.into_inner()
            }
        }
    }

    fn record(&self, elapsed_ms: u64, success: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_submission(elapsed_ms, success);
        }
    }
}

pub type Outcome = Result<SubmissionReceipt, SubmitError>;

/// Starts submissions on their own tasks so scanning goes on meanwhile.
/// Outcomes come back through the paired [`OutcomeStream`].
#[derive(Debug, Clone)]
pub struct BackgroundSubmitter {
    tx: mpsc::UnboundedSender<Outcome>,
    in_flight: Arc<AtomicUsize>,
}

#[derive(Debug)]
pub struct OutcomeStream {
    rx: mpsc::UnboundedReceiver<Outcome>,
    in_flight: Arc<AtomicUsize>,
}

pub fn background() -> (BackgroundSubmitter, OutcomeStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let in_flight = Arc::new(AtomicUsize::new(0));
    (BackgroundSubmitter { tx, in_flight: in_flight.clone() }, OutcomeStream { rx, in_flight })
}

impl BackgroundSubmitter {
    pub fn spawn<B>(
        &self,
        coordinator: Arc<SubmissionCoordinator<B>>,
        metadata: SubmissionMetadata,
        records: Vec<ScanRecord>,
    ) where
        B: SubmissionBackend + 'static,
    {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let outcome = coordinator.submit(&metadata, &records).await;
            let _ = tx.send(outcome);
        });
    }
}

impl OutcomeStream {
    /// Submissions started whose outcome has not been received yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn recv(&mut self) -> Option<Outcome> {
        let outcome = self.rx.recv().await?;
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        Some(outcome)
    }

    /// Waits for every submission still running and returns their outcomes.
    pub async fn drain(&mut self) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        while self.in_flight() > 0 {
            debug!(in_flight = self.in_flight(), "waiting for submissions");
            match self.recv().await {
                Some(outcome) => outcomes.push(outcome),
                None => break,
            }
        }
        outcomes
    }
}

fn build_request(
    metadata: &SubmissionMetadata,
    records: &[ScanRecord],
) -> Result<SubmissionRequest, ValidationError> {
    let operation_type = metadata.operation_type.ok_or(ValidationError::MissingOperationType)?;
    Ok(SubmissionRequest {
        operation_type,
        plate: metadata.plate.clone(),
        site: metadata.site.clone(),
        operative_date: metadata.operative_date.clone(),
        total_units: records.len(),
        sent_at: chrono::Utc::now().to_rfc3339(),
        units: records
            .iter()
            .enumerate()
            .map(|(i, r)| UnitEntry {
                sequence: i + 1,
                code: r.code.clone(),
                timestamp: r.timestamp.clone(),
            })
            .collect(),
    })
}
