use std::sync::Arc;

use chrono::Local;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use scan_tally::config::Config;
use scan_tally::debounce::{CommitStream, FieldEvent, InputDebouncer, KeystrokeField};
use scan_tally::error_handling::{ErrorHandler, ScanError};
use scan_tally::health::HealthChecker;
use scan_tally::ledger::SystemClock;
use scan_tally::logging;
use scan_tally::metrics::MetricsCollector;
use scan_tally::persistence::{FileSlotStorage, PersistenceStore};
use scan_tally::policy::DuplicatePolicy;
use scan_tally::render::ConsoleTable;
use scan_tally::server::StatusServer;
use scan_tally::station::ScanStation;
use scan_tally::submission::{
    self, BackgroundSubmitter, HttpBackend, Outcome, SubmissionCoordinator,
};
use scan_tally::terminal::{self, CrLf, RawModeGuard, say};
use scan_tally::types::SubmissionMetadata;

const HELP: &str = "\
Scan codes (Enter or a short pause commits). Commands:
  :type CARGUE|DESCARGUE|INVENTARIO|NOVEDADES
  :plate <plate>      required for CARGUE/DESCARGUE
  :site <site>
  :date <YYYY-MM-DD>
  :submit             send the session
  :reset              clear every scanned code
  :status             show metadata and count
  :quit               (Ctrl-C or Ctrl-D also end the session)";

enum Flow {
    Continue,
    Quit,
    EndOfInput,
}

struct App {
    station: ScanStation,
    debouncer: InputDebouncer,
    field: KeystrokeField,
    metadata: SubmissionMetadata,
    coordinator: Option<Arc<SubmissionCoordinator<HttpBackend>>>,
    errors: Arc<ErrorHandler>,
    submitter: BackgroundSubmitter,
}

impl App {
    fn on_field_event(&mut self, event: FieldEvent) -> Flow {
        match event {
            FieldEvent::Changed(value) if value.trim_start().starts_with(':') => {
                // typing a command, not a code
                self.debouncer.on_character("");
            }
            FieldEvent::Changed(value) => self.debouncer.on_character(&value),
            FieldEvent::Submitted(value) => match value.trim().strip_prefix(':') {
                Some(command) => return self.on_command(command),
                None => self.debouncer.on_terminator(&value),
            },
            FieldEvent::EndOfInput => return Flow::EndOfInput,
        }
        Flow::Continue
    }

    fn on_commit(&mut self, code: &str) {
        self.field.clear();
        match self.station.accept(code) {
            Ok(_) => say(format_args!("Units scanned: {}", self.station.units_scanned())),
            Err(ScanError::Duplicate { code }) => {
                say(format_args!("!! {code} was already scanned; not counted"))
            }
            Err(ScanError::EmptyCode) => {}
        }
    }

    fn on_command(&mut self, command: &str) -> Flow {
        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };

        match name.to_ascii_lowercase().as_str() {
            "type" | "tipo" => match arg.parse() {
                Ok(op) => self.metadata.operation_type = Some(op),
                Err(e) => say(e),
            },
            "plate" | "placa" => self.metadata.plate = arg.to_string(),
            "site" => self.metadata.site = arg.to_string(),
            "date" | "fecha" => self.metadata.operative_date = arg.to_string(),
            "submit" => self.submit(),
            "reset" => {
                self.debouncer.cancel();
                self.field.clear();
                self.station.reset();
                if let Some(coordinator) = &self.coordinator {
                    coordinator.reset();
                }
                say("Session cleared.");
            }
            "status" => say(format_args!(
                "type={} plate={} site={} date={} units={}",
                self.metadata.operation_type.map(|o| o.as_str()).unwrap_or("-"),
                self.metadata.plate,
                self.metadata.site,
                self.metadata.operative_date,
                self.station.units_scanned()
            )),
            "quit" | "exit" => return Flow::Quit,
            _ => say(HELP),
        }
        Flow::Continue
    }

    /// Runs the submission on its own task so scanning continues meanwhile.
    fn submit(&self) {
        let Some(coordinator) = self.coordinator.clone() else {
            say("BACKEND_URL is not configured; nothing was sent.");
            return;
        };

        let records = self.station.records();
        say(format_args!("Sending {} units...", records.len()));
        self.submitter.spawn(coordinator, self.metadata.clone(), records);
    }

    fn on_outcome(&self, outcome: Outcome) {
        match outcome {
            Ok(receipt) => say(format_args!(
                "Sent. Total units: {} | Sheet: {} | Start column: {} | Target: {}",
                receipt.total_units,
                receipt.sheet.as_deref().unwrap_or("-"),
                receipt.start_col.as_deref().unwrap_or("-"),
                receipt.target.as_deref().unwrap_or("-"),
            )),
            Err(err) => {
                self.errors.handle_submit_error(&err);
                if err.is_retryable() {
                    say(format_args!("Not sent: {err}. Scans are kept; run :submit to retry."));
                } else {
                    say(format_args!("Not sent: {err}"));
                }
            }
        }
    }

    /// Input ended: commit whatever code is still in the field.
    fn finish_input(&mut self, commits: &mut CommitStream) {
        let pending = self.field.value().to_string();
        if !pending.trim_start().starts_with(':') {
            self.debouncer.on_terminator(&pending);
        }
        while let Some(code) = commits.try_recv() {
            self.on_commit(&code);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    config.validate()?;
    logging::init(&config.log_level);

    let metrics = Arc::new(MetricsCollector::new());

    let storage = Arc::new(FileSlotStorage::new(&config.storage_dir));
    let store = PersistenceStore::new(storage, config.storage_slot.clone());
    let mut station = ScanStation::new(
        DuplicatePolicy::new(config.code_separator.clone()),
        store,
        Box::new(ConsoleTable::new(CrLf::new(std::io::stdout()))),
        Arc::new(SystemClock),
        metrics.clone(),
    );
    let restored = station.restore();
    info!(units = restored, "session ready");

    let coordinator = if config.backend_configured() {
        let backend = HttpBackend::new(config.backend_url.clone(), config.get_request_timeout())?;
        Some(Arc::new(SubmissionCoordinator::new(backend).with_metrics(metrics.clone())))
    } else {
        warn!("BACKEND_URL not set; scans will be kept locally only");
        None
    };

    if config.metrics_enabled && config.status_port != 0 {
        let checker = Arc::new(HealthChecker::new(metrics.clone(), config.clone()));
        let server = StatusServer::new(checker, config.status_port);
        tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!(error = %e, "status server stopped");
            }
        });
    }

    let (debouncer, mut commits) = InputDebouncer::new(config.get_scanner_delay());
    let (submitter, mut outcomes) = submission::background();
    let mut app = App {
        errors: station.error_handler(),
        station,
        debouncer,
        field: KeystrokeField::new(),
        metadata: SubmissionMetadata {
            site: config.default_site.clone(),
            operative_date: Local::now().format("%Y-%m-%d").to_string(),
            ..Default::default()
        },
        coordinator,
        submitter,
    };

    let raw_mode = RawModeGuard::enable()?;
    say(HELP);
    say(format_args!("Units scanned: {}", app.station.units_scanned()));

    let (input_tx, mut input) = mpsc::channel(16);
    terminal::spawn_input_thread(input_tx);

    'session: loop {
        tokio::select! {
            // a fired commit is handled before keystrokes read after it
            biased;
            Some(code) = commits.recv() => app.on_commit(&code),
            Some(outcome) = outcomes.recv() => app.on_outcome(outcome),
            chunk = input.recv() => {
                let Some(chunk) = chunk else {
                    app.finish_input(&mut commits);
                    break 'session;
                };
                terminal::echo(&chunk);
                for event in app.field.feed_bytes(&chunk) {
                    match app.on_field_event(event) {
                        Flow::Continue => {}
                        Flow::Quit => break 'session,
                        Flow::EndOfInput => {
                            app.finish_input(&mut commits);
                            break 'session;
                        }
                    }
                }
            }
        }
    }

    if outcomes.in_flight() > 0 {
        say(format_args!("Waiting for {} submission(s) to finish...", outcomes.in_flight()));
        for outcome in outcomes.drain().await {
            app.on_outcome(outcome);
        }
    }

    drop(raw_mode);
    info!(units = app.station.units_scanned(), "exiting; progress is saved");
    Ok(())
}
