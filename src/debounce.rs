//! Turns raw scanner keystrokes into one committed code per scan.
//!
//! Many handheld scanners type the code a character at a time and never send
//! a terminator, so a commit happens either on Enter or after a quiet period
//! with no new keystrokes. Rapid keystrokes restart the timer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// A payload delivered to a channel after a delay unless cancelled first.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Must be called inside a tokio runtime. The deadline is fixed at call time.
    pub fn schedule<T: Send + 'static>(
        delay: Duration,
        payload: T,
        sink: mpsc::UnboundedSender<T>,
    ) -> Self {
        let sleep = tokio::time::sleep(delay);
        let handle = tokio::spawn(async move {
            sleep.await;
            let _ = sink.send(payload);
        });
        Self { handle }
    }

    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Commit {
    code: String,
    epoch: u64,
    serial: u64,
}

/// Receiving side of a debouncer. Commits issued before the last
/// [`InputDebouncer::cancel`] are dropped here even if already queued.
#[derive(Debug)]
pub struct CommitStream {
    rx: mpsc::UnboundedReceiver<Commit>,
    epoch: Arc<AtomicU64>,
    delivered: Arc<AtomicU64>,
}

impl CommitStream {
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            let commit = self.rx.recv().await?;
            if let Some(code) = self.accept(commit) {
                return Some(code);
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<String> {
        while let Ok(commit) = self.rx.try_recv() {
            if let Some(code) = self.accept(commit) {
                return Some(code);
            }
        }
        None
    }

    fn accept(&self, commit: Commit) -> Option<String> {
        self.delivered.fetch_max(commit.serial, Ordering::AcqRel);
        if commit.epoch == self.epoch.load(Ordering::Acquire) {
            Some(commit.code)
        } else {
            trace!(code = %commit.code, "dropping commit issued before cancel");
            None
        }
    }
}

#[derive(Debug)]
struct PendingCommit {
    task: ScheduledTask,
    code: String,
    serial: u64,
}

#[derive(Debug)]
pub struct InputDebouncer {
    quiet_period: Duration,
    pending: Option<PendingCommit>,
    tx: mpsc::UnboundedSender<Commit>,
    epoch: Arc<AtomicU64>,
    next_serial: u64,
    delivered: Arc<AtomicU64>,
}

impl InputDebouncer {
    pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(400);

    pub fn new(quiet_period: Duration) -> (Self, CommitStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let epoch = Arc::new(AtomicU64::new(0));
        let delivered = Arc::new(AtomicU64::new(0));
        let debouncer = Self {
            quiet_period,
            pending: None,
            tx,
            epoch: epoch.clone(),
            next_serial: 1,
            delivered: delivered.clone(),
        };
        (debouncer, CommitStream { rx, epoch, delivered })
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// A keystroke changed the field. Restarts the quiet-period timer with the
    /// value as it is now.
    pub fn on_character(&mut self, current_value: &str) {
        self.cancel_pending();
        let code = current_value.trim();
        if code.is_empty() {
            return;
        }
        let commit = self.commit(code);
        let serial = commit.serial;
        let task = ScheduledTask::schedule(self.quiet_period, commit, self.tx.clone());
        self.pending = Some(PendingCommit { task, code: code.to_string(), serial });
    }

    /// Enter was pressed: commit right away, unless the quiet-period timer
    /// already committed this same value and nobody has received it yet.
    pub fn on_terminator(&mut self, current_value: &str) {
        let fired = self.pending.take().and_then(|pending| {
            if pending.task.is_finished() {
                Some(pending)
            } else {
                pending.task.cancel();
                None
            }
        });

        let code = current_value.trim();
        if code.is_empty() {
            return;
        }
        if let Some(fired) = fired {
            let undelivered = self.delivered.load(Ordering::Acquire) < fired.serial;
            if undelivered && fired.code == code {
                trace!(code, "terminator for a value the timer already committed");
                return;
            }
        }
        let commit = self.commit(code);
        let _ = self.tx.send(commit);
    }

    /// Drops the pending timer and anything already queued, without committing.
    pub fn cancel(&mut self) {
        self.cancel_pending();
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    pub fn has_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|p| !p.task.is_finished())
    }

    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.task.cancel();
        }
    }

    fn commit(&mut self, code: &str) -> Commit {
        let serial = self.next_serial;
        self.next_serial += 1;
        Commit { code: code.to_string(), epoch: self.epoch.load(Ordering::Acquire), serial }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldEvent {
    /// The field content changed; carries the full current value.
    Changed(String),
    /// Enter was pressed; carries the value, and the field is now empty.
    Submitted(String),
    /// Ctrl-C or Ctrl-D on a raw terminal. Nothing after it in the chunk is read.
    EndOfInput,
}

/// Text field fed with raw terminal bytes.
///
/// Enter arrives as `\n` from pipes and as `\r` from a raw-mode terminal; a
/// `\r\n` pair counts once. Bytes of a character split across two reads are
/// held until the rest arrives.
#[derive(Debug, Default)]
pub struct KeystrokeField {
    value: String,
    partial: Vec<u8>,
    after_cr: bool,
}

impl KeystrokeField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn clear(&mut self) {
        self.value.clear();
    }

    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Vec<FieldEvent> {
        self.partial.extend_from_slice(bytes);
        let mut text = String::new();
        let mut rest = std::mem::take(&mut self.partial);
        let mut start = 0;

        loop {
            match std::str::from_utf8(&rest[start..]) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(err) => {
                    let valid_end = start + err.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&rest[start..valid_end]));
                    match err.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        None => {
                            self.partial = rest.split_off(valid_end);
                            break;
                        }
                    }
                }
            }
        }

        self.feed(&text)
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<FieldEvent> {
        let mut events = Vec::new();
        let mut changed = false;

        for ch in chunk.chars() {
            let after_cr = std::mem::replace(&mut self.after_cr, ch == '\r');
            match ch {
                '\n' if after_cr => {}
                '\n' | '\r' => {
                    events.push(FieldEvent::Submitted(std::mem::take(&mut self.value)));
                    changed = false;
                }
                '\u{3}' | '\u{4}' => {
                    if changed {
                        events.push(FieldEvent::Changed(self.value.clone()));
                    }
                    events.push(FieldEvent::EndOfInput);
                    return events;
                }
                '\u{8}' | '\u{7f}' => {
                    changed |= self.value.pop().is_some();
                }
                c if c.is_control() => {}
                c => {
                    self.value.push(c);
                    changed = true;
                }
            }
        }

        if changed {
            events.push(FieldEvent::Changed(self.value.clone()));
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debouncer() -> (InputDebouncer, CommitStream) {
        InputDebouncer::new(InputDebouncer::DEFAULT_QUIET_PERIOD)
    }

    #[tokio::test(start_paused = true)]
    async fn commits_after_quiet_period() {
        let (mut d, mut commits) = debouncer();
        d.on_character("A");

        tokio::time::sleep(Duration::from_millis(399)).await;
        assert_eq!(commits.try_recv(), None);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(commits.try_recv(), Some("A".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_keystrokes_collapse_into_one_commit() {
        let (mut d, mut commits) = debouncer();
        for value in ["L", "LO", "LOT", "LOT-", "LOT-9"] {
            d.on_character(value);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        assert_eq!(commits.recv().await, Some("LOT-9".to_string()));
        let more = tokio::time::timeout(Duration::from_secs(5), commits.recv()).await;
        assert!(more.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn terminator_commits_immediately_and_cancels_timer() {
        let (mut d, mut commits) = debouncer();
        d.on_character("ABC12");
        d.on_terminator(" ABC123 ");

        assert_eq!(commits.try_recv(), Some("ABC123".to_string()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(commits.try_recv(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_values_never_commit() {
        let (mut d, mut commits) = debouncer();
        d.on_character("   ");
        d.on_terminator("");
        d.on_terminator(" \t ");
        assert!(!d.has_pending());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(commits.try_recv(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_the_field_cancels_pending_commit() {
        let (mut d, mut commits) = debouncer();
        d.on_character("AB");
        d.on_character("");

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(commits.try_recv(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drops_pending_and_queued_commits() {
        let (mut d, mut commits) = debouncer();

        d.on_terminator("QUEUED");
        d.on_character("PENDING");
        assert!(d.has_pending());
        d.cancel();
        assert!(!d.has_pending());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(commits.try_recv(), None);

        // commits after the cancel flow again
        d.on_terminator("NEXT");
        assert_eq!(commits.try_recv(), Some("NEXT".to_string()));
    }

    #[test]
    fn field_tracks_keystrokes_and_enter() {
        let mut field = KeystrokeField::new();
        assert_eq!(field.feed("AB"), vec![FieldEvent::Changed("AB".into())]);
        assert_eq!(field.feed("C\r\n"), vec![FieldEvent::Submitted("ABC".into())]);
        assert_eq!(field.value(), "");

        let events = field.feed("X\nYZ");
        assert_eq!(
            events,
            vec![FieldEvent::Submitted("X".into()), FieldEvent::Changed("YZ".into())]
        );
    }

    #[test]
    fn field_handles_backspace() {
        let mut field = KeystrokeField::new();
        field.feed("AB");
        assert_eq!(field.feed("\u{7f}"), vec![FieldEvent::Changed("A".into())]);
        field.clear();
        assert!(field.feed("\u{8}").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn enter_after_timer_fired_commits_once() {
        let (mut d, mut commits) = debouncer();
        d.on_character("ABC123");
        tokio::time::sleep(Duration::from_millis(401)).await;

        // the timer fired but the consumer has not received it yet
        d.on_terminator("ABC123");

        let mut received = Vec::new();
        while let Some(code) = commits.try_recv() {
            received.push(code);
        }
        assert_eq!(received, vec!["ABC123".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn enter_after_timer_fired_with_other_value_still_commits() {
        let (mut d, mut commits) = debouncer();
        d.on_character("ABC");
        tokio::time::sleep(Duration::from_millis(401)).await;
        d.on_terminator("ABC123");

        assert_eq!(commits.try_recv(), Some("ABC".to_string()));
        assert_eq!(commits.try_recv(), Some("ABC123".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn same_code_rescanned_after_delivery_commits_again() {
        let (mut d, mut commits) = debouncer();
        d.on_character("ABC123");
        assert_eq!(commits.recv().await, Some("ABC123".to_string()));

        // a scanner that sends the whole code plus Enter in one read
        d.on_terminator("ABC123");
        assert_eq!(commits.try_recv(), Some("ABC123".to_string()));
    }

    #[test]
    fn carriage_return_is_enter_on_raw_terminals() {
        let mut field = KeystrokeField::new();
        assert_eq!(
            field.feed("AB\rCD\r"),
            vec![FieldEvent::Submitted("AB".into()), FieldEvent::Submitted("CD".into())]
        );

        // a CRLF split across reads still counts once
        field.feed("EF\r");
        assert!(field.feed("\n").is_empty());
    }

    #[test]
    fn control_keys_end_input() {
        let mut field = KeystrokeField::new();
        assert_eq!(
            field.feed("AB\u{3}CD"),
            vec![FieldEvent::Changed("AB".into()), FieldEvent::EndOfInput]
        );
        assert_eq!(field.value(), "AB");
        assert_eq!(field.feed("\u{4}"), vec![FieldEvent::EndOfInput]);
    }

    #[test]
    fn multibyte_character_split_across_reads() {
        let mut field = KeystrokeField::new();
        let code = "PAÑ-1".as_bytes();
        let (head, tail) = code.split_at(3);

        assert_eq!(field.feed_bytes(head), vec![FieldEvent::Changed("PA".into())]);
        assert_eq!(field.feed_bytes(tail), vec![FieldEvent::Changed("PAÑ-1".into())]);
        assert_eq!(field.value(), "PAÑ-1");
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut field = KeystrokeField::new();
        field.feed_bytes(&[b'A', 0xff, b'B']);
        assert_eq!(field.value(), "A\u{fffd}B");
    }
}
