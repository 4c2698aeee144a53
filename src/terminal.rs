//! Raw terminal plumbing for the operator console.
//!
//! Line-buffered stdin only hands over a line after Enter, which leaves the
//! quiet-period commit nothing to act on. On a real terminal the console runs
//! in raw mode so every keystroke arrives as typed. Output then needs `\r\n`
//! line endings and typed characters need to be echoed by hand.

use std::io::{self, IsTerminal, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossterm::terminal;
use tokio::sync::mpsc;
use tracing::{debug, warn};

static RAW_MODE: AtomicBool = AtomicBool::new(false);

pub fn raw_mode_active() -> bool {
    RAW_MODE.load(Ordering::Acquire)
}

/// Puts the terminal in raw mode while alive. Does nothing when stdin is a
/// pipe or a file.
#[derive(Debug)]
pub struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    pub fn enable() -> io::Result<Self> {
        if !io::stdin().is_terminal() {
            debug!("stdin is not a terminal; keeping line mode");
            return Ok(Self { active: false });
        }
        terminal::enable_raw_mode()?;
        RAW_MODE.store(true, Ordering::Release);
        Ok(Self { active: true })
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.active {
            RAW_MODE.store(false, Ordering::Release);
            if let Err(e) = terminal::disable_raw_mode() {
                warn!(error = %e, "could not restore the terminal");
            }
        }
    }
}

/// Writer that turns `\n` into `\r\n` while raw mode is on.
#[derive(Debug)]
pub struct CrLf<W> {
    inner: W,
    enabled: fn() -> bool,
}

impl<W: Write> CrLf<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, enabled: raw_mode_active }
    }

    pub fn always(inner: W) -> Self {
        Self { inner, enabled: || true }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CrLf<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !(self.enabled)() || !buf.contains(&b'\n') {
            return self.inner.write(buf);
        }
        let mut last = 0;
        for (i, _) in buf.iter().enumerate().filter(|(_, b)| **b == b'\n') {
            if i == 0 || buf[i - 1] != b'\r' {
                self.inner.write_all(&buf[last..i])?;
                self.inner.write_all(b"\r\n")?;
                last = i + 1;
            }
        }
        self.inner.write_all(&buf[last..])?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Prints one console line, with raw-mode line endings when needed.
pub fn say(message: impl std::fmt::Display) {
    let mut out = CrLf::new(io::stdout().lock());
    let _ = writeln!(out, "{message}");
    let _ = out.flush();
}

/// What the terminal should show for bytes typed in raw mode.
pub fn echo_bytes(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    for &byte in input {
        match byte {
            b'\r' => out.extend_from_slice(b"\r\n"),
            0x08 | 0x7f => out.extend_from_slice(b"\x08 \x08"),
            b if b < 0x20 => {}
            b => out.push(b),
        }
    }
    out
}

pub fn echo(input: &[u8]) {
    if !raw_mode_active() {
        return;
    }
    let mut out = io::stdout().lock();
    let _ = out.write_all(&echo_bytes(input));
    let _ = out.flush();
}

/// Reads stdin on a plain thread and forwards each chunk. The channel closes
/// at end of input. A blocked read never holds up runtime shutdown.
pub fn spawn_input_thread(tx: mpsc::Sender<Vec<u8>>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut stdin = io::stdin();
        let mut buf = [0u8; 256];
        loop {
            let n = match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    break;
                }
            };
            if tx.blocking_send(buf[..n].to_vec()).is_err() {
                break;
            }
        }
    })
}
