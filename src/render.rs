use std::io::Write;
use std::sync::{Arc, Mutex};

/// Where accepted scans are shown to the operator.
pub trait RowRenderer: Send {
    fn append_row(&mut self, sequence: usize, code: &str, timestamp: &str);
    fn clear(&mut self);
}

/// Prints rows as an aligned table on any writer (stdout in the binary).
pub struct ConsoleTable<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> ConsoleTable<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> RowRenderer for ConsoleTable<W> {
    fn append_row(&mut self, sequence: usize, code: &str, timestamp: &str) {
        let _ = writeln!(self.out, "{sequence:>5}  {code:<32}  {timestamp}");
        let _ = self.out.flush();
    }

    fn clear(&mut self) {
        let _ = writeln!(self.out, "{:-<52}", "");
        let _ = self.out.flush();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub sequence: usize,
    pub code: String,
    pub timestamp: String,
}

/// Keeps rows in memory; shares them through a handle so tests can inspect.
#[derive(Debug, Clone, Default)]
pub struct RecordingRenderer {
    rows: Arc<Mutex<Vec<Row>>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<Row> {
        self.rows.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl RowRenderer for RecordingRenderer {
    fn append_row(&mut self, sequence: usize, code: &str, timestamp: &str) {
        if let Ok(mut rows) = self.rows.lock() {
            rows.push(Row { sequence, code: code.to_string(), timestamp: timestamp.to_string() });
        }
    }

    fn clear(&mut self) {
        if let Ok(mut rows) = self.rows.lock() {
            rows.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_table_writes_aligned_rows() {
        let mut table = ConsoleTable::new(Vec::new());
        table.append_row(12, "LOT-9", "9:00:00 AM");
        let text = String::from_utf8(table.out).unwrap();
        assert!(text.starts_with("   12  LOT-9"));
        assert!(text.trim_end().ends_with("9:00:00 AM"));
    }

    #[test]
    fn recording_renderer_shares_rows_across_clones() {
        let handle = RecordingRenderer::new();
        let mut renderer = handle.clone();
        renderer.append_row(1, "A", "t");
        assert_eq!(handle.rows().len(), 1);
        renderer.clear();
        assert!(handle.rows().is_empty());
    }
}
