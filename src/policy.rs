use crate::error_handling::ScanError;
use crate::ledger::ScanLedger;

/// A scanned code split at the first separator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeShape<'a> {
    pub base: &'a str,
    pub suffix: Option<&'a str>,
}

/// Decides whether a code may enter the ledger.
///
/// Suffix-coded values (`LOT-9`) identify one physical sub-unit and must be
/// unique in the session. Bare codes (`ABC123`) are shared by many units and
/// may repeat freely.
#[derive(Debug, Clone)]
pub struct DuplicatePolicy {
    separator: String,
}

impl Default for DuplicatePolicy {
    fn default() -> Self {
        Self::new("-")
    }
}

impl DuplicatePolicy {
    pub fn new(separator: impl Into<String>) -> Self {
        Self { separator: separator.into() }
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn shape<'a>(&self, code: &'a str) -> CodeShape<'a> {
        match code.split_once(self.separator.as_str()) {
            Some((base, suffix)) => CodeShape { base, suffix: Some(suffix) },
            None => CodeShape { base: code, suffix: None },
        }
    }

    /// Checked against the live ledger right before `record`.
    pub fn check(&self, code: &str, ledger: &ScanLedger) -> Result<(), ScanError> {
        if self.shape(code).suffix.is_some() && ledger.contains_code(code) {
            return Err(ScanError::Duplicate { code: code.to_string() });
        }
        Ok(())
    }
}
