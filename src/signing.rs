use std::fmt;

use blake3::Hasher;
use serde::Serialize;
use sha2::Digest;

use crate::types::{OperationType, ScanRecord, SubmissionMetadata};

/// Fingerprint of what a submission would send: metadata plus every
/// `(code, timestamp)` pair in ledger order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubmissionSignature(String);

#[derive(Serialize)]
struct SignedContent<'a> {
    site: &'a str,
    plate: &'a str,
    operation_type: Option<OperationType>,
    operative_date: &'a str,
    units: Vec<(&'a str, &'a str)>,
}

impl SubmissionSignature {
    pub fn compute(
        metadata: &SubmissionMetadata,
        records: &[ScanRecord],
    ) -> Result<Self, serde_json::Error> {
        let content = SignedContent {
            site: &metadata.site,
            plate: &metadata.plate,
            operation_type: metadata.operation_type,
            operative_date: &metadata.operative_date,
            units: records.iter().map(|r| (r.code.as_str(), r.timestamp.as_str())).collect(),
        };

        // Stable serialization (JSON, declared field order), then blake3, then sha256
        let json = serde_json::to_vec(&content)?;
        let mut h = Hasher::new();
        h.update(&json);
        let b3 = h.finalize();
        let digest = sha2::Sha256::digest(b3.as_bytes());
        Ok(Self(hex::encode(digest)))
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for SubmissionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
