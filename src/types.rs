use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error_handling::ValidationError;

/// One accepted scan. Field names follow the durable snapshot layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    #[serde(rename = "codigo")]
    pub code: String,
    #[serde(rename = "hora", default, deserialize_with = "null_as_default")]
    pub timestamp: String,
}

impl ScanRecord {
    pub fn new(code: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self { code: code.into(), timestamp: timestamp.into() }
    }
}

/// Ordered scans plus the running tally. `units_scanned == records.len()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSession {
    #[serde(
        rename = "unitsScanned",
        alias = "globalUnitsScanned",
        default,
        deserialize_with = "null_as_default"
    )]
    pub units_scanned: usize,
    #[serde(alias = "codigosCorrectos", default, deserialize_with = "null_as_default")]
    pub records: Vec<ScanRecord>,
}

/// Older snapshots wrote `null` where a value was never set.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ScanSession {
    pub fn from_records(records: Vec<ScanRecord>) -> Self {
        Self { units_scanned: records.len(), records }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    Cargue,
    Descargue,
    Inventario,
    Novedades,
}

impl OperationType {
    /// Loading and unloading are tied to a vehicle.
    pub fn requires_plate(self) -> bool {
        matches!(self, OperationType::Cargue | OperationType::Descargue)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Cargue => "CARGUE",
            OperationType::Descargue => "DESCARGUE",
            OperationType::Inventario => "INVENTARIO",
            OperationType::Novedades => "NOVEDADES",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CARGUE" => Ok(OperationType::Cargue),
            "DESCARGUE" => Ok(OperationType::Descargue),
            "INVENTARIO" => Ok(OperationType::Inventario),
            "NOVEDADES" => Ok(OperationType::Novedades),
            other => Err(ValidationError::UnknownOperationType(other.to_string())),
        }
    }
}

/// Session details collected from the operator before submitting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionMetadata {
    pub site: String,
    pub plate: String,
    pub operation_type: Option<OperationType>,
    pub operative_date: String,
}

impl SubmissionMetadata {
    /// Whitespace-trimmed copy; signing and sending both use this form.
    pub fn normalized(&self) -> Self {
        Self {
            site: self.site.trim().to_string(),
            plate: self.plate.trim().to_string(),
            operation_type: self.operation_type,
            operative_date: self.operative_date.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitEntry {
    pub sequence: usize,
    pub code: String,
    pub timestamp: String,
}

/// Body POSTed to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    pub operation_type: OperationType,
    pub plate: String,
    pub site: String,
    pub operative_date: String,
    pub total_units: usize,
    pub sent_at: String,
    pub units: Vec<UnitEntry>,
}

/// Backend reply. Everything except `ok` is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResponse {
    pub ok: bool,
    #[serde(default)]
    pub total_unidades: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default, rename = "startCol")]
    pub start_col: Option<serde_json::Value>,
}
