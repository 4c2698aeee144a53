use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Backend
    pub backend_url: String,
    pub request_timeout_ms: u64,

    // Durable storage
    pub storage_dir: PathBuf,
    pub storage_slot: String,

    // Scanner input
    pub scanner_delay_ms: u64,
    pub code_separator: String,

    // Session defaults
    pub default_site: String,

    // Monitoring and logging
    pub log_level: String,
    pub metrics_enabled: bool,
    pub status_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: String::new(),
            request_timeout_ms: 30_000,

            storage_dir: PathBuf::from("./.scan-tally"),
            storage_slot: "scanProgress".to_string(),

            scanner_delay_ms: 400,
            code_separator: "-".to_string(),

            default_site: String::new(),

            log_level: "info".to_string(),
            metrics_enabled: true,
            status_port: 0,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(val) = lookup("BACKEND_URL") {
            config.backend_url = val.trim().to_string();
        }

        if let Some(val) = lookup("REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = parse_var("REQUEST_TIMEOUT_MS", val)?;
        }

        if let Some(val) = lookup("STORAGE_DIR") {
            config.storage_dir = PathBuf::from(val);
        }

        if let Some(val) = lookup("STORAGE_SLOT") {
            config.storage_slot = val;
        }

        if let Some(val) = lookup("SCANNER_DELAY_MS") {
            config.scanner_delay_ms = parse_var("SCANNER_DELAY_MS", val)?;
        }

        if let Some(val) = lookup("CODE_SEPARATOR") {
            config.code_separator = val;
        }

        if let Some(val) = lookup("DEFAULT_SITE") {
            config.default_site = val;
        }

        if let Some(val) = lookup("LOG_LEVEL") {
            config.log_level = val;
        }

        if let Some(val) = lookup("METRICS_ENABLED") {
            config.metrics_enabled = val == "1";
        }

        if let Some(val) = lookup("STATUS_PORT") {
            config.status_port = parse_var("STATUS_PORT", val)?;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scanner_delay_ms == 0 {
            return Err(ConfigError::ValidationError(
                "SCANNER_DELAY_MS must be greater than 0".to_string(),
            ));
        }

        if self.code_separator.is_empty() {
            return Err(ConfigError::ValidationError(
                "CODE_SEPARATOR must not be empty".to_string(),
            ));
        }

        if self.storage_slot.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "STORAGE_SLOT must not be empty".to_string(),
            ));
        }

        if !self.backend_url.is_empty() && !self.backend_url.starts_with("http") {
            return Err(ConfigError::ValidationError(
                "BACKEND_URL must be a valid HTTP URL".to_string(),
            ));
        }

        Ok(())
    }

    /// Scanning works offline; only submitting needs a backend.
    pub fn backend_configured(&self) -> bool {
        self.backend_url.starts_with("http://") || self.backend_url.starts_with("https://")
    }

    pub fn get_scanner_delay(&self) -> Duration {
        Duration::from_millis(self.scanner_delay_ms)
    }

    pub fn get_request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, val: String) -> Result<T, ConfigError> {
    val.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvVar(name.to_string(), val))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.scanner_delay_ms, 400);
        assert_eq!(config.code_separator, "-");
        assert_eq!(config.storage_slot, "scanProgress");
        assert!(!config.backend_configured());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("BACKEND_URL", " https://example.test/exec "),
            ("SCANNER_DELAY_MS", "250"),
            ("CODE_SEPARATOR", "/"),
            ("METRICS_ENABLED", "0"),
            ("STATUS_PORT", "9100"),
        ]))
        .unwrap();
        assert_eq!(config.backend_url, "https://example.test/exec");
        assert_eq!(config.get_scanner_delay(), Duration::from_millis(250));
        assert_eq!(config.code_separator, "/");
        assert!(!config.metrics_enabled);
        assert_eq!(config.status_port, 9100);
        assert!(config.backend_configured());
    }

    #[test]
    fn rejects_unparseable_numbers() {
        let err = Config::from_lookup(lookup(&[("SCANNER_DELAY_MS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(name, _) if name == "SCANNER_DELAY_MS"));
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut config = Config::default();
        config.scanner_delay_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.backend_url = "ftp://nope".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.code_separator.clear();
        assert!(config.validate().is_err());
    }
}
