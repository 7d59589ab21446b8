//! Runtime configuration, read from `STOCKTRACK_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use stocktrack_observability::LogFormat;
use thiserror::Error;

use crate::store::default_db_path;
use crate::worker::WorkerTiming;

pub const DEFAULT_API_URL: &str = "http://localhost:8001";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("no data directory available; set STOCKTRACK_DB_PATH")]
    NoDataDir,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub api_url: String,
    pub auth_token: Option<String>,
    pub db_path: PathBuf,
    pub request_timeout: Duration,
    pub probe_interval: Duration,
    pub reconnect_debounce: Duration,
    pub log_format: LogFormat,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the config from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = lookup("STOCKTRACK_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let auth_token = lookup("STOCKTRACK_AUTH_TOKEN").filter(|t| !t.is_empty());

        let db_path = match lookup("STOCKTRACK_DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => default_db_path().ok_or(ConfigError::NoDataDir)?,
        };

        let request_timeout = Duration::from_millis(parse_or(
            &lookup,
            "STOCKTRACK_REQUEST_TIMEOUT_MS",
            10_000,
            "a number of milliseconds",
        )?);
        let probe_interval = Duration::from_secs(parse_or(
            &lookup,
            "STOCKTRACK_PROBE_INTERVAL_SECS",
            30,
            "a number of seconds",
        )?);
        let reconnect_debounce = Duration::from_millis(parse_or(
            &lookup,
            "STOCKTRACK_RECONNECT_DEBOUNCE_MS",
            1_500,
            "a number of milliseconds",
        )?);

        let log_format = match lookup("STOCKTRACK_LOG_FORMAT") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                var: "STOCKTRACK_LOG_FORMAT",
                expected: "json or pretty",
                value,
            })?,
            None => LogFormat::default(),
        };

        if probe_interval.is_zero() {
            return Err(ConfigError::Invalid {
                var: "STOCKTRACK_PROBE_INTERVAL_SECS",
                expected: "greater than zero",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            api_url,
            auth_token,
            db_path,
            request_timeout,
            probe_interval,
            reconnect_debounce,
            log_format,
        })
    }

    pub fn worker_timing(&self) -> WorkerTiming {
        WorkerTiming {
            probe_interval: self.probe_interval,
            reconnect_debounce: self.reconnect_debounce,
        }
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            expected,
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<SyncConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SyncConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[("STOCKTRACK_DB_PATH", "/tmp/st.db")]).unwrap();
        assert_eq!(cfg.api_url, DEFAULT_API_URL);
        assert_eq!(cfg.auth_token, None);
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/st.db"));
        assert_eq!(cfg.request_timeout, Duration::from_secs(10));
        assert_eq!(cfg.probe_interval, Duration::from_secs(30));
        assert_eq!(cfg.reconnect_debounce, Duration::from_millis(1500));
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config(&[
            ("STOCKTRACK_API_URL", "https://inv.example.com/api/"),
            ("STOCKTRACK_AUTH_TOKEN", "abc"),
            ("STOCKTRACK_DB_PATH", "/tmp/st.db"),
            ("STOCKTRACK_REQUEST_TIMEOUT_MS", "2500"),
            ("STOCKTRACK_PROBE_INTERVAL_SECS", "5"),
            ("STOCKTRACK_RECONNECT_DEBOUNCE_MS", "0"),
            ("STOCKTRACK_LOG_FORMAT", "pretty"),
        ])
        .unwrap();
        assert_eq!(cfg.api_url, "https://inv.example.com/api/");
        assert_eq!(cfg.auth_token.as_deref(), Some("abc"));
        assert_eq!(cfg.request_timeout, Duration::from_millis(2500));
        assert_eq!(cfg.worker_timing().probe_interval, Duration::from_secs(5));
        assert_eq!(cfg.worker_timing().reconnect_debounce, Duration::ZERO);
        assert_eq!(cfg.log_format, LogFormat::Pretty);
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let err = config(&[
            ("STOCKTRACK_DB_PATH", "/tmp/st.db"),
            ("STOCKTRACK_REQUEST_TIMEOUT_MS", "soon"),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "STOCKTRACK_REQUEST_TIMEOUT_MS",
                expected: "a number of milliseconds",
                value: "soon".into(),
            }
        );

        assert!(config(&[
            ("STOCKTRACK_DB_PATH", "/tmp/st.db"),
            ("STOCKTRACK_PROBE_INTERVAL_SECS", "0"),
        ])
        .is_err());
        assert!(config(&[
            ("STOCKTRACK_DB_PATH", "/tmp/st.db"),
            ("STOCKTRACK_LOG_FORMAT", "xml"),
        ])
        .is_err());
    }
}
