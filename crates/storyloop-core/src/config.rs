//! Runner configuration.
//!
//! A JSON file merged over defaults: any field the file omits keeps its
//! default, so a config containing only `{"retry": {"max_retries": 5}}` is
//! valid. A missing file yields the full defaults; malformed JSON is an
//! error rather than a silent fallback.

use crate::policy::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use storyloop_pty::ShutdownConfig;
use thiserror::Error;
use tracing::debug;

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Retry ceilings and cooldowns, in file-friendly units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempt ceiling shared by every error kind except `no_messages`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Dedicated (more generous) ceiling for `no_messages`.
    #[serde(default = "default_no_messages_max_retries")]
    pub no_messages_max_retries: u32,

    /// Cooldown before retrying a general failure, in milliseconds.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Cooldown before retrying a `no_messages` failure, in milliseconds.
    #[serde(default = "default_no_messages_cooldown_ms")]
    pub no_messages_cooldown_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            no_messages_max_retries: default_no_messages_max_retries(),
            cooldown_ms: default_cooldown_ms(),
            no_messages_cooldown_ms: default_no_messages_cooldown_ms(),
        }
    }
}

/// Top-level runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Terminal width for the hosted CLI.
    #[serde(default = "default_cols")]
    pub cols: u16,

    /// Terminal height for the hosted CLI.
    #[serde(default = "default_rows")]
    pub rows: u16,

    /// Terminal type advertised via `TERM`.
    #[serde(default = "default_term")]
    pub term: String,

    /// Hard ceiling on one iteration's wall-clock time, in seconds.
    /// 0 disables the timeout.
    #[serde(default = "default_iteration_timeout_secs")]
    pub iteration_timeout_secs: u64,

    /// Grace period before a signaled child is force-killed, milliseconds.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Secondary bound after a force kill, milliseconds.
    #[serde(default = "default_kill_wait_ms")]
    pub kill_wait_ms: u64,

    /// Retry policy settings.
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            cols: default_cols(),
            rows: default_rows(),
            term: default_term(),
            iteration_timeout_secs: default_iteration_timeout_secs(),
            grace_period_ms: default_grace_period_ms(),
            kill_wait_ms: default_kill_wait_ms(),
            retry: RetrySettings::default(),
        }
    }
}

impl RunnerConfig {
    /// Loads configuration from `path`, merging file values over defaults.
    /// A missing file is not an error; it just means all defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        debug!(path = %path.display(), "loaded runner config");
        Ok(config)
    }

    /// The retry policy these settings describe.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            general_max_attempts: self.retry.max_retries,
            no_messages_max_attempts: self.retry.no_messages_max_retries,
            general_cooldown: Duration::from_millis(self.retry.cooldown_ms),
            no_messages_cooldown: Duration::from_millis(self.retry.no_messages_cooldown_ms),
        }
    }

    /// Shutdown bounds for the signal coordinator.
    pub fn shutdown_config(&self) -> ShutdownConfig {
        ShutdownConfig {
            grace_period: Duration::from_millis(self.grace_period_ms),
            kill_wait: Duration::from_millis(self.kill_wait_ms),
        }
    }

    /// Iteration timeout, `None` when disabled.
    pub fn iteration_timeout(&self) -> Option<Duration> {
        if self.iteration_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.iteration_timeout_secs))
        }
    }
}

fn default_cols() -> u16 {
    80
}

fn default_rows() -> u16 {
    30
}

fn default_term() -> String {
    "xterm-256color".to_string()
}

fn default_iteration_timeout_secs() -> u64 {
    600
}

fn default_grace_period_ms() -> u64 {
    2000
}

fn default_kill_wait_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_no_messages_max_retries() -> u32 {
    10
}

fn default_cooldown_ms() -> u64 {
    30_000
}

fn default_no_messages_cooldown_ms() -> u64 {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = RunnerConfig::load(Path::new("/nonexistent/storyloop.json")).unwrap();
        assert_eq!(config.cols, 80);
        assert_eq!(config.rows, 30);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_partial_file_merges_over_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"cols": 120, "retry": {{"max_retries": 5}}}}"#).unwrap();

        let config = RunnerConfig::load(file.path()).unwrap();
        assert_eq!(config.cols, 120);
        assert_eq!(config.rows, 30); // default kept
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.no_messages_max_retries, 10); // default kept
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json at all").unwrap();

        let result = RunnerConfig::load(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_policy_conversion() {
        let config = RunnerConfig::default();
        let policy = config.retry_policy();
        assert_eq!(policy.general_max_attempts, 3);
        assert_eq!(policy.no_messages_max_attempts, 10);
        assert_eq!(policy.general_cooldown, Duration::from_secs(30));
        assert_eq!(policy.no_messages_cooldown, Duration::from_secs(10));
    }

    #[test]
    fn test_shutdown_conversion() {
        let config = RunnerConfig::default();
        let shutdown = config.shutdown_config();
        assert_eq!(shutdown.grace_period, Duration::from_secs(2));
        assert_eq!(shutdown.kill_wait, Duration::from_secs(1));
    }

    #[test]
    fn test_timeout_zero_disables() {
        let config = RunnerConfig {
            iteration_timeout_secs: 0,
            ..RunnerConfig::default()
        };
        assert_eq!(config.iteration_timeout(), None);
    }
}
