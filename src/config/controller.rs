//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::time::Duration;

use super::{env_var_nonzero_or_default, env_var_opt, env_var_or_default, env_var_or_default_str};
use crate::constants::{
    DEFAULT_BACKOFF_MAX_MS, DEFAULT_BACKOFF_START_MS, DEFAULT_MAX_RETRIES, DEFAULT_METRICS_PORT,
    DEFAULT_RESYNC_PERIOD_SECS, DEFAULT_WORKERS,
};

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Number of worker loops sharing the work queue
    pub workers: usize,
    /// Backoff for the first failure of a key (milliseconds), 0 means the default
    pub backoff_start_ms: u64,
    /// Upper bound for the per-key backoff (milliseconds), raised to the start if lower
    pub backoff_max_ms: u64,
    /// Consecutive failures after which a key is dropped
    pub max_retries: u32,
    /// Full resync interval (seconds), 0 disables resync
    pub resync_period_secs: u64,
    /// Port of the metrics and probes server
    pub metrics_port: u16,
    /// Global log level (error, warn, info, debug, trace)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
    /// Only watch SecretDefinitions in this namespace when set
    pub watch_namespace: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            resync_period_secs: DEFAULT_RESYNC_PERIOD_SECS,
            metrics_port: DEFAULT_METRICS_PORT,
            log_level: "warn".to_string(),
            log_format: "text".to_string(),
            watch_namespace: None,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            workers: env_var_or_default("WORKERS", DEFAULT_WORKERS),
            backoff_start_ms: env_var_nonzero_or_default(
                "BACKOFF_START_MS",
                DEFAULT_BACKOFF_START_MS,
            ),
            backoff_max_ms: env_var_or_default("BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            max_retries: env_var_or_default("MAX_RETRIES", DEFAULT_MAX_RETRIES),
            resync_period_secs: env_var_or_default(
                "RESYNC_PERIOD_SECS",
                DEFAULT_RESYNC_PERIOD_SECS,
            ),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            log_level: env_var_or_default_str("LOG_LEVEL", "warn"),
            log_format: env_var_or_default_str("LOG_FORMAT", "text"),
            watch_namespace: env_var_opt("WATCH_NAMESPACE"),
        }
    }

    /// Get backoff start duration, never zero
    #[must_use]
    pub fn backoff_start_duration(&self) -> Duration {
        let ms = match self.backoff_start_ms {
            0 => DEFAULT_BACKOFF_START_MS,
            ms => ms,
        };
        Duration::from_millis(ms)
    }

    /// Get backoff max duration, at least the start duration
    #[must_use]
    pub fn backoff_max_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms).max(self.backoff_start_duration())
    }

    /// Resync interval, `None` when resync is disabled
    #[must_use]
    pub fn resync_period(&self) -> Option<Duration> {
        (self.resync_period_secs > 0).then(|| Duration::from_secs(self.resync_period_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.workers, 2);
        assert_eq!(config.max_retries, 15);
        assert_eq!(config.backoff_start_duration(), Duration::from_millis(5));
        assert_eq!(config.backoff_max_duration(), Duration::from_secs(300));
        assert_eq!(config.resync_period(), Some(Duration::from_secs(30)));
        assert!(config.watch_namespace.is_none());
    }

    #[test]
    fn test_zero_backoff_start_uses_default() {
        let config = ControllerConfig {
            backoff_start_ms: 0,
            ..ControllerConfig::default()
        };
        assert_eq!(
            config.backoff_start_duration(),
            Duration::from_millis(DEFAULT_BACKOFF_START_MS)
        );
    }

    #[test]
    fn test_backoff_max_never_below_start() {
        let config = ControllerConfig {
            backoff_start_ms: 200,
            backoff_max_ms: 50,
            ..ControllerConfig::default()
        };
        assert_eq!(config.backoff_max_duration(), Duration::from_millis(200));
    }

    #[test]
    fn test_resync_disabled() {
        let config = ControllerConfig {
            resync_period_secs: 0,
            ..ControllerConfig::default()
        };
        assert_eq!(config.resync_period(), None);
    }
}
