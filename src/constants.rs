//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Name used as field manager and as the `managedBy` label value
pub const CONTROLLER_NAME: &str = "secrets-manager";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default number of worker loops pulling from the work queue
pub const DEFAULT_WORKERS: usize = 2;

/// Default backoff starting value for a failing key (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 5;

/// Default backoff maximum value for a failing key (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 300_000;

/// Consecutive failures after which a key is dropped from the queue
pub const DEFAULT_MAX_RETRIES: u32 = 15;

/// Default interval between full resyncs of every known SecretDefinition (seconds)
pub const DEFAULT_RESYNC_PERIOD_SECS: u64 = 30;

/// Label stamped on every materialized secret
pub const LABEL_MANAGED_BY: &str = "managedBy";

/// Label carrying the time of the last write
pub const LABEL_LAST_UPDATE: &str = "lastUpdate";

/// Timestamp format for the `lastUpdate` label.
/// Label values may not contain `:` so the time part is dot separated.
pub const LAST_UPDATE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H.%M.%SZ";

/// Default Vault address
pub const DEFAULT_VAULT_ADDR: &str = "https://127.0.0.1:8200";

/// Default Vault KV engine
pub const DEFAULT_VAULT_ENGINE: &str = "kv2";

/// Remaining token TTL (seconds) below which the token gets renewed
pub const DEFAULT_VAULT_MAX_TOKEN_TTL_SECS: i64 = 300;

/// How often the token TTL is checked (seconds)
pub const DEFAULT_VAULT_TOKEN_POLLING_PERIOD_SECS: u64 = 15;

/// TTL increment requested on renewal (seconds)
pub const DEFAULT_VAULT_RENEW_TTL_INCREMENT_SECS: u64 = 600;

/// Timeout for a single Vault request (seconds)
pub const DEFAULT_VAULT_TIMEOUT_SECS: u64 = 5;
