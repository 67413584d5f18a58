//! # Command Line
//!
//! Flags of the `secrets-manager` binary. Every flag is optional and, when
//! given, overrides the matching environment variable, which in turn
//! overrides the built-in default.
//!
//! ```bash
//! secrets-manager --workers 4 --vault-engine kv1 --log-format json
//! ```

use clap::Parser;
use secrets_manager::config::{ControllerConfig, VaultConfig, VaultEngine};
use zeroize::Zeroizing;

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BUILD_GIT_HASH"), ")");

/// Materializes SecretDefinitions into Kubernetes Secrets from Vault
#[derive(Parser, Debug)]
#[command(name = "secrets-manager", version = VERSION, long_about = None)]
pub struct Cli {
    /// Number of concurrent reconciliation workers [env: WORKERS]
    #[arg(long)]
    pub workers: Option<usize>,

    /// First retry delay of a failing key, in milliseconds [env: BACKOFF_START_MS]
    #[arg(long)]
    pub backoff_start_ms: Option<u64>,

    /// Upper bound of the retry delay, in milliseconds [env: BACKOFF_MAX_MS]
    #[arg(long)]
    pub backoff_max_ms: Option<u64>,

    /// Failures after which a key is dropped from the queue [env: MAX_RETRIES]
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Seconds between full resyncs, 0 disables them [env: RESYNC_PERIOD_SECS]
    #[arg(long)]
    pub resync_period_secs: Option<u64>,

    /// Port of the metrics and probes server [env: METRICS_PORT]
    #[arg(long)]
    pub metrics_port: Option<u16>,

    /// Log level or tracing filter directive [env: LOG_LEVEL]
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format, "text" or "json" [env: LOG_FORMAT]
    #[arg(long)]
    pub log_format: Option<String>,

    /// Only watch SecretDefinitions of this namespace [env: WATCH_NAMESPACE]
    #[arg(long)]
    pub watch_namespace: Option<String>,

    /// Vault address [env: VAULT_ADDR]
    #[arg(long)]
    pub vault_url: Option<String>,

    /// Vault token [env: VAULT_TOKEN]
    #[arg(long)]
    pub vault_token: Option<String>,

    /// Vault KV engine, "kv1" or "kv2" [env: VAULT_ENGINE]
    #[arg(long)]
    pub vault_engine: Option<VaultEngine>,

    /// Renew the token once its TTL drops below this many seconds [env: VAULT_MAX_TOKEN_TTL]
    #[arg(long)]
    pub vault_max_token_ttl: Option<i64>,

    /// Seconds between token TTL checks [env: VAULT_TOKEN_POLLING_PERIOD]
    #[arg(long)]
    pub vault_token_polling_period: Option<u64>,

    /// TTL increment requested on renewal, in seconds [env: VAULT_RENEW_TTL_INCREMENT]
    #[arg(long)]
    pub vault_renew_ttl_increment: Option<u64>,

    /// Vault request timeout in seconds [env: VAULT_TIMEOUT]
    #[arg(long)]
    pub vault_timeout: Option<u64>,
}

impl Cli {
    /// Apply explicit flags over `controller`
    pub fn apply_controller(&self, controller: &mut ControllerConfig) {
        if let Some(v) = self.workers {
            controller.workers = v;
        }
        if let Some(v) = self.backoff_start_ms {
            controller.backoff_start_ms = v;
        }
        if let Some(v) = self.backoff_max_ms {
            controller.backoff_max_ms = v;
        }
        if let Some(v) = self.max_retries {
            controller.max_retries = v;
        }
        if let Some(v) = self.resync_period_secs {
            controller.resync_period_secs = v;
        }
        if let Some(v) = self.metrics_port {
            controller.metrics_port = v;
        }
        if let Some(v) = &self.log_level {
            controller.log_level.clone_from(v);
        }
        if let Some(v) = &self.log_format {
            controller.log_format.clone_from(v);
        }
        if let Some(v) = &self.watch_namespace {
            controller.watch_namespace = Some(v.clone()).filter(|ns| !ns.is_empty());
        }
    }

    /// Apply explicit flags over `vault`
    pub fn apply_vault(&self, vault: &mut VaultConfig) {
        if let Some(v) = &self.vault_url {
            vault.url.clone_from(v);
        }
        if let Some(v) = &self.vault_token {
            vault.token = Zeroizing::new(v.clone());
        }
        if let Some(v) = self.vault_engine {
            vault.engine = v;
        }
        if let Some(v) = self.vault_max_token_ttl {
            vault.max_token_ttl_secs = v;
        }
        if let Some(v) = self.vault_token_polling_period {
            vault.token_polling_period_secs = v;
        }
        if let Some(v) = self.vault_renew_ttl_increment {
            vault.renew_ttl_increment_secs = v;
        }
        if let Some(v) = self.vault_timeout {
            vault.timeout_secs = v;
        }
    }
}
