//! # Vault Configuration
//!
//! Connection and token renewal settings for the Vault backend.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use zeroize::Zeroizing;

use super::{env_var_nonzero_or_default, env_var_opt, env_var_or_default, env_var_or_default_str};
use crate::constants::{
    DEFAULT_VAULT_ADDR, DEFAULT_VAULT_ENGINE, DEFAULT_VAULT_MAX_TOKEN_TTL_SECS,
    DEFAULT_VAULT_RENEW_TTL_INCREMENT_SECS, DEFAULT_VAULT_TIMEOUT_SECS,
    DEFAULT_VAULT_TOKEN_POLLING_PERIOD_SECS,
};

/// Vault KV secrets engine version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultEngine {
    Kv1,
    Kv2,
}

impl FromStr for VaultEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kv1" => Ok(Self::Kv1),
            "kv2" => Ok(Self::Kv2),
            other => Err(format!(
                "unsupported vault engine '{other}', expected kv1 or kv2"
            )),
        }
    }
}

impl fmt::Display for VaultEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kv1 => f.write_str("kv1"),
            Self::Kv2 => f.write_str("kv2"),
        }
    }
}

/// Settings for [`crate::backend::vault::VaultBackend`]
#[derive(Clone)]
pub struct VaultConfig {
    /// Vault address, e.g. `https://vault.example.com:8200`
    pub url: String,
    /// Client token
    pub token: Zeroizing<String>,
    /// KV engine version
    pub engine: VaultEngine,
    /// Renew the token once its remaining TTL drops below this (seconds)
    pub max_token_ttl_secs: i64,
    /// Interval between token TTL checks (seconds), 0 means the default
    pub token_polling_period_secs: u64,
    /// TTL increment requested when renewing (seconds)
    pub renew_ttl_increment_secs: u64,
    /// Per-request timeout (seconds)
    pub timeout_secs: u64,
}

impl fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultConfig")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("engine", &self.engine)
            .field("max_token_ttl_secs", &self.max_token_ttl_secs)
            .field("token_polling_period_secs", &self.token_polling_period_secs)
            .field("renew_ttl_increment_secs", &self.renew_ttl_increment_secs)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_VAULT_ADDR.to_string(),
            token: Zeroizing::new(String::new()),
            engine: VaultEngine::Kv2,
            max_token_ttl_secs: DEFAULT_VAULT_MAX_TOKEN_TTL_SECS,
            token_polling_period_secs: DEFAULT_VAULT_TOKEN_POLLING_PERIOD_SECS,
            renew_ttl_increment_secs: DEFAULT_VAULT_RENEW_TTL_INCREMENT_SECS,
            timeout_secs: DEFAULT_VAULT_TIMEOUT_SECS,
        }
    }
}

impl VaultConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// An unparsable `VAULT_ENGINE` falls back to kv2.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            url: env_var_or_default_str("VAULT_ADDR", DEFAULT_VAULT_ADDR),
            token: Zeroizing::new(env_var_opt("VAULT_TOKEN").unwrap_or_default()),
            engine: env_var_or_default_str("VAULT_ENGINE", DEFAULT_VAULT_ENGINE)
                .parse()
                .unwrap_or(VaultEngine::Kv2),
            max_token_ttl_secs: env_var_or_default(
                "VAULT_MAX_TOKEN_TTL",
                DEFAULT_VAULT_MAX_TOKEN_TTL_SECS,
            ),
            token_polling_period_secs: env_var_nonzero_or_default(
                "VAULT_TOKEN_POLLING_PERIOD",
                DEFAULT_VAULT_TOKEN_POLLING_PERIOD_SECS,
            ),
            renew_ttl_increment_secs: env_var_or_default(
                "VAULT_RENEW_TTL_INCREMENT",
                DEFAULT_VAULT_RENEW_TTL_INCREMENT_SECS,
            ),
            timeout_secs: env_var_or_default("VAULT_TIMEOUT", DEFAULT_VAULT_TIMEOUT_SECS),
        }
    }

    /// Interval between token TTL checks, never zero
    #[must_use]
    pub fn token_polling_period(&self) -> Duration {
        let secs = match self.token_polling_period_secs {
            0 => DEFAULT_VAULT_TOKEN_POLLING_PERIOD_SECS,
            secs => secs,
        };
        Duration::from_secs(secs)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
