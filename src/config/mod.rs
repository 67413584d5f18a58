//! # Configuration
//!
//! Process-level settings loaded from environment variables.
//!
//! - `controller`: work queue, worker pool, logging and HTTP server settings
//! - `vault`: connection and token renewal settings for the Vault backend

pub mod controller;
pub mod vault;

pub use controller::ControllerConfig;
pub use vault::{VaultConfig, VaultEngine};

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read a numeric environment variable, treating 0 like an unparsable value
fn env_var_nonzero_or_default(key: &str, default: u64) -> u64 {
    match env_var_or_default(key, default) {
        0 => default,
        value => value,
    }
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read environment variable, treating an empty value as unset
fn env_var_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
