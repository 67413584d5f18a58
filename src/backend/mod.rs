//! # Secret Backends
//!
//! The backend is the source of truth for secret values. The synchronizer
//! only needs to read a single value by path and key; everything else
//! (authentication, lease renewal, engine layout) stays inside the backend
//! implementation.

use async_trait::async_trait;
use thiserror::Error;

pub mod vault;

pub use vault::VaultBackend;

/// Errors returned by backend clients.
///
/// The synchronizer treats all of them the same way: the desired state
/// cannot be computed.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned status {status} for '{path}'")]
    Status { path: String, status: u16 },

    #[error("secret '{path}' not found in backend")]
    PathNotFound { path: String },

    #[error("key '{key}' not found in backend secret '{path}'")]
    KeyNotFound { path: String, key: String },

    #[error("value of '{path}/{key}' is not a string")]
    InvalidValue { path: String, key: String },

    #[error("unexpected backend response: {0}")]
    InvalidResponse(String),
}

/// Read access to the secret backend
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Read the value stored under `key` in the backend secret at `path`
    async fn read_secret(&self, path: &str, key: &str) -> Result<String, BackendError>;
}
