//! Vault KV Backend
//!
//! Reads secrets from HashiCorp Vault's KV engine over its HTTP API.
//! Uses reqwest for HTTP requests and the `X-Vault-Token` header for authentication.
//!
//! Both engine versions are supported:
//! - kv1: `GET /v1/{path}` returns `{"data": {key: value}}`
//! - kv2: `GET /v1/{mount}/data/{rest}` returns `{"data": {"data": {key: value}}}`
//!
//! The token is periodically checked with `auth/token/lookup-self` and
//! renewed through `auth/token/renew-self` before it expires.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use super::{BackendClient, BackendError};
use crate::config::{VaultConfig, VaultEngine};

const TOKEN_HEADER: &str = "X-Vault-Token";

/// Vault KV client
pub struct VaultBackend {
    http_client: Client,
    base_url: String,
    token: Zeroizing<String>,
    engine: VaultEngine,
    max_token_ttl_secs: i64,
    token_polling_period: Duration,
    renew_ttl_increment_secs: u64,
}

impl std::fmt::Debug for VaultBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultBackend")
            .field("base_url", &self.base_url)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

/// Response of `auth/token/lookup-self`
#[derive(Debug, Deserialize)]
struct TokenLookupResponse {
    data: TokenLookupData,
}

#[derive(Debug, Deserialize)]
struct TokenLookupData {
    /// Remaining lifetime in seconds, 0 for tokens that never expire
    #[serde(default)]
    ttl: i64,
    #[serde(default)]
    renewable: bool,
}

impl VaultBackend {
    /// Build a client from configuration
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be constructed.
    pub fn new(config: &VaultConfig) -> Result<Self, BackendError> {
        let http_client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            http_client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            engine: config.engine,
            max_token_ttl_secs: config.max_token_ttl_secs,
            token_polling_period: config.token_polling_period(),
            renew_ttl_increment_secs: config.renew_ttl_increment_secs,
        })
    }

    fn url(&self, api_path: &str) -> String {
        format!("{}/v1/{}", self.base_url, api_path.trim_start_matches('/'))
    }

    /// Check the token TTL once and renew it if it is about to expire.
    ///
    /// Returns `true` when a renewal was performed.
    ///
    /// # Errors
    ///
    /// Returns an error when the lookup or the renewal request fails.
    pub async fn renew_token_if_needed(&self) -> Result<bool, BackendError> {
        let response = self
            .http_client
            .get(self.url("auth/token/lookup-self"))
            .header(TOKEN_HEADER, self.token.as_str())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BackendError::Status {
                path: "auth/token/lookup-self".to_string(),
                status: response.status().as_u16(),
            });
        }
        let lookup: TokenLookupResponse = response.json().await?;

        if !needs_renewal(lookup.data.ttl, lookup.data.renewable, self.max_token_ttl_secs) {
            debug!(ttl = lookup.data.ttl, "vault token does not need renewal");
            return Ok(false);
        }

        let response = self
            .http_client
            .post(self.url("auth/token/renew-self"))
            .header(TOKEN_HEADER, self.token.as_str())
            .json(&json!({ "increment": format!("{}s", self.renew_ttl_increment_secs) }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BackendError::Status {
                path: "auth/token/renew-self".to_string(),
                status: response.status().as_u16(),
            });
        }
        info!(
            increment_secs = self.renew_ttl_increment_secs,
            "vault token renewed"
        );
        Ok(true)
    }

    /// Spawn the token renewal loop. It stops once `shutdown` flips to `true`.
    pub fn spawn_token_renewer(
        self: std::sync::Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.token_polling_period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.renew_token_if_needed().await {
                            error!(error = %e, "unable to renew vault token");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("vault token renewer stopped");
                            return;
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl BackendClient for VaultBackend {
    async fn read_secret(&self, path: &str, key: &str) -> Result<String, BackendError> {
        let api_path = engine_path(self.engine, path);
        let response = self
            .http_client
            .get(self.url(&api_path))
            .header(TOKEN_HEADER, self.token.as_str())
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(BackendError::PathNotFound {
                    path: path.to_string(),
                })
            }
            status if !status.is_success() => {
                warn!(path, status = status.as_u16(), "vault read failed");
                return Err(BackendError::Status {
                    path: path.to_string(),
                    status: status.as_u16(),
                });
            }
            _ => {}
        }

        let body: Value = response.json().await?;
        extract_value(self.engine, &body, path, key)
    }
}

/// API path for a logical secret path.
///
/// kv2 inserts `data/` right after the mount (first path segment).
fn engine_path(engine: VaultEngine, path: &str) -> String {
    let path = path.trim_matches('/');
    match engine {
        VaultEngine::Kv1 => path.to_string(),
        VaultEngine::Kv2 => match path.split_once('/') {
            Some((mount, rest)) => format!("{mount}/data/{rest}"),
            None => format!("{path}/data"),
        },
    }
}

/// Pull `key` out of a read response body
fn extract_value(
    engine: VaultEngine,
    body: &Value,
    path: &str,
    key: &str,
) -> Result<String, BackendError> {
    let data = match engine {
        VaultEngine::Kv1 => body.get("data"),
        VaultEngine::Kv2 => body.get("data").and_then(|d| d.get("data")),
    };
    let data: &Map<String, Value> = data.and_then(Value::as_object).ok_or_else(|| {
        BackendError::InvalidResponse(format!("missing data object for '{path}'"))
    })?;

    match data.get(key) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(BackendError::InvalidValue {
            path: path.to_string(),
            key: key.to_string(),
        }),
        None => Err(BackendError::KeyNotFound {
            path: path.to_string(),
            key: key.to_string(),
        }),
    }
}

/// Tokens with ttl 0 never expire; everything else is renewed once the
/// remaining ttl drops below the threshold.
fn needs_renewal(ttl: i64, renewable: bool, max_token_ttl_secs: i64) -> bool {
    renewable && ttl > 0 && ttl < max_token_ttl_secs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_renewer_survives_zero_polling_period() {
        let config = VaultConfig {
            // Nothing listens on the discard port, lookups fail fast
            url: "http://127.0.0.1:9".to_string(),
            token: Zeroizing::new("s.test".to_string()),
            token_polling_period_secs: 0,
            timeout_secs: 1,
            ..VaultConfig::default()
        };
        let backend = Arc::new(VaultBackend::new(&config).unwrap());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let renewer = backend.spawn_token_renewer(shutdown_rx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!renewer.is_finished(), "renewer must keep running");

        shutdown_tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(5), renewer)
            .await
            .expect("renewer did not stop")
            .expect("renewer task panicked");
    }

    #[test]
    fn test_engine_path_kv1() {
        assert_eq!(engine_path(VaultEngine::Kv1, "secret/foo/bar"), "secret/foo/bar");
        assert_eq!(engine_path(VaultEngine::Kv1, "/secret/foo/"), "secret/foo");
    }

    #[test]
    fn test_engine_path_kv2() {
        assert_eq!(
            engine_path(VaultEngine::Kv2, "secret/foo/bar"),
            "secret/data/foo/bar"
        );
        assert_eq!(engine_path(VaultEngine::Kv2, "secret"), "secret/data");
    }

    #[test]
    fn test_extract_value_kv1() {
        let body = json!({"data": {"password": "hunter2"}});
        assert_eq!(
            extract_value(VaultEngine::Kv1, &body, "secret/db", "password").unwrap(),
            "hunter2"
        );
    }

    #[test]
    fn test_extract_value_kv2() {
        let body = json!({"data": {"data": {"password": "hunter2"}, "metadata": {"version": 3}}});
        assert_eq!(
            extract_value(VaultEngine::Kv2, &body, "secret/db", "password").unwrap(),
            "hunter2"
        );
    }

    #[test]
    fn test_extract_value_missing_key() {
        let body = json!({"data": {"data": {"user": "admin"}}});
        let err = extract_value(VaultEngine::Kv2, &body, "secret/db", "password").unwrap_err();
        assert!(matches!(err, BackendError::KeyNotFound { .. }));
    }

    #[test]
    fn test_extract_value_non_string() {
        let body = json!({"data": {"port": 5432}});
        let err = extract_value(VaultEngine::Kv1, &body, "secret/db", "port").unwrap_err();
        assert!(matches!(err, BackendError::InvalidValue { .. }));
    }

    #[test]
    fn test_extract_value_wrong_engine_layout() {
        // kv1 body read as kv2
        let body = json!({"data": {"password": "hunter2"}});
        let err = extract_value(VaultEngine::Kv2, &body, "secret/db", "password").unwrap_err();
        assert!(matches!(err, BackendError::InvalidResponse(_)));
    }

    #[test]
    fn test_needs_renewal() {
        assert!(needs_renewal(100, true, 300));
        assert!(!needs_renewal(1000, true, 300));
        assert!(!needs_renewal(100, false, 300));
        assert!(!needs_renewal(0, true, 300));
    }

    #[test]
    fn test_debug_hides_token() {
        let config = VaultConfig {
            token: Zeroizing::new("s.topsecret".to_string()),
            ..VaultConfig::default()
        };
        let backend = VaultBackend::new(&config).unwrap();
        assert!(!format!("{backend:?}").contains("topsecret"));
    }
}
