//! # Secrets Manager
//!
//! State synchronization for one SecretDefinition.
//!
//! 1. Desired state: every data entry is read from the backend and decoded.
//!    Any failure here aborts the whole sync before a single namespace is
//!    touched, and counts one sync error for every target namespace.
//! 2. Per namespace: read the current Secret, compare it with the desired
//!    state and write it only when they differ. A failure in one namespace is
//!    logged and counted, then the next namespace is processed.
//!
//! Namespace failures never surface as the return value. A namespace that
//! keeps failing therefore does not trigger controller level backoff for the
//! whole object; it is only visible through
//! `secrets_manager_secret_sync_errors_count` and the logs. The next resync
//! retries it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, info_span, Instrument};

use crate::backend::{BackendClient, BackendError};
use crate::codec::{CodecError, CodecRegistry};
use crate::constants::{
    CONTROLLER_NAME, LABEL_LAST_UPDATE, LABEL_MANAGED_BY, LAST_UPDATE_TIMESTAMP_FORMAT,
};
use crate::crd::SecretDefinitionSpec;
use crate::kubernetes::{MaterializedSecret, SecretData, SecretStore};
use crate::observability::metrics;

/// Errors that abort a whole sync
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("unable to read secret '{path}/{key}' from backend: {source}")]
    BackendRead {
        path: String,
        key: String,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Synchronizes one SecretDefinition into its target namespaces
#[async_trait]
pub trait SecretManager: Send + Sync {
    /// Bring every namespace of `spec` in line with the backend.
    ///
    /// Only desired state failures are returned; per namespace failures are
    /// absorbed into logs and metrics.
    async fn sync_state(&self, spec: &SecretDefinitionSpec) -> Result<(), SyncError>;
}

/// Full structural equality: same entry names, same bytes per entry
#[must_use]
pub fn states_equal(desired: &SecretData, current: &SecretData) -> bool {
    desired.len() == current.len()
        && desired
            .iter()
            .all(|(key, value)| current.get(key).is_some_and(|c| c == value))
}

/// [`SecretManager`] reading from a [`BackendClient`] and writing through a [`SecretStore`]
pub struct SecretsManager {
    backend: Arc<dyn BackendClient>,
    store: Arc<dyn SecretStore>,
    codecs: CodecRegistry,
}

impl std::fmt::Debug for SecretsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsManager")
            .field("codecs", &self.codecs)
            .finish_non_exhaustive()
    }
}

impl SecretsManager {
    pub fn new(backend: Arc<dyn BackendClient>, store: Arc<dyn SecretStore>) -> Self {
        Self::with_codecs(backend, store, CodecRegistry::default())
    }

    pub fn with_codecs(
        backend: Arc<dyn BackendClient>,
        store: Arc<dyn SecretStore>,
        codecs: CodecRegistry,
    ) -> Self {
        Self {
            backend,
            store,
            codecs,
        }
    }

    /// Read and decode every data entry. Never cached.
    async fn desired_state(&self, spec: &SecretDefinitionSpec) -> Result<SecretData, SyncError> {
        let mut desired = SecretData::new();
        for (entry, source) in &spec.data {
            let raw = self
                .backend
                .read_secret(&source.path, &source.key)
                .await
                .map_err(|e| {
                    error!(path = %source.path, key = %source.key, error = %e, "unable to read secret from backend");
                    SyncError::BackendRead {
                        path: source.path.clone(),
                        key: source.key.clone(),
                        source: e,
                    }
                })?;

            let value = self.codecs.decode(&source.encoding, &raw).map_err(|e| {
                error!(
                    path = %source.path,
                    key = %source.key,
                    encoding = %source.encoding,
                    error = %e,
                    "unable to decode secret"
                );
                e
            })?;
            desired.insert(entry.clone(), value);
        }
        Ok(desired)
    }

    async fn sync_namespace(
        &self,
        spec: &SecretDefinitionSpec,
        namespace: &str,
        desired: &SecretData,
    ) {
        let current = match self.store.read_secret(namespace, &spec.name).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => {
                debug!("secret does not exist yet");
                SecretData::new()
            }
            Err(e) => {
                error!(error = %e, "unable to get current state of secret");
                metrics::increment_secret_sync_errors(&spec.name, namespace);
                return;
            }
        };

        if states_equal(desired, &current) {
            debug!("secret is up to date");
            return;
        }

        info!("secret must be updated");
        let now = Utc::now();
        let secret = materialize(spec, namespace, desired, now);
        if let Err(e) = self.store.upsert_secret(&secret).await {
            error!(error = %e, "unable to upsert secret");
            metrics::increment_secret_sync_errors(&spec.name, namespace);
            return;
        }
        metrics::set_secret_last_updated(&spec.name, namespace, now.timestamp());
        info!("secret updated");
    }
}

/// Build the object written into `namespace`
fn materialize(
    spec: &SecretDefinitionSpec,
    namespace: &str,
    desired: &SecretData,
    now: DateTime<Utc>,
) -> MaterializedSecret {
    MaterializedSecret {
        name: spec.name.clone(),
        namespace: namespace.to_string(),
        type_: spec.type_.clone(),
        data: desired.clone(),
        labels: BTreeMap::from([
            (LABEL_MANAGED_BY.to_string(), CONTROLLER_NAME.to_string()),
            (
                LABEL_LAST_UPDATE.to_string(),
                now.format(LAST_UPDATE_TIMESTAMP_FORMAT).to_string(),
            ),
        ]),
    }
}

#[async_trait]
impl SecretManager for SecretsManager {
    async fn sync_state(&self, spec: &SecretDefinitionSpec) -> Result<(), SyncError> {
        let desired = match self.desired_state(spec).await {
            Ok(desired) => desired,
            Err(e) => {
                error!(secret = %spec.name, error = %e, "unable to get desired state for secret");
                for namespace in &spec.namespaces {
                    metrics::increment_secret_sync_errors(&spec.name, namespace);
                }
                return Err(e);
            }
        };

        for namespace in &spec.namespaces {
            let span = info_span!("secrets_manager.sync_namespace", namespace = %namespace, name = %spec.name);
            self.sync_namespace(spec, namespace, &desired)
                .instrument(span)
                .await;
        }
        Ok(())
    }
}
