//! # Kubernetes Target Store
//!
//! Read and write access to the Secrets this controller materializes.
//!
//! The synchronizer talks to the [`SecretStore`] trait only, so a missing
//! Secret has to be distinguishable from any other read failure:
//! [`StoreError::NotFound`] means "nothing materialized yet" and is not an
//! error for the caller.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, PostParams};
use kube::Client;
use thiserror::Error;
use tracing::{debug, info};

use crate::constants::CONTROLLER_NAME;

/// Secret contents keyed by data entry name
pub type SecretData = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("secret '{namespace}/{name}' not found")]
    NotFound { namespace: String, name: String },

    #[error("unable to read secret '{namespace}/{name}': {source}")]
    Read {
        namespace: String,
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("unable to write secret '{namespace}/{name}': {source}")]
    Write {
        namespace: String,
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// A Secret as written by the synchronizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedSecret {
    pub name: String,
    pub namespace: String,
    /// Kubernetes Secret type, empty lets the API server default to `Opaque`
    pub type_: String,
    pub data: SecretData,
    pub labels: BTreeMap<String, String>,
}

impl MaterializedSecret {
    /// Convert into the Kubernetes object
    #[must_use]
    pub fn to_secret(&self) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(self.labels.clone()),
                ..ObjectMeta::default()
            },
            type_: (!self.type_.is_empty()).then(|| self.type_.clone()),
            data: Some(
                self.data
                    .iter()
                    .map(|(k, v)| (k.clone(), ByteString(v.clone())))
                    .collect(),
            ),
            ..Secret::default()
        }
    }
}

/// Access to materialized Secrets
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Data of the Secret `namespace/name`.
    ///
    /// Returns [`StoreError::NotFound`] when the Secret does not exist.
    async fn read_secret(&self, namespace: &str, name: &str) -> Result<SecretData, StoreError>;

    /// Create the Secret, or replace its type, data and labels if it exists
    async fn upsert_secret(&self, secret: &MaterializedSecret) -> Result<(), StoreError>;
}

/// [`SecretStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl std::fmt::Debug for KubeSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretStore").finish_non_exhaustive()
    }
}

impl KubeSecretStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(CONTROLLER_NAME.to_string()),
        ..PostParams::default()
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn read_secret(&self, namespace: &str, name: &str) -> Result<SecretData, StoreError> {
        let secret = self
            .secrets(namespace)
            .get_opt(name)
            .await
            .map_err(|e| StoreError::Read {
                namespace: namespace.to_string(),
                name: name.to_string(),
                source: Box::new(e),
            })?
            .ok_or_else(|| StoreError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;

        Ok(secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect())
    }

    async fn upsert_secret(&self, secret: &MaterializedSecret) -> Result<(), StoreError> {
        let api = self.secrets(&secret.namespace);
        let write_err = |e: kube::Error| StoreError::Write {
            namespace: secret.namespace.clone(),
            name: secret.name.clone(),
            source: Box::new(e),
        };

        let existing = api.get_opt(&secret.name).await.map_err(write_err)?;
        let mut desired = secret.to_secret();

        match existing {
            None => {
                api.create(&post_params(), &desired)
                    .await
                    .map_err(write_err)?;
                info!(
                    namespace = %secret.namespace,
                    name = %secret.name,
                    "created secret"
                );
            }
            Some(current) => {
                let mut labels = current.metadata.labels.clone().unwrap_or_default();
                labels.extend(secret.labels.clone());
                desired.metadata = ObjectMeta {
                    labels: Some(labels),
                    ..current.metadata
                };
                debug!(
                    namespace = %secret.namespace,
                    name = %secret.name,
                    resource_version = ?desired.metadata.resource_version,
                    "replacing secret"
                );
                api.replace(&secret.name, &post_params(), &desired)
                    .await
                    .map_err(write_err)?;
                info!(
                    namespace = %secret.namespace,
                    name = %secret.name,
                    "updated secret"
                );
            }
        }
        Ok(())
    }
}
