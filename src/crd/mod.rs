//! # Custom Resource Definitions
//!
//! CRD types for the secrets manager.
//!
//! A `SecretDefinition` describes one Kubernetes Secret: its name, its type,
//! the namespaces it is materialized into and, for every data entry, where
//! in the backend the value lives.
//!
//! ```yaml
//! apiVersion: secrets-manager.tuenti.io/v1alpha1
//! kind: SecretDefinition
//! metadata:
//!   name: db-credentials
//!   namespace: default
//! spec:
//!   name: db-credentials
//!   type: Opaque
//!   namespaces: [default, payments]
//!   data:
//!     password:
//!       path: secret/databases/main
//!       key: password
//!     tls.crt:
//!       path: secret/databases/main
//!       key: cert
//!       encoding: base64
//! ```

use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group of the SecretDefinition resource
pub const GROUP: &str = "secrets-manager.tuenti.io";

/// API version of the SecretDefinition resource
pub const VERSION: &str = "v1alpha1";

/// SecretDefinition Custom Resource Definition
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "secrets-manager.tuenti.io",
    version = "v1alpha1",
    kind = "SecretDefinition",
    namespaced,
    status = "SecretDefinitionStatus",
    shortname = "sd",
    printcolumn = r#"{"name":"Secret", "type":"string", "jsonPath":".spec.name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SecretDefinitionSpec {
    /// Name of the Secret created in every target namespace
    pub name: String,
    /// Namespaces the Secret is materialized into
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// Kubernetes Secret type ("Opaque", "kubernetes.io/tls", ...)
    #[serde(default, rename = "type")]
    pub type_: String,
    /// Secret data entry name -> backend location of its value
    #[serde(default)]
    pub data: BTreeMap<String, DatasourceRef>,
}

/// Reference to a value in the secret backend
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceRef {
    /// Path of the secret in the backend
    pub path: String,
    /// Key inside the backend secret
    pub key: String,
    /// Encoding of the stored value; empty means the raw string is used
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub encoding: String,
}

/// Status of a SecretDefinition.
///
/// Not written back by the controller yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretDefinitionStatus {
    #[serde(default)]
    pub synced: bool,
}

impl SecretDefinition {
    /// Reconciliation key in `namespace/name` form.
    ///
    /// Cluster-scoped objects (no namespace) yield the bare name.
    #[must_use]
    pub fn key(&self) -> String {
        match self.namespace() {
            Some(ns) if !ns.is_empty() => format!("{ns}/{}", self.name_any()),
            _ => self.name_any(),
        }
    }
}
