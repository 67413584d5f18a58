//! Common test utilities
//!
//! In-memory stand-ins for the backend, the target store, the definition
//! cache and the synchronizer, plus builders for SecretDefinitions.

#![allow(dead_code, reason = "each test binary uses a different subset of the fakes")]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};

use secrets_manager::backend::{BackendClient, BackendError};
use secrets_manager::controller::cache::DefinitionCache;
use secrets_manager::crd::{DatasourceRef, SecretDefinition, SecretDefinitionSpec};
use secrets_manager::kubernetes::{MaterializedSecret, SecretData, SecretStore, StoreError};
use secrets_manager::secrets_manager::{SecretManager, SyncError};

/// Backend serving values from a map of `(path, key)`
#[derive(Default)]
pub struct FakeBackend {
    values: Mutex<HashMap<(String, String), String>>,
    reads: AtomicUsize,
}

impl FakeBackend {
    pub fn with(entries: &[(&str, &str, &str)]) -> Self {
        let backend = Self::default();
        for (path, key, value) in entries {
            backend.set(path, key, value);
        }
        backend
    }

    pub fn set(&self, path: &str, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert((path.to_string(), key.to_string()), value.to_string());
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendClient for FakeBackend {
    async fn read_secret(&self, path: &str, key: &str) -> Result<String, BackendError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.values
            .lock()
            .unwrap()
            .get(&(path.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| BackendError::KeyNotFound {
                path: path.to_string(),
                key: key.to_string(),
            })
    }
}

/// Write recorded by [`FakeSecretStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreAction {
    Create(MaterializedSecret),
    Update(MaterializedSecret),
}

impl StoreAction {
    pub fn secret(&self) -> &MaterializedSecret {
        match self {
            Self::Create(secret) | Self::Update(secret) => secret,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.secret().namespace
    }
}

/// Target store keeping Secrets in memory and recording every write
#[derive(Default)]
pub struct FakeSecretStore {
    secrets: Mutex<HashMap<(String, String), SecretData>>,
    actions: Mutex<Vec<StoreAction>>,
    fail_reads: Mutex<HashSet<String>>,
    fail_writes: Mutex<HashSet<String>>,
    reads: AtomicUsize,
}

impl FakeSecretStore {
    pub fn insert(&self, namespace: &str, name: &str, data: SecretData) {
        self.secrets
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), data);
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<SecretData> {
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Every read in `namespace` fails with a non not-found error
    pub fn fail_reads_in(&self, namespace: &str) {
        self.fail_reads.lock().unwrap().insert(namespace.to_string());
    }

    /// Every write in `namespace` fails
    pub fn fail_writes_in(&self, namespace: &str) {
        self.fail_writes.lock().unwrap().insert(namespace.to_string());
    }

    pub fn actions(&self) -> Vec<StoreAction> {
        self.actions.lock().unwrap().clone()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for FakeSecretStore {
    async fn read_secret(&self, namespace: &str, name: &str) -> Result<SecretData, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.lock().unwrap().contains(namespace) {
            return Err(StoreError::Read {
                namespace: namespace.to_string(),
                name: name.to_string(),
                source: "injected read failure".into(),
            });
        }
        self.get(namespace, name).ok_or_else(|| StoreError::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    async fn upsert_secret(&self, secret: &MaterializedSecret) -> Result<(), StoreError> {
        if self.fail_writes.lock().unwrap().contains(&secret.namespace) {
            return Err(StoreError::Write {
                namespace: secret.namespace.clone(),
                name: secret.name.clone(),
                source: "injected write failure".into(),
            });
        }
        let key = (secret.namespace.clone(), secret.name.clone());
        let existed = self
            .secrets
            .lock()
            .unwrap()
            .insert(key, secret.data.clone())
            .is_some();
        let action = if existed {
            StoreAction::Update(secret.clone())
        } else {
            StoreAction::Create(secret.clone())
        };
        self.actions.lock().unwrap().push(action);
        Ok(())
    }
}

/// Definition cache backed by a map, synced on demand
pub struct FakeDefinitionCache {
    definitions: Mutex<BTreeMap<String, Arc<SecretDefinition>>>,
    synced: watch::Sender<bool>,
}

impl Default for FakeDefinitionCache {
    fn default() -> Self {
        Self {
            definitions: Mutex::new(BTreeMap::new()),
            synced: watch::channel(false).0,
        }
    }
}

impl FakeDefinitionCache {
    /// Cache that reports itself synced right away
    pub fn synced() -> Self {
        let cache = Self::default();
        cache.mark_synced();
        cache
    }

    pub fn mark_synced(&self) {
        self.synced.send_replace(true);
    }

    pub fn insert(&self, definition: SecretDefinition) {
        self.definitions
            .lock()
            .unwrap()
            .insert(definition.key(), Arc::new(definition));
    }

    pub fn remove(&self, key: &str) {
        self.definitions.lock().unwrap().remove(key);
    }
}

#[async_trait]
impl DefinitionCache for FakeDefinitionCache {
    fn get_definition(&self, namespace: &str, name: &str) -> Option<Arc<SecretDefinition>> {
        let key = if namespace.is_empty() {
            name.to_string()
        } else {
            format!("{namespace}/{name}")
        };
        self.definitions.lock().unwrap().get(&key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.definitions.lock().unwrap().keys().cloned().collect()
    }

    async fn wait_synced(&self) -> Result<(), String> {
        let mut synced = self.synced.subscribe();
        synced
            .wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// Synchronizer recording every call, optionally failing or blocking
#[derive(Default)]
pub struct RecordingSecretManager {
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail: std::sync::atomic::AtomicBool,
    gate: Option<Arc<Notify>>,
    started: Notify,
}

impl RecordingSecretManager {
    pub fn failing() -> Self {
        let manager = Self::default();
        manager.set_failing(true);
        manager
    }

    /// Every call waits on `gate` before returning
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Resolves once a call has started
    pub async fn started(&self) {
        self.started.notified().await;
    }
}

#[async_trait]
impl SecretManager for RecordingSecretManager {
    async fn sync_state(&self, spec: &SecretDefinitionSpec) -> Result<(), SyncError> {
        self.calls.lock().unwrap().push(spec.name.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.started.notify_one();

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            return Err(secrets_manager::codec::CodecError::EncodingNotImplemented(
                "xyz".to_string(),
            )
            .into());
        }
        Ok(())
    }
}

/// `SecretDefinition` `namespace/name` materializing `secret_name`
pub fn definition(
    namespace: &str,
    name: &str,
    secret_name: &str,
    namespaces: &[&str],
    data: &[(&str, &str, &str, &str)],
) -> SecretDefinition {
    let mut def = SecretDefinition::new(name, spec(secret_name, namespaces, data));
    def.metadata.namespace = Some(namespace.to_string());
    def
}

/// Spec with `data` given as `(entry, path, key, encoding)`
pub fn spec(
    secret_name: &str,
    namespaces: &[&str],
    data: &[(&str, &str, &str, &str)],
) -> SecretDefinitionSpec {
    SecretDefinitionSpec {
        name: secret_name.to_string(),
        namespaces: namespaces.iter().map(|ns| (*ns).to_string()).collect(),
        type_: "Opaque".to_string(),
        data: data
            .iter()
            .map(|(entry, path, key, encoding)| {
                (
                    (*entry).to_string(),
                    DatasourceRef {
                        path: (*path).to_string(),
                        key: (*key).to_string(),
                        encoding: (*encoding).to_string(),
                    },
                )
            })
            .collect(),
    }
}

pub fn secret_data(entries: &[(&str, &[u8])]) -> SecretData {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.to_vec()))
        .collect()
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
