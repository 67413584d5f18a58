//! # Reconciler
//!
//! Handles one reconciliation key taken from the work queue.
//!
//! ## Reconciliation Flow
//!
//! 1. Split the key into namespace and name
//! 2. Look the SecretDefinition up in the local cache
//! 3. Gone from the cache: nothing to do. Deleting a definition never
//!    deletes the Secrets it created.
//! 4. Otherwise hand its spec to the [`SecretManager`]

use thiserror::Error;
use tracing::{debug, info};

use super::cache::DefinitionCache;
use crate::secrets_manager::{SecretManager, SyncError};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid resource key: {0}")]
    InvalidKey(String),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Split `namespace/name` (or a bare `name`) into its parts
///
/// # Errors
///
/// Returns [`ReconcileError::InvalidKey`] if the key has more than one `/`
/// or an empty part.
pub fn split_key(key: &str) -> Result<(&str, &str), ReconcileError> {
    let mut parts = key.split('/');
    let split = match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) => ("", name),
        (Some(namespace), Some(name), None) if !namespace.is_empty() => (namespace, name),
        _ => return Err(ReconcileError::InvalidKey(key.to_string())),
    };
    if split.1.is_empty() {
        return Err(ReconcileError::InvalidKey(key.to_string()));
    }
    Ok(split)
}

/// Reconcile the SecretDefinition identified by `key`
///
/// # Errors
///
/// Returns an error for a malformed key, or when the desired state of the
/// definition could not be computed. Both are retried by the controller.
pub async fn sync_handler(
    key: &str,
    cache: &dyn DefinitionCache,
    manager: &dyn SecretManager,
) -> Result<(), ReconcileError> {
    let (namespace, name) = split_key(key)?;

    let Some(definition) = cache.get_definition(namespace, name) else {
        info!(key, "SecretDefinition no longer exists, nothing to do");
        return Ok(());
    };

    debug!(
        key,
        secret = %definition.spec.name,
        namespaces = ?definition.spec.namespaces,
        "syncing SecretDefinition"
    );
    manager.sync_state(&definition.spec).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecError;
    use crate::crd::{SecretDefinition, SecretDefinitionSpec};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    struct OneDefinition(Option<Arc<SecretDefinition>>);

    #[async_trait]
    impl DefinitionCache for OneDefinition {
        fn get_definition(&self, namespace: &str, name: &str) -> Option<Arc<SecretDefinition>> {
            self.0
                .as_ref()
                .filter(|d| {
                    d.metadata.namespace.as_deref().unwrap_or_default() == namespace
                        && d.metadata.name.as_deref() == Some(name)
                })
                .cloned()
        }

        fn keys(&self) -> Vec<String> {
            self.0.iter().map(|d| d.key()).collect()
        }

        async fn wait_synced(&self) -> Result<(), String> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recording {
        synced: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl SecretManager for Recording {
        async fn sync_state(&self, spec: &SecretDefinitionSpec) -> Result<(), SyncError> {
            self.synced.lock().unwrap().push(spec.name.clone());
            if self.fail {
                return Err(CodecError::EncodingNotImplemented("xyz".to_string()).into());
            }
            Ok(())
        }
    }

    fn definition() -> Arc<SecretDefinition> {
        let mut def = SecretDefinition::new(
            "db-credentials",
            SecretDefinitionSpec {
                name: "db".to_string(),
                namespaces: vec!["default".to_string()],
                type_: "Opaque".to_string(),
                data: BTreeMap::new(),
            },
        );
        def.metadata.namespace = Some("ops".to_string());
        Arc::new(def)
    }

    #[test]
    fn test_split_key() {
        assert_eq!(split_key("ops/db").unwrap(), ("ops", "db"));
        assert_eq!(split_key("db").unwrap(), ("", "db"));
    }

    #[test]
    fn test_split_key_rejects_malformed() {
        for key in ["", "a/b/c", "/db", "ops/", "/"] {
            assert!(
                matches!(split_key(key), Err(ReconcileError::InvalidKey(_))),
                "{key:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_missing_definition_is_noop() {
        let cache = OneDefinition(None);
        let manager = Recording::default();
        sync_handler("ops/db-credentials", &cache, &manager)
            .await
            .unwrap();
        assert!(manager.synced.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_existing_definition_is_synced() {
        let cache = OneDefinition(Some(definition()));
        let manager = Recording::default();
        sync_handler("ops/db-credentials", &cache, &manager)
            .await
            .unwrap();
        assert_eq!(*manager.synced.lock().unwrap(), vec!["db".to_string()]);
    }

    #[tokio::test]
    async fn test_sync_error_propagates() {
        let cache = OneDefinition(Some(definition()));
        let manager = Recording {
            fail: true,
            ..Default::default()
        };
        let err = sync_handler("ops/db-credentials", &cache, &manager)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Sync(SyncError::Codec(CodecError::EncodingNotImplemented(_)))
        ));
    }

    #[tokio::test]
    async fn test_invalid_key_does_not_reach_cache() {
        let cache = OneDefinition(Some(definition()));
        let manager = Recording::default();
        let err = sync_handler("a/b/c", &cache, &manager).await.unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidKey(_)));
        assert!(manager.synced.lock().unwrap().is_empty());
    }
}
