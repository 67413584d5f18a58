//! # Definition Cache
//!
//! Read-only local view of the SecretDefinitions known to the cluster,
//! and the watch pipeline that keeps it current and feeds the work queue.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::Api;
use kube_runtime::reflector::{store::Writer, ObjectRef, Store};
use kube_runtime::{watcher, WatchStreamExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::queue::WorkQueue;
use crate::crd::SecretDefinition;

/// Local cache of SecretDefinitions consulted by the reconciler
#[async_trait]
pub trait DefinitionCache: Send + Sync {
    /// Cached definition `namespace/name`, `None` if unknown (deleted)
    fn get_definition(&self, namespace: &str, name: &str) -> Option<Arc<SecretDefinition>>;

    /// Reconciliation keys of every cached definition
    fn keys(&self) -> Vec<String>;

    /// Resolve once the initial listing is complete.
    ///
    /// Errors when the cache can never become ready.
    async fn wait_synced(&self) -> Result<(), String>;
}

#[async_trait]
impl DefinitionCache for Store<SecretDefinition> {
    fn get_definition(&self, namespace: &str, name: &str) -> Option<Arc<SecretDefinition>> {
        let reference = if namespace.is_empty() {
            ObjectRef::new(name)
        } else {
            ObjectRef::new(name).within(namespace)
        };
        self.get(&reference)
    }

    fn keys(&self) -> Vec<String> {
        self.state().iter().map(|def| def.key()).collect()
    }

    async fn wait_synced(&self) -> Result<(), String> {
        self.wait_until_ready().await.map_err(|e| e.to_string())
    }
}

/// Watch SecretDefinitions, keep `writer`'s store current and enqueue the
/// key of every created, updated or deleted object.
///
/// Runs until the watch stream ends or `shutdown` flips to `true`.
pub async fn watch_definitions(
    api: Api<SecretDefinition>,
    writer: Writer<SecretDefinition>,
    queue: Arc<WorkQueue>,
    mut shutdown: watch::Receiver<bool>,
) {
    let stream = watcher(api, watcher::Config::default().any_semantic())
        .default_backoff()
        .reflect(writer)
        .touched_objects();
    futures::pin_mut!(stream);

    info!("watching SecretDefinitions");
    loop {
        tokio::select! {
            item = stream.next() => match item {
                Some(Ok(definition)) => {
                    let key = definition.key();
                    debug!(key = %key, "SecretDefinition changed");
                    queue.add(key);
                }
                Some(Err(e)) => {
                    warn!(error = %e, "SecretDefinition watch error, retrying with backoff");
                }
                None => {
                    warn!("SecretDefinition watch stream ended");
                    return;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("SecretDefinition watch stopped");
                    return;
                }
            }
        }
    }
}
