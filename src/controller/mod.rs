//! # Controller
//!
//! Queue-based, level-triggered controller for `SecretDefinition` resources.
//!
//! - `backoff`: per-key Fibonacci backoff used to rate limit retries
//! - `cache`: local cache contract and the watch pipeline feeding it
//! - `queue`: deduplicating, rate-limited work queue
//! - `reconciler`: handles one key taken from the queue
//!
//! Change notifications and periodic resyncs only ever enqueue keys. Workers
//! take keys from the shared queue, reconcile them and decide between
//! forgetting the key (success), requeuing it with backoff (failure) or
//! dropping it once its retry budget is spent.

pub mod backoff;
pub mod cache;
pub mod queue;
pub mod reconciler;

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use self::cache::DefinitionCache;
use self::queue::WorkQueue;
use crate::config::ControllerConfig;
use crate::crd::SecretDefinition;
use crate::observability::metrics;
use crate::secrets_manager::SecretManager;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("timed out waiting for caches to sync: {0}")]
    CacheSync(String),
}

/// Resolves once `shutdown` is `true` or its sender is gone
pub(crate) async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// SecretDefinition controller
pub struct Controller {
    queue: Arc<WorkQueue>,
    cache: Arc<dyn DefinitionCache>,
    manager: Arc<dyn SecretManager>,
    max_retries: u32,
    resync_period: Option<Duration>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("queue", &self.queue)
            .field("max_retries", &self.max_retries)
            .field("resync_period", &self.resync_period)
            .finish_non_exhaustive()
    }
}

impl Controller {
    #[must_use]
    pub fn new(
        cache: Arc<dyn DefinitionCache>,
        manager: Arc<dyn SecretManager>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            queue: Arc::new(WorkQueue::new(
                config.backoff_start_duration(),
                config.backoff_max_duration(),
            )),
            cache,
            manager,
            max_retries: config.max_retries,
            resync_period: config.resync_period(),
        }
    }

    /// Queue handle, shared with the watch pipeline
    #[must_use]
    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    pub fn enqueue(&self, key: impl Into<String>) {
        self.queue.add(key);
    }

    pub fn enqueue_definition(&self, definition: &SecretDefinition) {
        self.queue.add(definition.key());
    }

    /// Wait for the cache, run `workers` workers until `shutdown` fires and
    /// return once all of them have exited.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::CacheSync`] if the cache never completes its
    /// initial listing, including when shutdown arrives first.
    pub async fn run(
        &self,
        workers: usize,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ControllerError> {
        info!("starting SecretDefinition controller");
        info!("waiting for caches to sync");
        tokio::select! {
            synced = self.cache.wait_synced() => synced.map_err(ControllerError::CacheSync)?,
            () = shutdown_signalled(&mut shutdown) => {
                self.queue.shut_down();
                return Err(ControllerError::CacheSync(
                    "shutdown requested before caches synced".to_string(),
                ));
            }
        }

        let workers = if workers == 0 {
            warn!("worker count is 0, starting a single worker");
            1
        } else {
            workers
        };
        info!(workers, "caches synced, starting workers");

        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|id| {
                let worker = Worker {
                    queue: Arc::clone(&self.queue),
                    cache: Arc::clone(&self.cache),
                    manager: Arc::clone(&self.manager),
                    max_retries: self.max_retries,
                };
                tokio::spawn(worker.run().instrument(info_span!("controller.worker", worker = id)))
            })
            .collect();

        let resync = self.resync_period.map(|period| {
            tokio::spawn(resync_loop(
                Arc::clone(&self.cache),
                Arc::clone(&self.queue),
                period,
                shutdown.clone(),
            ))
        });

        shutdown_signalled(&mut shutdown).await;
        info!("shutting down workers");
        self.queue.shut_down();

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task failed");
            }
        }
        if let Some(resync) = resync {
            if let Err(e) = resync.await {
                error!(error = %e, "resync task failed");
            }
        }
        info!("controller stopped");
        Ok(())
    }
}

struct Worker {
    queue: Arc<WorkQueue>,
    cache: Arc<dyn DefinitionCache>,
    manager: Arc<dyn SecretManager>,
    max_retries: u32,
}

impl Worker {
    async fn run(self) {
        while let Some(key) = self.queue.get().await {
            let span = info_span!("controller.reconcile", key = %key);
            self.process(&key).instrument(span).await;
            self.queue.done(&key);
        }
        debug!("worker stopped");
    }

    async fn process(&self, key: &str) {
        let start = Instant::now();
        metrics::increment_reconciliations();

        let result =
            reconciler::sync_handler(key, self.cache.as_ref(), self.manager.as_ref()).await;
        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                self.queue.forget(key);
                debug!("reconciled");
            }
            Err(e) => {
                metrics::increment_reconciliation_errors();
                let retries = self.queue.num_requeues(key);
                if retries < self.max_retries {
                    warn!(error = %e, retries, "error syncing SecretDefinition, requeuing");
                    self.queue.add_rate_limited(key);
                } else {
                    self.queue.forget(key);
                    metrics::increment_reconciliation_dropped();
                    error!(
                        error = %e,
                        retries,
                        "dropping SecretDefinition out of the queue after too many retries"
                    );
                }
            }
        }
    }
}

/// Enqueue every cached key each `period` until shutdown
async fn resync_loop(
    cache: Arc<dyn DefinitionCache>,
    queue: Arc<WorkQueue>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let keys = cache.keys();
                debug!(count = keys.len(), "resyncing SecretDefinitions");
                for key in keys {
                    queue.add(key);
                }
            }
            () = shutdown_signalled(&mut shutdown) => return,
        }
    }
}
