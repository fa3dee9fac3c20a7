//! Deferred Listener deletion queue
//!
//! Ingress translation can briefly produce a Listener and then drop it
//! again while an edit settles. Deleting immediately would churn the cloud
//! API, so deletions are parked here and flushed on a short interval. A
//! Listener that re-enters the desired state before the sweep simply gets
//! reconciled again; the sweep skips Listeners already being deleted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::{Api, Client, Resource, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::crd::Listener;
use crate::metrics::Metrics;
use crate::Result;

/// Default flush interval
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3);

/// Deletes Listener resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ListenerDeleter: Send + Sync {
    /// Delete a Listener; deleting an already absent one must succeed
    async fn delete_listener(&self, namespace: &str, name: &str) -> Result<()>;
}

/// [`ListenerDeleter`] implementation against the real API server
pub struct KubeListenerDeleter {
    client: Client,
}

impl KubeListenerDeleter {
    /// Wrap a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ListenerDeleter for KubeListenerDeleter {
    async fn delete_listener(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Listener> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Queue of Listeners pending deletion, flushed periodically
pub struct DeletionQueue {
    pending: Mutex<HashMap<String, Listener>>,
    deleter: Arc<dyn ListenerDeleter>,
    metrics: Arc<Metrics>,
    interval: Duration,
}

impl DeletionQueue {
    /// Create a queue flushing on the given interval
    pub fn new(
        deleter: Arc<dyn ListenerDeleter>,
        metrics: Arc<Metrics>,
        interval: Duration,
    ) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            deleter,
            metrics,
            interval,
        }
    }

    /// Park a Listener for deletion at the next sweep. Re-marking the same
    /// Listener replaces the parked revision.
    pub async fn mark(&self, listener: Listener) {
        let key = format!(
            "{}/{}",
            listener.namespace().unwrap_or_default(),
            listener.name_any()
        );
        debug!(listener = %key, "listener marked for deferred deletion");
        self.pending.lock().await.insert(key, listener);
    }

    /// Number of parked Listeners
    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Whether the queue is empty
    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    /// Flush all parked Listeners, returning how many deletions were
    /// attempted. Failures are logged and dropped; the Listener controller
    /// re-marks anything that still needs to go.
    pub async fn sweep(&self) -> usize {
        let batch = {
            let mut pending = self.pending.lock().await;
            std::mem::take(&mut *pending)
        };
        if batch.is_empty() {
            return 0;
        }

        let mut attempted = 0;
        for (key, listener) in batch {
            if listener.meta().deletion_timestamp.is_some() {
                debug!(listener = %key, "already being deleted, skipping");
                continue;
            }
            attempted += 1;
            let namespace = listener.namespace().unwrap_or_default();
            let name = listener.name_any();
            match self.deleter.delete_listener(&namespace, &name).await {
                Ok(()) => {
                    self.metrics.record_deferred_deletion(true);
                    info!(listener = %key, "deferred listener deleted");
                }
                Err(e) => {
                    self.metrics.record_deferred_deletion(false);
                    warn!(listener = %key, error = %e, "deferred deletion failed");
                }
            }
        }
        attempted
    }

    /// Sweep on a ticker until shutdown, with one final sweep on the way
    /// out so nothing parked is lost.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        info!(interval_secs = self.interval.as_secs(), "deletion queue started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        self.sweep().await;
                        info!("deletion queue stopped");
                        return;
                    }
                }
            }
        }
    }
}
