//! Listener dispatch controller
//!
//! Cloud load-balancer APIs reject concurrent mutations of the same load
//! balancer, so Listener reconciliations are serialized per load balancer:
//! one worker task per load-balancer id, fed through an unbounded channel.
//! Workers are spawned lazily on first dispatch and live for the process
//! lifetime; the set of load balancers is small and stable, so they are
//! never evicted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::crd::Listener;
use crate::error::Error;
use crate::metrics::{ControllerKind, Metrics};
use crate::{Result, LB_ID_LABEL};

use super::ERROR_REQUEUE;

/// Syncs one Listener to the cloud, invoked from a worker task
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ListenerSyncHandler: Send + Sync {
    /// Bring the cloud frontend in line with the Listener
    async fn sync(&self, listener: ObjectRef<Listener>) -> Result<()>;
}

/// Handler that only logs, used until a cloud backend is wired in
pub struct LogOnlySyncHandler;

#[async_trait]
impl ListenerSyncHandler for LogOnlySyncHandler {
    async fn sync(&self, listener: ObjectRef<Listener>) -> Result<()> {
        info!(
            listener = %format!(
                "{}/{}",
                listener.namespace.as_deref().unwrap_or_default(),
                listener.name
            ),
            "syncing listener"
        );
        Ok(())
    }
}

struct LbWorker {
    tx: mpsc::UnboundedSender<ObjectRef<Listener>>,
}

/// Per-load-balancer worker pool
pub struct ListenerWorkers {
    workers: DashMap<String, LbWorker>,
    handler: Arc<dyn ListenerSyncHandler>,
    metrics: Arc<Metrics>,
}

impl ListenerWorkers {
    /// Create an empty pool dispatching to the given handler
    pub fn new(handler: Arc<dyn ListenerSyncHandler>, metrics: Arc<Metrics>) -> Self {
        Self {
            workers: DashMap::new(),
            handler,
            metrics,
        }
    }

    /// Enqueue a Listener on its load balancer's worker, spawning the
    /// worker on first use
    pub fn dispatch(&self, lb_id: &str, listener: ObjectRef<Listener>) -> Result<()> {
        let sent = self
            .workers
            .entry(lb_id.to_string())
            .or_insert_with(|| spawn_worker(lb_id, self.handler.clone()))
            .tx
            .send(listener);
        self.metrics.set_lb_workers(self.workers.len() as u64);

        sent.map_err(|_| {
            Error::internal_with_context(
                "worker",
                format!("worker channel for load balancer {lb_id} is closed"),
            )
        })
    }

    /// Number of live workers
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

fn spawn_worker(lb_id: &str, handler: Arc<dyn ListenerSyncHandler>) -> LbWorker {
    let (tx, mut rx) = mpsc::unbounded_channel::<ObjectRef<Listener>>();
    let lb = lb_id.to_string();
    tokio::spawn(async move {
        info!(load_balancer = %lb, "listener worker started");
        while let Some(listener) = rx.recv().await {
            let key = format!(
                "{}/{}",
                listener.namespace.as_deref().unwrap_or_default(),
                listener.name
            );
            if let Err(e) = handler.sync(listener).await {
                warn!(
                    load_balancer = %lb,
                    listener = %key,
                    error = %e,
                    "listener sync failed"
                );
            }
        }
        info!(load_balancer = %lb, "listener worker stopped");
    });
    LbWorker { tx }
}

/// Load-balancer id of a Listener: the spec field, falling back to the
/// id label for listeners produced by older translations
pub fn load_balancer_id(listener: &Listener) -> Option<String> {
    listener
        .spec
        .load_balancer_id
        .clone()
        .or_else(|| listener.labels().get(LB_ID_LABEL).cloned())
}

/// Shared state for Listener dispatch
pub struct Context {
    workers: Arc<ListenerWorkers>,
    metrics: Arc<Metrics>,
    /// Periodic resync interval; `None` reconciles on change only
    resync: Option<Duration>,
}

impl Context {
    /// Create a dispatch context
    pub fn new(
        workers: Arc<ListenerWorkers>,
        metrics: Arc<Metrics>,
        resync: Option<Duration>,
    ) -> Self {
        Self {
            workers,
            metrics,
            resync,
        }
    }
}

/// Reconcile one Listener by handing it to its load balancer's worker
#[instrument(skip(listener, ctx), fields(
    namespace = %listener.namespace().unwrap_or_default(),
    name = %listener.name_any(),
))]
pub async fn reconcile(listener: Arc<Listener>, ctx: Arc<Context>) -> Result<Action> {
    let timer = ctx.metrics.reconcile_timer(ControllerKind::Listener);

    let Some(lb_id) = load_balancer_id(&listener) else {
        warn!("listener has no load balancer id, skipping");
        timer.success();
        return Ok(Action::await_change());
    };

    match ctx
        .workers
        .dispatch(&lb_id, ObjectRef::from_obj(listener.as_ref()))
    {
        Ok(()) => {
            timer.success();
            Ok(match ctx.resync {
                Some(interval) => Action::requeue(interval),
                None => Action::await_change(),
            })
        }
        Err(e) => {
            timer.error();
            Err(e)
        }
    }
}

/// Requeue policy after a dispatch error
pub fn error_policy(listener: Arc<Listener>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(
        listener = %format!(
            "{}/{}",
            listener.namespace().unwrap_or_default(),
            listener.name_any()
        ),
        error = %error,
        "listener dispatch failed"
    );
    Action::requeue(ERROR_REQUEUE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ListenerSpec, Protocol};
    use opentelemetry::global;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    struct RecordingHandler {
        seen: Mutex<Vec<String>>,
        notify: Notify,
    }

    impl RecordingHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                notify: Notify::new(),
            })
        }
    }

    #[async_trait]
    impl ListenerSyncHandler for RecordingHandler {
        async fn sync(&self, listener: ObjectRef<Listener>) -> Result<()> {
            self.seen.lock().unwrap().push(listener.name);
            self.notify.notify_one();
            Ok(())
        }
    }

    fn metrics() -> Arc<Metrics> {
        Arc::new(Metrics::new(&global::meter("portgate-test")))
    }

    fn listener(name: &str, lb: Option<&str>, label: Option<&str>) -> Listener {
        let mut l = Listener::new(
            name,
            ListenerSpec {
                load_balancer_id: lb.map(str::to_string),
                port: 443,
                protocol: Protocol::Https,
                uptime_check: None,
            },
        );
        l.metadata.namespace = Some("prod".to_string());
        if let Some(label) = label {
            l.metadata.labels = Some(BTreeMap::from([(
                LB_ID_LABEL.to_string(),
                label.to_string(),
            )]));
        }
        l
    }

    #[test]
    fn lb_id_prefers_spec_over_label() {
        assert_eq!(
            load_balancer_id(&listener("a", Some("lb-spec"), Some("lb-label"))),
            Some("lb-spec".to_string())
        );
        assert_eq!(
            load_balancer_id(&listener("a", None, Some("lb-label"))),
            Some("lb-label".to_string())
        );
        assert_eq!(load_balancer_id(&listener("a", None, None)), None);
    }

    #[tokio::test]
    async fn one_worker_per_load_balancer() {
        let handler = RecordingHandler::new();
        let workers = Arc::new(ListenerWorkers::new(handler.clone(), metrics()));

        workers
            .dispatch("lb-1", ObjectRef::<Listener>::new("a").within("prod"))
            .unwrap();
        workers
            .dispatch("lb-1", ObjectRef::<Listener>::new("b").within("prod"))
            .unwrap();
        workers
            .dispatch("lb-2", ObjectRef::<Listener>::new("c").within("prod"))
            .unwrap();

        assert_eq!(workers.worker_count(), 2);

        for _ in 0..3 {
            handler.notify.notified().await;
        }
        let mut seen = handler.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn reconcile_dispatches_and_requeues_on_resync() {
        let handler = RecordingHandler::new();
        let workers = Arc::new(ListenerWorkers::new(handler.clone(), metrics()));
        let ctx = Arc::new(Context::new(
            workers.clone(),
            metrics(),
            Some(Duration::from_secs(300)),
        ));

        let action = reconcile(Arc::new(listener("web-443", Some("lb-1"), None)), ctx)
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(300)));
        assert_eq!(workers.worker_count(), 1);

        handler.notify.notified().await;
        assert_eq!(handler.seen.lock().unwrap().as_slice(), ["web-443"]);
    }

    #[tokio::test]
    async fn reconcile_without_lb_id_skips_dispatch() {
        let handler = RecordingHandler::new();
        let workers = Arc::new(ListenerWorkers::new(handler, metrics()));
        let ctx = Arc::new(Context::new(workers.clone(), metrics(), None));

        let action = reconcile(Arc::new(listener("web-443", None, None)), ctx)
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(workers.worker_count(), 0);
    }

    #[tokio::test]
    async fn failing_handler_does_not_kill_the_worker() {
        struct FailingHandler {
            notify: Notify,
        }

        #[async_trait]
        impl ListenerSyncHandler for FailingHandler {
            async fn sync(&self, listener: ObjectRef<Listener>) -> Result<()> {
                self.notify.notify_one();
                Err(Error::uptime_for(listener.name, "boom"))
            }
        }

        let handler = Arc::new(FailingHandler {
            notify: Notify::new(),
        });
        let workers = Arc::new(ListenerWorkers::new(handler.clone(), metrics()));

        workers
            .dispatch("lb-1", ObjectRef::<Listener>::new("a").within("prod"))
            .unwrap();
        handler.notify.notified().await;

        // a second dispatch on the same worker still succeeds
        workers
            .dispatch("lb-1", ObjectRef::<Listener>::new("b").within("prod"))
            .unwrap();
        handler.notify.notified().await;
        assert_eq!(workers.worker_count(), 1);
    }
}
