//! Primary Ingress controller
//!
//! Owns the Ingress lifecycle: finalizer management, dependency-cache
//! indexing and handing the resource to the [`IngressProcessor`] that
//! programs the cloud load balancer.
//!
//! Cache maintenance brackets every update: the previously applied
//! revision's references are removed before the new revision's are added,
//! so references dropped from the spec do not linger in the index. The
//! previous revision is remembered per Ingress in `last_applied`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::runtime::reflector::ObjectRef;
use kube::{Api, Client, Resource, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::cache::DependencyCache;
use crate::crd::Ingress;
use crate::error::Error;
use crate::events::{actions, reasons, EventPublisher, NoopEventPublisher};
use crate::metrics::{ControllerKind, Metrics};
use crate::{Result, FIELD_MANAGER, INGRESS_FINALIZER};

use super::ERROR_REQUEUE;

/// Programs the cloud load balancer from Ingress specs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IngressProcessor: Send + Sync {
    /// Apply the desired state declared by an Ingress
    async fn process_update_ingress(&self, ingress: &Ingress) -> Result<()>;

    /// Tear down everything created for an Ingress
    async fn process_delete_ingress(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Kubernetes API operations the controller needs on Ingress resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IngressApi: Send + Sync {
    /// Fetch an Ingress; `Ok(None)` when it no longer exists
    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>>;

    /// Add the cleanup finalizer if absent
    async fn add_finalizer(&self, namespace: &str, name: &str) -> Result<()>;

    /// Remove the cleanup finalizer if present
    async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Processor that only logs, used until a cloud backend is wired in
pub struct LogOnlyProcessor;

#[async_trait]
impl IngressProcessor for LogOnlyProcessor {
    async fn process_update_ingress(&self, ingress: &Ingress) -> Result<()> {
        info!(
            ingress = %format!(
                "{}/{}",
                ingress.namespace().unwrap_or_default(),
                ingress.name_any()
            ),
            load_balancer = ?ingress.spec.load_balancer_id,
            rules = ingress.spec.rules.len(),
            port_mappings = ingress.spec.port_mappings.len(),
            "processing ingress update"
        );
        Ok(())
    }

    async fn process_delete_ingress(&self, namespace: &str, name: &str) -> Result<()> {
        info!(
            ingress = %format!("{}/{}", namespace, name),
            "processing ingress deletion"
        );
        Ok(())
    }
}

/// [`IngressApi`] implementation against the real API server
pub struct KubeIngressApi {
    client: Client,
}

impl KubeIngressApi {
    /// Wrap a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Ingress> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn patch_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<()> {
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        self.api(namespace)
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl IngressApi for KubeIngressApi {
    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>> {
        match self.api(namespace).get(name).await {
            Ok(ingress) => Ok(Some(ingress)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn add_finalizer(&self, namespace: &str, name: &str) -> Result<()> {
        let Some(ingress) = self.get_ingress(namespace, name).await? else {
            return Ok(());
        };
        let mut finalizers = ingress.finalizers().to_vec();
        if finalizers.iter().any(|f| f == INGRESS_FINALIZER) {
            return Ok(());
        }
        finalizers.push(INGRESS_FINALIZER.to_string());
        self.patch_finalizers(namespace, name, finalizers).await
    }

    async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<()> {
        let Some(ingress) = self.get_ingress(namespace, name).await? else {
            return Ok(());
        };
        let finalizers: Vec<String> = ingress
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != INGRESS_FINALIZER)
            .cloned()
            .collect();
        if finalizers.len() == ingress.finalizers().len() {
            return Ok(());
        }
        self.patch_finalizers(namespace, name, finalizers).await
    }
}

/// Shared state for Ingress reconciliation
pub struct Context {
    api: Arc<dyn IngressApi>,
    processor: Arc<dyn IngressProcessor>,
    cache: Arc<DependencyCache>,
    events: Arc<dyn EventPublisher>,
    metrics: Arc<Metrics>,
    /// Last revision whose references were indexed, per "ns/name"
    last_applied: DashMap<String, Arc<Ingress>>,
}

impl Context {
    /// Start building a context
    pub fn builder(
        api: Arc<dyn IngressApi>,
        processor: Arc<dyn IngressProcessor>,
        cache: Arc<DependencyCache>,
        metrics: Arc<Metrics>,
    ) -> ContextBuilder {
        ContextBuilder {
            api,
            processor,
            cache,
            metrics,
            events: None,
        }
    }

    /// Warm the dependency cache from a full listing before the controller
    /// starts, so dependent-resource events arriving early still map to
    /// their Ingresses.
    pub fn prime(&self, ingresses: &[Ingress]) {
        for ingress in ingresses {
            let key = format!(
                "{}/{}",
                ingress.namespace().unwrap_or_default(),
                ingress.name_any()
            );
            self.cache.add(ingress);
            self.last_applied.insert(key, Arc::new(ingress.clone()));
        }
        info!(count = ingresses.len(), "dependency cache primed");
    }

    /// Shared dependency cache
    pub fn cache(&self) -> &Arc<DependencyCache> {
        &self.cache
    }
}

/// Builder for [`Context`]
pub struct ContextBuilder {
    api: Arc<dyn IngressApi>,
    processor: Arc<dyn IngressProcessor>,
    cache: Arc<DependencyCache>,
    metrics: Arc<Metrics>,
    events: Option<Arc<dyn EventPublisher>>,
}

impl ContextBuilder {
    /// Use this event publisher instead of the no-op default
    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Finish building
    pub fn build(self) -> Context {
        Context {
            api: self.api,
            processor: self.processor,
            cache: self.cache,
            metrics: self.metrics,
            events: self
                .events
                .unwrap_or_else(|| Arc::new(NoopEventPublisher)),
            last_applied: DashMap::new(),
        }
    }
}

/// Reconcile one Ingress
#[instrument(skip(ingress, ctx), fields(
    namespace = %ingress.namespace().unwrap_or_default(),
    name = %ingress.name_any(),
))]
pub async fn reconcile(ingress: Arc<Ingress>, ctx: Arc<Context>) -> Result<Action> {
    let timer = ctx.metrics.reconcile_timer(ControllerKind::Ingress);
    match reconcile_inner(&ingress, &ctx).await {
        Ok(action) => {
            timer.success();
            Ok(action)
        }
        Err(e) => {
            timer.error();
            Err(e)
        }
    }
}

async fn reconcile_inner(ingress: &Ingress, ctx: &Context) -> Result<Action> {
    let namespace = ingress.namespace().unwrap_or_default();
    let name = ingress.name_any();
    let key = format!("{}/{}", namespace, name);

    if ingress.meta().deletion_timestamp.is_some() {
        if !has_finalizer(ingress) {
            return Ok(Action::await_change());
        }

        if let Err(e) = ctx.processor.process_delete_ingress(&namespace, &name).await {
            ctx.events
                .publish(
                    &ObjectRef::from_obj(ingress).into(),
                    EventType::Warning,
                    reasons::CLEANUP_FAILED,
                    actions::DELETE,
                    Some(e.to_string()),
                )
                .await;
            return Err(e);
        }

        // Deindex the revision we actually applied, not the one arriving
        // with the delete event
        match ctx.last_applied.remove(&key) {
            Some((_, applied)) => ctx.cache.remove(&applied),
            None => ctx.cache.remove(ingress),
        }
        ctx.api.remove_finalizer(&namespace, &name).await?;
        info!("ingress cleaned up");
        return Ok(Action::await_change());
    }

    if !has_finalizer(ingress) {
        ctx.api.add_finalizer(&namespace, &name).await?;
        // pick the finalizered revision back up immediately
        return Ok(Action::requeue(Duration::ZERO));
    }

    if let Some(previous) = ctx.last_applied.get(&key).map(|e| e.value().clone()) {
        ctx.cache.remove(&previous);
    }
    ctx.cache.add(ingress);
    ctx.last_applied.insert(key, Arc::new(ingress.clone()));

    if let Err(e) = ctx.processor.process_update_ingress(ingress).await {
        ctx.events
            .publish(
                &ObjectRef::from_obj(ingress).into(),
                EventType::Warning,
                reasons::SYNC_FAILED,
                actions::RECONCILE,
                Some(e.to_string()),
            )
            .await;
        return Err(e);
    }

    Ok(Action::await_change())
}

fn has_finalizer(ingress: &Ingress) -> bool {
    ingress
        .finalizers()
        .iter()
        .any(|f| f == INGRESS_FINALIZER)
}

/// Requeue policy after a reconciliation error
pub fn error_policy(ingress: Arc<Ingress>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(
        ingress = %format!(
            "{}/{}",
            ingress.namespace().unwrap_or_default(),
            ingress.name_any()
        ),
        error = %error,
        retryable = error.is_retryable(),
        "ingress reconciliation failed"
    );
    Action::requeue(ERROR_REQUEUE)
}
