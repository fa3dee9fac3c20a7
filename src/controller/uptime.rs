//! Listener uptime-check controller
//!
//! Registers an uptime-check task with the monitoring backend for every
//! Listener whose spec enables one, records the task id in status, and
//! deregisters the task when the check is disabled or the Listener is
//! deleted. A dedicated finalizer guards task cleanup.
//!
//! Status and finalizer writes go through [`crate::retry::retry_on_conflict`]
//! since the Listener is also written by the sync path.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, Client, Resource, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::crd::{Listener, ListenerState, ListenerStatus};
use crate::error::Error;
use crate::metrics::{ControllerKind, Metrics};
use crate::retry::retry_on_conflict;
use crate::{Result, FIELD_MANAGER, UPTIME_FINALIZER};

use super::ERROR_REQUEUE;

const CONFLICT_BUDGET: u32 = 5;

/// Monitoring backend managing uptime-check tasks
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UptimeChecker: Send + Sync {
    /// Create or update the uptime-check task for a Listener, returning
    /// its task id. Must be idempotent.
    async fn ensure_uptime_check(&self, listener: &Listener) -> Result<String>;

    /// Delete the Listener's uptime-check task. Deleting an already
    /// absent task must succeed.
    async fn delete_uptime_check_task(&self, listener: &Listener) -> Result<()>;
}

/// Checker that only logs, used until a monitoring backend is wired in.
/// Task ids are derived from the Listener so re-runs stay idempotent.
pub struct LogOnlyUptimeChecker;

#[async_trait]
impl UptimeChecker for LogOnlyUptimeChecker {
    async fn ensure_uptime_check(&self, listener: &Listener) -> Result<String> {
        let task_id = format!(
            "log-{}-{}",
            listener.namespace().unwrap_or_default(),
            listener.name_any()
        );
        info!(task_id = %task_id, "ensuring uptime check");
        Ok(task_id)
    }

    async fn delete_uptime_check_task(&self, listener: &Listener) -> Result<()> {
        info!(
            listener = %format!(
                "{}/{}",
                listener.namespace().unwrap_or_default(),
                listener.name_any()
            ),
            "deleting uptime check task"
        );
        Ok(())
    }
}

/// Kubernetes API operations the controller needs on Listener resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ListenerApi: Send + Sync {
    /// Fetch a Listener; `Ok(None)` when it no longer exists
    async fn get_listener(&self, namespace: &str, name: &str) -> Result<Option<Listener>>;

    /// Add the uptime finalizer if absent
    async fn add_finalizer(&self, namespace: &str, name: &str) -> Result<()>;

    /// Remove the uptime finalizer if present
    async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<()>;

    /// Replace the Listener's status subresource
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ListenerStatus,
    ) -> Result<()>;
}

/// [`ListenerApi`] implementation against the real API server
pub struct KubeListenerApi {
    client: Client,
}

impl KubeListenerApi {
    /// Wrap a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Listener> {
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
impl ListenerApi for KubeListenerApi {
    async fn get_listener(&self, namespace: &str, name: &str) -> Result<Option<Listener>> {
        match self.api(namespace).get(name).await {
            Ok(listener) => Ok(Some(listener)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn add_finalizer(&self, namespace: &str, name: &str) -> Result<()> {
        let Some(listener) = self.get_listener(namespace, name).await? else {
            return Ok(());
        };
        let mut finalizers = listener.finalizers().to_vec();
        if finalizers.iter().any(|f| f == UPTIME_FINALIZER) {
            return Ok(());
        }
        finalizers.push(UPTIME_FINALIZER.to_string());
        self.patch_finalizers(namespace, name, finalizers).await
    }

    async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<()> {
        let Some(listener) = self.get_listener(namespace, name).await? else {
            return Ok(());
        };
        let finalizers: Vec<String> = listener
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != UPTIME_FINALIZER)
            .cloned()
            .collect();
        if finalizers.len() == listener.finalizers().len() {
            return Ok(());
        }
        self.patch_finalizers(namespace, name, finalizers).await
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ListenerStatus,
    ) -> Result<()> {
        let patch = json!({ "status": status });
        self.api(namespace)
            .patch_status(
                name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}

/// Shared state for uptime-check reconciliation
pub struct Context {
    api: Arc<dyn ListenerApi>,
    checker: Arc<dyn UptimeChecker>,
    metrics: Arc<Metrics>,
}

impl Context {
    /// Create an uptime context
    pub fn new(
        api: Arc<dyn ListenerApi>,
        checker: Arc<dyn UptimeChecker>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            api,
            checker,
            metrics,
        }
    }
}

/// Reconcile the uptime-check task of one Listener
#[instrument(skip(listener, ctx), fields(
    namespace = %listener.namespace().unwrap_or_default(),
    name = %listener.name_any(),
))]
pub async fn reconcile(listener: Arc<Listener>, ctx: Arc<Context>) -> Result<Action> {
    let timer = ctx.metrics.reconcile_timer(ControllerKind::Uptime);
    match reconcile_inner(&listener, &ctx).await {
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

async fn reconcile_inner(listener: &Listener, ctx: &Context) -> Result<Action> {
    let namespace = listener.namespace().unwrap_or_default();
    let name = listener.name_any();

    if listener.meta().deletion_timestamp.is_some() {
        if !has_finalizer(listener) {
            return Ok(Action::await_change());
        }

        ctx.checker.delete_uptime_check_task(listener).await?;
        retry_on_conflict(CONFLICT_BUDGET, "remove uptime finalizer", || {
            ctx.api.remove_finalizer(&namespace, &name)
        })
        .await?;
        info!("uptime check task cleaned up");
        return Ok(Action::await_change());
    }

    if listener.uptime_check_enabled() {
        retry_on_conflict(CONFLICT_BUDGET, "add uptime finalizer", || {
            ctx.api.add_finalizer(&namespace, &name)
        })
        .await?;

        let task_id = ctx.checker.ensure_uptime_check(listener).await?;
        let status = ListenerStatus {
            state: Some(ListenerState::Synced),
            uptime_check_task_id: Some(task_id),
            message: None,
        };
        retry_on_conflict(CONFLICT_BUDGET, "patch uptime status", || {
            ctx.api.patch_status(&namespace, &name, &status)
        })
        .await?;
        return Ok(Action::await_change());
    }

    // Check disabled or removed: tear down whatever was registered
    if listener.uptime_check_task_id().is_some() {
        ctx.checker.delete_uptime_check_task(listener).await?;
        let status = ListenerStatus {
            state: Some(ListenerState::Synced),
            uptime_check_task_id: None,
            message: None,
        };
        retry_on_conflict(CONFLICT_BUDGET, "clear uptime status", || {
            ctx.api.patch_status(&namespace, &name, &status)
        })
        .await?;
        info!("uptime check disabled, task removed");
    }
    if has_finalizer(listener) {
        retry_on_conflict(CONFLICT_BUDGET, "remove uptime finalizer", || {
            ctx.api.remove_finalizer(&namespace, &name)
        })
        .await?;
    }
    Ok(Action::await_change())
}

fn has_finalizer(listener: &Listener) -> bool {
    listener
        .finalizers()
        .iter()
        .any(|f| f == UPTIME_FINALIZER)
}

/// Requeue policy after a reconciliation error
pub fn error_policy(listener: Arc<Listener>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(
        listener = %format!(
            "{}/{}",
            listener.namespace().unwrap_or_default(),
            listener.name_any()
        ),
        error = %error,
        retryable = error.is_retryable(),
        "uptime reconciliation failed"
    );
    Action::requeue(ERROR_REQUEUE)
}
