//! Reconciliation controllers
//!
//! Three controllers share the runtime:
//! - [`ingress`]: the primary controller translating Ingress resources and
//!   maintaining the dependency cache
//! - [`listener`]: dispatches Listener reconciliations to per-load-balancer
//!   workers so cloud API calls for one load balancer stay serialized
//! - [`uptime`]: manages uptime-check tasks for Listeners

pub mod ingress;
pub mod listener;
pub mod uptime;

use std::time::Duration;

use futures::future;
use kube::runtime::controller;
use kube::runtime::reflector::{Lookup, ObjectRef};
use kube::runtime::watcher;
use tracing::{debug, warn};

use crate::error::Error;

/// Requeue interval after a reconciliation error
pub const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Per-event logging sink for a controller's result stream
pub fn log_reconcile_result<K>(
    controller_name: &'static str,
) -> impl FnMut(
    Result<(ObjectRef<K>, controller::Action), controller::Error<Error, watcher::Error>>,
) -> future::Ready<()>
where
    K: Lookup,
    K::DynamicType: std::fmt::Debug,
{
    move |result| {
        match result {
            Ok((object, _action)) => {
                debug!(
                    controller = controller_name,
                    object = %format!(
                        "{}/{}",
                        object.namespace.as_deref().unwrap_or_default(),
                        object.name
                    ),
                    "reconciled"
                );
            }
            Err(err) => {
                warn!(controller = controller_name, error = %err, "reconcile failed");
            }
        }
        future::ready(())
    }
}
