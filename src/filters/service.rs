//! Service events to Ingress keys
//!
//! Unlike the other filters this one does not use the dependency cache:
//! a Service's selector change can alter which Pods back it before any
//! cache index moves, so the filter scans the Ingress reflector store
//! directly for specs referencing the Service. The scan is linear in the
//! number of Ingresses, which stays small relative to Service event rates.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::ResourceExt;
use tracing::debug;

use crate::crd::Ingress;
use crate::metrics::Metrics;

const KIND: &str = "Service";

/// Maps Service events to the Ingresses referencing that Service
pub struct ServiceFilter {
    ingresses: Store<Ingress>,
    metrics: Arc<Metrics>,
}

impl ServiceFilter {
    /// Create a filter over the Ingress reflector store
    pub fn new(ingresses: Store<Ingress>, metrics: Arc<Metrics>) -> Self {
        Self { ingresses, metrics }
    }

    /// Ingresses to re-reconcile for this Service event
    pub fn related(&self, service: &Service) -> Vec<ObjectRef<Ingress>> {
        self.metrics.record_filter_event(KIND);

        let namespace = service.namespace().unwrap_or_default();
        let name = service.name_any();

        let refs: Vec<ObjectRef<Ingress>> = self
            .ingresses
            .state()
            .iter()
            .filter(|ingress| {
                let default_ns = ingress.namespace().unwrap_or_default();
                ingress
                    .spec
                    .service_refs(&default_ns)
                    .iter()
                    .any(|(ns, n)| ns == &namespace && n == &name)
            })
            .map(|ingress| ObjectRef::from_obj(ingress.as_ref()))
            .collect();

        if !refs.is_empty() {
            debug!(
                service = %format!("{}/{}", namespace, name),
                count = refs.len(),
                "service event mapped to ingresses"
            );
        }
        self.metrics.record_filter_enqueues(KIND, refs.len());
        refs
    }
}
