//! Endpoints events to Ingress keys
//!
//! An Endpoints object carries the name of its Service, so the mapping is
//! a single dependency-cache lookup.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Endpoints;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use tracing::debug;

use crate::cache::DependencyCache;
use crate::crd::Ingress;
use crate::metrics::Metrics;

const KIND: &str = "Endpoints";

/// Maps Endpoints events to the Ingresses routing to their Service
pub struct EndpointsFilter {
    cache: Arc<DependencyCache>,
    metrics: Arc<Metrics>,
}

impl EndpointsFilter {
    /// Create a filter over the shared dependency cache
    pub fn new(cache: Arc<DependencyCache>, metrics: Arc<Metrics>) -> Self {
        Self { cache, metrics }
    }

    /// Ingresses to re-reconcile for this Endpoints event
    pub fn related(&self, endpoints: &Endpoints) -> Vec<ObjectRef<Ingress>> {
        self.metrics.record_filter_event(KIND);

        let namespace = endpoints.namespace().unwrap_or_default();
        let name = endpoints.name_any();

        let refs: Vec<ObjectRef<Ingress>> = self
            .cache
            .related_ingresses_of_service(&namespace, &name)
            .iter()
            .map(|meta| meta.to_object_ref())
            .collect();

        if !refs.is_empty() {
            debug!(
                service = %format!("{}/{}", namespace, name),
                count = refs.len(),
                "endpoints event mapped to ingresses"
            );
        }
        self.metrics.record_filter_enqueues(KIND, refs.len());
        refs
    }
}
