//! MultiClusterEndpointSlice events to Ingress keys
//!
//! The slice names its Service in `spec.service`; the Service lives in the
//! slice's own namespace. From there the mapping is the same
//! dependency-cache lookup as for Endpoints.

use std::sync::Arc;

use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use tracing::debug;

use crate::cache::DependencyCache;
use crate::crd::{Ingress, MultiClusterEndpointSlice};
use crate::metrics::Metrics;

const KIND: &str = "MultiClusterEndpointSlice";

/// Maps imported-endpoint events to the Ingresses routing to their Service
pub struct MultiClusterEndpointSliceFilter {
    cache: Arc<DependencyCache>,
    metrics: Arc<Metrics>,
}

impl MultiClusterEndpointSliceFilter {
    /// Create a filter over the shared dependency cache
    pub fn new(cache: Arc<DependencyCache>, metrics: Arc<Metrics>) -> Self {
        Self { cache, metrics }
    }

    /// Ingresses to re-reconcile for this slice event
    pub fn related(&self, slice: &MultiClusterEndpointSlice) -> Vec<ObjectRef<Ingress>> {
        self.metrics.record_filter_event(KIND);

        let namespace = slice.namespace().unwrap_or_default();
        let service = &slice.spec.service;

        let refs: Vec<ObjectRef<Ingress>> = self
            .cache
            .related_ingresses_of_service(&namespace, service)
            .iter()
            .map(|meta| meta.to_object_ref())
            .collect();

        if !refs.is_empty() {
            debug!(
                service = %format!("{}/{}", namespace, service),
                count = refs.len(),
                "endpoint slice event mapped to ingresses"
            );
        }
        self.metrics.record_filter_enqueues(KIND, refs.len());
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        IngressRule, IngressSpec, MultiClusterEndpointSliceSpec, Protocol, ServiceRoute,
    };
    use opentelemetry::global;

    fn metrics() -> Arc<Metrics> {
        Arc::new(Metrics::new(&global::meter("portgate-test")))
    }

    fn slice(ns: &str, service: &str) -> MultiClusterEndpointSlice {
        let mut s = MultiClusterEndpointSlice::new(
            &format!("{service}-imported"),
            MultiClusterEndpointSliceSpec {
                service: service.to_string(),
                endpoints: vec![],
            },
        );
        s.metadata.namespace = Some(ns.to_string());
        s
    }

    #[test]
    fn maps_slice_to_referencing_ingresses() {
        let cache = Arc::new(DependencyCache::new());
        let mut ing = Ingress::new(
            "web",
            IngressSpec {
                load_balancer_id: None,
                rules: vec![IngressRule {
                    port: 80,
                    protocol: Protocol::Tcp,
                    host: None,
                    service: Some(ServiceRoute {
                        namespace: None,
                        name: "svc1".to_string(),
                        port: None,
                    }),
                    routes: vec![],
                }],
                port_mappings: vec![],
            },
        );
        ing.metadata.namespace = Some("prod".to_string());
        cache.add(&ing);

        let filter = MultiClusterEndpointSliceFilter::new(cache, metrics());

        let refs = filter.related(&slice("prod", "svc1"));
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "web");

        assert!(filter.related(&slice("prod", "other")).is_empty());
        assert!(filter.related(&slice("edge", "svc1")).is_empty());
    }
}
