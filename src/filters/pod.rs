//! Pod events to Ingress keys
//!
//! The busiest filter by event volume, so it is gated: a per-pod
//! fingerprint of the significant fields suppresses updates that could not
//! change routing (see [`crate::predicate::pod_fingerprint`]). Deleted pods
//! always pass and their gate entry is dropped so the delete itself is
//! never suppressed by a stale fingerprint.
//!
//! A passing pod maps to Ingresses two ways:
//! - via every same-namespace Service whose selector matches its labels
//! - via its ownerReferences, for direct workload port mappings

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Resource, ResourceExt};
use tracing::debug;

use crate::cache::DependencyCache;
use crate::crd::Ingress;
use crate::metrics::Metrics;
use crate::predicate::pod_fingerprint;

const KIND: &str = "Pod";

/// Maps Pod events to the Ingresses routing to them
pub struct PodFilter {
    cache: Arc<DependencyCache>,
    services: Store<Service>,
    seen: DashMap<String, u64>,
    metrics: Arc<Metrics>,
}

impl PodFilter {
    /// Create a filter over the dependency cache and Service store
    pub fn new(
        cache: Arc<DependencyCache>,
        services: Store<Service>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            cache,
            services,
            seen: DashMap::new(),
            metrics,
        }
    }

    /// Ingresses to re-reconcile for this Pod event
    pub fn related(&self, pod: &Pod) -> Vec<ObjectRef<Ingress>> {
        self.metrics.record_filter_event(KIND);

        let namespace = pod.namespace().unwrap_or_default();
        let name = pod.name_any();
        let gate_key = format!("{}/{}", namespace, name);

        if pod.meta().deletion_timestamp.is_some() {
            self.seen.remove(&gate_key);
        } else if let Some(fingerprint) = pod_fingerprint(pod) {
            let previous = self.seen.insert(gate_key, fingerprint);
            if previous == Some(fingerprint) {
                self.metrics.record_filter_enqueues(KIND, 0);
                return Vec::new();
            }
        }

        let mut refs = Vec::new();

        for service in self.services.state() {
            if service.namespace().unwrap_or_default() != namespace {
                continue;
            }
            let selector = service.spec.as_ref().and_then(|s| s.selector.as_ref());
            let Some(selector) = selector else { continue };
            if selector_matches(selector, pod.labels()) {
                refs.extend(
                    self.cache
                        .related_ingresses_of_service(&namespace, &service.name_any())
                        .iter()
                        .map(|meta| meta.to_object_ref()),
                );
            }
        }

        for owner in pod.owner_references() {
            refs.extend(
                self.cache
                    .related_ingresses_of_workload(&owner.kind, &namespace, &owner.name)
                    .iter()
                    .map(|meta| meta.to_object_ref()),
            );
        }

        let refs = super::deduplicate(refs);
        if !refs.is_empty() {
            debug!(
                pod = %format!("{}/{}", namespace, name),
                count = refs.len(),
                "pod event mapped to ingresses"
            );
        }
        self.metrics.record_filter_enqueues(KIND, refs.len());
        refs
    }
}

/// Empty selectors match nothing: a selectorless Service routes by manual
/// Endpoints, not by pod labels.
fn selector_matches(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    !selector.is_empty() && selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}
