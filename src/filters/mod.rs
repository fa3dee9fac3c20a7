//! Event filters mapping dependent-resource events to Ingress keys
//!
//! Each filter turns an event on a watched dependent resource (Endpoints,
//! MultiClusterEndpointSlice, Service, Pod) into the set of Ingresses that
//! must be re-reconciled. Filters are pure mappers wired into the Ingress
//! controller's `watches` streams; they never call the API server, only
//! the dependency cache and in-memory reflector stores.

mod endpoints;
mod endpointslice;
mod pod;
mod service;

pub use endpoints::EndpointsFilter;
pub use endpointslice::MultiClusterEndpointSliceFilter;
pub use pod::PodFilter;
pub use service::ServiceFilter;

use std::collections::HashSet;

use kube::runtime::reflector::ObjectRef;

use crate::crd::Ingress;

/// Drop duplicate keys while preserving first-seen order.
///
/// A single event can map to the same Ingress through several references;
/// enqueueing it once is enough.
pub fn deduplicate(refs: Vec<ObjectRef<Ingress>>) -> Vec<ObjectRef<Ingress>> {
    let mut seen = HashSet::new();
    refs.into_iter().filter(|r| seen.insert(r.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(ns: &str, name: &str) -> ObjectRef<Ingress> {
        ObjectRef::<Ingress>::new(name).within(ns)
    }

    #[test]
    fn deduplicate_preserves_first_seen_order() {
        let refs = vec![
            key("prod", "b"),
            key("prod", "a"),
            key("prod", "b"),
            key("edge", "a"),
            key("prod", "a"),
        ];
        let out = deduplicate(refs);
        assert_eq!(
            out,
            vec![key("prod", "b"), key("prod", "a"), key("edge", "a")]
        );
    }

    #[test]
    fn deduplicate_of_empty_is_empty() {
        assert!(deduplicate(vec![]).is_empty());
    }
}
