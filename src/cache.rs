//! Dependency cache mapping Services and workloads to Ingresses
//!
//! The cache is a bidirectional index maintained incrementally by the
//! Ingress controller: every time an Ingress is indexed, its Service and
//! workload references are recorded so that events on those resources can
//! be mapped back to the Ingresses that need re-reconciling.
//!
//! Two independent units, each behind its own `RwLock`:
//! - services: `"service/{ns}/{name}"` -> set of Ingresses
//! - workloads: `"{Kind}/{ns}/{name}"` -> set of Ingresses (kind
//!   case-sensitive, matching ownerReference kinds)
//!
//! Reads copy the matching set out so no lock is held while reconciliation
//! keys are enqueued.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use serde::Serialize;
use tracing::warn;

use crate::crd::Ingress;

/// Namespaced name of an Ingress, the cache payload
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IngressMeta {
    /// Ingress namespace
    pub namespace: String,
    /// Ingress name
    pub name: String,
}

impl IngressMeta {
    /// Build from an Ingress resource
    pub fn from_ingress(ingress: &Ingress) -> Self {
        Self {
            namespace: ingress.namespace().unwrap_or_default(),
            name: ingress.name_any(),
        }
    }

    /// Convert to a reconciliation key
    pub fn to_object_ref(&self) -> ObjectRef<Ingress> {
        ObjectRef::<Ingress>::new(&self.name).within(&self.namespace)
    }
}

/// Cache key for a Service reference
pub fn service_key(namespace: &str, name: &str) -> String {
    format!("service/{}/{}", namespace, name)
}

/// Cache key for a workload reference; kind is case-sensitive
pub fn workload_key(kind: &str, namespace: &str, name: &str) -> String {
    format!("{}/{}/{}", kind, namespace, name)
}

/// One map-of-sets index behind its own lock
struct CacheUnit {
    label: &'static str,
    entries: RwLock<HashMap<String, HashSet<IngressMeta>>>,
}

impl CacheUnit {
    fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn insert(&self, key: &str, meta: IngressMeta) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.entry(key.to_string()).or_default().insert(meta);
    }

    /// Remove one Ingress from a key's set, pruning the key when the set
    /// empties. A missing key or member is logged and otherwise ignored:
    /// removal must be idempotent because deletion can be observed twice.
    fn remove(&self, key: &str, meta: &IngressMeta) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match entries.get_mut(key) {
            Some(set) => {
                if !set.remove(meta) {
                    warn!(
                        unit = self.label,
                        key,
                        ingress = %format!("{}/{}", meta.namespace, meta.name),
                        "cache remove: ingress not present under key"
                    );
                }
                if set.is_empty() {
                    entries.remove(key);
                }
            }
            None => {
                warn!(unit = self.label, key, "cache remove: key not present");
            }
        }
    }

    /// Copy out the set for a key
    fn lookup(&self, key: &str) -> Vec<IngressMeta> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries
            .get(key)
            .map(|set| {
                let mut metas: Vec<IngressMeta> = set.iter().cloned().collect();
                metas.sort();
                metas
            })
            .unwrap_or_default()
    }

    fn snapshot(&self) -> HashMap<String, Vec<IngressMeta>> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries
            .iter()
            .map(|(k, set)| {
                let mut metas: Vec<IngressMeta> = set.iter().cloned().collect();
                metas.sort();
                (k.clone(), metas)
            })
            .collect()
    }
}

/// Serializable snapshot of the whole cache, for debug logging
#[derive(Debug, Serialize)]
pub struct CacheDump {
    /// Service index contents
    pub services: HashMap<String, Vec<IngressMeta>>,
    /// Workload index contents
    pub workloads: HashMap<String, Vec<IngressMeta>>,
}

/// Bidirectional dependency index: Service/workload references to the
/// Ingresses that declare them
pub struct DependencyCache {
    services: CacheUnit,
    workloads: CacheUnit,
}

impl Default for DependencyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            services: CacheUnit::new("services"),
            workloads: CacheUnit::new("workloads"),
        }
    }

    /// Index all Service and workload references of an Ingress.
    ///
    /// Idempotent: re-adding the same revision changes nothing. Callers
    /// bracket updates as `remove(old)` then `add(new)` so stale references
    /// are dropped before the new ones land.
    pub fn add(&self, ingress: &Ingress) {
        let meta = IngressMeta::from_ingress(ingress);
        let default_ns = &meta.namespace;

        for (ns, name) in ingress.spec.service_refs(default_ns) {
            self.services.insert(&service_key(&ns, &name), meta.clone());
        }
        for (kind, ns, name) in ingress.spec.workload_refs(default_ns) {
            self.workloads
                .insert(&workload_key(&kind, &ns, &name), meta.clone());
        }
    }

    /// Drop all Service and workload references of an Ingress
    pub fn remove(&self, ingress: &Ingress) {
        let meta = IngressMeta::from_ingress(ingress);
        let default_ns = &meta.namespace;

        for (ns, name) in ingress.spec.service_refs(default_ns) {
            self.services.remove(&service_key(&ns, &name), &meta);
        }
        for (kind, ns, name) in ingress.spec.workload_refs(default_ns) {
            self.workloads
                .remove(&workload_key(&kind, &ns, &name), &meta);
        }
    }

    /// Ingresses referencing the given Service
    pub fn related_ingresses_of_service(&self, namespace: &str, name: &str) -> Vec<IngressMeta> {
        self.services.lookup(&service_key(namespace, name))
    }

    /// Ingresses referencing the given workload (kind case-sensitive)
    pub fn related_ingresses_of_workload(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Vec<IngressMeta> {
        self.workloads.lookup(&workload_key(kind, namespace, name))
    }

    /// Full snapshot for debug logging
    pub fn dump(&self) -> CacheDump {
        CacheDump {
            services: self.services.snapshot(),
            workloads: self.workloads.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        HttpRoute, IngressRule, IngressSpec, PortMapping, Protocol, ServiceRoute, WorkloadRef,
    };

    fn ingress(ns: &str, name: &str, spec: IngressSpec) -> Ingress {
        let mut ing = Ingress::new(name, spec);
        ing.metadata.namespace = Some(ns.to_string());
        ing
    }

    fn spec_with_service_and_workload() -> IngressSpec {
        IngressSpec {
            load_balancer_id: Some("lb-1".to_string()),
            rules: vec![IngressRule {
                port: 80,
                protocol: Protocol::Tcp,
                host: None,
                service: Some(ServiceRoute {
                    namespace: None,
                    name: "svc1".to_string(),
                    port: Some(8080),
                }),
                routes: vec![],
            }],
            port_mappings: vec![PortMapping {
                port: 5432,
                protocol: Protocol::Tcp,
                workload: WorkloadRef {
                    kind: "StatefulSet".to_string(),
                    namespace: None,
                    name: "sts1".to_string(),
                },
            }],
        }
    }

    #[test]
    fn add_indexes_services_and_workloads() {
        let cache = DependencyCache::new();
        let ing = ingress("prod", "web", spec_with_service_and_workload());

        cache.add(&ing);

        let related = cache.related_ingresses_of_service("prod", "svc1");
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].name, "web");
        assert_eq!(related[0].namespace, "prod");

        let related = cache.related_ingresses_of_workload("StatefulSet", "prod", "sts1");
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].name, "web");

        // kind is case-sensitive
        assert!(cache
            .related_ingresses_of_workload("statefulset", "prod", "sts1")
            .is_empty());
    }

    #[test]
    fn add_is_idempotent() {
        let cache = DependencyCache::new();
        let ing = ingress("prod", "web", spec_with_service_and_workload());

        cache.add(&ing);
        cache.add(&ing);

        assert_eq!(cache.related_ingresses_of_service("prod", "svc1").len(), 1);
    }

    #[test]
    fn remove_prunes_empty_sets() {
        let cache = DependencyCache::new();
        let ing = ingress("prod", "web", spec_with_service_and_workload());

        cache.add(&ing);
        cache.remove(&ing);

        assert!(cache.related_ingresses_of_service("prod", "svc1").is_empty());
        assert!(cache
            .related_ingresses_of_workload("StatefulSet", "prod", "sts1")
            .is_empty());

        let dump = cache.dump();
        assert!(dump.services.is_empty());
        assert!(dump.workloads.is_empty());
    }

    #[test]
    fn remove_of_absent_key_is_non_fatal() {
        let cache = DependencyCache::new();
        let ing = ingress("prod", "web", spec_with_service_and_workload());

        // Never added; must not panic and must leave the cache usable
        cache.remove(&ing);

        cache.add(&ing);
        assert_eq!(cache.related_ingresses_of_service("prod", "svc1").len(), 1);
    }

    #[test]
    fn route_namespace_defaults_to_ingress_namespace() {
        let cache = DependencyCache::new();
        let spec = IngressSpec {
            load_balancer_id: None,
            rules: vec![IngressRule {
                port: 443,
                protocol: Protocol::Https,
                host: Some("example.com".to_string()),
                service: None,
                routes: vec![HttpRoute {
                    path: Some("/".to_string()),
                    service: ServiceRoute {
                        namespace: None,
                        name: "web".to_string(),
                        port: Some(80),
                    },
                }],
            }],
            port_mappings: vec![],
        };
        cache.add(&ingress("edge", "site", spec));

        assert_eq!(cache.related_ingresses_of_service("edge", "web").len(), 1);
        assert!(cache.related_ingresses_of_service("prod", "web").is_empty());
    }

    #[test]
    fn multiple_ingresses_share_a_service() {
        let cache = DependencyCache::new();
        cache.add(&ingress("prod", "a", spec_with_service_and_workload()));
        cache.add(&ingress("prod", "b", spec_with_service_and_workload()));

        let related = cache.related_ingresses_of_service("prod", "svc1");
        assert_eq!(related.len(), 2);

        // Removing one leaves the other indexed
        cache.remove(&ingress("prod", "a", spec_with_service_and_workload()));
        let related = cache.related_ingresses_of_service("prod", "svc1");
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].name, "b");
    }

    #[test]
    fn update_bracket_swaps_references() {
        let cache = DependencyCache::new();
        let old = ingress("prod", "web", spec_with_service_and_workload());
        cache.add(&old);

        // New revision points at a different service
        let mut new_spec = spec_with_service_and_workload();
        new_spec.rules[0].service = Some(ServiceRoute {
            namespace: None,
            name: "svc2".to_string(),
            port: Some(8080),
        });
        let new = ingress("prod", "web", new_spec);

        cache.remove(&old);
        cache.add(&new);

        assert!(cache.related_ingresses_of_service("prod", "svc1").is_empty());
        assert_eq!(cache.related_ingresses_of_service("prod", "svc2").len(), 1);
    }

    #[test]
    fn meta_converts_to_object_ref() {
        let meta = IngressMeta {
            namespace: "prod".to_string(),
            name: "web".to_string(),
        };
        let obj_ref = meta.to_object_ref();
        assert_eq!(obj_ref.name, "web");
        assert_eq!(obj_ref.namespace.as_deref(), Some("prod"));
    }
}
