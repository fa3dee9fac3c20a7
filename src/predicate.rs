//! Change-significance predicates for watch streams
//!
//! Hash predicates in the `kube::runtime::predicates` shape
//! (`fn(&K) -> Option<u64>`): the stream layer compares successive hashes
//! per object and drops events whose hash is unchanged. `None` means "no
//! fingerprint, always pass" - the predicates are total and never panic, a
//! serialization failure just disables filtering for that event.
//!
//! For Ingress and Listener, only Spec, Annotations, Finalizers and
//! DeletionTimestamp are significant; status-only churn (including our own
//! status writes) never triggers reconciliation.
//!
//! For Pods the pairwise rule is [`check_pod_need_reconcile`]; the hash
//! form [`pod_fingerprint`] feeds the stateful gate in the pod filter.

use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use k8s_openapi::api::core::v1::Pod;
use kube::{Resource, ResourceExt};

use crate::crd::{Ingress, Listener};
use crate::WEIGHT_ANNOTATION;

fn hash_meta_and_spec<H: Hasher>(
    hasher: &mut H,
    annotations: &BTreeMap<String, String>,
    finalizers: &[String],
    deletion_timestamp: Option<String>,
    spec_json: &str,
) {
    annotations.hash(hasher);
    finalizers.hash(hasher);
    deletion_timestamp.hash(hasher);
    spec_json.hash(hasher);
}

fn deletion_stamp<K: Resource>(obj: &K) -> Option<String> {
    obj.meta()
        .deletion_timestamp
        .as_ref()
        .map(|t| t.0.to_rfc3339())
}

/// Significant-change fingerprint for Ingress trigger streams
pub fn ingress_significant(ingress: &Ingress) -> Option<u64> {
    let spec_json = serde_json::to_string(&ingress.spec).ok()?;
    let mut hasher = DefaultHasher::new();
    hash_meta_and_spec(
        &mut hasher,
        ingress.annotations(),
        ingress.finalizers(),
        deletion_stamp(ingress),
        &spec_json,
    );
    Some(hasher.finish())
}

/// Significant-change fingerprint for Listener trigger streams
pub fn listener_significant(listener: &Listener) -> Option<u64> {
    let spec_json = serde_json::to_string(&listener.spec).ok()?;
    let mut hasher = DefaultHasher::new();
    hash_meta_and_spec(
        &mut hasher,
        listener.annotations(),
        listener.finalizers(),
        deletion_stamp(listener),
        &spec_json,
    );
    Some(hasher.finish())
}

/// Significant-change fingerprint for Pod events.
///
/// Returns `None` when the pod has no annotations map at all: without it
/// the load-balance weight cannot be compared, so the event always passes.
pub fn pod_fingerprint(pod: &Pod) -> Option<u64> {
    pod.metadata.annotations.as_ref()?;

    let spec_json = serde_json::to_string(&pod.spec).ok()?;
    let status_json = serde_json::to_string(&pod.status).ok()?;

    let mut hasher = DefaultHasher::new();
    pod.namespace().hash(&mut hasher);
    pod.name_any().hash(&mut hasher);
    deletion_stamp(pod).hash(&mut hasher);
    pod.labels().hash(&mut hasher);
    weight_annotation(pod).hash(&mut hasher);
    spec_json.hash(&mut hasher);
    status_json.hash(&mut hasher);
    Some(hasher.finish())
}

/// Whether a Pod update is significant enough to re-reconcile the
/// Ingresses routing to it.
///
/// Significant: namespace/name, deletionTimestamp, labels, spec, status,
/// or the load-balance weight annotation changed. If either revision has
/// no annotations map the comparison cannot be trusted and the update is
/// treated as significant.
pub fn check_pod_need_reconcile(old: &Pod, new: &Pod) -> bool {
    if old.metadata.annotations.is_none() || new.metadata.annotations.is_none() {
        return true;
    }

    old.namespace() != new.namespace()
        || old.name_any() != new.name_any()
        || old.meta().deletion_timestamp != new.meta().deletion_timestamp
        || old.labels() != new.labels()
        || weight_annotation(old) != weight_annotation(new)
        || old.spec != new.spec
        || old.status != new.status
}

fn weight_annotation(pod: &Pod) -> Option<&String> {
    pod.annotations().get(WEIGHT_ANNOTATION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{IngressSpec, ListenerSpec, Protocol};
    use k8s_openapi::api::core::v1::{PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::collections::BTreeMap;

    fn pod(name: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.namespace = Some("prod".to_string());
        pod.metadata.name = Some(name.to_string());
        pod.metadata.annotations = Some(BTreeMap::new());
        pod.metadata.labels = Some(BTreeMap::from([(
            "app".to_string(),
            "web".to_string(),
        )]));
        pod
    }

    fn ingress(name: &str) -> Ingress {
        let mut ing = Ingress::new(name, IngressSpec::default());
        ing.metadata.namespace = Some("prod".to_string());
        ing
    }

    #[test]
    fn ingress_fingerprint_ignores_status_churn() {
        let mut a = ingress("web");
        let fp1 = ingress_significant(&a);

        a.status = Some(crate::crd::IngressStatus {
            state: Some("Synced".to_string()),
            message: None,
        });
        let fp2 = ingress_significant(&a);
        assert_eq!(fp1, fp2);

        // resourceVersion churn is also insignificant
        a.metadata.resource_version = Some("12345".to_string());
        assert_eq!(fp1, ingress_significant(&a));
    }

    #[test]
    fn ingress_fingerprint_tracks_spec_annotations_finalizers_deletion() {
        let base = ingress("web");
        let fp = ingress_significant(&base);

        let mut changed = base.clone();
        changed.spec.load_balancer_id = Some("lb-9".to_string());
        assert_ne!(fp, ingress_significant(&changed));

        let mut changed = base.clone();
        changed.metadata.annotations =
            Some(BTreeMap::from([("a".to_string(), "b".to_string())]));
        assert_ne!(fp, ingress_significant(&changed));

        let mut changed = base.clone();
        changed.metadata.finalizers = Some(vec![crate::INGRESS_FINALIZER.to_string()]);
        assert_ne!(fp, ingress_significant(&changed));

        let mut changed = base.clone();
        changed.metadata.deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
        assert_ne!(fp, ingress_significant(&changed));
    }

    #[test]
    fn listener_fingerprint_is_total_and_stable() {
        let mut listener = Listener::new(
            "web-443",
            ListenerSpec {
                load_balancer_id: Some("lb-1".to_string()),
                port: 443,
                protocol: Protocol::Https,
                uptime_check: None,
            },
        );
        let fp1 = listener_significant(&listener);
        assert!(fp1.is_some());

        listener.status = Some(crate::crd::ListenerStatus::default());
        assert_eq!(fp1, listener_significant(&listener));

        listener.spec.port = 8443;
        assert_ne!(fp1, listener_significant(&listener));
    }

    #[test]
    fn pod_fingerprint_is_none_without_annotations() {
        let mut p = pod("web-0");
        p.metadata.annotations = None;
        assert_eq!(pod_fingerprint(&p), None);
    }

    #[test]
    fn pod_updates_with_nil_annotations_always_reconcile() {
        let mut old = pod("web-0");
        old.metadata.annotations = None;
        let new = pod("web-0");
        assert!(check_pod_need_reconcile(&old, &new));
        assert!(check_pod_need_reconcile(&new, &old));
    }

    #[test]
    fn identical_pods_do_not_reconcile() {
        let p = pod("web-0");
        assert!(!check_pod_need_reconcile(&p, &p.clone()));
        assert_eq!(pod_fingerprint(&p), pod_fingerprint(&p.clone()));
    }

    #[test]
    fn pod_significant_fields_trigger_reconcile() {
        let base = pod("web-0");

        let mut changed = base.clone();
        changed.metadata.labels =
            Some(BTreeMap::from([("app".to_string(), "api".to_string())]));
        assert!(check_pod_need_reconcile(&base, &changed));

        let mut changed = base.clone();
        changed.metadata.deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
        assert!(check_pod_need_reconcile(&base, &changed));

        let mut changed = base.clone();
        changed.spec = Some(PodSpec {
            node_name: Some("node-1".to_string()),
            ..Default::default()
        });
        assert!(check_pod_need_reconcile(&base, &changed));

        let mut changed = base.clone();
        changed.status = Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        });
        assert!(check_pod_need_reconcile(&base, &changed));

        let mut changed = base.clone();
        changed
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(WEIGHT_ANNOTATION.to_string(), "50".to_string());
        assert!(check_pod_need_reconcile(&base, &changed));
        assert_ne!(pod_fingerprint(&base), pod_fingerprint(&changed));
    }

    #[test]
    fn unrelated_annotation_changes_are_insignificant() {
        let base = pod("web-0");
        let mut changed = base.clone();
        changed
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert("unrelated".to_string(), "x".to_string());
        assert!(!check_pod_need_reconcile(&base, &changed));
    }
}
