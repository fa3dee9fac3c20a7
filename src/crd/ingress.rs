//! Ingress Custom Resource Definition
//!
//! The Ingress CRD declares routing intent for one cloud load balancer:
//! L4 rules forwarding a frontend port to a Service, optional L7 routes
//! per host/path, and direct port-to-workload mappings for headless
//! backends such as StatefulSets.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Transport protocol for a listener frontend
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    /// Plain TCP pass-through
    #[default]
    Tcp,
    /// UDP pass-through
    Udp,
    /// HTTP with L7 routing
    Http,
    /// HTTPS with TLS termination and L7 routing
    Https,
}

/// Reference to a backing Service
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRoute {
    /// Service namespace; defaults to the Ingress namespace when empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Service name
    pub name: String,

    /// Service port to forward to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// An L7 route matched by path within a rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRoute {
    /// Path prefix to match (e.g. "/api")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Backing Service for this route
    pub service: ServiceRoute,
}

/// One listener rule: a frontend port with either a single L4 backend
/// or a set of L7 routes
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IngressRule {
    /// Frontend port on the load balancer
    pub port: u16,

    /// Frontend protocol
    #[serde(default)]
    pub protocol: Protocol,

    /// Host header to match (L7 protocols only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// L4 backend Service (mutually exclusive with routes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceRoute>,

    /// L7 routes (mutually exclusive with service)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<HttpRoute>,
}

/// Reference to a workload (Deployment, StatefulSet, ...) backing a
/// direct port mapping
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadRef {
    /// Workload kind, case-sensitive (e.g. "StatefulSet")
    pub kind: String,

    /// Workload namespace; defaults to the Ingress namespace when empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Workload name
    pub name: String,
}

/// A direct frontend-port-to-workload mapping, bypassing Services
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    /// Frontend port on the load balancer
    pub port: u16,

    /// Frontend protocol
    #[serde(default)]
    pub protocol: Protocol,

    /// The workload whose pods back this port
    pub workload: WorkloadRef,
}

/// Ingress declares routing intent for one cloud load balancer
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "portgate.io",
    version = "v1alpha1",
    kind = "Ingress",
    plural = "ingresses",
    shortname = "pgi",
    namespaced,
    status = "IngressStatus",
    printcolumn = r#"{"name":"LoadBalancer","type":"string","jsonPath":".spec.loadBalancerId"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    /// Id of the cloud load balancer this Ingress programs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_id: Option<String>,

    /// Listener rules
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<IngressRule>,

    /// Direct port-to-workload mappings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_mappings: Vec<PortMapping>,
}

/// Observed state of an Ingress
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IngressStatus {
    /// High-level state ("Synced", "Error")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Human-readable message for the current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IngressSpec {
    /// All Service references in this spec, with namespaces resolved
    /// against `default_namespace` (the Ingress's own namespace).
    pub fn service_refs(&self, default_namespace: &str) -> Vec<(String, String)> {
        let mut refs = Vec::new();
        for rule in &self.rules {
            if let Some(svc) = &rule.service {
                refs.push((
                    svc.namespace
                        .clone()
                        .unwrap_or_else(|| default_namespace.to_string()),
                    svc.name.clone(),
                ));
            }
            for route in &rule.routes {
                refs.push((
                    route
                        .service
                        .namespace
                        .clone()
                        .unwrap_or_else(|| default_namespace.to_string()),
                    route.service.name.clone(),
                ));
            }
        }
        refs
    }

    /// All workload references in this spec as (kind, namespace, name),
    /// with namespaces resolved against `default_namespace`.
    pub fn workload_refs(&self, default_namespace: &str) -> Vec<(String, String, String)> {
        self.port_mappings
            .iter()
            .map(|pm| {
                (
                    pm.workload.kind.clone(),
                    pm.workload
                        .namespace
                        .clone()
                        .unwrap_or_else(|| default_namespace.to_string()),
                    pm.workload.name.clone(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_refs_default_to_ingress_namespace() {
        let spec = IngressSpec {
            load_balancer_id: Some("lb-1".to_string()),
            rules: vec![IngressRule {
                port: 443,
                protocol: Protocol::Https,
                host: Some("example.com".to_string()),
                service: None,
                routes: vec![
                    HttpRoute {
                        path: Some("/api".to_string()),
                        service: ServiceRoute {
                            namespace: None,
                            name: "api".to_string(),
                            port: Some(8080),
                        },
                    },
                    HttpRoute {
                        path: None,
                        service: ServiceRoute {
                            namespace: Some("frontend".to_string()),
                            name: "web".to_string(),
                            port: Some(80),
                        },
                    },
                ],
            }],
            port_mappings: vec![],
        };

        let refs = spec.service_refs("prod");
        assert_eq!(
            refs,
            vec![
                ("prod".to_string(), "api".to_string()),
                ("frontend".to_string(), "web".to_string()),
            ]
        );
    }

    #[test]
    fn workload_refs_preserve_kind_case() {
        let spec = IngressSpec {
            load_balancer_id: None,
            rules: vec![],
            port_mappings: vec![PortMapping {
                port: 5432,
                protocol: Protocol::Tcp,
                workload: WorkloadRef {
                    kind: "StatefulSet".to_string(),
                    namespace: None,
                    name: "db".to_string(),
                },
            }],
        };

        assert_eq!(
            spec.workload_refs("prod"),
            vec![(
                "StatefulSet".to_string(),
                "prod".to_string(),
                "db".to_string()
            )]
        );
    }

    #[test]
    fn spec_round_trips_through_json() {
        let spec = IngressSpec {
            load_balancer_id: Some("lb-2".to_string()),
            rules: vec![IngressRule {
                port: 80,
                protocol: Protocol::Tcp,
                host: None,
                service: Some(ServiceRoute {
                    namespace: None,
                    name: "web".to_string(),
                    port: Some(8080),
                }),
                routes: vec![],
            }],
            port_mappings: vec![],
        };

        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("loadBalancerId"));
        let back: IngressSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
