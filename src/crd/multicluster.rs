//! MultiClusterEndpointSlice Custom Resource Definition
//!
//! Endpoints imported from peer clusters for a Service in this cluster.
//! The slice lives in the same namespace as the Service it feeds;
//! `spec.service` names that Service.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One endpoint imported from a peer cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEndpoint {
    /// Endpoint addresses (IPs)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,

    /// Name of the cluster this endpoint was imported from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,

    /// Whether the endpoint is ready to serve traffic
    #[serde(default)]
    pub ready: bool,
}

/// MultiClusterEndpointSlice carries endpoints imported from peer clusters
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "portgate.io",
    version = "v1alpha1",
    kind = "MultiClusterEndpointSlice",
    plural = "multiclusterendpointslices",
    shortname = "mces",
    namespaced,
    printcolumn = r#"{"name":"Service","type":"string","jsonPath":".spec.service"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MultiClusterEndpointSliceSpec {
    /// Name of the Service in this slice's namespace that these
    /// endpoints feed
    pub service: String,

    /// Imported endpoints
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<RemoteEndpoint>,
}
