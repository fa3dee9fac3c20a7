//! Listener Custom Resource Definition
//!
//! One Listener represents a single frontend (protocol + port) on a cloud
//! load balancer. Listeners are produced by the Ingress translation and
//! synced to the cloud by per-load-balancer workers.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ingress::Protocol;

/// Uptime-check configuration for a listener
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UptimeCheckSpec {
    /// Whether the uptime check is enabled
    #[serde(default)]
    pub enabled: bool,

    /// HTTP path probed by the check (L7 protocols only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Host header sent with the probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Probe interval in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u32>,
}

/// Listener sync state
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ListenerState {
    /// Not yet synced to the cloud
    #[default]
    Pending,
    /// Synced and serving
    Synced,
    /// Last sync attempt failed
    Error,
}

/// Listener represents one frontend on a cloud load balancer
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "portgate.io",
    version = "v1alpha1",
    kind = "Listener",
    plural = "listeners",
    shortname = "pgl",
    namespaced,
    status = "ListenerStatus",
    printcolumn = r#"{"name":"LoadBalancer","type":"string","jsonPath":".spec.loadBalancerId"}"#,
    printcolumn = r#"{"name":"Port","type":"integer","jsonPath":".spec.port"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ListenerSpec {
    /// Id of the cloud load balancer this listener belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_id: Option<String>,

    /// Frontend port
    pub port: u16,

    /// Frontend protocol
    #[serde(default)]
    pub protocol: Protocol,

    /// Optional uptime check on this frontend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_check: Option<UptimeCheckSpec>,
}

/// Observed state of a Listener
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListenerStatus {
    /// Sync state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ListenerState>,

    /// Task id of the registered uptime check, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_check_task_id: Option<String>,

    /// Human-readable message for the current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Listener {
    /// Whether this listener has an enabled uptime check
    pub fn uptime_check_enabled(&self) -> bool {
        self.spec
            .uptime_check
            .as_ref()
            .map(|c| c.enabled)
            .unwrap_or(false)
    }

    /// The registered uptime-check task id, if any
    pub fn uptime_check_task_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.uptime_check_task_id.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_check_enabled_requires_spec_flag() {
        let mut listener = Listener::new(
            "web-443",
            ListenerSpec {
                load_balancer_id: Some("lb-1".to_string()),
                port: 443,
                protocol: Protocol::Https,
                uptime_check: None,
            },
        );
        assert!(!listener.uptime_check_enabled());

        listener.spec.uptime_check = Some(UptimeCheckSpec {
            enabled: false,
            ..Default::default()
        });
        assert!(!listener.uptime_check_enabled());

        listener.spec.uptime_check = Some(UptimeCheckSpec {
            enabled: true,
            path: Some("/healthz".to_string()),
            ..Default::default()
        });
        assert!(listener.uptime_check_enabled());
    }

    #[test]
    fn task_id_reads_from_status() {
        let mut listener = Listener::new(
            "web-443",
            ListenerSpec {
                load_balancer_id: None,
                port: 443,
                protocol: Protocol::Https,
                uptime_check: None,
            },
        );
        assert_eq!(listener.uptime_check_task_id(), None);

        listener.status = Some(ListenerStatus {
            state: Some(ListenerState::Synced),
            uptime_check_task_id: Some("task-42".to_string()),
            message: None,
        });
        assert_eq!(listener.uptime_check_task_id(), Some("task-42"));
    }
}
