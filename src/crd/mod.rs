//! Custom Resource Definitions for portgate
//!
//! Three CRDs in the `portgate.io` group:
//! - [`Ingress`]: user-facing routing intent, translated into listeners
//! - [`Listener`]: one cloud load-balancer listener, owned by an Ingress
//! - [`MultiClusterEndpointSlice`]: endpoints imported from peer clusters

mod ingress;
mod listener;
mod multicluster;

pub use ingress::{
    HttpRoute, Ingress, IngressRule, IngressSpec, IngressStatus, PortMapping, Protocol,
    ServiceRoute, WorkloadRef,
};
pub use listener::{Listener, ListenerSpec, ListenerState, ListenerStatus, UptimeCheckSpec};
pub use multicluster::{
    MultiClusterEndpointSlice, MultiClusterEndpointSliceSpec, RemoteEndpoint,
};
