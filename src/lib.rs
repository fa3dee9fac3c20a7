//! Portgate: Kubernetes operator reconciling Ingress resources into cloud
//! load-balancer listeners.
//!
//! The operator keeps an incremental [`cache::DependencyCache`] mapping
//! Services and workloads to the Ingresses that reference them, and uses it
//! to re-reconcile Ingresses when dependent resources (Endpoints, Services,
//! Pods, multi-cluster endpoint slices) change.

pub mod cache;
pub mod cleanup;
pub mod controller;
pub mod crd;
pub mod error;
pub mod events;
pub mod filters;
pub mod metrics;
pub mod predicate;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group for all portgate CRDs
pub const API_GROUP: &str = "portgate.io";

/// Finalizer on Ingress resources guarding listener cleanup
pub const INGRESS_FINALIZER: &str = "portgate.io/listener-cleanup";

/// Finalizer on Listener resources guarding uptime-check task cleanup
pub const UPTIME_FINALIZER: &str = "portgate.io/uptime-check";

/// Label carrying the owning load-balancer id on Listener resources
pub const LB_ID_LABEL: &str = "portgate.io/load-balancer-id";

/// Pod annotation carrying the load-balance weight for backend distribution
pub const WEIGHT_ANNOTATION: &str = "portgate.io/load-balance-weight";

/// Field manager name used for server-side patches
pub const FIELD_MANAGER: &str = "portgate-controller";
