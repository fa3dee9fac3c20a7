//! Error types for the portgate operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries contextual information such as the resource the
//! operation was acting on and the underlying cause.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for portgate operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Ingress translation/sync error
    #[error("sync error for ingress {ingress}: {message}")]
    Sync {
        /// Namespaced name of the Ingress being synced
        ingress: String,
        /// Description of what failed
        message: String,
    },

    /// Uptime-check registration error
    #[error("uptime check error for listener {listener}: {message}")]
    UptimeCheck {
        /// Namespaced name of the Listener
        listener: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g. "reconciler", "worker")
        context: String,
    },
}

impl Error {
    /// Create a sync error for a specific Ingress
    pub fn sync_for(ingress: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Sync {
            ingress: ingress.into(),
            message: msg.into(),
        }
    }

    /// Create an uptime-check error for a specific Listener
    pub fn uptime_for(listener: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::UptimeCheck {
            listener: listener.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Serialization errors are not retryable (require a config or code fix).
    /// Sync and uptime-check errors are transient by default. Kubernetes
    /// errors depend on the status code.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // Retry on transient K8s errors (connection, timeout, 409, 5xx).
                // Don't retry on other 4xx errors (validation, not found, etc.)
                match source {
                    kube::Error::Api(ae) if ae.code == 409 => true,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code) => false,
                    _ => true,
                }
            }
            Error::Sync { .. } => true,
            Error::UptimeCheck { .. } => true,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Check if this error is a Kubernetes write conflict (HTTP 409)
    ///
    /// Conflicts come from optimistic concurrency on read-modify-write
    /// updates and are safe to retry immediately after re-reading.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::Kube {
                source: kube::Error::Api(ae)
            } if ae.code == 409
        )
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}
