//! Error types for the failover harness
//!
//! Per-connection failures are not errors: probes record them as events in the
//! [`Counter`](crate::stats::Counter). The variants here cover the failover
//! procedure, target resolution, configuration and the harness-level timeout.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for harness operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Target address could not be resolved or the service has no usable ingress
    #[error("resolve error for {target}: {message}")]
    Resolve {
        /// Endpoint or service being resolved
        target: String,
        /// Description of what failed
        message: String,
    },

    /// No backing pod was found on the target node
    #[error("failover locate error on node {node}: {message}")]
    FailoverLocate {
        /// Node the backend was expected on
        node: String,
        /// Description of what failed
        message: String,
    },

    /// Deleting the located backend failed or was not acknowledged in time
    #[error("failover delete error for {backend}: {message}")]
    FailoverDelete {
        /// Name of the backend being deleted
        backend: String,
        /// Description of what failed
        message: String,
    },

    /// No replacement backend appeared on the node in time
    #[error("failover replacement timeout on node {node}: {message}")]
    FailoverReplacement {
        /// Node the replacement was expected on
        node: String,
        /// Description of what failed
        message: String,
    },

    /// The replacement backend never became ready
    #[error("failover readiness error for {backend}: {message}")]
    FailoverReadiness {
        /// Name of the replacement backend
        backend: String,
        /// Description of what failed
        message: String,
    },

    /// Probing units and the failover trigger did not all finish in time
    #[error("harness timed out after {elapsed:?} with {outstanding} unit(s) still running")]
    GlobalTimeout {
        /// Configured global timeout
        elapsed: Duration,
        /// Number of units that never signalled ready
        outstanding: usize,
    },

    /// Invalid harness configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
    },

    /// I/O error outside of the probe path (config files, reports, listeners)
    #[error("io error [{context}]: {source}")]
    Io {
        /// What was being done when the error occurred
        context: String,
        /// The underlying I/O error
        source: std::io::Error,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "poll_until", "rendezvous")
        context: String,
    },
}

impl Error {
    /// Create a resolve error for a target
    pub fn resolve(target: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Resolve {
            target: target.into(),
            message: msg.into(),
        }
    }

    /// Create a locate error for a node
    pub fn failover_locate(node: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::FailoverLocate {
            node: node.into(),
            message: msg.into(),
        }
    }

    /// Create a delete error for a backend
    pub fn failover_delete(backend: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::FailoverDelete {
            backend: backend.into(),
            message: msg.into(),
        }
    }

    /// Create a replacement timeout error for a node
    pub fn failover_replacement(node: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::FailoverReplacement {
            node: node.into(),
            message: msg.into(),
        }
    }

    /// Create a readiness error for a backend
    pub fn failover_readiness(backend: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::FailoverReadiness {
            backend: backend.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Wrap an I/O error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an internal error without specific context
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
}
