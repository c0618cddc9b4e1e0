//! Cluster capabilities consumed by the harness
//!
//! The harness never manages cluster objects itself. It needs exactly three
//! things from the cluster: the ingress addresses of the service under test,
//! the backing pods behind a label selector, and the ability to delete one of
//! them. [`ClusterOps`] is that seam; [`KubeCluster`] is the real client.

mod kube_cluster;

use std::net::IpAddr;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::Error;

pub use kube_cluster::KubeCluster;

/// A backing pod serving traffic for the virtual address
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    /// Pod name
    pub name: String,
    /// Pod UID; the identity that changes when the pod is replaced
    pub uid: String,
    /// Node the pod is scheduled on
    pub node: Option<String>,
    /// Whether the pod's Ready condition is True
    pub ready: bool,
    /// Whether the pod has a deletion timestamp
    pub terminating: bool,
}

impl Backend {
    /// Whether this backend is scheduled on `node`
    pub fn is_on(&self, node: &str) -> bool {
        self.node.as_deref() == Some(node)
    }
}

/// Externally reachable addresses of a service
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceIngress {
    /// Assigned virtual IPs (may be empty while the load balancer is pending)
    pub addresses: Vec<IpAddr>,
    /// First service port
    pub port: u16,
}

/// Trait abstracting the cluster operations the harness needs
///
/// Allows the failover trigger and orchestrator to run against a scripted
/// cluster in tests and a real API server in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterOps: Send + Sync {
    /// Get the ingress addresses and port of a service
    async fn service_ingress(&self, namespace: &str, name: &str) -> Result<ServiceIngress, Error>;

    /// List backing pods matching a label selector
    async fn list_backends(&self, namespace: &str, selector: &str) -> Result<Vec<Backend>, Error>;

    /// Delete a backing pod by name
    async fn delete_backend(&self, namespace: &str, name: &str) -> Result<(), Error>;
}
