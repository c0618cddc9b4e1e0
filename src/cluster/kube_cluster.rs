//! [`ClusterOps`] backed by the Kubernetes API

use std::net::IpAddr;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{Api, DeleteParams, ListParams};
use kube::{Client, ResourceExt};
use tracing::{debug, warn};

use super::{Backend, ClusterOps, ServiceIngress};
use crate::kube_utils::{has_condition, CONDITION_READY};
use crate::Error;

/// Real cluster access through a kube client
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Convert a pod into the harness's view of a backend
pub(crate) fn backend_from_pod(pod: &Pod) -> Backend {
    let conditions = pod.status.as_ref().and_then(|s| s.conditions.as_ref());
    Backend {
        name: pod.name_any(),
        uid: pod.uid().unwrap_or_default(),
        node: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
        ready: has_condition(conditions.map(|c| c.as_slice()), CONDITION_READY),
        terminating: pod.metadata.deletion_timestamp.is_some(),
    }
}

/// Extract load-balancer ingress IPs and the first port from a service
pub(crate) fn ingress_from_service(service: &Service) -> ServiceIngress {
    let port = service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .and_then(|ports| ports.first())
        .map(|p| p.port)
        .and_then(|p| u16::try_from(p).ok())
        .unwrap_or_default();

    let addresses = service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map(|ingress| {
            ingress
                .iter()
                .filter_map(|i| i.ip.as_deref())
                .filter_map(|ip| match ip.parse::<IpAddr>() {
                    Ok(addr) => Some(addr),
                    Err(e) => {
                        warn!(ip, error = %e, "Ignoring unparseable ingress IP");
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    ServiceIngress { addresses, port }
}

#[async_trait]
impl ClusterOps for KubeCluster {
    async fn service_ingress(&self, namespace: &str, name: &str) -> Result<ServiceIngress, Error> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let service = services.get(name).await?;
        let ingress = ingress_from_service(&service);
        debug!(
            service = name,
            namespace,
            addresses = ?ingress.addresses,
            port = ingress.port,
            "Fetched service ingress"
        );
        Ok(ingress)
    }

    async fn list_backends(&self, namespace: &str, selector: &str) -> Result<Vec<Backend>, Error> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods.list(&ListParams::default().labels(selector)).await?;
        Ok(list.items.iter().map(backend_from_pod).collect())
    }

    async fn delete_backend(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        pods.delete(name, &DeleteParams::default()).await?;
        debug!(pod = name, namespace, "Delete request accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        LoadBalancerIngress, LoadBalancerStatus, PodCondition, PodSpec, PodStatus, ServicePort,
        ServiceSpec, ServiceStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn speaker_pod(name: &str, node: &str, ready: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                uid: Some(format!("uid-{name}")),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some(node.to_string()),
                ..Default::default()
            }),
            status: Some(PodStatus {
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: ready.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_backend_from_ready_pod() {
        let backend = backend_from_pod(&speaker_pod("speaker-abc", "worker-0", "True"));
        assert_eq!(backend.name, "speaker-abc");
        assert_eq!(backend.uid, "uid-speaker-abc");
        assert!(backend.is_on("worker-0"));
        assert!(!backend.is_on("worker-1"));
        assert!(backend.ready);
        assert!(!backend.terminating);
    }

    #[test]
    fn test_backend_from_terminating_pod() {
        let mut pod = speaker_pod("speaker-abc", "worker-0", "False");
        pod.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        let backend = backend_from_pod(&pod);
        assert!(!backend.ready);
        assert!(backend.terminating);
    }

    #[test]
    fn test_ingress_from_dual_stack_service() {
        let service = Service {
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    port: 80,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: Some(ServiceStatus {
                load_balancer: Some(LoadBalancerStatus {
                    ingress: Some(vec![
                        LoadBalancerIngress {
                            ip: Some("10.46.81.10".to_string()),
                            ..Default::default()
                        },
                        LoadBalancerIngress {
                            ip: Some("2001:db8::10".to_string()),
                            ..Default::default()
                        },
                        LoadBalancerIngress {
                            hostname: Some("lb.example.com".to_string()),
                            ..Default::default()
                        },
                    ]),
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let ingress = ingress_from_service(&service);
        assert_eq!(ingress.port, 80);
        assert_eq!(ingress.addresses.len(), 2);
        assert!(ingress.addresses[0].is_ipv4());
        assert!(ingress.addresses[1].is_ipv6());
    }

    #[test]
    fn test_ingress_pending_load_balancer() {
        let ingress = ingress_from_service(&Service::default());
        assert!(ingress.addresses.is_empty());
        assert_eq!(ingress.port, 0);
    }
}
