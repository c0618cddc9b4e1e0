//! Loopback integration tests for the harness
//!
//! Each test runs a real echo server on 127.0.0.1 as the "service" and an
//! in-memory cluster whose backend deletion and replacement are scripted.
//! No Kubernetes cluster is needed.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use failover_probe::cluster::{Backend, ClusterOps, ServiceIngress};
use failover_probe::echo::EchoServer;
use failover_probe::failover::BackendSelector;
use failover_probe::harness::{Harness, HarnessConfig, ProbeMode, ServiceRef};
use failover_probe::verdict::Violation;
use failover_probe::Result;

const NODE: &str = "worker-0";

// =============================================================================
// Test Fixtures
// =============================================================================

/// How the fake cluster treats the service when the backend is deleted
#[derive(Clone, Copy)]
enum Restart {
    /// Traffic keeps flowing while the speaker is replaced
    Graceful,
    /// The echo server goes away with the speaker
    Ungraceful,
}

/// In-memory cluster with one speaker per node
struct LoopbackCluster {
    port: u16,
    restart: Restart,
    server: CancellationToken,
    backends: Mutex<Vec<Backend>>,
    generation: Mutex<u32>,
    /// How long a deletion takes to land, so traffic flows across it
    delete_latency: Duration,
}

impl LoopbackCluster {
    fn new(port: u16, server: CancellationToken, restart: Restart) -> Self {
        Self {
            port,
            restart,
            server,
            backends: Mutex::new(vec![
                speaker("speaker-a", "uid-a", NODE),
                speaker("speaker-b", "uid-b", "worker-1"),
            ]),
            generation: Mutex::new(0),
            delete_latency: Duration::from_millis(200),
        }
    }
}

fn speaker(name: &str, uid: &str, node: &str) -> Backend {
    Backend {
        name: name.to_string(),
        uid: uid.to_string(),
        node: Some(node.to_string()),
        ready: true,
        terminating: false,
    }
}

#[async_trait]
impl ClusterOps for LoopbackCluster {
    async fn service_ingress(&self, _namespace: &str, _name: &str) -> Result<ServiceIngress> {
        Ok(ServiceIngress {
            addresses: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
            port: self.port,
        })
    }

    async fn list_backends(&self, _namespace: &str, _selector: &str) -> Result<Vec<Backend>> {
        Ok(self.backends.lock().clone())
    }

    async fn delete_backend(&self, _namespace: &str, name: &str) -> Result<()> {
        tokio::time::sleep(self.delete_latency).await;
        if let Restart::Ungraceful = self.restart {
            self.server.cancel();
            tokio::time::sleep(self.delete_latency).await;
        }

        let generation = {
            let mut generation = self.generation.lock();
            *generation += 1;
            *generation
        };
        let mut backends = self.backends.lock();
        backends.retain(|b| b.name != name);
        backends.push(speaker(
            &format!("speaker-a-{generation}"),
            &format!("uid-a-{generation}"),
            NODE,
        ));
        Ok(())
    }
}

async fn echo_target() -> (u16, CancellationToken) {
    let server = EchoServer::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let port = server.local_addr().port();
    let cancel = CancellationToken::new();
    tokio::spawn(server.serve(cancel.clone()));
    (port, cancel)
}

fn config(mode: ProbeMode, connections: usize) -> HarnessConfig {
    let mut config = HarnessConfig::new(
        ServiceRef {
            namespace: "default".to_string(),
            name: "nginx-lb".to_string(),
        },
        BackendSelector {
            namespace: "metallb-system".to_string(),
            label_selector: "component=speaker".to_string(),
            node: NODE.to_string(),
        },
    );
    config.mode = mode;
    config.connections_per_family = connections;
    config.ingress_interval = Duration::from_millis(10);
    config.global_timeout = Duration::from_secs(30);
    config.probe.interval = Duration::from_millis(5);
    config.probe.dial_budget = Duration::from_secs(2);
    config.failover.delete_poll_interval = Duration::from_millis(10);
    config.failover.replacement_interval = Duration::from_millis(10);
    config.failover.ready_interval = Duration::from_millis(10);
    config
}

// =============================================================================
// Stories
// =============================================================================

/// Story: a long-lived session survives a graceful speaker restart
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn story_single_connection_survives_graceful_restart() {
    let (port, server) = echo_target().await;
    let cluster = Arc::new(LoopbackCluster::new(port, server.clone(), Restart::Graceful));

    let verdict = Harness::new(cluster.clone(), config(ProbeMode::SingleConnection, 1))
        .run()
        .await
        .unwrap();
    server.cancel();

    assert!(verdict.passed, "verdict: {verdict}");
    assert_eq!(verdict.failures, 0);
    assert!(verdict.successes > 0, "traffic should flow during the restart");
    assert_eq!(verdict.total_attempts, verdict.successes);
    assert!(!verdict.failover.restart_failed);
    assert_eq!(
        verdict.failover.deleted.as_ref().map(|b| b.name.as_str()),
        Some("speaker-a")
    );
    assert_eq!(
        verdict.failover.replacement.as_ref().map(|b| b.uid.as_str()),
        Some("uid-a-1")
    );

    // The speaker on the other node is untouched
    assert!(cluster
        .backends
        .lock()
        .iter()
        .any(|b| b.name == "speaker-b"));
}

/// Story: many concurrent spawners share the counter without losing updates
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn story_concurrent_spawners_keep_counts_consistent() {
    let (port, server) = echo_target().await;

    for _ in 0..2 {
        let cluster = Arc::new(LoopbackCluster::new(port, server.clone(), Restart::Graceful));
        let verdict = Harness::new(cluster, config(ProbeMode::MultipleConnections, 8))
            .run()
            .await
            .unwrap();

        assert!(verdict.passed, "verdict: {verdict}");
        assert!(verdict.total_attempts > 8);
        assert_eq!(
            verdict.total_attempts,
            verdict.successes + verdict.failures,
            "every attempt is either a success or a failure"
        );
        assert!(verdict.failure_rate_percent.is_some());
    }

    server.cancel();
}

/// Story: the service drops with the speaker, so the long-lived session breaks
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn story_ungraceful_restart_fails_single_connection() {
    let (port, server) = echo_target().await;
    let cluster = Arc::new(LoopbackCluster::new(port, server.clone(), Restart::Ungraceful));

    let verdict = Harness::new(cluster, config(ProbeMode::SingleConnection, 1))
        .run()
        .await
        .unwrap();

    assert!(!verdict.passed);
    // The failover itself went fine; the traffic did not
    assert!(!verdict.failover.restart_failed);
    assert!(
        matches!(verdict.violation, Some(Violation::ZeroToleranceBreach { failures }) if failures >= 1),
        "violation: {:?}",
        verdict.violation
    );
    assert!(verdict.first_failure.is_some());
    assert!(verdict.successes > 0, "traffic flowed before the restart");
}

/// Story: the report serializes to JSON for downstream tooling
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn story_verdict_serializes_for_reports() {
    let (port, server) = echo_target().await;
    let cluster = Arc::new(LoopbackCluster::new(port, server.clone(), Restart::Graceful));

    let verdict = Harness::new(cluster, config(ProbeMode::MultipleConnections, 2))
        .run()
        .await
        .unwrap();
    server.cancel();

    let json = serde_json::to_value(&verdict).unwrap();
    assert_eq!(json["passed"], serde_json::json!(true));
    assert_eq!(json["mode"], serde_json::json!("multiple"));
    assert!(json["total_attempts"].as_u64().unwrap() > 0);
    assert_eq!(json["failover"]["restart_failed"], serde_json::json!(false));
}
