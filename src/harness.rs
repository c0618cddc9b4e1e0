//! Harness orchestrator
//!
//! Resolves the service's virtual addresses, starts the probing units and the
//! failover trigger side by side, waits for all of them to report ready
//! (bounded by a global timeout) and turns the aggregated statistics into a
//! [`Verdict`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::cluster::ClusterOps;
use crate::endpoint::{select_targets, IpFamilyPolicy, TargetEndpoint};
use crate::failover::{BackendSelector, FailoverOutcome, FailoverTimings, FailoverTrigger};
use crate::kube_utils::poll_until;
use crate::probe::{ConnectionActor, ProbeTimings, SessionSpawner};
use crate::signal::{Rendezvous, UnitId, UnitReport};
use crate::stats::Counter;
use crate::verdict::{evaluate, Verdict};
use crate::{Error, Result};

/// Default global timeout for one run
pub const DEFAULT_GLOBAL_TIMEOUT: Duration = Duration::from_secs(15 * 60);
/// Default failure-rate threshold for multiple-connection runs, in percent
pub const DEFAULT_MAX_FAILURE_RATE_PERCENT: f64 = 0.5;

/// How traffic is generated during the failover
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeMode {
    /// One long-lived session per unit; zero tolerance for failures
    #[default]
    #[serde(rename = "single")]
    SingleConnection,
    /// A new session per request; failure rate must stay under the threshold
    #[serde(rename = "multiple")]
    MultipleConnections,
}

impl fmt::Display for ProbeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleConnection => f.write_str("single connection"),
            Self::MultipleConnections => f.write_str("multiple connections"),
        }
    }
}

impl std::str::FromStr for ProbeMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(Self::SingleConnection),
            "multiple" | "multi" => Ok(Self::MultipleConnections),
            other => Err(Error::config(format!(
                "unknown probe mode '{}', expected single or multiple",
                other
            ))),
        }
    }
}

/// Service whose virtual addresses are probed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRef {
    /// Service namespace
    pub namespace: String,
    /// Service name
    pub name: String,
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Runtime configuration for one harness run
#[derive(Clone, Debug)]
pub struct HarnessConfig {
    /// Service under test
    pub service: ServiceRef,
    /// Backend that gets replaced
    pub backends: BackendSelector,
    /// Traffic mode
    pub mode: ProbeMode,
    /// Address families to probe
    pub families: IpFamilyPolicy,
    /// Probe units started per family
    pub connections_per_family: usize,
    /// How long to wait for the service to get ingress addresses
    pub ingress_timeout: Duration,
    /// Poll interval while waiting for ingress
    pub ingress_interval: Duration,
    /// Bound on the whole probing + failover phase
    pub global_timeout: Duration,
    /// Allowed failure rate in multiple-connection mode, in percent
    pub max_failure_rate_percent: f64,
    /// Probe timeouts and pacing
    pub probe: ProbeTimings,
    /// Failover timeouts and intervals
    pub failover: FailoverTimings,
}

impl HarnessConfig {
    /// Config with default timings for a service and backend selector
    pub fn new(service: ServiceRef, backends: BackendSelector) -> Self {
        Self {
            service,
            backends,
            mode: ProbeMode::default(),
            families: IpFamilyPolicy::default(),
            connections_per_family: 1,
            ingress_timeout: Duration::from_secs(120),
            ingress_interval: Duration::from_secs(3),
            global_timeout: DEFAULT_GLOBAL_TIMEOUT,
            max_failure_rate_percent: DEFAULT_MAX_FAILURE_RATE_PERCENT,
            probe: ProbeTimings::default(),
            failover: FailoverTimings::default(),
        }
    }
}

/// Runs probes and a failover concurrently and judges the result
pub struct Harness<C: ?Sized> {
    cluster: Arc<C>,
    config: HarnessConfig,
}

impl<C: ClusterOps + ?Sized + 'static> Harness<C> {
    /// Create a harness
    pub fn new(cluster: Arc<C>, config: HarnessConfig) -> Self {
        Self { cluster, config }
    }

    /// Configuration this harness runs with
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Execute one run
    ///
    /// Returns `Err` only when targets cannot be resolved or the global
    /// timeout elapses. Failed traffic or a failed failover produce a failing
    /// [`Verdict`].
    #[instrument(skip_all, fields(service = %self.config.service, mode = %self.config.mode))]
    pub async fn run(&self) -> Result<Verdict> {
        let targets = self.resolve_targets().await?;
        info!(?targets, "Resolved targets");

        let stats = Arc::new(Counter::new());
        let stop = CancellationToken::new();
        let mut rendezvous = Rendezvous::new();

        stats.mark_start();
        let mut tasks = self.spawn_probes(&targets, &stats, &stop, &rendezvous);
        tasks.push(self.spawn_failover(&stop, &rendezvous));
        let expected = tasks.len();
        info!(units = expected, "Probing and failover started");

        let reports = match rendezvous.wait(expected, self.config.global_timeout).await {
            Ok(reports) => reports,
            Err(e) => {
                error!(error = %e, "Harness did not finish in time, aborting units");
                stop.cancel();
                for task in &tasks {
                    task.abort();
                }
                return Err(e);
            }
        };
        stats.mark_end();

        let failover = reports
            .into_iter()
            .find_map(|report| match report {
                UnitReport::Failover(outcome) => Some(outcome),
                UnitReport::Probe { .. } => None,
            })
            .unwrap_or_else(FailoverOutcome::abandoned);

        let snapshot = stats.snapshot();
        if !snapshot.is_consistent() {
            warn!(
                total = snapshot.total_attempts,
                successes = snapshot.success_count(),
                failures = snapshot.failure_count(),
                "Attempt counts do not add up"
            );
        }

        let verdict = evaluate(
            self.config.mode,
            self.config.max_failure_rate_percent,
            &failover,
            &snapshot,
        );
        info!(
            passed = verdict.passed,
            total = verdict.total_attempts,
            failures = verdict.failures,
            "Verdict computed"
        );
        Ok(verdict)
    }

    /// Wait for the service to expose an address for every required family
    async fn resolve_targets(&self) -> Result<Vec<TargetEndpoint>> {
        let service = &self.config.service;
        let families = self.config.families;
        let cluster = &self.cluster;
        let resolved: Mutex<Option<Vec<TargetEndpoint>>> = Mutex::new(None);
        let resolved_ref = &resolved;

        poll_until(
            self.config.ingress_timeout,
            self.config.ingress_interval,
            format!("service {} has no usable ingress for {:?}", service, families),
            || async move {
                let ingress = cluster
                    .service_ingress(&service.namespace, &service.name)
                    .await?;
                if ingress.port == 0 {
                    return Ok(false);
                }
                match select_targets(&ingress.addresses, ingress.port, families) {
                    Ok(targets) => {
                        *resolved_ref.lock() = Some(targets);
                        Ok(true)
                    }
                    Err(_) => Ok(false),
                }
            },
        )
        .await
        .map_err(|e| Error::resolve(service.to_string(), e.to_string()))?;

        resolved
            .into_inner()
            .ok_or_else(|| Error::resolve(service.to_string(), "targets lost after poll"))
    }

    fn spawn_probes(
        &self,
        targets: &[TargetEndpoint],
        stats: &Arc<Counter>,
        stop: &CancellationToken,
        rendezvous: &Rendezvous,
    ) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        for target in targets {
            let family = target.family();
            for index in 0..self.config.connections_per_family {
                let handle = match self.config.mode {
                    ProbeMode::SingleConnection => {
                        let unit = UnitId::Actor { family, index };
                        let ready = rendezvous.signal(UnitReport::Probe { unit: unit.clone() });
                        let actor = ConnectionActor::new(
                            unit,
                            *target,
                            stats.clone(),
                            stop.clone(),
                            self.config.probe.clone(),
                        );
                        tokio::spawn(actor.run(ready))
                    }
                    ProbeMode::MultipleConnections => {
                        let unit = UnitId::Spawner { family, index };
                        let ready = rendezvous.signal(UnitReport::Probe { unit: unit.clone() });
                        let spawner = SessionSpawner::new(
                            unit,
                            *target,
                            stats.clone(),
                            stop.clone(),
                            self.config.probe.clone(),
                        );
                        tokio::spawn(spawner.run(ready))
                    }
                };
                tasks.push(handle);
            }
        }

        tasks
    }

    fn spawn_failover(&self, stop: &CancellationToken, rendezvous: &Rendezvous) -> JoinHandle<()> {
        let ready = rendezvous.signal(UnitReport::Failover(FailoverOutcome::abandoned()));
        let trigger = FailoverTrigger::new(
            self.cluster.clone(),
            self.config.backends.clone(),
            self.config.failover.clone(),
            stop.clone(),
        );
        tokio::spawn(async move {
            trigger.run(ready).await;
        })
    }
}
