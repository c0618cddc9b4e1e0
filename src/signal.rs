//! Completion signalling between harness units and the orchestrator
//!
//! Every spawned unit owns one [`ReadySignal`]. The orchestrator owns the
//! matching [`Rendezvous`] and waits for one report per unit. A unit that
//! exits without reporting (early return, panic, abort) still reports once,
//! through `Drop`, using the fallback it was created with.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::endpoint::IpFamily;
use crate::failover::FailoverOutcome;
use crate::Error;

/// Identity of a spawned unit, used in logs and event messages
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum UnitId {
    /// Long-lived connection actor
    Actor {
        /// Target family
        family: IpFamily,
        /// Index within the family
        index: usize,
    },
    /// Repeated short-session spawner
    Spawner {
        /// Target family
        family: IpFamily,
        /// Index within the family
        index: usize,
    },
    /// The failover trigger
    Failover,
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Actor { family, index } => write!(f, "actor-{}-{}", family, index),
            Self::Spawner { family, index } => write!(f, "spawner-{}-{}", family, index),
            Self::Failover => f.write_str("failover"),
        }
    }
}

/// What a unit reports when it finishes
#[derive(Clone, Debug)]
pub enum UnitReport {
    /// A probe unit stopped
    Probe {
        /// Which unit
        unit: UnitId,
    },
    /// The failover trigger finished with this outcome
    Failover(FailoverOutcome),
}

/// One-shot "I'm done" handle owned by a unit
pub struct ReadySignal {
    tx: mpsc::UnboundedSender<UnitReport>,
    fallback: Option<UnitReport>,
}

impl ReadySignal {
    /// Create a signal that reports `fallback` if dropped without completing
    pub fn new(tx: mpsc::UnboundedSender<UnitReport>, fallback: UnitReport) -> Self {
        Self {
            tx,
            fallback: Some(fallback),
        }
    }

    /// Report completion
    pub fn complete(mut self, report: UnitReport) {
        self.fallback = None;
        self.send(report);
    }

    fn send(&self, report: UnitReport) {
        // Receiver gone means the orchestrator already gave up
        if self.tx.send(report).is_err() {
            debug!("Rendezvous closed before unit reported ready");
        }
    }
}

impl Drop for ReadySignal {
    fn drop(&mut self) {
        if let Some(report) = self.fallback.take() {
            warn!(?report, "Unit exited without reporting, sending fallback");
            self.send(report);
        }
    }
}

/// Orchestrator side: collects one report per unit
pub struct Rendezvous {
    tx: mpsc::UnboundedSender<UnitReport>,
    rx: mpsc::UnboundedReceiver<UnitReport>,
}

impl Default for Rendezvous {
    fn default() -> Self {
        Self::new()
    }
}

impl Rendezvous {
    /// Create an empty rendezvous
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Hand out a signal for a new unit
    pub fn signal(&self, fallback: UnitReport) -> ReadySignal {
        ReadySignal::new(self.tx.clone(), fallback)
    }

    /// Wait until `expected` reports arrive or `timeout` elapses
    pub async fn wait(
        &mut self,
        expected: usize,
        timeout: Duration,
    ) -> Result<Vec<UnitReport>, Error> {
        let mut reports = Vec::with_capacity(expected);
        let deadline = tokio::time::Instant::now() + timeout;

        while reports.len() < expected {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(report)) => {
                    debug!(
                        received = reports.len() + 1,
                        expected, "Unit reported ready"
                    );
                    reports.push(report);
                }
                // Unreachable while we hold `tx`, but never spin on a closed channel
                Ok(None) => {
                    return Err(Error::internal_with_context(
                        "rendezvous",
                        "ready channel closed",
                    ))
                }
                Err(_) => {
                    return Err(Error::GlobalTimeout {
                        elapsed: timeout,
                        outstanding: expected - reports.len(),
                    })
                }
            }
        }

        Ok(reports)
    }
}
