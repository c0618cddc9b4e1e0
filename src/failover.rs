//! Failover trigger: replaces the backend pod serving the target node
//!
//! The trigger walks a fixed state machine:
//!
//! ```text
//! Locating -> Deleting -> WaitingForReplacement -> WaitingReady -> Done
//!     \__________\________________\_______________________\____-> Failed
//! ```
//!
//! Whatever the result, the termination token is cancelled when the trigger
//! finishes so probing units always stop. A failed replacement is reported
//! as an outcome with `restart_failed = true`, never as a panic or error.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::cluster::{Backend, ClusterOps};
use crate::kube_utils::poll_until;
use crate::signal::{ReadySignal, UnitReport};
use crate::Error;

/// States of the failover procedure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailoverPhase {
    /// Finding the backend on the target node
    Locating,
    /// Deleting it and waiting for the deletion to land
    Deleting,
    /// Waiting for a new backend on the same node
    WaitingForReplacement,
    /// Waiting for the new backend to report Ready
    WaitingReady,
    /// Replacement is ready
    Done,
    /// Replacement procedure failed
    Failed,
}

impl fmt::Display for FailoverPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Locating => "Locating",
            Self::Deleting => "Deleting",
            Self::WaitingForReplacement => "WaitingForReplacement",
            Self::WaitingReady => "WaitingReady",
            Self::Done => "Done",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Timeouts and poll intervals for each phase
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailoverTimings {
    /// How long to wait for the deleted pod to disappear
    pub delete_timeout: Duration,
    /// Poll interval while waiting for deletion
    pub delete_poll_interval: Duration,
    /// Poll interval while waiting for a replacement
    pub replacement_interval: Duration,
    /// How long to wait for a replacement to be scheduled
    pub replacement_timeout: Duration,
    /// Poll interval while waiting for readiness
    pub ready_interval: Duration,
    /// How long to wait for the replacement to become ready
    pub ready_timeout: Duration,
}

impl Default for FailoverTimings {
    fn default() -> Self {
        Self {
            delete_timeout: Duration::from_secs(15),
            delete_poll_interval: Duration::from_secs(1),
            replacement_interval: Duration::from_secs(3),
            replacement_timeout: Duration::from_secs(90),
            ready_interval: Duration::from_secs(3),
            ready_timeout: Duration::from_secs(180),
        }
    }
}

/// Which backend pods are eligible for replacement
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSelector {
    /// Namespace the backend pods run in
    pub namespace: String,
    /// Label selector matching the backend pods
    pub label_selector: String,
    /// Node whose backend gets replaced
    pub node: String,
}

/// Result of one failover run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverOutcome {
    /// True when any phase failed
    pub restart_failed: bool,
    /// Phase that failed, if any
    pub failed_phase: Option<FailoverPhase>,
    /// Error text from the failed phase
    pub error: Option<String>,
    /// Backend that was deleted
    pub deleted: Option<Backend>,
    /// Backend that replaced it
    pub replacement: Option<Backend>,
}

impl FailoverOutcome {
    /// Outcome used when the trigger exits without reporting
    pub fn abandoned() -> Self {
        Self {
            restart_failed: true,
            failed_phase: Some(FailoverPhase::Failed),
            error: Some("failover trigger exited without reporting".to_string()),
            ..Default::default()
        }
    }
}

/// Deletes the backend on a node and waits for its replacement
pub struct FailoverTrigger<C: ?Sized> {
    cluster: Arc<C>,
    selector: BackendSelector,
    timings: FailoverTimings,
    stop: CancellationToken,
}

impl<C: ClusterOps + ?Sized> FailoverTrigger<C> {
    /// Create a trigger that cancels `stop` when it finishes
    pub fn new(
        cluster: Arc<C>,
        selector: BackendSelector,
        timings: FailoverTimings,
        stop: CancellationToken,
    ) -> Self {
        Self {
            cluster,
            selector,
            timings,
            stop,
        }
    }

    /// Run the failover, stop the probes and report to the orchestrator
    #[instrument(skip_all, fields(node = %self.selector.node))]
    pub async fn run(self, ready: ReadySignal) -> FailoverOutcome {
        // Cancels on every exit path, including panics inside `execute`
        let stop_guard = self.stop.clone().drop_guard();

        let outcome = self.execute().await;

        drop(stop_guard);
        info!(
            restart_failed = outcome.restart_failed,
            "Termination signal sent to probes"
        );

        ready.complete(UnitReport::Failover(outcome.clone()));
        outcome
    }

    /// Walk the state machine without signalling anyone
    pub async fn execute(&self) -> FailoverOutcome {
        let mut outcome = FailoverOutcome::default();

        match self.replace_backend(&mut outcome).await {
            Ok(()) => {
                info!(phase = %FailoverPhase::Done, "Backend replaced and ready");
            }
            Err((phase, e)) => {
                error!(
                    phase = %FailoverPhase::Failed,
                    failed_phase = %phase,
                    error = %e,
                    "Failover procedure failed"
                );
                outcome.restart_failed = true;
                outcome.failed_phase = Some(phase);
                outcome.error = Some(e.to_string());
            }
        }

        outcome
    }

    async fn replace_backend(
        &self,
        outcome: &mut FailoverOutcome,
    ) -> Result<(), (FailoverPhase, Error)> {
        use FailoverPhase::*;

        let old = self.enter(Locating).locate().await.map_err(|e| (Locating, e))?;

        self.enter(Deleting)
            .delete(&old)
            .await
            .map_err(|e| (Deleting, e))?;
        outcome.deleted = Some(old.clone());

        let new = self
            .enter(WaitingForReplacement)
            .wait_for_replacement(&old)
            .await
            .map_err(|e| (WaitingForReplacement, e))?;
        outcome.replacement = Some(new.clone());

        let ready = self
            .enter(WaitingReady)
            .wait_ready(&new)
            .await
            .map_err(|e| (WaitingReady, e))?;
        outcome.replacement = Some(ready);

        Ok(())
    }

    fn enter(&self, phase: FailoverPhase) -> &Self {
        info!(phase = %phase, "Failover phase");
        self
    }

    async fn list(&self) -> Result<Vec<Backend>, Error> {
        self.cluster
            .list_backends(&self.selector.namespace, &self.selector.label_selector)
            .await
    }

    async fn locate(&self) -> Result<Backend, Error> {
        let node = &self.selector.node;
        let backends = self
            .list()
            .await
            .map_err(|e| Error::failover_locate(node, format!("failed to list backends: {}", e)))?;

        backends
            .into_iter()
            .find(|b| b.is_on(node) && !b.terminating)
            .inspect(|b| info!(backend = %b.name, uid = %b.uid, "Located backend"))
            .ok_or_else(|| {
                Error::failover_locate(
                    node,
                    format!(
                        "no backend matching '{}' in namespace {}",
                        self.selector.label_selector, self.selector.namespace
                    ),
                )
            })
    }

    async fn delete(&self, old: &Backend) -> Result<(), Error> {
        self.cluster
            .delete_backend(&self.selector.namespace, &old.name)
            .await
            .map_err(|e| Error::failover_delete(&old.name, e.to_string()))?;

        let old_uid = old.uid.as_str();
        poll_until(
            self.timings.delete_timeout,
            self.timings.delete_poll_interval,
            format!("backend {} still present after delete", old.name),
            || async move {
                let backends = self.list().await?;
                Ok(!backends.iter().any(|b| b.uid == old_uid))
            },
        )
        .await
        .map_err(|e| Error::failover_delete(&old.name, e.to_string()))?;

        info!(backend = %old.name, "Backend deleted");
        Ok(())
    }

    async fn wait_for_replacement(&self, old: &Backend) -> Result<Backend, Error> {
        let node = self.selector.node.as_str();
        let old_uid = old.uid.as_str();
        let found: Mutex<Option<Backend>> = Mutex::new(None);
        let found_ref = &found;

        poll_until(
            self.timings.replacement_timeout,
            self.timings.replacement_interval,
            format!("no replacement for {} scheduled on {}", old.name, node),
            || async move {
                let backends = self.list().await?;
                let replacement = backends
                    .into_iter()
                    .find(|b| b.is_on(node) && !b.terminating && b.uid != old_uid);
                match replacement {
                    Some(b) => {
                        *found_ref.lock() = Some(b);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            },
        )
        .await
        .map_err(|e| Error::failover_replacement(node, e.to_string()))?;

        let replacement = found
            .into_inner()
            .ok_or_else(|| Error::failover_replacement(node, "replacement lost after poll"))?;
        info!(backend = %replacement.name, uid = %replacement.uid, "Replacement scheduled");
        Ok(replacement)
    }

    async fn wait_ready(&self, new: &Backend) -> Result<Backend, Error> {
        let new_uid = new.uid.as_str();
        let found: Mutex<Option<Backend>> = Mutex::new(None);
        let found_ref = &found;

        poll_until(
            self.timings.ready_timeout,
            self.timings.ready_interval,
            format!("backend {} did not become ready", new.name),
            || async move {
                let backends = self.list().await?;
                match backends.into_iter().find(|b| b.uid == new_uid && b.ready) {
                    Some(b) => {
                        *found_ref.lock() = Some(b);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            },
        )
        .await
        .map_err(|e| Error::failover_readiness(&new.name, e.to_string()))?;

        let ready = found
            .into_inner()
            .ok_or_else(|| Error::failover_readiness(&new.name, "ready backend lost after poll"))?;
        info!(backend = %ready.name, "Replacement ready");
        Ok(ready)
    }
}
