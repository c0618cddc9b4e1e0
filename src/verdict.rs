//! Pass/fail policy for a harness run
//!
//! The policy is deliberately asymmetric:
//!
//! - **Single connection**: an already-established session must survive the
//!   failover, so any recorded failure fails the run.
//! - **Multiple connections**: new sessions arriving while the load balancer
//!   reprograms may fail, up to `threshold_percent` of all attempts.
//!
//! A failed failover procedure fails the run regardless of traffic.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::failover::{FailoverOutcome, FailoverPhase};
use crate::harness::ProbeMode;
use crate::stats::{Event, StatsSnapshot};

/// Which policy a failed run violated
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// The backend was not replaced cleanly
    FailoverFailed {
        /// Phase that failed
        phase: Option<FailoverPhase>,
        /// Error text from that phase
        error: Option<String>,
    },
    /// Single-connection run recorded failures
    ZeroToleranceBreach {
        /// Failures recorded
        failures: u64,
    },
    /// Multiple-connection run exceeded the failure-rate threshold
    RateThresholdBreach {
        /// Observed failure rate
        rate_percent: f64,
        /// Allowed failure rate
        threshold_percent: f64,
    },
    /// Multiple-connection run made no attempts, so no rate exists
    NoTraffic,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailoverFailed { phase, error } => write!(
                f,
                "failover procedure failed in phase {}: {}",
                phase.map(|p| p.to_string()).unwrap_or_else(|| "unknown".into()),
                error.as_deref().unwrap_or("no error recorded")
            ),
            Self::ZeroToleranceBreach { failures } => write!(
                f,
                "established session dropped: {} failure(s) with zero tolerance",
                failures
            ),
            Self::RateThresholdBreach {
                rate_percent,
                threshold_percent,
            } => write!(
                f,
                "failure rate {:.3}% exceeds threshold {:.3}%",
                rate_percent, threshold_percent
            ),
            Self::NoTraffic => f.write_str("no connection attempts were recorded"),
        }
    }
}

/// Final result of a harness run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the run passed
    pub passed: bool,
    /// Probe mode the run used
    pub mode: ProbeMode,
    /// Attempts recorded
    pub total_attempts: u64,
    /// Successful attempts
    pub successes: u64,
    /// Failed attempts of any kind
    pub failures: u64,
    /// Resolve/dial failures
    pub failed_dial: u64,
    /// Write failures
    pub failed_write: u64,
    /// Read failures
    pub failed_read: u64,
    /// Failure rate in percent, if anything was attempted
    pub failure_rate_percent: Option<f64>,
    /// Violated policy, if the run failed
    pub violation: Option<Violation>,
    /// Failover outcome the verdict was computed from
    pub failover: FailoverOutcome,
    /// Earliest failure
    pub first_failure: Option<Event>,
    /// Latest failure
    pub last_failure: Option<Event>,
    /// Earliest success
    pub first_success: Option<Event>,
    /// Latest success
    pub last_success: Option<Event>,
    /// Run duration in milliseconds
    pub duration_ms: Option<i64>,
}

/// Convert a percentage threshold to parts per million
fn threshold_ppm(threshold_percent: f64) -> u128 {
    (threshold_percent * 10_000.0).round().max(0.0) as u128
}

/// Whether `failures / total` is within `threshold_percent`, compared exactly
fn within_threshold(failures: u64, total: u64, threshold_percent: f64) -> bool {
    // failures / total * 100 <= threshold  <=>  failures * 1e6 <= total * threshold * 1e4
    (failures as u128) * 1_000_000 <= (total as u128) * threshold_ppm(threshold_percent)
}

/// Evaluate a finished run
pub fn evaluate(
    mode: ProbeMode,
    threshold_percent: f64,
    failover: &FailoverOutcome,
    stats: &StatsSnapshot,
) -> Verdict {
    let failures = stats.failure_count();

    let violation = if failover.restart_failed {
        Some(Violation::FailoverFailed {
            phase: failover.failed_phase,
            error: failover.error.clone(),
        })
    } else {
        match mode {
            ProbeMode::SingleConnection if failures > 0 => {
                Some(Violation::ZeroToleranceBreach { failures })
            }
            ProbeMode::SingleConnection => None,
            ProbeMode::MultipleConnections if stats.total_attempts == 0 => {
                Some(Violation::NoTraffic)
            }
            ProbeMode::MultipleConnections => {
                if within_threshold(failures, stats.total_attempts, threshold_percent) {
                    None
                } else {
                    Some(Violation::RateThresholdBreach {
                        rate_percent: stats.failure_rate_percent().unwrap_or_default(),
                        threshold_percent,
                    })
                }
            }
        }
    };

    Verdict {
        passed: violation.is_none(),
        mode,
        total_attempts: stats.total_attempts,
        successes: stats.success_count(),
        failures,
        failed_dial: stats.failed_dial.len() as u64,
        failed_write: stats.failed_write.len() as u64,
        failed_read: stats.failed_read.len() as u64,
        failure_rate_percent: stats.failure_rate_percent(),
        violation,
        failover: failover.clone(),
        first_failure: stats.first_failure().cloned(),
        last_failure: stats.last_failure().cloned(),
        first_success: stats.first_success().cloned(),
        last_success: stats.last_success().cloned(),
        duration_ms: stats.duration().map(|d| d.num_milliseconds()),
    }
}

fn write_event(f: &mut fmt::Formatter<'_>, label: &str, event: &Option<Event>) -> fmt::Result {
    if let Some(event) = event {
        writeln!(f, "  {:<14} {} {}", label, event.timestamp.to_rfc3339(), event.message)?;
    }
    Ok(())
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "graceful restart ({}): {}",
            self.mode,
            if self.passed { "PASS" } else { "FAIL" }
        )?;
        if let Some(violation) = &self.violation {
            writeln!(f, "  reason: {}", violation)?;
        }
        writeln!(
            f,
            "  attempts: {}  successes: {}  failures: {} (dial {}, write {}, read {})",
            self.total_attempts,
            self.successes,
            self.failures,
            self.failed_dial,
            self.failed_write,
            self.failed_read
        )?;
        if let Some(rate) = self.failure_rate_percent {
            writeln!(f, "  failure rate: {:.3}%", rate)?;
        }
        if let (Some(old), Some(new)) = (&self.failover.deleted, &self.failover.replacement) {
            writeln!(f, "  backend: {} -> {}", old.name, new.name)?;
        }
        if let Some(ms) = self.duration_ms {
            writeln!(f, "  duration: {}ms", ms)?;
        }
        write_event(f, "first failure:", &self.first_failure)?;
        write_event(f, "last failure:", &self.last_failure)?;
        write_event(f, "first success:", &self.first_success)?;
        write_event(f, "last success:", &self.last_success)
    }
}
