//! Statistics aggregator shared by every probing unit
//!
//! All probe tasks write into one [`Counter`] through an `Arc`. Each record
//! operation takes the lock once and updates the attempt total together with
//! the event sequences, so `successes + failures == total_attempts` holds
//! whenever the lock is free.
//!
//! Reading for a verdict is only meaningful once every unit has signalled
//! ready; [`Counter::snapshot`] copies the state out so the verdict code never
//! holds the lock.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One recorded probe outcome
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Human-readable description (unit, target, bytes or error)
    pub message: String,
    /// When the outcome was observed
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event stamped now
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Root cause bucket for a failed attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Address resolution or connection establishment failed
    Dial,
    /// Writing the request failed or wrote zero bytes
    Write,
    /// Reading the reply failed, timed out or hit EOF
    Read,
    /// Any other failure; only counted in the overall failure list
    Generic,
}

#[derive(Debug, Default)]
struct CounterState {
    total_attempts: u64,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    successes: Vec<Event>,
    failures: Vec<Event>,
    failed_dial: Vec<Event>,
    failed_read: Vec<Event>,
    failed_write: Vec<Event>,
}

/// Concurrency-safe attempt counter and event log
#[derive(Debug, Default)]
pub struct Counter {
    state: Mutex<CounterState>,
}

impl Counter {
    /// Create an empty counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the run's start time
    pub fn mark_start(&self) {
        self.state.lock().start = Some(Utc::now());
    }

    /// Record the run's end time; later calls overwrite earlier ones
    pub fn mark_end(&self) {
        self.state.lock().end = Some(Utc::now());
    }

    /// Record a successful attempt
    pub fn record_success(&self, message: impl Into<String>) {
        let event = Event::now(message);
        let mut state = self.state.lock();
        state.total_attempts += 1;
        state.successes.push(event);
    }

    /// Record a failed attempt under `kind`
    ///
    /// Specific kinds land in their own bucket and in the overall failure
    /// list.
    pub fn record_failure(&self, kind: FailureKind, message: impl Into<String>) {
        let event = Event::now(message);
        let mut state = self.state.lock();
        state.total_attempts += 1;
        match kind {
            FailureKind::Dial => state.failed_dial.push(event.clone()),
            FailureKind::Write => state.failed_write.push(event.clone()),
            FailureKind::Read => state.failed_read.push(event.clone()),
            FailureKind::Generic => {}
        }
        state.failures.push(event);
    }

    /// Number of attempts recorded so far
    pub fn total_attempts(&self) -> u64 {
        self.state.lock().total_attempts
    }

    /// Copy the current state out of the lock
    pub fn snapshot(&self) -> StatsSnapshot {
        let state = self.state.lock();
        StatsSnapshot {
            total_attempts: state.total_attempts,
            start: state.start,
            end: state.end,
            successes: state.successes.clone(),
            failures: state.failures.clone(),
            failed_dial: state.failed_dial.clone(),
            failed_read: state.failed_read.clone(),
            failed_write: state.failed_write.clone(),
        }
    }
}

/// Owned copy of a [`Counter`]'s state
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Attempts recorded
    pub total_attempts: u64,
    /// Run start
    pub start: Option<DateTime<Utc>>,
    /// Run end
    pub end: Option<DateTime<Utc>>,
    /// Successful attempts
    pub successes: Vec<Event>,
    /// Every failed attempt, regardless of kind
    pub failures: Vec<Event>,
    /// Resolve/dial failures
    pub failed_dial: Vec<Event>,
    /// Read failures
    pub failed_read: Vec<Event>,
    /// Write failures
    pub failed_write: Vec<Event>,
}

impl StatsSnapshot {
    /// Number of successes
    pub fn success_count(&self) -> u64 {
        self.successes.len() as u64
    }

    /// Number of failures
    pub fn failure_count(&self) -> u64 {
        self.failures.len() as u64
    }

    /// Failure rate in percent, or `None` when nothing was attempted
    pub fn failure_rate_percent(&self) -> Option<f64> {
        if self.total_attempts == 0 {
            return None;
        }
        Some(self.failure_count() as f64 / self.total_attempts as f64 * 100.0)
    }

    /// Whether the success and failure lists add up to the attempt total
    pub fn is_consistent(&self) -> bool {
        self.success_count() + self.failure_count() == self.total_attempts
    }

    /// Earliest recorded failure
    pub fn first_failure(&self) -> Option<&Event> {
        self.failures.first()
    }

    /// Latest recorded failure
    pub fn last_failure(&self) -> Option<&Event> {
        self.failures.last()
    }

    /// Earliest recorded success
    pub fn first_success(&self) -> Option<&Event> {
        self.successes.first()
    }

    /// Latest recorded success
    pub fn last_success(&self) -> Option<&Event> {
        self.successes.last()
    }

    /// Wall-clock duration between start and end, if both were recorded
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_success_increments_total() {
        let counter = Counter::new();
        counter.record_success("read 12 bytes");
        counter.record_success("read 12 bytes");

        let snap = counter.snapshot();
        assert_eq!(snap.total_attempts, 2);
        assert_eq!(snap.success_count(), 2);
        assert_eq!(snap.failure_count(), 0);
        assert!(snap.is_consistent());
    }

    #[test]
    fn test_specific_failures_are_double_booked() {
        let counter = Counter::new();
        counter.record_failure(FailureKind::Dial, "connection refused");
        counter.record_failure(FailureKind::Write, "broken pipe");
        counter.record_failure(FailureKind::Read, "deadline exceeded");
        counter.record_failure(FailureKind::Generic, "unexpected");

        let snap = counter.snapshot();
        assert_eq!(snap.total_attempts, 4);
        assert_eq!(snap.failure_count(), 4);
        assert_eq!(snap.failed_dial.len(), 1);
        assert_eq!(snap.failed_write.len(), 1);
        assert_eq!(snap.failed_read.len(), 1);
        assert_eq!(snap.first_failure().unwrap().message, "connection refused");
        assert_eq!(snap.last_failure().unwrap().message, "unexpected");
        assert!(snap.is_consistent());
    }

    #[test]
    fn test_failure_rate() {
        let counter = Counter::new();
        assert_eq!(counter.snapshot().failure_rate_percent(), None);

        for _ in 0..3 {
            counter.record_success("ok");
        }
        counter.record_failure(FailureKind::Read, "eof");

        let rate = counter.snapshot().failure_rate_percent().unwrap();
        assert!((rate - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_start_and_end_give_duration() {
        let counter = Counter::new();
        assert!(counter.snapshot().duration().is_none());
        counter.mark_start();
        counter.mark_end();
        let duration = counter.snapshot().duration().unwrap();
        assert!(duration >= chrono::Duration::zero());
    }

    #[test]
    fn test_concurrent_writers_lose_no_increments() {
        let counter = Arc::new(Counter::new());
        let writers = 16;
        let per_writer = 500;

        let handles: Vec<_> = (0..writers)
            .map(|w| {
                let counter = counter.clone();
                thread::spawn(move || {
                    for i in 0..per_writer {
                        if (w + i) % 10 == 0 {
                            counter.record_failure(FailureKind::Read, format!("w{w} i{i}"));
                        } else {
                            counter.record_success(format!("w{w} i{i}"));
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snap = counter.snapshot();
        assert_eq!(snap.total_attempts, (writers * per_writer) as u64);
        assert_eq!(snap.failure_count(), snap.failed_read.len() as u64);
        assert!(snap.is_consistent());
    }
}
