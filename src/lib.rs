//! failover-probe - graceful-restart connectivity harness
//!
//! Checks whether a load-balanced service survives the replacement of the pod
//! that announces it. While live TCP traffic flows to the service's virtual
//! address, the backend pod on a chosen node is deleted and the harness waits
//! for its replacement. The traffic statistics then decide the verdict.
//!
//! # Architecture
//!
//! - Probe units ([`probe::ConnectionActor`], [`probe::SessionSpawner`]) generate
//!   traffic and record every attempt into a shared [`stats::Counter`]
//! - The [`failover::FailoverTrigger`] replaces the backend and cancels the
//!   termination token when done, successful or not
//! - The [`harness::Harness`] starts everything, waits for every unit to report
//!   ready under a global timeout and evaluates [`verdict::Verdict`]
//!
//! # Modules
//!
//! - [`endpoint`] - Target endpoints and address-family selection
//! - [`stats`] - Concurrency-safe attempt counter and event log
//! - [`probe`] - Connection actor and session spawner
//! - [`signal`] - Ready signals and the orchestrator rendezvous
//! - [`failover`] - Backend replacement state machine
//! - [`cluster`] - Cluster capabilities and the kube-backed implementation
//! - [`harness`] - Orchestrator
//! - [`verdict`] - Pass/fail policy
//! - [`config`] - YAML settings
//! - [`echo`] - Loopback echo target
//! - [`telemetry`] - Tracing subscriber setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod cluster;
pub mod config;
pub mod echo;
pub mod endpoint;
pub mod error;
pub mod failover;
pub mod harness;
pub mod kube_utils;
pub mod probe;
pub mod retry;
pub mod signal;
pub mod stats;
pub mod telemetry;
pub mod verdict;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
