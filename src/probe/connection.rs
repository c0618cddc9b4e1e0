//! Long-lived session probe

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, trace, warn};

use super::{
    close, dial, enable_keepalive, preview, read_reply, request_payload, write_request,
    ProbeTimings, READ_BUFFER_SIZE,
};
use crate::endpoint::{self, TargetEndpoint};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::signal::{ReadySignal, UnitId, UnitReport};
use crate::stats::{Counter, FailureKind};

/// Holds one TCP session open and exchanges traffic on it until stopped
pub struct ConnectionActor {
    unit: UnitId,
    target: TargetEndpoint,
    stats: Arc<Counter>,
    stop: CancellationToken,
    timings: ProbeTimings,
}

impl ConnectionActor {
    /// Create an actor for `target`
    pub fn new(
        unit: UnitId,
        target: TargetEndpoint,
        stats: Arc<Counter>,
        stop: CancellationToken,
        timings: ProbeTimings,
    ) -> Self {
        Self {
            unit,
            target,
            stats,
            stop,
            timings,
        }
    }

    /// Connect, exchange traffic until stopped or broken, then report ready
    #[instrument(skip_all, fields(unit = %self.unit, target = %self.target))]
    pub async fn run(self, ready: ReadySignal) {
        if let Some(stream) = self.establish().await {
            self.exchange(stream).await;
        }
        info!("Connection actor finished");
        ready.complete(UnitReport::Probe {
            unit: self.unit.clone(),
        });
    }

    fn fail(&self, kind: FailureKind, message: String) {
        warn!(?kind, %message, "Probe failure");
        self.stats.record_failure(
            kind,
            format!("{} {}: {}", self.unit, self.target, message),
        );
    }

    async fn establish(&self) -> Option<TcpStream> {
        let addrs = match endpoint::resolve(&self.target).await {
            Ok(addrs) => addrs,
            Err(e) => {
                self.fail(FailureKind::Dial, format!("resolve failed: {}", e));
                return None;
            }
        };
        let addr = addrs[0];
        let attempt_timeout = self.timings.dial_attempt_timeout;

        let config = RetryConfig::with_budget(self.timings.dial_budget);
        let dialed = tokio::select! {
            _ = self.stop.cancelled() => {
                info!(%addr, "Stop received while dialing");
                return None;
            }
            dialed = retry_with_backoff(&config, "dial", || dial(addr, attempt_timeout)) => dialed,
        };
        match dialed {
            Ok(stream) => {
                enable_keepalive(&stream);
                info!(%addr, "Session established");
                Some(stream)
            }
            Err(e) => {
                self.fail(
                    FailureKind::Dial,
                    format!(
                        "dial failed within {:?}: {}",
                        self.timings.dial_budget, e
                    ),
                );
                None
            }
        }
    }

    async fn exchange(&self, mut stream: TcpStream) {
        let payload = request_payload(&self.target);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            if self.stop.is_cancelled() {
                break;
            }

            let written =
                match write_request(&mut stream, &payload, self.timings.write_timeout).await {
                    Ok(n) => n,
                    Err(e) => {
                        self.fail(FailureKind::Write, format!("write failed: {}", e));
                        break;
                    }
                };

            match read_reply(&mut stream, &mut buf, self.timings.read_deadline).await {
                Ok(n) => {
                    trace!(written, read = n, "Exchange ok");
                    self.stats.record_success(format!(
                        "{} {}: wrote {} bytes, read {} bytes: {}",
                        self.unit,
                        self.target,
                        written,
                        n,
                        preview(&buf[..n])
                    ));
                }
                Err(e) => {
                    self.fail(FailureKind::Read, format!("read failed: {}", e));
                    break;
                }
            }

            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(self.timings.interval) => {}
            }
        }

        close(stream).await;
    }
}
