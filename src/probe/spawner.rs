//! Repeated short-session probe

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, trace, warn};

use super::{
    close, dial, preview, read_reply, request_payload, write_request, ProbeTimings,
    READ_BUFFER_SIZE,
};
use crate::endpoint::{self, TargetEndpoint};
use crate::signal::{ReadySignal, UnitId, UnitReport};
use crate::stats::{Counter, FailureKind};

/// Opens a fresh connection for every request until stopped
pub struct SessionSpawner {
    unit: UnitId,
    target: TargetEndpoint,
    stats: Arc<Counter>,
    stop: CancellationToken,
    timings: ProbeTimings,
}

impl SessionSpawner {
    /// Create a spawner for `target`
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

    /// Run connect/write/read/close cycles until stopped, then report ready
    #[instrument(skip_all, fields(unit = %self.unit, target = %self.target))]
    pub async fn run(self, ready: ReadySignal) {
        match endpoint::resolve(&self.target).await {
            Ok(addrs) => self.cycle_until_stopped(addrs[0]).await,
            Err(e) => self.fail(FailureKind::Dial, format!("resolve failed: {}", e)),
        }

        self.stats.mark_end();
        info!("Session spawner finished");
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

    async fn cycle_until_stopped(&self, addr: SocketAddr) {
        let payload = request_payload(&self.target);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut cycles = 0u64;

        loop {
            if self.stop.is_cancelled() {
                break;
            }

            self.cycle(addr, &payload, &mut buf).await;
            cycles += 1;

            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(self.timings.interval) => {}
            }
        }

        info!(cycles, "Stop received");
    }

    /// One connect/write/read/close cycle; records exactly one event
    async fn cycle(&self, addr: SocketAddr, payload: &[u8], buf: &mut [u8]) {
        let mut stream = match dial(addr, self.timings.spawner_dial_timeout).await {
            Ok(stream) => stream,
            Err(e) => {
                self.fail(FailureKind::Dial, format!("dial failed: {}", e));
                return;
            }
        };

        let written = match write_request(&mut stream, payload, self.timings.write_timeout).await {
            Ok(n) => n,
            Err(e) => {
                self.fail(FailureKind::Write, format!("write failed: {}", e));
                close(stream).await;
                return;
            }
        };

        match read_reply(&mut stream, buf, self.timings.read_deadline).await {
            Ok(n) => {
                trace!(written, read = n, "Cycle ok");
                self.stats.record_success(format!(
                    "{} {}: wrote {} bytes, read {} bytes: {}",
                    self.unit,
                    self.target,
                    written,
                    n,
                    preview(&buf[..n])
                ));
            }
            Err(e) => self.fail(FailureKind::Read, format!("read failed: {}", e)),
        }

        close(stream).await;
    }
}
