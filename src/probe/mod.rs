//! Connection probing units
//!
//! Two kinds of unit generate traffic against a [`TargetEndpoint`]:
//!
//! - [`ConnectionActor`] opens one long-lived session and keeps exchanging
//!   request/reply pairs on it. It models an established client that must
//!   survive the failover untouched.
//! - [`SessionSpawner`] runs a full connect/write/read/close cycle per
//!   iteration. It models new clients arriving during the failover window.
//!
//! Both record exactly one event per iteration into the shared
//! [`Counter`](crate::stats::Counter) and stop once the termination token is
//! cancelled. Every blocking network call carries its own timeout, so a hung
//! peer delays the stop by at most one deadline.

mod connection;
mod spawner;

use std::net::SocketAddr;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::endpoint::TargetEndpoint;

pub use connection::ConnectionActor;
pub use spawner::SessionSpawner;

/// Size of the reply buffer; replies are counted, never parsed
pub const READ_BUFFER_SIZE: usize = 1024;

/// Idle time before the kernel starts sending keep-alive probes
const KEEPALIVE_IDLE: Duration = Duration::from_secs(15);

/// Timeouts and pacing for probe units
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeTimings {
    /// Overall budget for establishing the actor's long-lived session
    pub dial_budget: Duration,
    /// Timeout for a single dial attempt by the actor
    pub dial_attempt_timeout: Duration,
    /// Dial timeout for each spawner cycle
    pub spawner_dial_timeout: Duration,
    /// Deadline for reading a reply
    pub read_deadline: Duration,
    /// Timeout for writing a request
    pub write_timeout: Duration,
    /// Pause between iterations
    pub interval: Duration,
}

impl Default for ProbeTimings {
    fn default() -> Self {
        Self {
            dial_budget: Duration::from_secs(60),
            dial_attempt_timeout: Duration::from_secs(1),
            spawner_dial_timeout: Duration::from_millis(300),
            read_deadline: Duration::from_millis(300),
            write_timeout: Duration::from_secs(1),
            interval: Duration::from_millis(50),
        }
    }
}

/// Why a single network step failed
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The step did not finish before its deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The socket returned an error
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// The write call accepted nothing
    #[error("wrote zero bytes")]
    ZeroWrite,
    /// The peer closed the connection
    #[error("connection closed by peer")]
    Closed,
}

/// Fixed request sent on every iteration
pub fn request_payload(target: &TargetEndpoint) -> Vec<u8> {
    format!(
        "GET / HTTP/1.1\r\nHost: {}\r\nConnection: keep-alive\r\n\r\n",
        target
    )
    .into_bytes()
}

/// Dial `addr` once, bounded by `timeout`
pub(crate) async fn dial(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, ProbeError> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ProbeError::Io(e)),
        Err(_) => Err(ProbeError::Timeout(timeout)),
    }
}

/// Turn on TCP keep-alive; failure only costs us early dead-peer detection
pub(crate) fn enable_keepalive(stream: &TcpStream) {
    let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_IDLE);
    if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        warn!(error = %e, "Failed to enable TCP keep-alive");
    }
}

/// Write one request, returning the number of bytes accepted
pub(crate) async fn write_request(
    stream: &mut TcpStream,
    payload: &[u8],
    timeout: Duration,
) -> Result<usize, ProbeError> {
    match tokio::time::timeout(timeout, stream.write(payload)).await {
        Ok(Ok(0)) => Err(ProbeError::ZeroWrite),
        Ok(Ok(n)) => Ok(n),
        Ok(Err(e)) => Err(ProbeError::Io(e)),
        Err(_) => Err(ProbeError::Timeout(timeout)),
    }
}

/// Read one reply chunk within `deadline`
pub(crate) async fn read_reply(
    stream: &mut TcpStream,
    buf: &mut [u8],
    deadline: Duration,
) -> Result<usize, ProbeError> {
    match tokio::time::timeout(deadline, stream.read(buf)).await {
        Ok(Ok(0)) => Err(ProbeError::Closed),
        Ok(Ok(n)) => Ok(n),
        Ok(Err(e)) => Err(ProbeError::Io(e)),
        Err(_) => Err(ProbeError::Timeout(deadline)),
    }
}

/// Close a probe connection
pub(crate) async fn close(mut stream: TcpStream) {
    if let Err(e) = stream.shutdown().await {
        debug!(error = %e, "Shutdown on closed probe connection");
    }
}

/// Short printable preview of a reply for event messages
pub(crate) fn preview(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let first_line = text.lines().next().unwrap_or_default();
    first_line.chars().take(64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv6Addr};
    use tokio::net::TcpListener;

    #[test]
    fn test_request_payload_is_a_single_http_request() {
        let target = TargetEndpoint::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 8080);
        let payload = String::from_utf8(request_payload(&target)).unwrap();
        assert!(payload.starts_with("GET / HTTP/1.1\r\n"));
        assert!(payload.contains("Host: [::1]:8080\r\n"));
        assert!(payload.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_preview_takes_first_line() {
        assert_eq!(preview(b"HTTP/1.1 200 OK\r\nServer: x\r\n"), "HTTP/1.1 200 OK");
        assert_eq!(preview(&[b'a'; 200]).len(), 64);
        assert_eq!(preview(b""), "");
    }

    #[tokio::test]
    async fn test_read_reply_reports_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut stream = dial(addr, Duration::from_secs(1)).await.unwrap();
        accept.await.unwrap();

        let mut buf = [0u8; READ_BUFFER_SIZE];
        let err = read_reply(&mut stream, &mut buf, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Closed | ProbeError::Io(_)));
    }

    #[tokio::test]
    async fn test_read_reply_times_out_on_silent_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _accept = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let mut stream = dial(addr, Duration::from_secs(1)).await.unwrap();
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let err = read_reply(&mut stream, &mut buf, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Timeout(d) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_dial_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = dial(addr, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ProbeError::Io(_)));
    }
}
