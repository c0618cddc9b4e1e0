//! Loopback echo target
//!
//! Answers every chunk it reads with the same bytes. Stands in for the real
//! service behind the virtual address when running the harness locally.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Error;

/// TCP echo server
pub struct EchoServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl EchoServer {
    /// Bind to `addr`; port 0 picks a free port
    pub async fn bind(addr: SocketAddr) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::io(format!("bind {}", addr), e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::io("local_addr", e))?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept and echo until `cancel` fires
    ///
    /// Open connections are closed when cancelled, which looks to clients
    /// exactly like a backend going away.
    pub async fn serve(self, cancel: CancellationToken) {
        info!(addr = %self.local_addr, "Echo server listening");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        debug!(%peer, "Accepted connection");
                        tokio::spawn(echo(socket, cancel.clone()));
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
            }
        }
        info!(addr = %self.local_addr, "Echo server stopped");
    }
}

async fn echo(mut socket: TcpStream, cancel: CancellationToken) {
    let mut buf = [0u8; 4096];
    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => return,
            read = socket.read(&mut buf) => match read {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            },
        };
        if socket.write_all(&buf[..n]).await.is_err() {
            return;
        }
    }
}
