//! TCP side of the bridge: the single-connection accept loop.
//!
//! The loop:
//! - Listens on a TCP socket with a backlog of one
//! - Serves one client at a time; others wait in the backlog
//! - Keeps the serial channel open across reconnections
//! - Applies reload and shutdown events between frames
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐      ┌─────────────────┐
//! │  ControlEvent   │─────▶│ ConnectionLoop  │
//! │ (signals/handle)│      │  TcpListener    │
//! └─────────────────┘      └───────┬─────────┘
//!                                  │ accept()
//!                                  ▼
//!                          ┌─────────────────┐      ┌─────────────────┐
//!                          │   Connection    │─────▶│  SerialChannel  │
//!                          │ recv/parse/send │◀─────│  write / read   │
//!                          └─────────────────┘      └─────────────────┘
//! ```
//!
//! Errors other than an orderly close or a peer reset end the loop with a
//! [`BridgeError`]; the lifecycle manager treats that as fatal.

mod connection;

pub use connection::ConnectionEnd;

use std::io;
use std::net::SocketAddr;

use seriald_core::{ConfigStore, DaemonConfig, EncodingError};
use tokio::net::{lookup_host, TcpListener, TcpSocket};
use tracing::{info, warn};

use crate::control::{ControlEvent, ControlReceiver, ShutdownCause};
use crate::lifecycle::load_config;
use crate::serial::SerialChannel;

/// Pending connections queued by the OS while a client is being served.
pub const LISTEN_BACKLOG: u32 = 1;

/// Binds a listening socket on `host:port`.
pub async fn bind_listener(host: &str, port: u16) -> Result<TcpListener, BridgeError> {
    let bind_error = |source: io::Error| BridgeError::Bind {
        addr: format!("{host}:{port}"),
        source,
    };

    let addr = lookup_host((host, port))
        .await
        .map_err(bind_error)?
        .next()
        .ok_or_else(|| {
            bind_error(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "host did not resolve to any address",
            ))
        })?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_error)?;

    socket.set_reuseaddr(true).map_err(bind_error)?;
    socket.bind(addr).map_err(bind_error)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_error)
}

/// Accepts clients one at a time and bridges their frames to the serial
/// channel.
///
/// Every resource is borrowed from the owning daemon instance; the loop
/// itself only owns the listening socket, which is closed when
/// [`ConnectionLoop::run`] returns.
pub struct ConnectionLoop<'a, S: SerialChannel> {
    listener: TcpListener,
    config: &'a mut DaemonConfig,
    store: &'a ConfigStore,
    serial: &'a mut S,
    control: &'a mut ControlReceiver,
    connections: u64,
}

impl<'a, S: SerialChannel> ConnectionLoop<'a, S> {
    pub fn new(
        listener: TcpListener,
        config: &'a mut DaemonConfig,
        store: &'a ConfigStore,
        serial: &'a mut S,
        control: &'a mut ControlReceiver,
    ) -> Self {
        Self {
            listener,
            config,
            store,
            serial,
            control,
            connections: 0,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> u64 {
        self.connections
    }

    /// Runs until a shutdown event arrives or an unrecoverable error occurs.
    pub async fn run(mut self) -> Result<ShutdownCause, BridgeError> {
        loop {
            info!("Waiting for connection");

            let (stream, peer) = tokio::select! {
                event = self.control.recv() => {
                    match self.handle_event(event) {
                        Some(cause) => return Ok(cause),
                        None => continue,
                    }
                }
                accepted = self.listener.accept() => accepted.map_err(BridgeError::Accept)?,
            };

            self.connections += 1;
            info!(peer = %peer, connection = self.connections, "Connected");

            match self.serve(stream, peer).await? {
                ConnectionEnd::Closed => info!(peer = %peer, "Connection closed"),
                ConnectionEnd::Reset => warn!(peer = %peer, "Connection reset by peer"),
                ConnectionEnd::Shutdown(cause) => return Ok(cause),
            }
        }
    }

    /// Applies queued events until one asks the loop to stop.
    async fn next_shutdown(&mut self) -> ShutdownCause {
        loop {
            let event = self.control.recv().await;
            if let Some(cause) = self.handle_event(event) {
                return cause;
            }
        }
    }

    /// Applies a control event; returns the cause if the loop must stop.
    fn handle_event(&mut self, event: Option<ControlEvent>) -> Option<ShutdownCause> {
        match event {
            Some(ControlEvent::Reload) => {
                info!("Reloading configuration");
                load_config(self.store, self.config);
                None
            }
            Some(ControlEvent::Shutdown(cause)) => {
                info!(cause = %cause, "Shutdown requested");
                Some(cause)
            }
            None => Some(ShutdownCause::Requested),
        }
    }
}

/// Errors that end the connection loop.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("Failed to install signal handlers: {0}")]
    Signals(#[source] io::Error),

    #[error("Failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error("Failed to receive from {peer}: {source}")]
    Receive { peer: SocketAddr, source: io::Error },

    #[error("Failed to send reply to {peer}: {source}")]
    Send { peer: SocketAddr, source: io::Error },

    #[error("Invalid data from {peer}: {source}")]
    Decode {
        peer: SocketAddr,
        source: EncodingError,
    },

    #[error("Invalid reply from serial device: {0}")]
    DecodeReply(#[source] EncodingError),

    #[error("Cannot encode payload: {0}")]
    Encode(#[source] EncodingError),

    #[error("Serial {op} failed: {source}")]
    Serial {
        op: &'static str,
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let listener = bind_listener("127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let first = bind_listener("127.0.0.1", 0).await.unwrap();
        let port = first.local_addr().unwrap().port();

        let err = bind_listener("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, BridgeError::Bind { .. }));
        assert!(err.to_string().contains(&port.to_string()));
    }

    #[test]
    fn test_serial_error_display() {
        let err = BridgeError::Serial {
            op: "open",
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert!(err.to_string().starts_with("Serial open failed"));
    }
}
