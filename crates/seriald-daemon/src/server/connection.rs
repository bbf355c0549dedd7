//! Serving a single client connection.
//!
//! Each chunk read from the socket is one request: it is decoded, framed,
//! written to the serial device, and answered with the device's reply when
//! the frame asks for one.

use std::io;
use std::net::SocketAddr;

use seriald_protocol::{parse, ConnectionClosed, Frame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::{BridgeError, ConnectionLoop};
use crate::control::ShutdownCause;
use crate::serial::SerialChannel;

/// How a client connection ended without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEnd {
    /// The client closed its side (empty read)
    Closed,
    /// The client reset the connection
    Reset,
    /// A shutdown event arrived while waiting for client data
    Shutdown(ShutdownCause),
}

impl<S: SerialChannel> ConnectionLoop<'_, S> {
    /// Serves `stream` until it closes. The socket is closed on return.
    pub(super) async fn serve(
        &mut self,
        mut stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<ConnectionEnd, BridgeError> {
        let mut buf = Vec::new();

        loop {
            // data_length may change on reload
            buf.resize(self.config.data_length, 0);

            let received = tokio::select! {
                event = self.control.recv() => {
                    match self.handle_event(event) {
                        Some(cause) => return Ok(ConnectionEnd::Shutdown(cause)),
                        None => continue,
                    }
                }
                received = stream.read(&mut buf) => received,
            };

            let len = match received {
                Ok(len) => len,
                Err(e) if is_peer_reset(&e) => return Ok(ConnectionEnd::Reset),
                Err(source) => return Err(BridgeError::Receive { peer, source }),
            };

            let data = buf.get(..len).unwrap_or_default();
            let text = self
                .config
                .data_encoding
                .decode(data)
                .map_err(|source| BridgeError::Decode { peer, source })?;

            let frame = match parse(&text) {
                Ok(frame) => frame,
                Err(ConnectionClosed) => {
                    debug!(peer = %peer, "Closing connection");
                    return Ok(ConnectionEnd::Closed);
                }
            };
            info!(peer = %peer, data = %text, "Read from socket");

            let reply = match self.exchange(&frame)? {
                Exchange::Reply(reply) => reply,
                Exchange::NoReply => continue,
                Exchange::Interrupted => {
                    info!(peer = %peer, "Serial read interrupted by shutdown");
                    return Ok(ConnectionEnd::Shutdown(self.next_shutdown().await));
                }
            };

            if let Err(e) = stream.write_all(&reply).await {
                if is_peer_reset(&e) {
                    return Ok(ConnectionEnd::Reset);
                }
                return Err(BridgeError::Send { peer, source: e });
            }
        }
    }

    /// Writes the frame payload to the serial device and reads the reply.
    fn exchange(&mut self, frame: &Frame) -> Result<Exchange, BridgeError> {
        let encoding = self.config.data_encoding;
        let payload = encoding.encode(&frame.payload).map_err(BridgeError::Encode)?;

        if !self.serial.is_open() {
            info!("Opening serial port");
            self.serial.open().map_err(serial_error("open"))?;
        }

        info!(payload = %frame.payload, "Sending");
        self.serial.flush_output().map_err(serial_error("flush"))?;
        self.serial.flush_input().map_err(serial_error("flush"))?;
        self.serial.write(&payload).map_err(serial_error("write"))?;
        self.serial.cycle().map_err(serial_error("reopen"))?;

        info!(length = frame.reply_length, "Will read");
        if !frame.expects_reply() {
            return Ok(Exchange::NoReply);
        }

        let wanted = usize::try_from(frame.reply_length).unwrap_or(usize::MAX);
        let shutdown = self.control.shutdown_flag();
        let reply = self
            .serial
            .read(wanted, shutdown)
            .map_err(serial_error("read"))?;
        if reply.len() < wanted && shutdown.is_raised() {
            return Ok(Exchange::Interrupted);
        }

        let decoded = encoding.decode(&reply).map_err(BridgeError::DecodeReply)?;
        info!(reply = %decoded, "Received");

        if frame.accepts_reply(decoded.chars().count(), self.config.reply_length_strict) {
            Ok(Exchange::Reply(reply))
        } else {
            debug!(
                expected = frame.reply_length,
                received = decoded.chars().count(),
                "Dropping reply with unexpected length"
            );
            Ok(Exchange::NoReply)
        }
    }
}

/// Result of one serial round trip.
enum Exchange {
    /// Bytes to send back to the client
    Reply(Vec<u8>),
    /// Nothing to send: no reply requested, or the reply was dropped
    NoReply,
    /// A shutdown arrived while waiting for the device
    Interrupted,
}

fn serial_error(op: &'static str) -> impl FnOnce(io::Error) -> BridgeError {
    move |source| BridgeError::Serial { op, source }
}

/// Whether `err` means the peer went away mid-conversation.
fn is_peer_reset(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_reset_kinds() {
        assert!(is_peer_reset(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(is_peer_reset(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(!is_peer_reset(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
