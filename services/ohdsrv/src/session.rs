//! The single CVM connection

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use ohd_protocols::{read_frame, write_frame};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::Result;

pub struct Session {
    stream: TcpStream,
    peer: SocketAddr,
    io_timeout: Option<Duration>,
}

impl Session {
    pub fn new(stream: TcpStream, peer: SocketAddr, io_timeout: Option<Duration>) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, "TCP_NODELAY not set: {}", e);
        }
        Self {
            stream,
            peer,
            io_timeout,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Wait until inbound bytes are buffered. `Ok(0)` means the peer closed.
    ///
    /// Peeks instead of `readable()`, whose readiness can stay set after a
    /// read that drained the socket exactly. Nothing is consumed, so the
    /// future can be dropped at any point.
    pub async fn wait_for_data(&self) -> io::Result<usize> {
        let mut probe = [0u8; 1];
        self.stream.peek(&mut probe).await
    }

    /// Read exactly one framed message
    pub async fn read_message(&mut self) -> Result<Vec<u8>> {
        let frame = read_frame(&mut self.stream, self.io_timeout).await?;
        if frame.reserved != 0 {
            debug!(peer = %self.peer, reserved = frame.reserved, "Non-zero reserved word");
        }
        Ok(frame.payload)
    }

    pub async fn send_message(&mut self, xml: &str) -> Result<()> {
        write_frame(&mut self.stream, xml.as_bytes(), self.io_timeout).await?;
        Ok(())
    }
}
