//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that moves raw
//! datagram payloads; all protocol logic lives elsewhere.  It also provides
//! [`bind_with_retry`], the bounded walk over successive ports used when the
//! exact port does not matter.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;

/// Largest payload we ever expect in one heartbeat datagram.
const MAX_DATAGRAM: usize = 1024;

/// How many successive ports [`bind_with_retry`] will try.
pub const MAX_BIND_ATTEMPTS: u16 = 16;

/// Errors that can arise from socket operations.
#[derive(Debug)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    Io(io::Error),
    /// Every candidate port in the retry window was taken.
    NoFreePort { start: u16, attempts: u16 },
}

impl std::fmt::Display for SocketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "socket I/O error: {e}"),
            Self::NoFreePort { start, attempts } => write!(
                f,
                "no free port in {} attempt(s) starting at {start}",
                attempts
            ),
        }
    }
}

impl std::error::Error for SocketError {}

impl From<io::Error> for SocketError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// An async, datagram-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared across tasks if needed.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns the port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port `0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Send `payload` as a single UDP datagram to `dest`.
    pub async fn send_to(&self, payload: &[u8], dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(payload, dest).await?;
        Ok(())
    }

    /// Receive the next datagram.
    ///
    /// Returns `(payload, sender_address)`.  Payloads longer than
    /// [`MAX_DATAGRAM`] are truncated by the OS.
    pub async fn recv_from(&self) -> Result<(Vec<u8>, SocketAddr), SocketError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, addr))
    }
}

/// Bind to the first free port at or after `start_port`, on all interfaces.
///
/// Only `AddrInUse` advances to the next port; any other bind failure is
/// returned immediately.  The walk is bounded by [`MAX_BIND_ATTEMPTS`] and
/// stops at the top of the port space rather than wrapping around.
pub async fn bind_with_retry(start_port: u16) -> Result<Socket, SocketError> {
    let mut port = start_port;
    for _ in 0..MAX_BIND_ATTEMPTS {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        match Socket::bind(addr).await {
            Ok(socket) => return Ok(socket),
            Err(SocketError::Io(e)) if e.kind() == io::ErrorKind::AddrInUse => {
                log::warn!("port {port} is taken, trying the next one");
                port = match port.checked_add(1) {
                    Some(next) => next,
                    None => break, // top of the port space
                };
            }
            Err(e) => return Err(e),
        }
    }
    Err(SocketError::NoFreePort {
        start: start_port,
        attempts: MAX_BIND_ATTEMPTS,
    })
}
