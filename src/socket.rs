//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`crate::segment::Segment`] instead of raw bytes.  All protocol logic lives
//! elsewhere; this module owns only byte I/O.

use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::connection::RdtError;
use crate::segment::Segment;

/// An async, segment-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared between the receive
/// task, timer tasks and the application.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port `0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, RdtError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        log::debug!("[sock] bound {local_addr}");
        Ok(Self { local_addr, inner })
    }

    /// Encode `seg` and send it as a single UDP datagram to `dest`.
    pub async fn send_to(&self, seg: &Segment, dest: SocketAddr) -> Result<(), RdtError> {
        self.inner.send_to(&seg.encode(), dest).await?;
        Ok(())
    }

    /// Receive the next datagram and decode it into a [`Segment`].
    ///
    /// `max_len` must be at least `mss + HEADER_LEN`; longer datagrams are
    /// truncated by the OS and then fail to decode.  Returns
    /// [`RdtError::Io`] for socket failures and [`RdtError::Segment`] for
    /// datagrams that do not parse; the caller decides whether to retry.
    pub async fn recv_from(&self, max_len: usize) -> Result<(Segment, SocketAddr), RdtError> {
        let mut buf = vec![0u8; max_len];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        let seg = Segment::decode(&buf[..n]).map_err(|e| RdtError::Segment { source: e, from: addr })?;
        Ok((seg, addr))
    }
}
