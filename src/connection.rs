//! Connection handle.
//!
//! An [`Rdt`] owns everything one endpoint needs to talk to one peer:
//!
//! ```text
//!  Application
//!      │ send(data)                        receive(buf) ▲
//!      ▼                                                │
//!  SenderEngine ──▶ send window        receive window ──┘
//!      │                 ▲                   ▲
//!      │ start timer     │ release           │ put / deliver
//!      ▼                 │                   │
//!  Scheduler ◀───────────┴── ReceiverEngine ─┘   (background task)
//!      │ resend                    ▲
//!      ▼                           │ recv_from
//!  Channel ──────▶ Socket ─────────┘
//! ```
//!
//! The receive loop starts as soon as the connection is built and runs until
//! the handle is dropped.  There is no handshake and no teardown exchange:
//! both endpoints simply know each other's address.
//!
//! ```ignore
//! let config = RdtConfig::default().with_protocol(Protocol::SelectiveRepeat);
//! let rdt = Rdt::connect("localhost", 9000, 9001, config).await?;
//! rdt.send(b"hello").await?;
//! rdt.flush().await?;
//! ```

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::channel::Channel;
use crate::config::RdtConfig;
use crate::events::{EventSink, LogSink};
use crate::receiver::ReceiverEngine;
use crate::segment::SegmentError;
use crate::sender::SenderEngine;
use crate::socket::Socket;
use crate::timer::Scheduler;
use crate::window::{WindowBuffer, WindowSnapshot};

#[derive(Debug, Error)]
pub enum RdtError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot resolve peer: {0}")]
    Resolve(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("connection closed")]
    Closed,
    #[error("bad segment from {from}: {source}")]
    Segment {
        source: SegmentError,
        from: SocketAddr,
    },
}

/// A reliable connection to one peer over UDP.
///
/// `send` and `receive` take `&self`; wrap the handle in an `Arc` to drive
/// both directions from separate tasks.
pub struct Rdt {
    config: RdtConfig,
    local_addr: SocketAddr,
    peer: SocketAddr,
    sender: SenderEngine,
    send_window: Arc<WindowBuffer>,
    recv_window: Arc<WindowBuffer>,
    scheduler: Arc<Scheduler>,
    channel: Arc<Channel>,
    receiver_task: JoinHandle<()>,
}

impl Rdt {
    // -----------------------------------------------------------------------
    // Constructors
    // -----------------------------------------------------------------------

    /// Bind `local_port`, resolve `peer_host:peer_port` and start the receive
    /// loop.
    ///
    /// IPv4 addresses are preferred when the peer name resolves to both
    /// families.  Port `0` binds an ephemeral port.
    pub async fn connect(
        peer_host: &str,
        peer_port: u16,
        local_port: u16,
        config: RdtConfig,
    ) -> Result<Self, RdtError> {
        config.validate()?;

        let candidates: Vec<SocketAddr> = tokio::net::lookup_host((peer_host, peer_port))
            .await
            .map_err(|e| RdtError::Resolve(format!("{peer_host}: {e}")))?
            .collect();
        let peer = candidates
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| candidates.first())
            .copied()
            .ok_or_else(|| RdtError::Resolve(format!("{peer_host}: no addresses")))?;

        let local: SocketAddr = if peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, local_port).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, local_port).into()
        };
        let socket = Socket::bind(local).await?;
        Self::from_socket(socket, peer, config)
    }

    /// Build a connection on an already-bound socket, logging protocol
    /// activity through [`LogSink`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_socket(socket: Socket, peer: SocketAddr, config: RdtConfig) -> Result<Self, RdtError> {
        Self::with_events(socket, peer, config, Arc::new(LogSink))
    }

    /// Like [`from_socket`](Self::from_socket) with a caller-supplied
    /// [`EventSink`].
    pub fn with_events(
        socket: Socket,
        peer: SocketAddr,
        config: RdtConfig,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, RdtError> {
        config.validate()?;

        let local_addr = socket.local_addr;
        let channel = Arc::new(Channel::new(Arc::new(socket), peer, &config, events));
        let send_window = Arc::new(WindowBuffer::new(config.send_capacity));
        let recv_window = Arc::new(WindowBuffer::new(config.recv_capacity));
        let scheduler = Arc::new(Scheduler::new(
            config.rto,
            Arc::clone(&send_window),
            Arc::clone(&channel),
        ));

        let sender = SenderEngine::new(
            &config,
            Arc::clone(&send_window),
            Arc::clone(&recv_window),
            Arc::clone(&channel),
            Arc::clone(&scheduler),
        );
        let receiver_task = ReceiverEngine::new(
            &config,
            Arc::clone(&send_window),
            Arc::clone(&recv_window),
            Arc::clone(&scheduler),
            Arc::clone(&channel),
        )
        .spawn();

        log::info!(
            "[rdt] {} connection {local_addr} → {peer} (mss={} window={}/{} rto={:?} loss={})",
            config.protocol,
            config.mss,
            config.send_capacity,
            config.recv_capacity,
            config.rto,
            config.loss_rate
        );

        Ok(Self {
            config,
            local_addr,
            peer,
            sender,
            send_window,
            recv_window,
            scheduler,
            channel,
            receiver_task,
        })
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    /// Queue `data` for reliable delivery.
    ///
    /// Returns once every segment is buffered and handed to the network, not
    /// once it is acknowledged; waits while the send window is full.  Use
    /// [`flush`](Self::flush) to wait for acknowledgement.
    pub async fn send(&self, data: &[u8]) -> Result<usize, RdtError> {
        self.sender.send(data).await
    }

    /// Wait for the next deliverable segment and copy its payload into `buf`.
    ///
    /// Returns the number of bytes copied, `0` for a segment without data.
    /// A payload longer than `buf` is truncated.
    pub async fn receive(&self, buf: &mut [u8]) -> Result<usize, RdtError> {
        let Some(seg) = self.recv_window.get_next().await? else {
            log::warn!("[rdt] delivery slot was empty");
            return Ok(0);
        };
        self.channel.events().on_deliver(&seg);

        if !seg.contains_data() {
            return Ok(0);
        }
        let n = buf.len().min(seg.payload.len());
        buf[..n].copy_from_slice(&seg.payload[..n]);
        if n < seg.payload.len() {
            log::warn!(
                "[rdt] receive buffer too small: kept {n} of {} bytes",
                seg.payload.len()
            );
        }
        Ok(n)
    }

    /// Wait until every segment sent so far has been acknowledged.
    pub async fn flush(&self) -> Result<(), RdtError> {
        self.send_window.wait_drained().await
    }

    // -----------------------------------------------------------------------
    // Configuration and inspection
    // -----------------------------------------------------------------------

    /// Change the simulated loss probability while running.
    pub fn set_loss_rate(&self, rate: f64) -> Result<(), RdtError> {
        self.channel.set_loss_rate(rate)?;
        log::info!("[rdt] loss rate set to {rate}");
        Ok(())
    }

    pub fn config(&self) -> &RdtConfig {
        &self.config
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn send_window(&self) -> WindowSnapshot {
        self.send_window.snapshot()
    }

    pub fn recv_window(&self) -> WindowSnapshot {
        self.recv_window.snapshot()
    }
}

impl Drop for Rdt {
    fn drop(&mut self) {
        self.receiver_task.abort();
        self.scheduler.cancel_all();
        self.send_window.close();
        self.recv_window.close();
        log::debug!("[rdt] connection {} → {} dropped", self.local_addr, self.peer);
    }
}
