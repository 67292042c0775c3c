//! Receive side: the per-connection network loop.
//!
//! [`ReceiverEngine`] owns the socket read path.  Every inbound datagram is
//! decoded, checked, and then dispatched by protocol:
//!
//! ```text
//!                  recv_from
//!                      │
//!          decode ─────┤ malformed ──▶ on_discard
//!          peer? ──────┤ other addr ─▶ on_discard
//!          checksum ───┤ corrupt ────▶ on_discard  (never acked)
//!                      ▼
//!        ┌─────────── flags ───────────┐
//!        │ FIN          ACK       DATA │
//!        ▼              ▼              ▼
//!      log       send window    receive window ──▶ ack back
//!                + scheduler
//! ```
//!
//! # Go-Back-N
//!
//! - ACK `N` is cumulative: everything up to and including `N` is released.
//!   [`NO_ACK`] (the peer has nothing yet) only restarts the window timer
//!   with a full RTO; nothing is resent until it fires.
//! - DATA is accepted only at `expected_seq`.  Anything else is dropped and
//!   answered with an ack for the last in-order segment, or [`NO_ACK`].
//!
//! # Selective Repeat
//!
//! - ACK `N` marks one segment and cancels its timer; when `N` is the send
//!   base, the base slides over every contiguous acknowledged segment.
//! - DATA is always acked individually.  In-window segments are buffered in
//!   their own slot; when the receive base fills, the contiguous run becomes
//!   deliverable.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::channel::Channel;
use crate::config::{Protocol, RdtConfig};
use crate::connection::RdtError;
use crate::events::{DiscardReason, EventSink};
use crate::segment::{Segment, NO_ACK};
use crate::timer::{Scheduler, TimerKey};
use crate::window::WindowBuffer;

fn is_transient_io_error(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::TimedOut
            | ErrorKind::WouldBlock
            | ErrorKind::Interrupted
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
    )
}

/// Inbound half of a connection.  Runs as one background task.
pub struct ReceiverEngine {
    protocol: Protocol,
    datagram_len: usize,
    send_window: Arc<WindowBuffer>,
    recv_window: Arc<WindowBuffer>,
    scheduler: Arc<Scheduler>,
    channel: Arc<Channel>,
    /// GBN: the only sequence number DATA is accepted at.
    expected_seq: u32,
    /// GBN: last in-order segment accepted, `None` before the first.
    last_received: Option<u32>,
}

impl ReceiverEngine {
    pub fn new(
        config: &RdtConfig,
        send_window: Arc<WindowBuffer>,
        recv_window: Arc<WindowBuffer>,
        scheduler: Arc<Scheduler>,
        channel: Arc<Channel>,
    ) -> Self {
        Self {
            protocol: config.protocol,
            datagram_len: config.datagram_len(),
            send_window,
            recv_window,
            scheduler,
            channel,
            expected_seq: 0,
            last_received: None,
        }
    }

    /// Move the engine onto its own task.  The task ends when the socket
    /// fails permanently or the connection's windows are closed.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let socket = Arc::clone(self.channel.socket());
        log::info!(
            "[{}] receive loop on {} for peer {}",
            self.protocol.tag(),
            socket.local_addr,
            self.channel.peer()
        );

        loop {
            let (seg, from) = match socket.recv_from(self.datagram_len).await {
                Ok(pair) => pair,
                Err(RdtError::Segment { source, from }) => {
                    log::warn!("[{}] undecodable datagram from {from}: {source}", self.protocol.tag());
                    self.events()
                        .on_discard(None, &DiscardReason::Malformed(source.to_string()));
                    continue;
                }
                Err(RdtError::Io(e)) if is_transient_io_error(&e) => {
                    log::warn!("[{}] transient socket error, retrying: {e}", self.protocol.tag());
                    continue;
                }
                Err(e) => {
                    log::error!("[{}] receive loop stopped: {e}", self.protocol.tag());
                    return;
                }
            };

            match self.handle_segment(seg, from).await {
                Ok(()) => {}
                Err(RdtError::Closed) => {
                    log::info!("[{}] receive loop closed", self.protocol.tag());
                    return;
                }
                Err(e) => log::warn!("[{}] failed to answer segment: {e}", self.protocol.tag()),
            }
        }
    }

    /// Process one decoded segment.
    pub async fn handle_segment(&mut self, seg: Segment, from: SocketAddr) -> Result<(), RdtError> {
        if from != self.channel.peer() {
            self.events().on_discard(Some(&seg), &DiscardReason::UnknownPeer);
            return Ok(());
        }
        if let Err(e) = seg.verify() {
            log::warn!("[{}] dropping corrupt segment: {e}", self.protocol.tag());
            self.events().on_discard(Some(&seg), &DiscardReason::Corrupt);
            return Ok(());
        }
        self.events().on_receive(&seg);

        match self.protocol {
            Protocol::GoBackN => self.handle_gbn(seg).await,
            Protocol::SelectiveRepeat => self.handle_sr(seg).await,
        }
    }

    // -----------------------------------------------------------------------
    // Go-Back-N
    // -----------------------------------------------------------------------

    async fn handle_gbn(&mut self, seg: Segment) -> Result<(), RdtError> {
        if seg.contains_fin() {
            log::info!("[gbn] ← FIN seq={}", seg.seq_num);
            return Ok(());
        }
        if seg.contains_ack() {
            self.on_gbn_ack(seg.ack_num);
            return Ok(());
        }

        if seg.seq_num == self.expected_seq {
            let seq = seg.seq_num;
            self.recv_window.put_next(seg).await?;
            self.recv_window.deliver_run();
            self.expected_seq = seq.wrapping_add(1);
            self.last_received = Some(seq);
            log::debug!("[gbn] ← DATA seq={seq} accepted");
            self.send_ack(seq, false).await
        } else {
            log::debug!(
                "[gbn] ← DATA seq={} out of order, expected {}",
                seg.seq_num,
                self.expected_seq
            );
            self.events().on_discard(Some(&seg), &DiscardReason::OutOfWindow);
            self.send_ack(self.last_received.unwrap_or(NO_ACK), true).await
        }
    }

    fn on_gbn_ack(&self, ack: u32) {
        if ack != NO_ACK {
            self.send_window.mark_acked(ack);
            let released = self.send_window.release_through(ack);
            log::debug!(
                "[gbn] ← ACK {ack} released={released} base={}",
                self.send_window.base()
            );
        } else {
            log::debug!("[gbn] ← ACK -1, peer has nothing yet");
        }

        if !self.scheduler.settle_window() {
            log::debug!("[gbn] window drained, timer cancelled");
        }
    }

    // -----------------------------------------------------------------------
    // Selective Repeat
    // -----------------------------------------------------------------------

    async fn handle_sr(&mut self, seg: Segment) -> Result<(), RdtError> {
        if seg.contains_fin() {
            log::info!("[sr] ← FIN seq={}", seg.seq_num);
            return Ok(());
        }
        if seg.contains_ack() {
            self.on_sr_ack(seg.ack_num);
            return Ok(());
        }

        let seq = seg.seq_num;
        self.send_ack(seq, false).await?;

        if !self.recv_window.accepts(seq) {
            log::debug!("[sr] ← DATA seq={seq} outside window, base={}", self.recv_window.base());
            self.events().on_discard(Some(&seg), &DiscardReason::OutOfWindow);
            return Ok(());
        }

        if !self.recv_window.put_at(seg).await? {
            log::debug!("[sr] ← DATA seq={seq} duplicate");
            return Ok(());
        }
        if seq == self.recv_window.base() {
            let run = self.recv_window.deliver_run();
            log::debug!("[sr] ← DATA seq={seq} delivered run of {run}");
        } else {
            log::debug!("[sr] ← DATA seq={seq} buffered out of order");
        }
        Ok(())
    }

    fn on_sr_ack(&self, ack: u32) {
        let base = self.send_window.base();
        if ack < base {
            log::debug!("[sr] ← ACK {ack} stale, base={base}");
            return;
        }
        if !self.send_window.mark_acked(ack) {
            log::debug!("[sr] ← ACK {ack} for nothing in flight");
            return;
        }
        self.scheduler.cancel(TimerKey::Segment(ack));

        if ack == base {
            for seq in self.send_window.slide_acked() {
                self.scheduler.cancel(TimerKey::Segment(seq));
            }
        }
        log::debug!("[sr] ← ACK {ack} base={}", self.send_window.base());
    }

    async fn send_ack(&self, ack: u32, resend: bool) -> Result<(), RdtError> {
        let seg = Segment::ack(ack, self.recv_window.free_slots() as u32);
        self.channel.transmit(&seg, resend).await
    }

    fn events(&self) -> &Arc<dyn EventSink> {
        self.channel.events()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
