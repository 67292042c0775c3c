//! Send side: segmentation and window admission.
//!
//! [`SenderEngine`] turns one application buffer into MSS-sized segments,
//! appends each to the send [`WindowBuffer`] (waiting while the window is
//! full), arms the retransmission timer that covers it, and hands it to the
//! [`Channel`].
//!
//! ```text
//!  send(data)
//!     │  split_payload(data, mss)
//!     ▼
//!  ┌──────────┐  put_next   ┌──────────────┐
//!  │ segment  │ ──────────▶ │ send window  │ ◀── release_through / slide_acked
//!  └──────────┘             └──────────────┘        (receive task)
//!     │ start timer
//!     │ transmit
//!     ▼
//!  Channel ──▶ peer
//! ```
//!
//! Acknowledgements are consumed by the receive task, not here; the two sides
//! meet only in the shared window and the [`Scheduler`].

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::channel::Channel;
use crate::config::{Protocol, RdtConfig};
use crate::connection::RdtError;
use crate::segment::Segment;
use crate::timer::{Scheduler, TimerKey};
use crate::window::WindowBuffer;

/// Split `data` into consecutive chunks of at most `mss` bytes.
///
/// Every chunk but the last is exactly `mss` long; the last carries the
/// remainder.  Empty input yields no chunks.
pub fn split_payload(data: &[u8], mss: usize) -> impl Iterator<Item = &[u8]> {
    data.chunks(mss.max(1))
}

/// Outbound half of a connection.
pub struct SenderEngine {
    protocol: Protocol,
    mss: usize,
    window: Arc<WindowBuffer>,
    /// Consulted only to fill `rcv_win` on outgoing segments.
    recv_window: Arc<WindowBuffer>,
    channel: Arc<Channel>,
    scheduler: Arc<Scheduler>,
    /// Local send sequence counter.  Held for a whole `send` so concurrent
    /// callers never interleave their segments.
    next_seq: Mutex<u32>,
}

impl SenderEngine {
    pub fn new(
        config: &RdtConfig,
        window: Arc<WindowBuffer>,
        recv_window: Arc<WindowBuffer>,
        channel: Arc<Channel>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            protocol: config.protocol,
            mss: config.mss,
            window,
            recv_window,
            channel,
            scheduler,
            next_seq: Mutex::new(0),
        }
    }

    /// Segment `data`, buffer each piece and put it on the wire.
    ///
    /// Waits while the send window is full.  Returns `data.len()`; an empty
    /// buffer sends nothing and returns `0`.  Once a segment is buffered it
    /// belongs to the retransmission timer, so a socket error on its first
    /// transmission is logged rather than returned.  Fails only with
    /// [`RdtError::Closed`].
    pub async fn send(&self, data: &[u8]) -> Result<usize, RdtError> {
        if data.is_empty() {
            return Ok(0);
        }

        let mut next_seq = self.next_seq.lock().await;
        for chunk in split_payload(data, self.mss) {
            let seq = *next_seq;
            let mut seg = Segment::data(seq, chunk.to_vec());
            seg.rcv_win = self.recv_window.free_slots() as u32;
            seg.seal();

            let was_empty = self.window.put_next(seg.clone()).await?;
            *next_seq = seq.wrapping_add(1);
            match self.protocol {
                Protocol::GoBackN => {
                    if was_empty {
                        self.scheduler.start(TimerKey::Window);
                    }
                }
                Protocol::SelectiveRepeat => self.scheduler.start(TimerKey::Segment(seq)),
            }

            log::debug!(
                "[{}] → DATA seq={} len={} in_flight={}",
                self.protocol.tag(),
                seq,
                seg.len(),
                self.window.next_seq().wrapping_sub(self.window.base())
            );
            // buffered and timed: a failed send is recovered like a lost one
            if let Err(e) = self.channel.transmit(&seg, false).await {
                log::warn!("[{}] send of seq={seq} failed: {e}", self.protocol.tag());
            }
        }
        Ok(data.len())
    }

    /// Sequence number the next segment will carry.
    pub async fn next_seq(&self) -> u32 {
        *self.next_seq.lock().await
    }
}
