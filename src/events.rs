//! Observer hooks for protocol activity.
//!
//! The protocol core never prints.  It reports what it does to an
//! [`EventSink`], and the sink decides whether that becomes a log line, a
//! counter, or nothing at all.

use crate::segment::Segment;
use crate::timer::TimerKey;

/// Why an inbound datagram was thrown away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    /// Could not be parsed as a segment.
    Malformed(String),
    /// Parsed, but the checksum did not match.
    Corrupt,
    /// Arrived from an address other than the configured peer.
    UnknownPeer,
    /// Data outside the acceptance window (still acknowledged).
    OutOfWindow,
}

/// Receives notifications from the protocol engine.
///
/// Every method has an empty default so a sink only implements what it
/// cares about.  Methods are called from the application task, the receive
/// task and timer tasks alike; implementations must not block.
pub trait EventSink: Send + Sync {
    /// A segment was handed to the socket.
    fn on_send(&self, _seg: &Segment, _resend: bool) {}

    /// The channel's loss simulation swallowed a segment.
    fn on_loss(&self, _seg: &Segment) {}

    /// A valid segment arrived from the peer.
    fn on_receive(&self, _seg: &Segment) {}

    /// A retransmission timer fired.
    fn on_timeout(&self, _key: TimerKey) {}

    /// A segment was handed to the application by `receive`.
    fn on_deliver(&self, _seg: &Segment) {}

    /// An inbound datagram or segment was dropped.
    fn on_discard(&self, _seg: Option<&Segment>, _reason: &DiscardReason) {}
}

/// Sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {}

/// Sink that forwards every event to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn on_send(&self, seg: &Segment, resend: bool) {
        let verb = if resend { "RESEND" } else { "SEND" };
        log::debug!("[rdt] {verb} {seg}");
    }

    fn on_loss(&self, seg: &Segment) {
        if seg.contains_data() {
            log::debug!("[rdt] LOST SEGMENT seq={}", seg.seq_num);
        } else {
            log::debug!("[rdt] LOST ACK ack={}", seg.ack_num as i32);
        }
    }

    fn on_receive(&self, seg: &Segment) {
        log::debug!("[rdt] RECV {seg}");
    }

    fn on_timeout(&self, key: TimerKey) {
        log::debug!("[rdt] TIMEOUT {key}");
    }

    fn on_deliver(&self, seg: &Segment) {
        log::info!("[rdt] DELIVER seq={} len={}", seg.seq_num, seg.len());
    }

    fn on_discard(&self, seg: Option<&Segment>, reason: &DiscardReason) {
        match seg {
            Some(seg) => log::warn!("[rdt] DISCARD {seg}: {reason:?}"),
            None => log::warn!("[rdt] DISCARD datagram: {reason:?}"),
        }
    }
}
