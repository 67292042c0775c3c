//! `rdt-over-udp` — reliable, in-order delivery over UDP with Go-Back-N or
//! Selective Repeat.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐  segments  ┌────────────────┐
//!  │ SenderEngine │───────────▶│ ReceiverEngine │  (peer)
//!  └──────┬───────┘            └───────┬────────┘
//!         │          ACKs              │
//!         │◀───────────────────────────┘
//!         │
//!  ┌──────▼─────────────────────────────────────┐
//!  │                    Rdt                      │
//!  │  send window · receive window · Scheduler   │
//!  └──────┬─────────────────────────────────────┘
//!         │ Segments
//!  ┌──────▼──────┐      ┌──────────┐
//!  │   Channel   │─────▶│  Socket  │  (tokio UdpSocket)
//!  │ loss, delay │      └──────────┘
//!  └─────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`segment`]    — wire format, checksum
//! - [`socket`]     — async UDP socket speaking segments
//! - [`channel`]    — simulated loss and jitter in front of the socket
//! - [`window`]     — bounded circular send / receive window
//! - [`timer`]      — retransmission timers keyed by window or sequence number
//! - [`sender`]     — segmentation and window admission
//! - [`receiver`]   — the network loop: acks, data, delivery
//! - [`connection`] — the [`Rdt`] handle and [`RdtError`]
//! - [`config`]     — per-connection settings
//! - [`events`]     — observer hooks for protocol activity

pub mod channel;
pub mod config;
pub mod connection;
pub mod events;
pub mod receiver;
pub mod segment;
pub mod sender;
pub mod socket;
pub mod timer;
pub mod window;

pub use config::{Protocol, RdtConfig};
pub use connection::{Rdt, RdtError};
pub use events::{DiscardReason, EventSink, LogSink, NullSink};
pub use segment::{Flags, Segment, SegmentError, HEADER_LEN, NO_ACK};
