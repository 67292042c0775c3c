//! Per-connection configuration.
//!
//! Every tunable the protocol reads at run time lives in one [`RdtConfig`]
//! owned by the connection.  Two connections in the same process never share
//! mutable settings.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::connection::RdtError;
use crate::segment::HEADER_LEN;

/// Default maximum segment size in bytes.
pub const DEFAULT_MSS: usize = 100;

/// Default retransmission timeout.
pub const DEFAULT_RTO: Duration = Duration::from_millis(500);

/// Default window capacity (segments) for both directions.
pub const DEFAULT_CAPACITY: usize = 3;

/// Upper bound (exclusive) of the simulated network jitter.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(200);

/// Largest UDP payload over IPv4.
const MAX_UDP_PAYLOAD: usize = 65_507;

/// Which ARQ discipline a connection runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Protocol {
    /// Single window timer, receiver accepts only the next expected segment.
    #[default]
    #[value(name = "gbn")]
    GoBackN,
    /// Per-segment timers, receiver buffers out-of-order segments.
    #[value(name = "sr")]
    SelectiveRepeat,
}

impl Protocol {
    /// Short tag used as a log prefix.
    pub fn tag(self) -> &'static str {
        match self {
            Protocol::GoBackN => "gbn",
            Protocol::SelectiveRepeat => "sr",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Protocol {
    type Err = RdtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gbn" | "go-back-n" => Ok(Protocol::GoBackN),
            "sr" | "selective-repeat" => Ok(Protocol::SelectiveRepeat),
            other => Err(RdtError::InvalidConfig(format!("unknown protocol {other:?}"))),
        }
    }
}

/// Settings for one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct RdtConfig {
    pub protocol: Protocol,
    /// Maximum payload bytes per segment.
    pub mss: usize,
    /// Retransmission timeout.
    pub rto: Duration,
    /// Probability in `[0, 1]` that the channel silently drops a segment.
    pub loss_rate: f64,
    /// Simulated delay is drawn uniformly from `[0, max_delay)`.
    pub max_delay: Duration,
    /// Capacity of the send window, in segments.
    pub send_capacity: usize,
    /// Capacity of the receive window, in segments.
    pub recv_capacity: usize,
    /// Seed for the loss/delay RNG; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for RdtConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::GoBackN,
            mss: DEFAULT_MSS,
            rto: DEFAULT_RTO,
            loss_rate: 0.0,
            max_delay: DEFAULT_MAX_DELAY,
            send_capacity: DEFAULT_CAPACITY,
            recv_capacity: DEFAULT_CAPACITY,
            seed: None,
        }
    }
}

impl RdtConfig {
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_mss(mut self, mss: usize) -> Self {
        self.mss = mss;
        self
    }

    pub fn with_rto(mut self, rto: Duration) -> Self {
        self.rto = rto;
        self
    }

    pub fn with_loss_rate(mut self, loss_rate: f64) -> Self {
        self.loss_rate = loss_rate;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set both window capacities.
    pub fn with_capacity(mut self, send: usize, recv: usize) -> Self {
        self.send_capacity = send;
        self.recv_capacity = recv;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Size of the buffer a reader needs for one datagram.
    pub fn datagram_len(&self) -> usize {
        self.mss + HEADER_LEN
    }

    /// Reject settings the protocol cannot run with.
    pub fn validate(&self) -> Result<(), RdtError> {
        validate_loss_rate(self.loss_rate)?;
        if self.mss == 0 {
            return Err(RdtError::InvalidConfig("mss must be at least 1".into()));
        }
        if self.datagram_len() > MAX_UDP_PAYLOAD {
            return Err(RdtError::InvalidConfig(format!(
                "mss {} exceeds the largest UDP payload",
                self.mss
            )));
        }
        if self.send_capacity == 0 || self.recv_capacity == 0 {
            return Err(RdtError::InvalidConfig(
                "window capacities must be at least 1".into(),
            ));
        }
        if self.rto.is_zero() {
            return Err(RdtError::InvalidConfig("rto must be non-zero".into()));
        }
        Ok(())
    }
}

/// Check that `rate` is a probability.
pub fn validate_loss_rate(rate: f64) -> Result<(), RdtError> {
    if (0.0..=1.0).contains(&rate) {
        Ok(())
    } else {
        Err(RdtError::InvalidConfig(format!(
            "loss rate {rate} is outside [0, 1]"
        )))
    }
}
