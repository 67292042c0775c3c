//! Unreliable-network simulation in front of the real socket.
//!
//! Real networks drop and delay datagrams.  To exercise the reliability
//! machinery on a loopback interface, every outbound segment goes through a
//! [`Channel`], which applies a configurable fault model:
//!
//! | Fault       | Description                                           |
//! |-------------|-------------------------------------------------------|
//! | Packet loss | Drop a segment with probability `loss_rate`.          |
//! | Jitter      | Sleep a uniform random delay in `[0, max_delay)`.     |
//!
//! Lost segments are reported to the [`EventSink`] and never retried here;
//! retrying is the retransmission timers' job.  With `loss_rate = 0` and
//! `max_delay = 0` the channel is a plain pass-through to the socket.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{validate_loss_rate, RdtConfig};
use crate::connection::RdtError;
use crate::events::EventSink;
use crate::segment::Segment;
use crate::socket::Socket;

struct FaultModel {
    rng: StdRng,
    loss_rate: f64,
}

/// Outbound path to one peer.
pub struct Channel {
    socket: Arc<Socket>,
    peer: SocketAddr,
    max_delay: Duration,
    faults: Mutex<FaultModel>,
    events: Arc<dyn EventSink>,
}

impl Channel {
    pub fn new(
        socket: Arc<Socket>,
        peer: SocketAddr,
        config: &RdtConfig,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            socket,
            peer,
            max_delay: config.max_delay,
            faults: Mutex::new(FaultModel {
                rng,
                loss_rate: config.loss_rate,
            }),
            events,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn socket(&self) -> &Arc<Socket> {
        &self.socket
    }

    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    pub fn loss_rate(&self) -> f64 {
        self.faults().loss_rate
    }

    /// Change the simulated loss probability of a live channel.
    pub fn set_loss_rate(&self, rate: f64) -> Result<(), RdtError> {
        validate_loss_rate(rate)?;
        self.faults().loss_rate = rate;
        Ok(())
    }

    /// Send `seg` to the peer, subject to simulated loss and jitter.
    ///
    /// `resend` only changes what the event sink is told.  A dropped segment
    /// returns `Ok(())`: from the caller's point of view the network ate it.
    pub async fn transmit(&self, seg: &Segment, resend: bool) -> Result<(), RdtError> {
        let (lost, delay) = {
            let mut faults = self.faults();
            let lost = faults.rng.gen::<f64>() < faults.loss_rate;
            let bound = self.max_delay.as_micros() as u64;
            let delay = if bound == 0 {
                Duration::ZERO
            } else {
                Duration::from_micros(faults.rng.gen_range(0..bound))
            };
            (lost, delay)
        };

        if lost {
            self.events.on_loss(seg);
            return Ok(());
        }

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.socket.send_to(seg, self.peer).await?;
        self.events.on_send(seg, resend);
        Ok(())
    }

    fn faults(&self) -> MutexGuard<'_, FaultModel> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
