//! Retransmission timers.
//!
//! Reliable delivery requires that unacknowledged segments are re-sent if no
//! ACK arrives within the retransmission timeout (RTO).  This module provides:
//! - [`TimerKey`] — what a timer covers: the whole send window (Go-Back-N) or
//!   one sequence number (Selective Repeat).
//! - [`RetransmitTask`] — the explicit capture set a firing timer needs: the
//!   send window, the channel, and its key.
//! - [`Scheduler`] — a registry of running timers keyed by [`TimerKey`].
//!
//! Each timer is a tokio task that fires every RTO until cancelled.  Timers
//! are looked up by key rather than stored inside the segments they resend,
//! so a segment never owns its timer.  Cancelling is idempotent.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::channel::Channel;
use crate::window::WindowBuffer;

/// Scope of one retransmission timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Go-Back-N: one timer for everything in `[base, next_seq)`.
    Window,
    /// Selective Repeat: one timer per in-flight sequence number.
    Segment(u32),
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerKey::Window => f.write_str("window"),
            TimerKey::Segment(seq) => write!(f, "segment {seq}"),
        }
    }
}

/// Everything a timer touches when it fires.
#[derive(Clone)]
pub struct RetransmitTask {
    pub key: TimerKey,
    pub window: Arc<WindowBuffer>,
    pub channel: Arc<Channel>,
}

impl RetransmitTask {
    /// Resend what this timer covers.  Returns how many segments were handed
    /// to the channel.
    pub async fn fire(&self) -> usize {
        self.channel.events().on_timeout(self.key);

        let segments = match self.key {
            TimerKey::Window => self.window.outstanding(),
            TimerKey::Segment(seq) => self.window.get(seq).into_iter().collect(),
        };
        log::debug!("[timer] {} fired, resending {} segment(s)", self.key, segments.len());

        for seg in &segments {
            if let Err(e) = self.channel.transmit(seg, true).await {
                log::warn!("[timer] resend of seq={} failed: {e}", seg.seq_num);
            }
        }
        segments.len()
    }
}

/// Registry of running retransmission timers for one send window.
pub struct Scheduler {
    rto: Duration,
    window: Arc<WindowBuffer>,
    channel: Arc<Channel>,
    timers: Mutex<HashMap<TimerKey, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(rto: Duration, window: Arc<WindowBuffer>, channel: Arc<Channel>) -> Self {
        Self {
            rto,
            window,
            channel,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Arm the timer for `key`, first firing one RTO from now and then every
    /// RTO.  A timer already running under `key` is replaced, so this is also
    /// the restart operation.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, key: TimerKey) {
        let handle = self.spawn(key);
        if let Some(previous) = self.timers().insert(key, handle) {
            previous.abort();
        }
    }

    /// Go-Back-N housekeeping after an acknowledgement: stop the window timer
    /// if nothing is in flight, otherwise restart it.  Returns `true` when a
    /// timer is left running.
    ///
    /// The drained check and the timer update happen under the registry lock,
    /// so a concurrent `start(Window)` from the sending side cannot be undone
    /// by a stale cancel.
    pub fn settle_window(&self) -> bool {
        let mut timers = self.timers();
        if self.window.is_drained() {
            if let Some(handle) = timers.remove(&TimerKey::Window) {
                handle.abort();
            }
            false
        } else {
            let handle = self.spawn(TimerKey::Window);
            if let Some(previous) = timers.insert(TimerKey::Window, handle) {
                previous.abort();
            }
            true
        }
    }

    fn spawn(&self, key: TimerKey) -> JoinHandle<()> {
        let task = RetransmitTask {
            key,
            window: Arc::clone(&self.window),
            channel: Arc::clone(&self.channel),
        };
        let rto = self.rto;

        tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + rto, rto);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let resent = task.fire().await;
                if resent == 0 && matches!(task.key, TimerKey::Segment(_)) {
                    // segment already acknowledged and released
                    break;
                }
            }
        })
    }

    /// Cancel then start again.
    pub fn restart(&self, key: TimerKey) {
        self.cancel(key);
        self.start(key);
    }

    /// Stop the timer for `key`.  Returns `false` if none was registered;
    /// cancelling a stopped timer is never an error.
    pub fn cancel(&self, key: TimerKey) -> bool {
        match self.timers().remove(&key) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, key: TimerKey) -> bool {
        self.timers().get(&key).is_some_and(|h| !h.is_finished())
    }

    pub fn cancel_all(&self) {
        for (_, handle) in self.timers().drain() {
            handle.abort();
        }
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<TimerKey, JoinHandle<()>>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RdtConfig;
    use crate::events::NullSink;
    use crate::segment::Segment;
    use crate::socket::Socket;

    const RTO: Duration = Duration::from_millis(30);

    async fn setup(capacity: usize) -> (Scheduler, Arc<WindowBuffer>, Socket) {
        let config = RdtConfig::default().with_max_delay(Duration::ZERO);
        let peer = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let local = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let channel = Arc::new(Channel::new(
            Arc::new(local),
            peer.local_addr,
            &config,
            Arc::new(NullSink),
        ));
        let window = Arc::new(WindowBuffer::new(capacity));
        let scheduler = Scheduler::new(RTO, Arc::clone(&window), channel);
        (scheduler, window, peer)
    }

    fn seg(seq: u32) -> Segment {
        let mut s = Segment::data(seq, vec![1, 2, 3]);
        s.seal();
        s
    }

    #[tokio::test]
    async fn cancel_twice_is_harmless() {
        let (scheduler, _window, _peer) = setup(2).await;
        scheduler.start(TimerKey::Window);
        assert!(scheduler.is_running(TimerKey::Window));
        assert!(scheduler.cancel(TimerKey::Window));
        assert!(!scheduler.cancel(TimerKey::Window));
        assert!(!scheduler.is_running(TimerKey::Window));
    }

    #[tokio::test]
    async fn cancel_without_start_is_harmless() {
        let (scheduler, _window, _peer) = setup(2).await;
        assert!(!scheduler.cancel(TimerKey::Segment(9)));
    }

    #[tokio::test]
    async fn window_timer_resends_everything_outstanding() {
        let (scheduler, window, peer) = setup(4).await;
        window.put_next(seg(0)).await.unwrap();
        window.put_next(seg(1)).await.unwrap();
        window.put_next(seg(2)).await.unwrap();
        window.release_through(0);

        scheduler.start(TimerKey::Window);
        let len = RdtConfig::default().datagram_len();
        let first = tokio::time::timeout(Duration::from_secs(2), peer.recv_from(len))
            .await
            .expect("window timer never fired")
            .unwrap()
            .0;
        let second = peer.recv_from(len).await.unwrap().0;
        assert_eq!(first.seq_num, 1);
        assert_eq!(second.seq_num, 2);
        scheduler.cancel(TimerKey::Window);
    }

    #[tokio::test]
    async fn segment_timer_resends_only_its_segment() {
        let (scheduler, window, peer) = setup(4).await;
        window.put_next(seg(0)).await.unwrap();
        window.put_next(seg(1)).await.unwrap();

        scheduler.start(TimerKey::Segment(1));
        let len = RdtConfig::default().datagram_len();
        for _ in 0..2 {
            let (got, _) = tokio::time::timeout(Duration::from_secs(2), peer.recv_from(len))
                .await
                .expect("segment timer never fired")
                .unwrap();
            assert_eq!(got.seq_num, 1);
        }
        scheduler.cancel(TimerKey::Segment(1));
    }

    #[tokio::test]
    async fn segment_timer_retires_once_acked() {
        let (scheduler, window, _peer) = setup(2).await;
        window.put_next(seg(0)).await.unwrap();
        window.mark_acked(0);

        scheduler.start(TimerKey::Segment(0));
        tokio::time::sleep(RTO * 4).await;
        assert!(!scheduler.is_running(TimerKey::Segment(0)));
    }

    #[tokio::test]
    async fn settle_window_follows_drained_state() {
        let (scheduler, window, _peer) = setup(2).await;
        window.put_next(seg(0)).await.unwrap();
        assert!(scheduler.settle_window());
        assert!(scheduler.is_running(TimerKey::Window));

        window.release_through(0);
        assert!(!scheduler.settle_window());
        assert!(!scheduler.is_running(TimerKey::Window));
    }

    #[tokio::test]
    async fn start_replaces_running_timer() {
        let (scheduler, _window, _peer) = setup(2).await;
        scheduler.start(TimerKey::Window);
        scheduler.restart(TimerKey::Window);
        scheduler.start(TimerKey::Window);
        assert_eq!(scheduler.timers().len(), 1);
        scheduler.cancel_all();
        assert!(!scheduler.is_running(TimerKey::Window));
    }
}
