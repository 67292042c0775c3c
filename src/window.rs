//! Bounded circular window of segments.
//!
//! [`WindowBuffer`] is the one buffer type used in both directions:
//!
//! - **Send window** — the application appends with [`put_next`]; the receive
//!   task releases slots as acknowledgements arrive ([`release_through`] for
//!   cumulative acks, [`slide_acked`] for selective acks).
//! - **Receive window** — the receive task inserts with [`put_next`] (in-order
//!   only) or [`put_at`] (anywhere inside the window), hands contiguous runs to
//!   the application with [`deliver_run`], and the application drains them
//!   with [`get_next`].
//!
//! # Sequence-number layout
//!
//! ```text
//!  delivered        base                next_seq
//!      │              │                     │
//!  ────┼──────────────┼─────────────────────┼──────────▶ seq space
//!      │<── ready ───▶│<── in flight / ────▶│
//!                        out of order
//! ```
//!
//! Slot for sequence number `n` is `n mod capacity`.  `next_seq - base` never
//! exceeds `capacity`: producers wait for a free slot instead of failing.
//!
//! # Coordination
//!
//! Two counting semaphores carry the classic bounded-buffer protocol: `empty`
//! counts free slots (taken by `put_*`, returned when a slot is released or
//! delivered) and `full` counts segments ready for delivery (returned by
//! `deliver_run`, taken by `get_next`).  Slot contents and cursors sit behind
//! a `std::sync::Mutex` that is never held across an `.await`.
//!
//! [`put_next`]: WindowBuffer::put_next
//! [`put_at`]: WindowBuffer::put_at
//! [`release_through`]: WindowBuffer::release_through
//! [`slide_acked`]: WindowBuffer::slide_acked
//! [`deliver_run`]: WindowBuffer::deliver_run
//! [`get_next`]: WindowBuffer::get_next

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, Semaphore};

use crate::connection::RdtError;
use crate::segment::{Flags, Segment};

/// One occupied slot.  `status` starts as the segment's own flags and becomes
/// `Acked` / `FinAcked` once the peer acknowledges it.
#[derive(Debug, Clone)]
struct Slot {
    segment: Segment,
    status: Flags,
}

impl Slot {
    fn new(segment: Segment) -> Self {
        let status = segment.flags;
        Self { segment, status }
    }

    fn is_acked(&self) -> bool {
        matches!(self.status, Flags::Acked | Flags::FinAcked)
    }
}

#[derive(Debug)]
struct WindowState {
    slots: Vec<Option<Slot>>,
    base: u32,
    next_seq: u32,
    delivered: u32,
    closed: bool,
}

impl WindowState {
    fn index(&self, seq: u32) -> usize {
        seq as usize % self.slots.len()
    }

    fn slot(&self, seq: u32) -> Option<&Slot> {
        self.slots[self.index(seq)]
            .as_ref()
            .filter(|slot| slot.segment.seq_num == seq)
    }

    fn slot_mut(&mut self, seq: u32) -> Option<&mut Slot> {
        let idx = self.index(seq);
        self.slots[idx]
            .as_mut()
            .filter(|slot| slot.segment.seq_num == seq)
    }

    fn clear(&mut self, seq: u32) {
        let idx = self.index(seq);
        if self.slot(seq).is_some() {
            self.slots[idx] = None;
        }
    }
}

/// Point-in-time copy of a window, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub base: u32,
    pub next_seq: u32,
    pub delivered: u32,
    /// `(seq_num, status)` per slot index.
    pub slots: Vec<Option<(u32, Flags)>>,
}

/// Bounded, index-addressable circular buffer of segments.
#[derive(Debug)]
pub struct WindowBuffer {
    capacity: usize,
    state: Mutex<WindowState>,
    empty: Semaphore,
    full: Semaphore,
    /// Woken whenever `get_next` frees a slot.
    freed: Notify,
    /// Woken whenever a release leaves nothing in flight.
    drained: Notify,
}

impl WindowBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "window capacity must be at least 1");
        Self {
            capacity,
            state: Mutex::new(WindowState {
                slots: vec![None; capacity],
                base: 0,
                next_seq: 0,
                delivered: 0,
                closed: false,
            }),
            empty: Semaphore::new(capacity),
            full: Semaphore::new(0),
            freed: Notify::new(),
            drained: Notify::new(),
        }
    }

    /// Lowest unacknowledged (send) or not-yet-ready (receive) sequence number.
    pub fn base(&self) -> u32 {
        self.state().base
    }

    /// Next sequence number [`put_next`](Self::put_next) will fill.
    pub fn next_seq(&self) -> u32 {
        self.state().next_seq
    }

    /// `true` when every appended segment has been released.
    pub fn is_drained(&self) -> bool {
        let st = self.state();
        st.base == st.next_seq
    }

    /// Number of slots a producer could take without waiting.
    pub fn free_slots(&self) -> usize {
        self.empty.available_permits()
    }

    /// `true` when `seq` lies in `[base, base + capacity)`.
    pub fn accepts(&self, seq: u32) -> bool {
        let base = u64::from(self.state().base);
        let seq = u64::from(seq);
        seq >= base && seq < base + self.capacity as u64
    }

    /// Append `seg` at `next_seq` and advance it, waiting for a free slot.
    ///
    /// Returns `true` when the window held nothing in flight before this
    /// insert (`base == next_seq`).
    pub async fn put_next(&self, seg: Segment) -> Result<bool, RdtError> {
        self.take_empty().await?;

        let mut st = self.state();
        if st.closed {
            return Err(RdtError::Closed);
        }
        debug_assert_eq!(seg.seq_num, st.next_seq, "put_next out of sequence");
        let was_empty = st.base == st.next_seq;
        let idx = st.index(st.next_seq);
        st.slots[idx] = Some(Slot::new(seg));
        st.next_seq = st.next_seq.wrapping_add(1);
        Ok(was_empty)
    }

    /// Store `seg` in the slot for its own sequence number without moving any
    /// cursor.
    ///
    /// Returns `false` when that segment is already buffered.  If the slot is
    /// still held by an older segment the application has not read yet, waits
    /// until `get_next` frees it.
    pub async fn put_at(&self, seg: Segment) -> Result<bool, RdtError> {
        if self.state().slot(seg.seq_num).is_some() {
            return Ok(false);
        }
        self.take_empty().await?;

        loop {
            let notified = self.freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut st = self.state();
                if st.closed {
                    return Err(RdtError::Closed);
                }
                let idx = st.index(seg.seq_num);
                let occupant = st.slots[idx].as_ref().map(|slot| slot.segment.seq_num);
                match occupant {
                    None => {
                        st.slots[idx] = Some(Slot::new(seg));
                        return Ok(true);
                    }
                    Some(seq) if seq == seg.seq_num => {
                        drop(st);
                        self.empty.add_permits(1);
                        return Ok(false);
                    }
                    Some(_) => {}
                }
            }

            notified.await;
        }
    }

    /// Record that the peer acknowledged `seq`.  Returns `false` when `seq` is
    /// not buffered.
    pub fn mark_acked(&self, seq: u32) -> bool {
        match self.state().slot_mut(seq) {
            Some(slot) => {
                slot.status = slot.segment.flags.acked();
                true
            }
            None => false,
        }
    }

    pub fn is_acked(&self, seq: u32) -> bool {
        self.state().slot(seq).is_some_and(Slot::is_acked)
    }

    /// Cumulative release: everything up to and including `ack` is done.
    ///
    /// Moves `base` to `ack + 1` and frees one slot per sequence number
    /// passed.  Returns the number of slots freed; `0` when `ack` is below
    /// `base` or was never appended.
    pub fn release_through(&self, ack: u32) -> u32 {
        let released = {
            let mut st = self.state();
            if ack < st.base || ack >= st.next_seq {
                return 0;
            }
            let released = ack - st.base + 1;
            for seq in st.base..=ack {
                st.clear(seq);
            }
            st.base = ack + 1;
            released
        };
        self.empty.add_permits(released as usize);
        self.notify_if_drained();
        released
    }

    /// Selective release: advance `base` past every contiguous acknowledged
    /// segment and free their slots.  Returns the released sequence numbers.
    pub fn slide_acked(&self) -> Vec<u32> {
        let released = {
            let mut st = self.state();
            let mut released = Vec::new();
            while st.base != st.next_seq && st.slot(st.base).is_some_and(Slot::is_acked) {
                let seq = st.base;
                st.clear(seq);
                released.push(seq);
                st.base = seq.wrapping_add(1);
            }
            released
        };
        if !released.is_empty() {
            self.empty.add_permits(released.len());
            self.notify_if_drained();
        }
        released
    }

    /// Wait until every appended segment has been released.
    pub async fn wait_drained(&self) -> Result<(), RdtError> {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let st = self.state();
                if st.closed {
                    return Err(RdtError::Closed);
                }
                if st.base == st.next_seq {
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    /// Hand the contiguous run of buffered segments starting at `base` to the
    /// application side and advance `base` past it.  Returns the run length.
    pub fn deliver_run(&self) -> u32 {
        let run = {
            let mut st = self.state();
            let mut run = 0u32;
            while (run as usize) < self.capacity && st.slot(st.base).is_some() {
                st.base = st.base.wrapping_add(1);
                run += 1;
            }
            run
        };
        if run > 0 {
            self.full.add_permits(run as usize);
        }
        run
    }

    /// Remove and return the next ready segment, waiting until one exists.
    ///
    /// `Ok(None)` means the delivery slot was unexpectedly vacant.
    pub async fn get_next(&self) -> Result<Option<Segment>, RdtError> {
        self.full
            .acquire()
            .await
            .map_err(|_| RdtError::Closed)?
            .forget();

        let slot = {
            let mut st = self.state();
            let seq = st.delivered;
            let idx = st.index(seq);
            let slot = st.slots[idx].take();
            st.delivered = seq.wrapping_add(1);
            slot
        };
        self.empty.add_permits(1);
        self.freed.notify_waiters();
        Ok(slot.map(|slot| slot.segment))
    }

    /// Copy of the buffered, unacknowledged segment `seq`.
    pub fn get(&self, seq: u32) -> Option<Segment> {
        self.state()
            .slot(seq)
            .filter(|slot| !slot.is_acked())
            .map(|slot| slot.segment.clone())
    }

    /// Copies of every buffered segment in `[base, next_seq)`, oldest first.
    pub fn outstanding(&self) -> Vec<Segment> {
        let st = self.state();
        (st.base..st.next_seq)
            .filter_map(|seq| st.slot(seq).map(|slot| slot.segment.clone()))
            .collect()
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        let st = self.state();
        WindowSnapshot {
            base: st.base,
            next_seq: st.next_seq,
            delivered: st.delivered,
            slots: st
                .slots
                .iter()
                .map(|slot| slot.as_ref().map(|s| (s.segment.seq_num, s.status)))
                .collect(),
        }
    }

    /// Wake every waiter with [`RdtError::Closed`] and refuse further waits.
    pub fn close(&self) {
        self.state().closed = true;
        self.empty.close();
        self.full.close();
        self.freed.notify_waiters();
        self.drained.notify_waiters();
    }

    fn notify_if_drained(&self) {
        if self.is_drained() {
            self.drained.notify_waiters();
        }
    }

    async fn take_empty(&self) -> Result<(), RdtError> {
        self.empty
            .acquire()
            .await
            .map_err(|_| RdtError::Closed)?
            .forget();
        Ok(())
    }

    fn state(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn seg(seq: u32) -> Segment {
        let mut s = Segment::data(seq, vec![seq as u8; 4]);
        s.seal();
        s
    }

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn put_next_reports_empty_window() {
        let w = WindowBuffer::new(3);
        assert!(w.put_next(seg(0)).await.unwrap());
        assert!(!w.put_next(seg(1)).await.unwrap());
        assert_eq!(w.next_seq(), 2);
        assert_eq!(w.base(), 0);
        assert_eq!(w.free_slots(), 1);

        w.release_through(1);
        assert!(w.is_drained());
        assert!(w.put_next(seg(2)).await.unwrap());
    }

    #[tokio::test]
    async fn full_window_blocks_until_ack() {
        let w = Arc::new(WindowBuffer::new(2));
        w.put_next(seg(0)).await.unwrap();
        w.put_next(seg(1)).await.unwrap();

        assert!(timeout(SHORT, w.put_next(seg(2))).await.is_err(), "put on full window returned");

        let producer = {
            let w = Arc::clone(&w);
            tokio::spawn(async move { w.put_next(seg(2)).await })
        };
        tokio::time::sleep(SHORT).await;
        assert!(!producer.is_finished());

        assert_eq!(w.release_through(0), 1);
        timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer still blocked")
            .unwrap()
            .unwrap();

        // the unacknowledged segment 1 survived
        assert_eq!(w.get(1), Some(seg(1)));
        assert_eq!(w.get(2), Some(seg(2)));
        assert_eq!(w.next_seq() - w.base(), 2);
    }

    #[tokio::test]
    async fn cumulative_release_frees_every_covered_slot() {
        let w = WindowBuffer::new(8);
        for s in 0..8 {
            w.put_next(seg(s)).await.unwrap();
        }
        assert_eq!(w.release_through(1), 2);
        assert_eq!(w.base(), 2);

        assert_eq!(w.release_through(5), 4);
        assert_eq!(w.base(), 6);
        assert_eq!(w.free_slots(), 6);
        assert_eq!(w.outstanding(), vec![seg(6), seg(7)]);
    }

    #[tokio::test]
    async fn wait_drained_returns_after_last_release() {
        let w = Arc::new(WindowBuffer::new(4));
        w.wait_drained().await.unwrap();

        w.put_next(seg(0)).await.unwrap();
        w.put_next(seg(1)).await.unwrap();
        let waiter = {
            let w = Arc::clone(&w);
            tokio::spawn(async move { w.wait_drained().await })
        };
        w.release_through(0);
        tokio::time::sleep(SHORT).await;
        assert!(!waiter.is_finished());

        w.release_through(1);
        timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn stale_and_unsent_acks_release_nothing() {
        let w = WindowBuffer::new(4);
        for s in 0..3 {
            w.put_next(seg(s)).await.unwrap();
        }
        w.release_through(0);
        assert_eq!(w.release_through(0), 0);
        assert_eq!(w.release_through(3), 0);
        assert_eq!(w.base(), 1);
    }

    #[tokio::test]
    async fn selective_slide_stops_at_first_gap() {
        let w = WindowBuffer::new(4);
        for s in 0..3 {
            w.put_next(seg(s)).await.unwrap();
        }
        assert!(w.mark_acked(1));
        assert!(w.is_acked(1));
        assert!(w.slide_acked().is_empty());
        assert_eq!(w.get(1), None, "acked segments are not resent");

        w.mark_acked(0);
        assert_eq!(w.slide_acked(), vec![0, 1]);
        assert_eq!(w.base(), 2);
        assert_eq!(w.free_slots(), 3);
    }

    #[tokio::test]
    async fn mark_acked_ignores_unknown_seq() {
        let w = WindowBuffer::new(2);
        w.put_next(seg(0)).await.unwrap();
        assert!(!w.mark_acked(2));
        assert!(!w.is_acked(0));
        assert_eq!(w.snapshot().slots[0], Some((0, Flags::Data)));
        w.mark_acked(0);
        assert_eq!(w.snapshot().slots[0], Some((0, Flags::Acked)));
    }

    #[tokio::test]
    async fn out_of_order_inserts_deliver_in_order() {
        let w = WindowBuffer::new(3);

        assert!(w.put_at(seg(0)).await.unwrap());
        assert_eq!(w.deliver_run(), 1);

        assert!(w.put_at(seg(2)).await.unwrap());
        assert_eq!(w.deliver_run(), 0, "gap at 1 must hold back 2");

        assert!(w.put_at(seg(1)).await.unwrap());
        assert_eq!(w.deliver_run(), 2);
        assert_eq!(w.base(), 3);

        for expected in 0..3 {
            let got = w.get_next().await.unwrap().unwrap();
            assert_eq!(got.seq_num, expected);
        }
        assert_eq!(w.free_slots(), 3);
    }

    #[tokio::test]
    async fn duplicate_insert_is_ignored() {
        let w = WindowBuffer::new(3);
        assert!(w.put_at(seg(2)).await.unwrap());
        assert!(!w.put_at(seg(2)).await.unwrap());
        assert_eq!(w.free_slots(), 2);
    }

    #[tokio::test]
    async fn put_at_waits_for_undelivered_occupant() {
        let w = Arc::new(WindowBuffer::new(2));
        w.put_at(seg(0)).await.unwrap();
        w.put_at(seg(1)).await.unwrap();
        assert_eq!(w.deliver_run(), 2);

        let inserter = {
            let w = Arc::clone(&w);
            tokio::spawn(async move { w.put_at(seg(2)).await })
        };
        tokio::time::sleep(SHORT).await;
        assert!(!inserter.is_finished(), "segment 0 was overwritten before delivery");

        assert_eq!(w.get_next().await.unwrap().unwrap().seq_num, 0);
        assert!(timeout(Duration::from_secs(1), inserter).await.unwrap().unwrap().unwrap());
        assert_eq!(w.get_next().await.unwrap().unwrap().seq_num, 1);
    }

    #[tokio::test]
    async fn get_next_waits_for_delivery() {
        let w = WindowBuffer::new(2);
        assert!(timeout(SHORT, w.get_next()).await.is_err());

        w.put_next(seg(0)).await.unwrap();
        assert!(timeout(SHORT, w.get_next()).await.is_err(), "buffered but not ready");

        w.deliver_run();
        assert_eq!(w.get_next().await.unwrap(), Some(seg(0)));
    }

    #[tokio::test]
    async fn close_wakes_blocked_callers() {
        let w = Arc::new(WindowBuffer::new(1));
        let reader = {
            let w = Arc::clone(&w);
            tokio::spawn(async move { w.get_next().await })
        };
        tokio::time::sleep(SHORT).await;
        w.close();
        let res = timeout(Duration::from_secs(1), reader).await.unwrap().unwrap();
        assert!(matches!(res, Err(RdtError::Closed)));
        assert!(matches!(w.put_next(seg(0)).await, Err(RdtError::Closed)));
    }

    #[test]
    fn accepts_covers_exactly_one_window() {
        let w = WindowBuffer::new(3);
        assert!(w.accepts(0));
        assert!(w.accepts(2));
        assert!(!w.accepts(3));
    }
}
