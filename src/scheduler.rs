//! Clock / event scheduler.
//!
//! The reference shape threads a sorted intrusive linked list of
//! caller-owned event structs. Rust ownership doesn't do intrusive lists
//! cheaply, so this is a binary heap of caller-supplied `EventId`s, with the
//! event bodies kept in a slab the caller indexes into. Cancellation becomes
//! O(log n) amortized (a lazy-deletion tombstone) instead of O(1) unlink —
//! an accepted tradeoff for dropping the intrusive pointers.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use log::trace;

/// 5_400_000_000 Hz: LCM of the 13.5 MHz VCLK and the 200 MHz SH-4 clock.
pub const SCHED_FREQUENCY: u64 = 5_400_000_000;

/// `SCHED_FREQUENCY / 200_000_000`: multiply SH-4 cycle counts by this to
/// get scheduler-cycle counts.
pub const SH4_CLOCK_SCALE: u64 = SCHED_FREQUENCY / 200_000_000;

/// `SCHED_FREQUENCY / 13_500_000`: multiply VCLK cycle counts by this.
pub const VCLK_CLOCK_SCALE: u64 = SCHED_FREQUENCY / 13_500_000;

/// Upper bound on scheduler-cycles dispatched in one `run_timeslice` call.
pub const DC_TIMESLICE: u64 = SCHED_FREQUENCY / 400;

pub type EventId = u64;

struct HeapEntry {
    when: u64,
    seq: u64,
    id: EventId,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.when == other.when && self.seq == other.seq
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the earliest `when` (and, among
        // ties, the earliest-scheduled event) on top, so reverse both.
        other.when.cmp(&self.when).then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Invariant: `stamp == target - countdown` at every sampling point,
/// restored by `resync` whenever the event list changes.
pub struct Clock {
    heap: BinaryHeap<HeapEntry>,
    cancelled: std::collections::HashSet<EventId>,
    live_when: std::collections::HashMap<EventId, u64>,
    next_seq: u64,
    countdown: i64,
    target: u64,
    stamp: u64,
}

impl Clock {
    pub fn new() -> Self {
        Clock {
            heap: BinaryHeap::new(),
            cancelled: std::collections::HashSet::new(),
            live_when: std::collections::HashMap::new(),
            next_seq: 0,
            countdown: 0,
            target: 0,
            stamp: 0,
        }
    }

    pub fn stamp(&self) -> u64 {
        self.stamp
    }
    pub fn target(&self) -> u64 {
        self.target
    }
    pub fn countdown(&self) -> i64 {
        self.countdown
    }

    /// Schedules `id` to fire at absolute scheduler-cycle `when`.
    pub fn schedule(&mut self, id: EventId, when: u64) {
        self.cancelled.remove(&id);
        self.live_when.insert(id, when);
        self.heap.push(HeapEntry { when, seq: self.next_seq, id });
        self.next_seq += 1;
        self.resync();
    }

    /// No-op if `id` is not currently scheduled.
    pub fn cancel(&mut self, id: EventId) {
        if self.live_when.remove(&id).is_some() {
            self.cancelled.insert(id);
        }
        self.resync();
    }

    /// Returns the `when` of the earliest still-live event, if any.
    pub fn peek(&mut self) -> Option<u64> {
        self.drop_cancelled_front();
        self.heap.peek().map(|e| e.when)
    }

    /// Pops and returns every event whose `when <= self.stamp`, in `when`
    /// order (ties broken by schedule order).
    pub fn pop_due(&mut self) -> Vec<EventId> {
        let mut due = Vec::new();
        loop {
            self.drop_cancelled_front();
            match self.heap.peek() {
                Some(e) if e.when <= self.stamp => {
                    let entry = self.heap.pop().unwrap();
                    self.live_when.remove(&entry.id);
                    due.push(entry.id);
                }
                _ => break,
            }
        }
        self.resync();
        due
    }

    fn drop_cancelled_front(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.cancelled.contains(&top.id) {
                let e = self.heap.pop().unwrap();
                self.cancelled.remove(&e.id);
            } else {
                break;
            }
        }
    }

    /// Recomputes `target` from the earliest live event and restores the
    /// `stamp = target - countdown` invariant.
    fn resync(&mut self) {
        self.drop_cancelled_front();
        self.target = self.heap.peek().map(|e| e.when).unwrap_or(self.stamp);
        self.countdown = self.target as i64 - self.stamp as i64;
    }

    /// Advances `stamp` by `cycles`. The caller (a hot CPU loop) must not
    /// pass more than the current `countdown` value; this is an unchecked
    /// precondition, enforced here only in debug builds.
    pub fn advance(&mut self, cycles: u64) {
        debug_assert!(cycles as i64 <= self.countdown.max(0) || self.heap.is_empty());
        self.stamp += cycles;
        self.countdown -= cycles as i64;
        trace!("clock advance by {cycles}, stamp={}, countdown={}", self.stamp, self.countdown);
    }

    /// Runs one timeslice: advances up to `DC_TIMESLICE` cycles, dispatching
    /// every due event through `dispatch`, stopping early if `dispatch`
    /// returns `false` (the CPU signalled halt).
    pub fn run_timeslice<F: FnMut(EventId) -> bool>(&mut self, mut dispatch: F) {
        let slice_end = self.stamp + DC_TIMESLICE;
        loop {
            self.resync();
            let next_when = self.peek();
            let stop_at = match next_when {
                Some(w) if w < slice_end => w,
                _ => slice_end,
            };
            if stop_at > self.stamp {
                self.advance(stop_at - self.stamp);
            }
            let due = self.pop_due();
            if due.is_empty() && self.stamp >= slice_end {
                break;
            }
            for id in due {
                if !dispatch(id) {
                    return;
                }
            }
            if self.stamp >= slice_end && self.peek().map_or(true, |w| w > self.stamp) {
                break;
            }
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_target_countdown_invariant_holds() {
        let mut clk = Clock::new();
        clk.schedule(1, 100);
        clk.schedule(2, 50);
        assert_eq!(clk.stamp(), clk.target() as u64 - clk.countdown() as u64);
        assert_eq!(clk.peek(), Some(50));
        let due = clk.pop_due();
        assert!(due.is_empty()); // stamp is still 0
        assert_eq!(clk.stamp(), clk.target() - (clk.countdown() as u64));
    }

    #[test]
    fn peek_equals_target_when_nonempty() {
        let mut clk = Clock::new();
        clk.schedule(7, 42);
        assert_eq!(clk.peek(), Some(clk.target()));
    }

    #[test]
    fn cancel_before_fire_is_noop_then_removed() {
        let mut clk = Clock::new();
        clk.schedule(1, 10);
        clk.cancel(1);
        clk.advance(10);
        assert!(clk.pop_due().is_empty());
        // cancelling something never scheduled is a no-op
        clk.cancel(999);
    }

    #[test]
    fn fires_in_when_order() {
        let mut clk = Clock::new();
        clk.schedule(10, 30);
        clk.schedule(20, 10);
        clk.schedule(30, 20);
        clk.advance(clk.countdown() as u64);
        let mut fired = Vec::new();
        loop {
            let due = clk.pop_due();
            if due.is_empty() {
                if let Some(w) = clk.peek() {
                    clk.advance(w - clk.stamp());
                    continue;
                }
                break;
            }
            fired.extend(due);
        }
        assert_eq!(fired, vec![20, 30, 10]);
    }
}
