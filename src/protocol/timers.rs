use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

use crate::types::LinkId;

/// Scheduled protocol activities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Timer {
    /// Send a Hello on the link.
    Hello(LinkId),
    /// Check the dead interval of the link's neighbor.
    Dead(LinkId),
    /// Age the LSDB and purge expired entries.
    AgeSweep,
    /// Deferred origination after the rate-limit hold-down.
    Originate,
    /// Periodic re-origination of the local LSA.
    Refresh,
}

/// Min-queue of timers keyed by deadline. Timers with equal deadlines fire
/// in insertion order.
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<(Instant, u64, Timer)>>,
    counter: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, deadline: Instant, timer: Timer) {
        self.counter += 1;
        self.heap.push(Reverse((deadline, self.counter, timer)));
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((deadline, _, _))| *deadline)
    }

    /// Pops the earliest timer if it is due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<Timer> {
        if self.next_deadline()? > now {
            return None;
        }
        self.heap.pop().map(|Reverse((_, _, timer))| timer)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pops_in_deadline_order() {
        let now = Instant::now();
        let mut queue = TimerQueue::new();
        queue.schedule(now + Duration::from_secs(5), Timer::AgeSweep);
        queue.schedule(now + Duration::from_secs(1), Timer::Hello(LinkId(1)));
        queue.schedule(now + Duration::from_secs(1), Timer::Hello(LinkId(0)));

        assert_eq!(queue.next_deadline(), Some(now + Duration::from_secs(1)));
        assert_eq!(queue.pop_due(now), None);

        let later = now + Duration::from_secs(10);
        assert_eq!(queue.pop_due(later), Some(Timer::Hello(LinkId(1))));
        assert_eq!(queue.pop_due(later), Some(Timer::Hello(LinkId(0))));
        assert_eq!(queue.pop_due(later), Some(Timer::AgeSweep));
        assert_eq!(queue.pop_due(later), None);
        assert!(queue.is_empty());
    }
}
