// Copyright (c) 2025 The NSCC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Deadline queue for driving many flows from one event loop.
//!
//! Each flow publishes a single absolute deadline (its earliest pending
//! timer); the host scheduler keeps them in this queue and calls back into
//! the flow whose deadline fires first. Deadlines are keyed by flow
//! identity so teardown can cancel them without touching flow state.

use priority_queue::double_priority_queue::DoublePriorityQueue;

use crate::FlowId;
use crate::TimePico;

/// Store per-flow deadlines sorted by which expires first.
pub struct TimerQueue {
    timers: DoublePriorityQueue<FlowId, TimePico>,
}

impl TimerQueue {
    /// Create a new `TimerQueue`.
    pub fn new() -> Self {
        Self {
            timers: DoublePriorityQueue::new(),
        }
    }

    /// Create an empty timer queue with a specific capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            timers: DoublePriorityQueue::with_capacity(capacity),
        }
    }

    /// Return the number of armed deadlines.
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Return whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Arm the deadline for a flow, replacing any previous one. The deadline
    /// is absolute, in picoseconds on the host's monotonic clock.
    pub fn add(&mut self, flow_id: FlowId, deadline: TimePico) {
        _ = self.timers.push(flow_id, deadline);
    }

    /// Cancel the deadline for a flow. Required at teardown: a cancelled
    /// flow must never be called back.
    pub fn del(&mut self, flow_id: &FlowId) {
        _ = self.timers.remove(flow_id);
    }

    /// Return the time remaining until the earliest deadline.
    pub fn time_remaining(&self, now: TimePico) -> Option<TimePico> {
        self.timers
            .peek_min()
            .map(|(_, deadline)| deadline.saturating_sub(now))
    }

    /// Pop the next expired flow, if any.
    pub fn next_expire(&mut self, now: TimePico) -> Option<FlowId> {
        if let Some((_, deadline)) = self.timers.peek_min() {
            if *deadline <= now {
                let id = self.timers.pop_min().map(|(id, _)| id).unwrap();
                return Some(id);
            }
        }
        None
    }

    /// Clear all deadlines.
    pub fn clear(&mut self) {
        self.timers.clear();
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PICOS_PER_USEC;

    #[test]
    fn add() {
        let mut tq = TimerQueue::with_capacity(10);
        assert!(tq.is_empty());

        tq.add(0, 100 * PICOS_PER_USEC);
        assert_eq!(tq.len(), 1);

        tq.add(1, 200 * PICOS_PER_USEC);
        assert_eq!(tq.len(), 2);

        // Re-arming replaces the existing deadline.
        tq.add(1, 300 * PICOS_PER_USEC);
        assert_eq!(tq.len(), 2);
    }

    #[test]
    fn del() {
        let mut tq = TimerQueue::default();

        tq.add(0, 100 * PICOS_PER_USEC);
        assert_eq!(tq.len(), 1);

        // Cancelling an unknown flow is a no-op.
        tq.del(&1);
        assert_eq!(tq.len(), 1);

        tq.del(&0);
        assert!(tq.is_empty());
    }

    #[test]
    fn expired() {
        let mut tq = TimerQueue::default();

        tq.add(0, 100 * PICOS_PER_USEC);
        tq.add(1, 200 * PICOS_PER_USEC);
        tq.add(2, 300 * PICOS_PER_USEC);
        assert!(tq.next_expire(0).is_none());
        assert_eq!(tq.len(), 3);

        let id = tq.next_expire(100 * PICOS_PER_USEC);
        assert_eq!(id, Some(0));
        assert_eq!(tq.len(), 2);

        tq.del(&2);
        tq.add(3, 1000 * PICOS_PER_USEC);
        tq.add(4, 1000 * PICOS_PER_USEC);
        tq.add(5, 1500 * PICOS_PER_USEC);
        let now = 1000 * PICOS_PER_USEC;
        assert_eq!(tq.next_expire(now), Some(1));
        assert_eq!(tq.next_expire(now), Some(3));
        assert_eq!(tq.next_expire(now), Some(4));
        assert_eq!(tq.len(), 1);
    }

    #[test]
    fn time_remaining() {
        let mut tq = TimerQueue::default();
        assert_eq!(tq.time_remaining(0), None);

        tq.add(0, 100 * PICOS_PER_USEC);
        tq.add(1, 200 * PICOS_PER_USEC);
        assert_eq!(tq.time_remaining(0), Some(100 * PICOS_PER_USEC));

        // Past-due deadlines report zero remaining.
        assert_eq!(tq.time_remaining(150 * PICOS_PER_USEC), Some(0));
    }
}
