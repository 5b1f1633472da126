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

//! Retransmission queue.
//!
//! The loss detector pushes byte ranges it has declared lost; the host pops
//! MTU-sized segments to resend, lowest sequence first. Ranges acknowledged
//! while queued are withdrawn so they are not resent needlessly.

use std::ops::Range;

use crate::ranges::RangeSet;

/// Pending retransmission spans, ordered by sequence number.
#[derive(Debug)]
pub struct RtxQueue {
    /// Byte ranges awaiting retransmission.
    ranges: RangeSet,

    /// Largest segment handed out by `pop_next`, in bytes.
    segment_limit: u64,
}

impl RtxQueue {
    /// Create an empty queue popping segments of at most `segment_limit`
    /// bytes (normally one MTU).
    pub fn new(segment_limit: u64) -> Self {
        Self {
            ranges: RangeSet::default(),
            segment_limit: segment_limit.max(1),
        }
    }

    /// Queue a byte range for retransmission.
    pub fn push(&mut self, range: Range<u64>) {
        self.ranges.insert(range);
    }

    /// Withdraw a byte range that no longer needs retransmission.
    pub fn remove(&mut self, range: Range<u64>) {
        self.ranges.remove(range);
    }

    /// Withdraw everything below the cumulative acknowledgement cursor.
    pub fn remove_below(&mut self, seq: u64) {
        self.ranges.remove_below(seq);
    }

    /// Pop the next segment to resend: the lowest queued range, truncated to
    /// the segment limit. The remainder stays queued.
    pub fn pop_next(&mut self) -> Option<Range<u64>> {
        let range = self.ranges.pop_min()?;
        if range.end - range.start > self.segment_limit {
            let split = range.start + self.segment_limit;
            self.ranges.insert(split..range.end);
            return Some(range.start..split);
        }
        Some(range)
    }

    /// Return whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Total bytes awaiting retransmission.
    pub fn pending_bytes(&self) -> u64 {
        self.ranges.covered_len()
    }
}
