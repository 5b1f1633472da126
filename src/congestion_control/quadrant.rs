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

//! Per-ACK decision matrix.
//!
//! Two orthogonal congestion signals are fused on every acknowledgement:
//! the queuing delay magnitude against the target, and the ECN echo. ECN
//! leads delay on a sprayed fabric (a mark with low delay is most likely a
//! single hot path, best handled by path steering), delay without a mark
//! means the switches have stopped marking, and agreement on both means a
//! real cut is due. Selection always uses the raw per-packet delay so the
//! matrix reacts within one ACK; only the decrease magnitude consults the
//! slow filter.

use crate::DurationPico;
use crate::PICOS_PER_USEC;

/// Raw delay below which an ACK counts toward the empty-network run.
const FAST_INC_DELAY_CEILING: DurationPico = PICOS_PER_USEC;

/// Window action chosen for one acknowledgement.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Quadrant {
    /// RTT elevated but no marks: the switches have stopped marking; creep
    /// up by a fixed amount.
    FairIncrease,

    /// Empty or lightly loaded network: push toward the bandwidth-delay
    /// product in proportion to the remaining delay headroom.
    ProportionalIncrease,

    /// Both signals agree the fabric is congested: cut.
    MultiplicativeDecrease,

    /// Marked but fast: defer to path steering, leave the window alone.
    Noop,

    /// A full window of near-zero-delay ACKs: the network is empty, grow
    /// faster than the proportional ramp allows.
    FastIncrease,
}

impl Quadrant {
    /// Stable code used in trace records.
    pub fn code(&self) -> u8 {
        match self {
            Quadrant::FairIncrease => 0,
            Quadrant::ProportionalIncrease => 1,
            Quadrant::MultiplicativeDecrease => 2,
            Quadrant::Noop => 3,
            Quadrant::FastIncrease => 4,
        }
    }
}

/// Classifier state: the empty-network run that arms fast increase.
#[derive(Debug, Default)]
pub struct QuadrantClassifier {
    /// Newly acknowledged bytes over the current run of near-zero-delay
    /// unmarked ACKs.
    run_bytes: u64,

    /// In fast-increase mode until the first non-qualifying ACK.
    fast_mode: bool,
}

impl QuadrantClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify one acknowledgement.
    pub fn classify(
        &mut self,
        ecn: bool,
        raw_delay: DurationPico,
        target_qdelay: DurationPico,
        cwnd: u64,
        newly_acked: u64,
    ) -> Quadrant {
        // An ECN mark breaks the run: a marked packet saw a queue even if
        // its delay was negligible.
        let qualifies = !ecn && raw_delay < FAST_INC_DELAY_CEILING;
        if qualifies {
            self.run_bytes = self.run_bytes.saturating_add(newly_acked);
            if self.fast_mode || self.run_bytes > cwnd {
                self.fast_mode = true;
                return Quadrant::FastIncrease;
            }
        } else {
            self.run_bytes = 0;
            self.fast_mode = false;
        }

        match (ecn, raw_delay >= target_qdelay) {
            (false, false) => Quadrant::ProportionalIncrease,
            (false, true) => Quadrant::FairIncrease,
            (true, false) => Quadrant::Noop,
            (true, true) => Quadrant::MultiplicativeDecrease,
        }
    }

    /// Whether the classifier is currently in fast-increase mode.
    pub fn in_fast_increase(&self) -> bool {
        self.fast_mode
    }
}
