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

//! Queuing delay estimation for a sprayed flow.
//!
//! Two timescales are kept deliberately separate. The raw per-packet delay
//! reacts within one ACK and selects the quadrant; a slow EWMA sizes the
//! multiplicative decrease so one hot path cannot trigger a deep cut on a
//! fabric where most paths are clean.
//!
//! The base RTT only ever shrinks. After a route change onto a longer path
//! this locks in an inflated queuing-delay estimate for the rest of the
//! flow; there is no automatic remedy.

use log::*;

use crate::congestion_control::scaling::bdp_bytes;
use crate::congestion_control::scaling::ScalingParams;
use crate::DurationPico;

/// Result of feeding one RTT sample.
#[derive(Debug, Copy, Clone)]
pub struct DelaySample {
    /// Queuing delay of this packet: `max(raw_rtt - base_rtt, 0)`.
    pub raw_delay: DurationPico,

    /// The sample shrank the base RTT; `bdp` and `maxwnd` were recomputed
    /// and the window ceiling may now sit below the current window.
    pub base_shrunk: bool,
}

/// Per-flow base RTT tracking and dual-timescale delay filter.
#[derive(Debug)]
pub struct DelayEstimator {
    /// Smallest round-trip ever observed, picoseconds. Seeded from the
    /// topology oracle; monotonically non-increasing.
    base_rtt: DurationPico,

    /// Link speed in bits per second, for bdp recomputation.
    linkspeed: u64,

    /// Window ceiling as a multiple of bdp.
    maxwnd_multiplier: f64,

    /// Bandwidth-delay product at the current base RTT, bytes.
    bdp: u64,

    /// Window ceiling, bytes.
    maxwnd: u64,

    /// EWMA-filtered queuing delay, picoseconds.
    avg_delay: f64,

    /// Queuing delay of the most recent sample, for traces.
    latest_raw_delay: DurationPico,
}

impl DelayEstimator {
    pub fn new(params: &ScalingParams, base_rtt_seed: DurationPico) -> Self {
        let bdp = bdp_bytes(params.linkspeed, base_rtt_seed);
        Self {
            base_rtt: base_rtt_seed,
            linkspeed: params.linkspeed,
            maxwnd_multiplier: params.maxwnd_multiplier,
            bdp,
            maxwnd: (bdp as f64 * params.maxwnd_multiplier) as u64,
            avg_delay: 0.0,
            latest_raw_delay: 0,
        }
    }

    /// Feed one RTT sample, refining the base RTT if the sample undercuts
    /// it. Returns the raw queuing delay for quadrant selection.
    pub fn on_rtt_sample(&mut self, raw_rtt: DurationPico) -> DelaySample {
        let mut base_shrunk = false;
        if raw_rtt < self.base_rtt {
            trace!(
                "delay: base rtt refined {} -> {} ps",
                self.base_rtt,
                raw_rtt
            );
            self.base_rtt = raw_rtt;
            self.bdp = bdp_bytes(self.linkspeed, self.base_rtt);
            self.maxwnd = (self.bdp as f64 * self.maxwnd_multiplier) as u64;
            base_shrunk = true;
        }

        let raw_delay = raw_rtt.saturating_sub(self.base_rtt);
        self.latest_raw_delay = raw_delay;
        DelaySample {
            raw_delay,
            base_shrunk,
        }
    }

    /// Fold one queuing-delay sample into the slow filter.
    ///
    /// An unmarked ACK with delay above target most likely crossed a single
    /// hot path, not a congested fabric; it is fed in discounted so it
    /// cannot inflate the decrease magnitude. A sample beyond five base
    /// RTTs is a genuine emergency and overrides the discount.
    pub fn update_avg(&mut self, params: &ScalingParams, raw_delay: DurationPico, ecn: bool) {
        let sample = if raw_delay > 5 * self.base_rtt {
            raw_delay as f64
        } else if !ecn && raw_delay > params.target_qdelay {
            self.base_rtt as f64 * 0.25
        } else {
            raw_delay as f64
        };

        self.avg_delay += params.delay_alpha * (sample - self.avg_delay);
    }

    pub fn base_rtt(&self) -> DurationPico {
        self.base_rtt
    }

    pub fn bdp(&self) -> u64 {
        self.bdp
    }

    pub fn maxwnd(&self) -> u64 {
        self.maxwnd
    }

    /// Filtered queuing delay, rounded to picoseconds.
    pub fn avg_delay(&self) -> DurationPico {
        self.avg_delay as DurationPico
    }

    pub fn latest_raw_delay(&self) -> DurationPico {
        self.latest_raw_delay
    }

    /// Seed the filtered delay directly. Test hook.
    #[cfg(test)]
    pub(crate) fn set_avg_delay(&mut self, avg: DurationPico) {
        self.avg_delay = avg as f64;
    }
}
