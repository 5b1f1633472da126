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

//! Congestion window arithmetic.
//!
//! Increases are batched: each ACK deposits a proposal into an accumulator
//! and the accumulated sum is applied at the next fulfill adjustment,
//! normalized by the current window. The normalization is the fairness
//! primitive: two flows depositing the same proposals receive absolute
//! nudges inversely proportional to their windows. Decreases are applied
//! immediately and rate-limited to one per base RTT.

use log::*;

use crate::congestion_control::scaling::ScalingParams;
use crate::DurationPico;
use crate::Error;
use crate::Result;
use crate::TimePico;

/// Single-step decrease floor: one cut never removes more than half the
/// window.
const DECREASE_FLOOR: f64 = 0.5;

/// Per-action window movement since the last trace record, bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ActionBytes {
    pub inc_fair: u64,
    pub inc_prop: u64,
    pub inc_fast: u64,
    pub inc_eta: u64,
    pub dec_multi: u64,
    pub dec_quick: u64,
}

/// Batched window controller for one flow.
#[derive(Debug)]
pub struct WindowController {
    /// Congestion window in bytes.
    cwnd: u64,

    /// Window floor: one MTU.
    min_cwnd: u64,

    /// Accumulated increase proposals in scaled units (byte-squared);
    /// divided by the window at fulfill time.
    inc_bytes: f64,

    /// Bytes acknowledged since the last fulfill adjustment.
    received_bytes: u64,

    /// Time of the last fulfill adjustment.
    last_adjust_time: TimePico,

    /// Time of the last multiplicative decrease, if any.
    last_dec_time: Option<TimePico>,

    /// Trace accumulators.
    actions: ActionBytes,
}

impl WindowController {
    pub fn new(params: &ScalingParams, initial_cwnd: u64, now: TimePico) -> Self {
        Self {
            cwnd: initial_cwnd.max(params.min_cwnd),
            min_cwnd: params.min_cwnd,
            inc_bytes: 0.0,
            received_bytes: 0,
            last_adjust_time: now,
            last_dec_time: None,
            actions: ActionBytes::default(),
        }
    }

    pub fn cwnd(&self) -> u64 {
        self.cwnd
    }

    pub fn min_cwnd(&self) -> u64 {
        self.min_cwnd
    }

    /// Deposit a fair-increase proposal: a fixed creep per acknowledged
    /// byte, independent of the delay headroom.
    pub fn fair_increase(&mut self, params: &ScalingParams, newly_acked: u64) {
        let contribution = params.fi * newly_acked as f64;
        self.inc_bytes += contribution;
        self.actions.inc_fair += (contribution / self.cwnd as f64) as u64;
    }

    /// Deposit a proportional-increase proposal. The `(target - delay)`
    /// factor is the linear ramp: maximum slope at zero delay, zero at the
    /// target, never past it.
    pub fn proportional_increase(
        &mut self,
        params: &ScalingParams,
        newly_acked: u64,
        raw_delay: DurationPico,
    ) {
        let headroom = params.target_qdelay.saturating_sub(raw_delay);
        let contribution = params.alpha * newly_acked as f64 * headroom as f64;
        self.inc_bytes += contribution;
        self.actions.inc_prop += (contribution / self.cwnd as f64) as u64;
    }

    /// Apply a fast increase directly to the window, bypassing the batch
    /// buffer.
    pub fn fast_increase(&mut self, params: &ScalingParams, newly_acked: u64, maxwnd: u64) {
        let add = (newly_acked as f64 * params.fi_scale) as u64;
        self.cwnd = self.cwnd.saturating_add(add);
        self.actions.inc_fast += add;
        self.clamp(maxwnd);
    }

    /// Apply a multiplicative decrease sized by the filtered delay, gated
    /// to at most one per base RTT. Returns whether a cut was applied.
    pub fn multiplicative_decrease(
        &mut self,
        params: &ScalingParams,
        avg_delay: DurationPico,
        base_rtt: DurationPico,
        now: TimePico,
        maxwnd: u64,
    ) -> bool {
        if let Some(last) = self.last_dec_time {
            if now.saturating_sub(last) < base_rtt {
                return false;
            }
        }

        let d = avg_delay as f64;
        let t = params.target_qdelay as f64;
        if d <= t {
            return false;
        }

        // (d - t) / d is the fraction of delay that is excess, structurally
        // inside [0, 1), so the cut fraction stays inside [0, gamma).
        let factor = (1.0 - params.gamma * (d - t) / d).max(DECREASE_FLOOR);
        let before = self.cwnd;
        self.cwnd = (self.cwnd as f64 * factor).round() as u64;
        self.clamp(maxwnd);
        self.actions.dec_multi += before.saturating_sub(self.cwnd);
        self.last_dec_time = Some(now);

        trace!(
            "window: decrease avg={}ps factor={:.3} cwnd {} -> {}",
            avg_delay,
            factor,
            before,
            self.cwnd
        );
        true
    }

    /// Record bytes acknowledged toward the fulfill trigger.
    pub fn on_bytes_received(&mut self, newly_acked: u64) {
        self.received_bytes = self.received_bytes.saturating_add(newly_acked);
    }

    /// Whether a fulfill adjustment is due.
    pub fn should_fulfill(&self, params: &ScalingParams, now: TimePico) -> bool {
        self.received_bytes > params.adjust_bytes_threshold
            || now.saturating_sub(self.last_adjust_time) > params.adjust_period_threshold
    }

    /// Next deadline at which the period trigger fires even without ACKs.
    pub fn fulfill_deadline(&self, params: &ScalingParams) -> TimePico {
        self.last_adjust_time + params.adjust_period_threshold + 1
    }

    /// Apply the batched increase, normalized by the current window, plus
    /// the forward-progress nudge.
    pub fn fulfill(&mut self, params: &ScalingParams, now: TimePico, maxwnd: u64) {
        let applied = self.inc_bytes / self.cwnd as f64 + params.eta;
        self.cwnd = (self.cwnd as f64 + applied) as u64;
        self.actions.inc_eta += params.eta as u64;
        self.inc_bytes = 0.0;
        self.received_bytes = 0;
        self.last_adjust_time = now;
        self.clamp(maxwnd);
    }

    /// Collapse the window for a Quick Adapt reset.
    pub fn quick_adapt_reset(&mut self, new_cwnd: u64, maxwnd: u64) {
        let before = self.cwnd;
        self.cwnd = new_cwnd;
        self.clamp(maxwnd);
        self.actions.dec_quick += before.saturating_sub(self.cwnd);
    }

    /// Clamp to the bounds. The floor wins over a ceiling that has dropped
    /// below it.
    pub fn clamp(&mut self, maxwnd: u64) {
        self.cwnd = self.cwnd.min(maxwnd).max(self.min_cwnd);
    }

    /// Verify the controller invariants after a handler ran.
    pub fn check_invariants(&self, maxwnd: u64) -> Result<()> {
        let ceiling = maxwnd.max(self.min_cwnd);
        if self.cwnd < self.min_cwnd || self.cwnd > ceiling {
            return Err(Error::InvariantViolation(format!(
                "cwnd {} outside [{}, {}]",
                self.cwnd, self.min_cwnd, ceiling
            )));
        }
        if self.inc_bytes < 0.0 {
            return Err(Error::InvariantViolation(format!(
                "negative increase accumulator {}",
                self.inc_bytes
            )));
        }
        Ok(())
    }

    /// Drain the per-action movement counters for a trace record.
    pub fn take_action_bytes(&mut self) -> ActionBytes {
        std::mem::take(&mut self.actions)
    }

    #[cfg(test)]
    pub(crate) fn inc_bytes(&self) -> f64 {
        self.inc_bytes
    }

    /// Place the window directly for scenario setup. Test hook.
    #[cfg(test)]
    pub(crate) fn test_set_cwnd(&mut self, cwnd: u64) {
        self.cwnd = cwnd.max(self.min_cwnd);
    }
}
