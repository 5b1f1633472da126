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

//! Quick Adapt emergency reset.
//!
//! Once per evaluation interval the flow compares what it actually
//! delivered against a fraction of the window ceiling. If something bad
//! happened (trim, timeout, extreme delay, loss) while the flow was also
//! severely underperforming, the window collapses to the recently achieved
//! throughput in one step instead of ratcheting down over many RTTs. This
//! is a one-shot reset, not a mode: after the in-flight pipeline drains,
//! the normal quadrant loop resumes from the smaller window.
//!
//! Triggers observed mid-interval are latched and evaluated at the next
//! boundary, so the achieved counter always measures a full interval.

use log::*;

use crate::congestion_control::scaling::ScalingParams;
use crate::DurationPico;
use crate::TimePico;

/// Outcome of a boundary evaluation that fired.
#[derive(Debug, Copy, Clone)]
pub struct QuickAdaptFire {
    /// New congestion window: achieved bytes floored at the minimum window.
    pub new_cwnd: u64,

    /// Bytes achieved in the window that fired, before flooring.
    pub achieved_bytes: u64,
}

/// Quick Adapt evaluation state and the post-fire stale-feedback mask.
#[derive(Debug)]
pub struct QuickAdapt {
    /// Bytes acknowledged in the current evaluation interval.
    achieved_bytes: u64,

    /// Start of the current evaluation interval.
    last_eval_time: TimePico,

    /// A trim, timeout or extreme-delay sample was seen this interval.
    trigger: bool,

    /// The loss detector declared loss this interval.
    saw_loss: bool,

    /// Stale-feedback mask: bytes of in-flight data at fire time whose
    /// feedback must be ignored.
    bytes_to_ignore: u64,

    /// Bytes of the mask already drained.
    bytes_ignored: u64,
}

impl QuickAdapt {
    pub fn new(now: TimePico) -> Self {
        Self {
            achieved_bytes: 0,
            last_eval_time: now,
            trigger: false,
            saw_loss: false,
            bytes_to_ignore: 0,
            bytes_ignored: 0,
        }
    }

    /// Evaluation interval: one base RTT plus the target delay.
    fn eval_interval(params: &ScalingParams, base_rtt: DurationPico) -> DurationPico {
        base_rtt + params.target_qdelay
    }

    /// Absolute deadline of the next boundary evaluation.
    pub fn eval_deadline(&self, params: &ScalingParams, base_rtt: DurationPico) -> TimePico {
        self.last_eval_time + Self::eval_interval(params, base_rtt)
    }

    /// Account bytes delivered this interval. Masked ACKs never reach here.
    pub fn on_acked(&mut self, newly_acked: u64) {
        self.achieved_bytes = self.achieved_bytes.saturating_add(newly_acked);
    }

    /// Latch an opportunistic trigger (trim or timeout).
    pub fn record_trigger(&mut self) {
        self.trigger = true;
    }

    /// Latch a loss declaration from the loss detector.
    pub fn record_loss(&mut self) {
        self.saw_loss = true;
    }

    /// Run the evaluation if the interval boundary has been reached.
    ///
    /// `raw_delay` is the queuing delay of the ACK driving the call (zero
    /// for timer-driven evaluations). Extreme delay both latches a trigger
    /// mid-interval and satisfies the fire condition at a boundary.
    pub fn maybe_evaluate(
        &mut self,
        params: &ScalingParams,
        now: TimePico,
        raw_delay: DurationPico,
        base_rtt: DurationPico,
        maxwnd: u64,
        in_flight: u64,
        min_cwnd: u64,
    ) -> Option<QuickAdaptFire> {
        if raw_delay > params.qa_threshold {
            self.trigger = true;
        }

        if now < self.eval_deadline(params, base_rtt) {
            return None;
        }

        let underperforming = self.achieved_bytes < maxwnd >> params.qa_gate;
        let fire = (self.trigger || self.saw_loss || raw_delay > params.qa_threshold)
            && underperforming;

        let achieved = self.achieved_bytes;
        self.achieved_bytes = 0;
        self.last_eval_time = now;
        self.trigger = false;
        self.saw_loss = false;

        if !fire {
            return None;
        }

        self.bytes_to_ignore = in_flight;
        self.bytes_ignored = 0;

        debug!(
            "quick adapt: fired, achieved={} in_flight={} masked",
            achieved, in_flight
        );

        Some(QuickAdaptFire {
            new_cwnd: achieved.max(min_cwnd),
            achieved_bytes: achieved,
        })
    }

    /// Whether the stale-feedback mask is draining.
    pub fn mask_active(&self) -> bool {
        self.bytes_ignored < self.bytes_to_ignore
    }

    /// Drain the mask by one ACK's worth of bytes. Returns true when the
    /// ACK was consumed by the mask and must not reach the quadrant loop.
    pub fn drain_mask(&mut self, newly_acked: u64) -> bool {
        if !self.mask_active() {
            return false;
        }
        self.bytes_ignored = self.bytes_ignored.saturating_add(newly_acked);
        true
    }

    #[cfg(test)]
    pub(crate) fn bytes_to_ignore(&self) -> u64 {
        self.bytes_to_ignore
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion_control::scaling::REF_RTT;
    use crate::Config;

    const MAXWND: u64 = 225_000;
    const MIN_CWND: u64 = 4096;

    fn params() -> std::sync::Arc<ScalingParams> {
        ScalingParams::derive(&Config::new(), REF_RTT).unwrap()
    }

    fn boundary(params: &ScalingParams) -> TimePico {
        REF_RTT + params.target_qdelay
    }

    #[test]
    fn fires_on_trigger_with_underperformance() {
        let p = params();
        let mut qa = QuickAdapt::new(0);

        // 1 KB achieved over the interval, far below 225 KB >> 3 = 28 KB.
        qa.on_acked(1024);
        qa.record_trigger();

        let fire = qa
            .maybe_evaluate(&p, boundary(&p), 0, REF_RTT, MAXWND, 200_000, MIN_CWND)
            .expect("must fire");
        assert_eq!(fire.achieved_bytes, 1024);
        assert_eq!(fire.new_cwnd, MIN_CWND);
        assert_eq!(qa.bytes_to_ignore(), 200_000);
        assert!(qa.mask_active());
    }

    #[test]
    fn no_fire_before_boundary() {
        let p = params();
        let mut qa = QuickAdapt::new(0);
        qa.record_trigger();

        let fire = qa.maybe_evaluate(&p, boundary(&p) - 1, 0, REF_RTT, MAXWND, 200_000, MIN_CWND);
        assert!(fire.is_none());

        // The trigger stays latched for the boundary itself.
        let fire = qa.maybe_evaluate(&p, boundary(&p), 0, REF_RTT, MAXWND, 200_000, MIN_CWND);
        assert!(fire.is_some());
    }

    #[test]
    fn no_fire_when_achieving() {
        let p = params();
        let mut qa = QuickAdapt::new(0);

        qa.on_acked(MAXWND >> p.qa_gate);
        qa.record_trigger();

        let fire = qa.maybe_evaluate(&p, boundary(&p), 0, REF_RTT, MAXWND, 200_000, MIN_CWND);
        assert!(fire.is_none());
        assert!(!qa.mask_active());
    }

    #[test]
    fn no_fire_without_bad_news() {
        let p = params();
        let mut qa = QuickAdapt::new(0);

        // Underperforming but nothing bad happened: an application-limited
        // flow must not be reset.
        qa.on_acked(1024);
        let fire = qa.maybe_evaluate(&p, boundary(&p), 0, REF_RTT, MAXWND, 200_000, MIN_CWND);
        assert!(fire.is_none());
    }

    #[test]
    fn extreme_delay_fires_at_boundary() {
        let p = params();
        let mut qa = QuickAdapt::new(0);
        qa.on_acked(1024);

        let raw_delay = p.qa_threshold + 1;
        let fire = qa.maybe_evaluate(
            &p,
            boundary(&p),
            raw_delay,
            REF_RTT,
            MAXWND,
            200_000,
            MIN_CWND,
        );
        assert!(fire.is_some());
    }

    #[test]
    fn extreme_delay_latches_mid_interval() {
        let p = params();
        let mut qa = QuickAdapt::new(0);
        qa.on_acked(1024);

        // Extreme sample early in the interval, calm at the boundary.
        let fire = qa.maybe_evaluate(&p, 10, p.qa_threshold + 1, REF_RTT, MAXWND, 200_000, MIN_CWND);
        assert!(fire.is_none());

        let fire = qa.maybe_evaluate(&p, boundary(&p), 0, REF_RTT, MAXWND, 200_000, MIN_CWND);
        assert!(fire.is_some());
    }

    #[test]
    fn boundary_resets_window_counters() {
        let p = params();
        let mut qa = QuickAdapt::new(0);
        qa.on_acked(1024);

        // Quiet boundary: nothing fires, counters restart.
        assert!(qa
            .maybe_evaluate(&p, boundary(&p), 0, REF_RTT, MAXWND, 200_000, MIN_CWND)
            .is_none());
        assert_eq!(qa.eval_deadline(&p, REF_RTT), 2 * boundary(&p));

        // The stale trigger from the previous interval must not fire now.
        qa.on_acked(512);
        let fire = qa.maybe_evaluate(&p, 2 * boundary(&p), 0, REF_RTT, MAXWND, 200_000, MIN_CWND);
        assert!(fire.is_none());
    }

    #[test]
    fn achieved_floors_the_reset() {
        let p = params();
        let mut qa = QuickAdapt::new(0);

        // Achieved above the floor becomes the new window as-is.
        qa.on_acked(20_000);
        qa.record_loss();
        let fire = qa
            .maybe_evaluate(&p, boundary(&p), 0, REF_RTT, MAXWND, 100_000, MIN_CWND)
            .expect("must fire");
        assert_eq!(fire.new_cwnd, 20_000);
    }

    #[test]
    fn mask_drains_by_acked_bytes() {
        let p = params();
        let mut qa = QuickAdapt::new(0);
        qa.on_acked(1024);
        qa.record_trigger();
        qa.maybe_evaluate(&p, boundary(&p), 0, REF_RTT, MAXWND, 10_000, MIN_CWND)
            .expect("must fire");

        // 10 KB in flight at fire time: ACKs drain it without reaching the
        // quadrant loop.
        assert!(qa.drain_mask(4096));
        assert!(qa.drain_mask(4096));
        assert!(qa.mask_active());
        assert!(qa.drain_mask(4096));
        assert!(!qa.mask_active());
        assert!(!qa.drain_mask(4096));
    }
}
