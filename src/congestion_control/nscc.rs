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

//! Network-signal congestion control: the per-flow sender state machine.
//!
//! Every acknowledgement runs one pass through a fixed pipeline: the delay
//! estimator refines the base RTT and the slow filter, the quadrant
//! classifier picks an action from the raw delay and the ECN echo, the
//! window controller applies it, Quick Adapt accounts achieved bytes and
//! may reset the window at its next boundary, and the multipath engine is
//! told how the packet's path behaved. The stages are kept as separate
//! types on purpose: raw delay selects the quadrant while the filtered
//! delay sizes the decrease, and collapsing the two is the classic way to
//! get this controller wrong.

use std::ops::Range;
use std::sync::Arc;

use log::*;

use super::delay::DelayEstimator;
use super::quadrant::Quadrant;
use super::quadrant::QuadrantClassifier;
use super::quick_adapt::QuickAdapt;
use super::quick_adapt::QuickAdaptFire;
use super::scaling::ScalingParams;
use super::sleek::Sleek;
use super::timer::Timer;
use super::timer::TimerTable;
use super::window::WindowController;
use super::AckEvent;
use super::CongestionController;
use super::CongestionStats;
use super::NackEvent;
use crate::multipath::build_multipath_engine;
use crate::multipath::MultipathEngine;
use crate::multipath::PathFeedback;
use crate::ranges::RangeSet;
use crate::rtx::RtxQueue;
use crate::trace::FulfillRecord;
use crate::trace::QuickAdaptRecord;
use crate::trace::TraceSink;
use crate::Config;
use crate::DurationPico;
use crate::Error;
use crate::FlowId;
use crate::PathId;
use crate::Result;
use crate::TimePico;

/// Bound on tracked selective-acknowledgement ranges. Evicting the lowest
/// range can only cause a spurious retransmission, never a missed one.
const SACK_RANGES_CAPACITY: usize = 4096;

/// Per-flow sender congestion control over a sprayed multipath fabric.
pub struct Nscc {
    flow_id: FlowId,

    /// Derived parameter bundle, shared across flows.
    params: Arc<ScalingParams>,

    /// Base RTT tracking and the dual-timescale delay filter.
    delay: DelayEstimator,

    /// Batched window controller.
    window: WindowController,

    /// Per-ACK decision matrix and fast-increase qualifier.
    classifier: QuadrantClassifier,

    /// Emergency reset and stale-feedback mask.
    qa: QuickAdapt,

    /// Window-scaled loss detection.
    sleek: Sleek,

    /// Path selection engine fed with per-packet feedback.
    multipath: Box<dyn MultipathEngine>,

    /// Segments declared lost or trimmed, awaiting retransmission.
    rtx: RtxQueue,

    /// Selectively acknowledged bytes above the cumulative cursor.
    sacked: RangeSet,

    /// Per-flow timers, exposed to the host as absolute deadlines.
    timers: TimerTable,

    /// Highest byte offset handed to the wire.
    highest_sent: u64,

    /// Receiver's cumulative cursor.
    cumulative_ack: u64,

    /// Bytes in the network.
    in_flight: u64,

    /// Probe bracket awaiting pickup by the host.
    probe_pending: Option<u64>,

    /// Feed NACK round-trips into base RTT refinement. Trimmed packets can
    /// see unusual forwarding delays, so this is switchable; default on.
    nack_rtt_refinement: bool,

    /// Terminal flag; set at close, rejects all further events.
    terminated: bool,

    stats: CongestionStats,

    /// Optional per-fulfill trace sink.
    trace: Option<Box<dyn TraceSink>>,

    /// Most recent quadrant decision, for trace records.
    last_quadrant: Quadrant,

    /// ECN echo of the most recent ACK, for trace records.
    last_ecn: bool,
}

impl Nscc {
    pub fn new(conf: &Config, network_rtt: DurationPico, flow_id: FlowId) -> Result<Self> {
        let params = ScalingParams::derive(conf, network_rtt)?;
        let delay = DelayEstimator::new(&params, network_rtt);

        // Start at the full window: an unloaded datacenter path is the
        // common case, and Quick Adapt catches the incast case within one
        // evaluation interval.
        let window = WindowController::new(&params, delay.maxwnd(), 0);

        let mut flow = Self {
            flow_id,
            delay,
            window,
            classifier: QuadrantClassifier::new(),
            qa: QuickAdapt::new(0),
            sleek: Sleek::new(conf.min_retx_packets(), conf.loss_retx_factor(), params.mtu),
            multipath: build_multipath_engine(conf.multipath_algorithm(), conf.path_count()),
            rtx: RtxQueue::new(params.mtu),
            sacked: RangeSet::new(SACK_RANGES_CAPACITY),
            timers: TimerTable::default(),
            highest_sent: 0,
            cumulative_ack: 0,
            in_flight: 0,
            probe_pending: None,
            nack_rtt_refinement: conf.nack_rtt_refinement(),
            terminated: false,
            stats: CongestionStats::default(),
            trace: None,
            last_quadrant: Quadrant::ProportionalIncrease,
            last_ecn: false,
            params,
        };
        flow.arm_timers();
        Ok(flow)
    }

    /// Attach a trace sink receiving one record per fulfill adjustment and
    /// one per Quick Adapt firing.
    pub fn set_trace_sink(&mut self, sink: Box<dyn TraceSink>) {
        self.trace = Some(sink);
    }

    /// Replace the path selection engine.
    pub fn set_multipath_engine(&mut self, engine: Box<dyn MultipathEngine>) {
        self.multipath = engine;
    }

    pub fn base_rtt(&self) -> DurationPico {
        self.delay.base_rtt()
    }

    pub fn bdp(&self) -> u64 {
        self.delay.bdp()
    }

    pub fn maxwnd(&self) -> u64 {
        self.delay.maxwnd()
    }

    pub fn avg_delay(&self) -> DurationPico {
        self.delay.avg_delay()
    }

    pub fn bytes_in_flight(&self) -> u64 {
        self.in_flight
    }

    /// Probe quiet interval: one base RTT plus the target delay.
    fn quiet_interval(&self) -> DurationPico {
        self.delay.base_rtt() + self.params.target_qdelay
    }

    fn guard(&self) -> Result<()> {
        if self.terminated {
            return Err(Error::FlowTerminated);
        }
        Ok(())
    }

    /// Abort the flow on an invariant violation: log, go terminal, cancel
    /// timers, and hand the error up. State is left untouched thereafter.
    fn fatal(&mut self, e: Error) -> Error {
        error!("flow {}: fatal: {}", self.flow_id, e);
        self.terminated = true;
        self.timers.clear();
        e
    }

    /// Recompute and publish the per-flow deadlines. While the
    /// stale-feedback mask drains, the fulfill and Quick Adapt timers stay
    /// down: every surviving in-flight packet carries obsolete feedback.
    fn arm_timers(&mut self) {
        if self.terminated {
            return;
        }

        if self.qa.mask_active() {
            self.timers.stop(Timer::FulfillAdjust);
            self.timers.stop(Timer::QuickAdaptEval);
        } else {
            self.timers
                .set(Timer::FulfillAdjust, self.window.fulfill_deadline(&self.params));
            self.timers.set(
                Timer::QuickAdaptEval,
                self.qa.eval_deadline(&self.params, self.delay.base_rtt()),
            );
        }

        if self.in_flight > 0 {
            self.timers
                .set(Timer::Probe, self.sleek.probe_deadline(self.quiet_interval()));
        } else {
            self.timers.stop(Timer::Probe);
        }
    }

    /// Sequence bookkeeping shared by masked and unmasked ACKs: the SACK
    /// set, the cumulative cursor, and the recovery bracket must stay
    /// truthful even while congestion reactions are suppressed.
    fn account_ack(&mut self, ack: &AckEvent) {
        if ack.seq_start == self.cumulative_ack {
            self.sleek.on_in_order_ack(ack.now);
        } else {
            self.sleek.on_out_of_order_ack(ack.now);
        }

        self.sacked
            .insert(ack.seq_start..ack.seq_start + ack.newly_acked);

        if ack.cumulative_ack > self.cumulative_ack {
            self.cumulative_ack = ack.cumulative_ack;
            self.sacked.remove_below(self.cumulative_ack);
            self.rtx.remove_below(self.cumulative_ack);
            self.sleek.on_cumulative_advance(self.cumulative_ack);
        }
    }

    fn emit_fulfill(&mut self, now: TimePico) {
        let actions = self.window.take_action_bytes();
        if let Some(trace) = self.trace.as_mut() {
            trace.on_fulfill(&FulfillRecord {
                time: now,
                flow_id: self.flow_id,
                cwnd: self.window.cwnd(),
                in_flight: self.in_flight,
                bdp: self.delay.bdp(),
                maxwnd: self.delay.maxwnd(),
                avg_delay: self.delay.avg_delay(),
                raw_delay: self.delay.latest_raw_delay(),
                target_delay: self.params.target_qdelay,
                base_rtt: self.delay.base_rtt(),
                ecn: self.last_ecn,
                quadrant: self.last_quadrant.code(),
                inc_fair: actions.inc_fair,
                inc_prop: actions.inc_prop,
                inc_fast: actions.inc_fast,
                inc_eta: actions.inc_eta,
                dec_multi: actions.dec_multi,
                dec_quick: actions.dec_quick,
            });
        }
    }

    fn apply_quick_adapt(&mut self, now: TimePico, fire: QuickAdaptFire) {
        let before = self.window.cwnd();
        self.window.quick_adapt_reset(fire.new_cwnd, self.delay.maxwnd());
        self.stats.quick_adapt_count += 1;

        debug!(
            "flow {}: quick adapt cwnd {} -> {}",
            self.flow_id,
            before,
            self.window.cwnd()
        );

        if let Some(trace) = self.trace.as_mut() {
            trace.on_quick_adapt(&QuickAdaptRecord {
                time: now,
                flow_id: self.flow_id,
                cwnd_before: before,
                cwnd_after: self.window.cwnd(),
                achieved_bytes: fire.achieved_bytes,
                in_flight: self.in_flight,
            });
        }
    }

    #[cfg(test)]
    pub(crate) fn test_set_avg_delay(&mut self, avg: DurationPico) {
        self.delay.set_avg_delay(avg);
    }

    #[cfg(test)]
    pub(crate) fn test_set_cwnd(&mut self, cwnd: u64) {
        self.window.test_set_cwnd(cwnd);
    }
}

impl CongestionController for Nscc {
    fn name(&self) -> &str {
        "NSCC"
    }

    fn on_packet_sent(&mut self, now: TimePico, sent_bytes: u64, _path_id: PathId) -> Result<()> {
        self.guard()?;

        self.highest_sent += sent_bytes;
        self.in_flight = self.in_flight.saturating_add(sent_bytes);
        self.stats.bytes_in_flight = self.in_flight;
        self.stats.bytes_sent_in_total = self.stats.bytes_sent_in_total.saturating_add(sent_bytes);
        self.sleek.on_packet_sent(now, sent_bytes);

        self.arm_timers();
        Ok(())
    }

    fn on_retransmit_sent(&mut self, now: TimePico, sent_bytes: u64, _path_id: PathId) -> Result<()> {
        self.guard()?;

        // Retransmissions re-enter the network but not the sequence space.
        self.in_flight = self.in_flight.saturating_add(sent_bytes);
        self.stats.bytes_in_flight = self.in_flight;
        self.stats.bytes_sent_in_total = self.stats.bytes_sent_in_total.saturating_add(sent_bytes);
        self.sleek.on_packet_sent(now, sent_bytes);

        self.arm_timers();
        Ok(())
    }

    fn on_ack(&mut self, ack: &AckEvent) -> Result<()> {
        self.guard()?;

        let newly_acked = ack.newly_acked;
        self.in_flight = self.in_flight.saturating_sub(newly_acked);
        self.stats.bytes_in_flight = self.in_flight;
        self.stats.bytes_acked_in_total =
            self.stats.bytes_acked_in_total.saturating_add(newly_acked);

        self.account_ack(ack);

        // Feedback generated before a Quick Adapt reset is obsolete; it
        // only drains the mask.
        if self.qa.drain_mask(newly_acked) {
            self.arm_timers();
            return Ok(());
        }

        // Delay estimation. A shrunk base RTT lowers the ceiling; the
        // window clamps down in the same handler.
        let sample = self.delay.on_rtt_sample(ack.raw_rtt);
        if sample.base_shrunk {
            self.window.clamp(self.delay.maxwnd());
        }
        self.delay.update_avg(&self.params, sample.raw_delay, ack.ecn);

        // Quadrant selection on the raw delay.
        let quadrant = self.classifier.classify(
            ack.ecn,
            sample.raw_delay,
            self.params.target_qdelay,
            self.window.cwnd(),
            newly_acked,
        );
        self.last_quadrant = quadrant;
        self.last_ecn = ack.ecn;

        match quadrant {
            Quadrant::FairIncrease => self.window.fair_increase(&self.params, newly_acked),
            Quadrant::ProportionalIncrease => {
                self.window
                    .proportional_increase(&self.params, newly_acked, sample.raw_delay)
            }
            Quadrant::FastIncrease => {
                self.window
                    .fast_increase(&self.params, newly_acked, self.delay.maxwnd())
            }
            Quadrant::Noop => {}
            Quadrant::MultiplicativeDecrease => {
                self.window.multiplicative_decrease(
                    &self.params,
                    self.delay.avg_delay(),
                    self.delay.base_rtt(),
                    ack.now,
                    self.delay.maxwnd(),
                );
            }
        }

        // Loss detection rides the reorder horizon.
        if self
            .sleek
            .should_enter_recovery(self.window.cwnd(), self.delay.maxwnd(), self.rtx.is_empty())
        {
            self.sleek.enter_recovery(
                self.highest_sent,
                self.cumulative_ack,
                &self.sacked,
                &mut self.rtx,
            );
            self.qa.record_loss();
            self.stats.recovery_count += 1;
        }

        // Batched fulfill adjustment.
        self.window.on_bytes_received(newly_acked);
        if self.window.should_fulfill(&self.params, ack.now) {
            self.window.fulfill(&self.params, ack.now, self.delay.maxwnd());
            self.emit_fulfill(ack.now);
        }

        // Quick Adapt accumulation and boundary evaluation.
        self.qa.on_acked(newly_acked);
        if let Some(fire) = self.qa.maybe_evaluate(
            &self.params,
            ack.now,
            sample.raw_delay,
            self.delay.base_rtt(),
            self.delay.maxwnd(),
            self.in_flight,
            self.window.min_cwnd(),
        ) {
            self.apply_quick_adapt(ack.now, fire);
        }

        if let Err(e) = self.window.check_invariants(self.delay.maxwnd()) {
            return Err(self.fatal(e));
        }

        let feedback = if ack.ecn {
            PathFeedback::Ecn
        } else {
            PathFeedback::Good
        };
        self.multipath.notify(ack.path_id, feedback);

        self.arm_timers();
        Ok(())
    }

    fn on_nack(&mut self, nack: &NackEvent) -> Result<()> {
        self.guard()?;

        self.in_flight = self.in_flight.saturating_sub(nack.seq_len);
        self.stats.bytes_in_flight = self.in_flight;
        self.stats.bytes_trimmed_in_total = self
            .stats
            .bytes_trimmed_in_total
            .saturating_add(nack.seq_len);

        if self.nack_rtt_refinement {
            if let Some(raw_rtt) = nack.raw_rtt {
                let sample = self.delay.on_rtt_sample(raw_rtt);
                if sample.base_shrunk {
                    self.window.clamp(self.delay.maxwnd());
                }
            }
        }

        self.sleek.on_nack(nack.now);
        self.qa.record_trigger();
        self.rtx.push(nack.seq_start..nack.seq_start + nack.seq_len);
        self.multipath.notify(nack.path_id, PathFeedback::Nack);

        self.arm_timers();
        Ok(())
    }

    fn on_probe_ack(&mut self, ack: &AckEvent) -> Result<()> {
        self.guard()?;

        // Probes never refine the base RTT or drive the quadrant loop;
        // they only tell the loss detector whether the pipe has drained.
        let raw_delay = ack.raw_rtt.saturating_sub(self.delay.base_rtt());
        let lost = self.sleek.on_probe_ack(
            raw_delay,
            self.params.target_qdelay,
            self.cumulative_ack,
            &self.sacked,
            &mut self.rtx,
        );
        if lost > 0 {
            self.stats.bytes_lost_in_total = self.stats.bytes_lost_in_total.saturating_add(lost);
            self.in_flight = self.in_flight.saturating_sub(lost);
            self.stats.bytes_in_flight = self.in_flight;
            self.qa.record_loss();
        }

        self.arm_timers();
        Ok(())
    }

    fn on_path_timeout(&mut self, _now: TimePico, path_id: PathId) -> Result<()> {
        self.guard()?;

        self.qa.record_trigger();
        self.multipath.notify(path_id, PathFeedback::Timeout);

        self.arm_timers();
        Ok(())
    }

    fn on_timer(&mut self, now: TimePico) -> Result<()> {
        self.guard()?;

        if self.timers.is_expired(Timer::FulfillAdjust, now) {
            self.timers.stop(Timer::FulfillAdjust);
            if !self.qa.mask_active() && self.window.should_fulfill(&self.params, now) {
                self.window.fulfill(&self.params, now, self.delay.maxwnd());
                self.emit_fulfill(now);
            }
        }

        if self.timers.is_expired(Timer::QuickAdaptEval, now) {
            self.timers.stop(Timer::QuickAdaptEval);
            if !self.qa.mask_active() {
                if let Some(fire) = self.qa.maybe_evaluate(
                    &self.params,
                    now,
                    0,
                    self.delay.base_rtt(),
                    self.delay.maxwnd(),
                    self.in_flight,
                    self.window.min_cwnd(),
                ) {
                    self.apply_quick_adapt(now, fire);
                }
            }
        }

        if self.timers.is_expired(Timer::Probe, now) {
            self.timers.stop(Timer::Probe);
            if self
                .sleek
                .should_probe(now, self.quiet_interval(), self.in_flight > 0)
            {
                self.sleek.on_probe_sent(now, self.highest_sent);
                self.probe_pending = Some(self.highest_sent);
                self.stats.probes_sent += 1;
            }
        }

        if let Err(e) = self.window.check_invariants(self.delay.maxwnd()) {
            return Err(self.fatal(e));
        }

        self.arm_timers();
        Ok(())
    }

    fn next_timeout(&self) -> Option<TimePico> {
        self.timers.next_timeout()
    }

    fn select_path(&mut self) -> Result<PathId> {
        self.multipath.select_next()
    }

    fn poll_retransmission(&mut self) -> Option<Range<u64>> {
        self.rtx.pop_next()
    }

    fn poll_probe(&mut self) -> Option<u64> {
        self.probe_pending.take()
    }

    fn congestion_window(&self) -> u64 {
        self.window.cwnd()
    }

    fn minimal_window(&self) -> u64 {
        self.window.min_cwnd()
    }

    fn in_recovery(&self) -> bool {
        self.sleek.in_recovery()
    }

    fn stats(&self) -> &CongestionStats {
        &self.stats
    }

    fn close(&mut self) {
        self.terminated = true;
        self.timers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion_control::scaling::REF_RTT;
    use crate::PICOS_PER_USEC;
    use std::cell::RefCell;
    use std::rc::Rc;

    const MTU: u64 = 4096;
    const TARGET: DurationPico = 9 * PICOS_PER_USEC;

    fn flow() -> Nscc {
        Nscc::new(&Config::new(), REF_RTT, 1).unwrap()
    }

    /// Host-side cursor for driving a flow with in-order traffic.
    struct Driver {
        next_to_send: u64,
        next_to_ack: u64,
    }

    impl Driver {
        fn new() -> Self {
            Self {
                next_to_send: 0,
                next_to_ack: 0,
            }
        }

        fn send(&mut self, f: &mut Nscc, now: TimePico, bytes: u64) {
            let mut sent = 0;
            while sent < bytes {
                let seg = MTU.min(bytes - sent);
                f.on_packet_sent(now, seg, 0).unwrap();
                sent += seg;
            }
            self.next_to_send += bytes;
        }

        fn ack(&mut self, f: &mut Nscc, now: TimePico, bytes: u64, delay: DurationPico, ecn: bool) {
            let mut acked = 0;
            while acked < bytes {
                let seg = MTU.min(bytes - acked);
                let seq_start = self.next_to_ack;
                self.next_to_ack += seg;
                f.on_ack(&AckEvent {
                    now,
                    raw_rtt: REF_RTT + delay,
                    ecn,
                    newly_acked: seg,
                    seq_start,
                    cumulative_ack: self.next_to_ack,
                    path_id: 0,
                })
                .unwrap();
                acked += seg;
            }
        }
    }

    /// Multipath engine that records every notification.
    struct RecordingEngine {
        log: Rc<RefCell<Vec<(PathId, PathFeedback)>>>,
    }

    impl MultipathEngine for RecordingEngine {
        fn notify(&mut self, path_id: PathId, feedback: PathFeedback) {
            self.log.borrow_mut().push((path_id, feedback));
        }

        fn select_next(&mut self) -> Result<PathId> {
            Ok(0)
        }

        fn path_count(&self) -> usize {
            1
        }
    }

    fn recording_engine() -> (Box<RecordingEngine>, Rc<RefCell<Vec<(PathId, PathFeedback)>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        (Box::new(RecordingEngine { log: log.clone() }), log)
    }

    /// Trace sink that keeps every record.
    #[derive(Default)]
    struct RecordingTrace {
        fulfills: Rc<RefCell<Vec<FulfillRecord>>>,
        quick_adapts: Rc<RefCell<Vec<QuickAdaptRecord>>>,
    }

    impl TraceSink for RecordingTrace {
        fn on_fulfill(&mut self, record: &FulfillRecord) {
            self.fulfills.borrow_mut().push(record.clone());
        }

        fn on_quick_adapt(&mut self, record: &QuickAdaptRecord) {
            self.quick_adapts.borrow_mut().push(record.clone());
        }
    }

    #[test]
    fn initial_state() {
        let f = flow();
        assert_eq!(f.base_rtt(), REF_RTT);
        assert_eq!(f.bdp(), 150_000);
        assert_eq!(f.maxwnd(), 225_000);
        assert_eq!(f.congestion_window(), 225_000);
        assert_eq!(f.minimal_window(), MTU);
        assert!(!f.in_recovery());
    }

    #[test]
    fn empty_network_saturates_the_window() {
        // A flow repeatedly cut down by congestion, then given a perfectly
        // empty network, must climb back to the ceiling within 200 RTTs.
        let mut f = flow();
        let mut d = Driver::new();
        f.test_set_cwnd(MTU);

        let mut now = 0;
        let mut rtts = 0;
        while f.congestion_window() < f.maxwnd() && rtts < 200 {
            now += REF_RTT;
            rtts += 1;
            let w = f.congestion_window();
            d.send(&mut f, now, w);
            d.ack(&mut f, now, w, 0, false);
        }
        assert_eq!(f.congestion_window(), f.maxwnd());
        assert!(rtts < 200, "took {} rtts", rtts);
    }

    #[test]
    fn sudden_congestion_cuts_to_excess_fraction() {
        // One flow at the ceiling; an ACK arrives with delay at twice the
        // target and a mark, with the filter already sitting at that level.
        let mut f = flow();
        let mut d = Driver::new();
        d.send(&mut f, 0, MTU);
        f.test_set_avg_delay(18 * PICOS_PER_USEC);

        assert_eq!(f.congestion_window(), 225_000);
        d.ack(&mut f, PICOS_PER_USEC, MTU, 18 * PICOS_PER_USEC, true);

        // 225000 * (1 - 0.8 * (18 - 9) / 18) = 225000 * 0.6
        assert_eq!(f.congestion_window(), 135_000);
    }

    #[test]
    fn noop_quadrant_steers_instead_of_cutting() {
        let mut f = flow();
        let (engine, log) = recording_engine();
        f.set_multipath_engine(engine);

        let mut d = Driver::new();
        f.test_set_cwnd(100_000);
        d.send(&mut f, 0, MTU);

        // Marked but fast: window untouched, path penalized.
        d.ack(&mut f, PICOS_PER_USEC, MTU, 2 * PICOS_PER_USEC, true);
        assert_eq!(f.congestion_window(), 100_000);
        assert_eq!(log.borrow().as_slice(), &[(0, PathFeedback::Ecn)]);
    }

    #[test]
    fn unmarked_ack_never_decreases_within_handler() {
        let mut f = flow();
        let mut d = Driver::new();
        d.send(&mut f, 0, 10 * MTU);
        f.test_set_avg_delay(30 * PICOS_PER_USEC);

        // Even with the filter far above target, an unmarked below-target
        // ACK lands in an increase quadrant.
        let before = f.congestion_window();
        d.ack(&mut f, PICOS_PER_USEC, MTU, 2 * PICOS_PER_USEC, false);
        assert!(f.congestion_window() >= before);
    }

    #[test]
    fn decrease_rate_limited_to_one_per_base_rtt() {
        let mut f = flow();
        let mut d = Driver::new();
        d.send(&mut f, 0, 10 * MTU);
        f.test_set_avg_delay(18 * PICOS_PER_USEC);

        d.ack(&mut f, PICOS_PER_USEC, MTU, 18 * PICOS_PER_USEC, true);
        let after_first = f.congestion_window();
        assert!(after_first < 225_000);

        // Marked ACKs inside the same base RTT leave the window alone.
        d.ack(&mut f, 2 * PICOS_PER_USEC, MTU, 18 * PICOS_PER_USEC, true);
        d.ack(&mut f, 3 * PICOS_PER_USEC, MTU, 18 * PICOS_PER_USEC, true);
        assert_eq!(f.congestion_window(), after_first);

        // Past the gate the next cut applies.
        d.ack(
            &mut f,
            PICOS_PER_USEC + REF_RTT,
            MTU,
            18 * PICOS_PER_USEC,
            true,
        );
        assert!(f.congestion_window() < after_first);
    }

    #[test]
    fn quick_adapt_incast_reset() {
        let mut f = flow();
        let mut d = Driver::new();

        // A full window in flight, almost nothing delivered.
        d.send(&mut f, 0, 225_000);
        d.ack(&mut f, PICOS_PER_USEC, 1024, 0, false);

        // A trim arrives: trigger latched for the next boundary.
        f.on_nack(&NackEvent {
            now: 2 * PICOS_PER_USEC,
            raw_rtt: None,
            seq_start: 220_000,
            seq_len: 4096,
            path_id: 0,
        })
        .unwrap();
        assert_eq!(f.congestion_window(), 225_000);

        // Next ACK past the boundary evaluates and fires.
        let boundary = REF_RTT + TARGET;
        d.ack(&mut f, boundary, 1024, 0, false);
        assert_eq!(f.stats().quick_adapt_count, 1);
        assert_eq!(f.congestion_window(), f.minimal_window());

        // The mask holds for exactly the in-flight pipeline at fire time.
        let masked = f.bytes_in_flight();
        let before = f.congestion_window();
        let mut drained = 0;
        while drained < masked {
            let seg = MTU.min(masked - drained);
            d.ack(&mut f, boundary + drained, seg, 40 * PICOS_PER_USEC, true);
            drained += seg;
            assert_eq!(f.congestion_window(), before);
        }

        // The pipeline has drained; the quadrant loop is live again.
        d.ack(&mut f, boundary + REF_RTT, 1024, 0, false);
        assert!(f.stats().bytes_acked_in_total > 0);
    }

    #[test]
    fn quick_adapt_needs_both_bad_news_and_underperformance() {
        let mut f = flow();
        let mut d = Driver::new();

        // Deliver a healthy window's worth, then a trim: no reset.
        d.send(&mut f, 0, 225_000);
        d.ack(&mut f, PICOS_PER_USEC, 100_000, 0, false);
        f.on_nack(&NackEvent {
            now: 2 * PICOS_PER_USEC,
            raw_rtt: None,
            seq_start: 220_000,
            seq_len: 4096,
            path_id: 0,
        })
        .unwrap();

        let boundary = REF_RTT + TARGET;
        d.ack(&mut f, boundary, 4096, 0, false);
        assert_eq!(f.stats().quick_adapt_count, 0);
    }

    #[test]
    fn reorder_below_threshold_is_tolerated() {
        let mut f = flow();
        let mut d = Driver::new();
        d.send(&mut f, 0, 225_000);

        // Threshold at the ceiling: min(1.5 * 225000, 225000) / 4096 = 54
        // packets. Push 50 out-of-order ACKs, all above the cursor.
        for i in 0..50u64 {
            f.on_ack(&AckEvent {
                now: PICOS_PER_USEC + i,
                raw_rtt: REF_RTT,
                ecn: false,
                newly_acked: MTU,
                seq_start: 8192 + i * MTU,
                cumulative_ack: 0,
                path_id: 0,
            })
            .unwrap();
        }
        assert!(!f.in_recovery());

        // The stragglers arrive; the disorder counter resets.
        d.ack(&mut f, 2 * REF_RTT, 8192, 0, false);
        assert!(!f.in_recovery());
    }

    #[test]
    fn reorder_past_threshold_enters_and_exits_recovery() {
        let mut f = flow();
        d_send_with_gap(&mut f);

        assert!(f.in_recovery());
        assert_eq!(f.stats().recovery_count, 1);

        // The gap below the bracket is queued for retransmission.
        let first = f.poll_retransmission().expect("gap queued");
        assert_eq!(first.start, 0);

        // Recovery exits exactly when the cursor reaches the bracket.
        let bracket = 450_000;
        f.on_ack(&AckEvent {
            now: 3 * REF_RTT,
            raw_rtt: REF_RTT,
            ecn: false,
            newly_acked: 8192,
            seq_start: 0,
            cumulative_ack: bracket - 1,
            path_id: 0,
        })
        .unwrap();
        assert!(f.in_recovery());

        f.on_ack(&AckEvent {
            now: 3 * REF_RTT + 1,
            raw_rtt: REF_RTT,
            ecn: false,
            newly_acked: 1,
            seq_start: bracket - 1,
            cumulative_ack: bracket,
            path_id: 0,
        })
        .unwrap();
        assert!(!f.in_recovery());
    }

    /// Send two windows and ACK everything except the first two packets,
    /// out of order, until the reorder threshold trips.
    fn d_send_with_gap(f: &mut Nscc) {
        let mut d = Driver::new();
        d.send(f, 0, 450_000);

        for i in 0..55u64 {
            f.on_ack(&AckEvent {
                now: PICOS_PER_USEC + i,
                raw_rtt: REF_RTT,
                ecn: false,
                newly_acked: MTU,
                seq_start: 8192 + i * MTU,
                cumulative_ack: 0,
                path_id: 0,
            })
            .unwrap();
        }
    }

    #[test]
    fn base_rtt_refinement_clamps_window() {
        let mut f = flow();
        let mut d = Driver::new();
        d.send(&mut f, 0, MTU);

        assert_eq!(f.congestion_window(), 225_000);

        // First real ACK observes a shorter path than the topology bound.
        f.on_ack(&AckEvent {
            now: PICOS_PER_USEC,
            raw_rtt: 9_300_000,
            ecn: false,
            newly_acked: MTU,
            seq_start: 0,
            cumulative_ack: MTU,
            path_id: 0,
        })
        .unwrap();

        assert_eq!(f.base_rtt(), 9_300_000);
        assert_eq!(f.bdp(), 116_250);
        assert_eq!(f.maxwnd(), 174_375);
        assert_eq!(f.congestion_window(), 174_375);
    }

    #[test]
    fn timer_driven_fulfill_adds_eta() {
        let mut f = flow();
        f.test_set_cwnd(100_000);

        // No ACKs at all: the period timer forces the nudge through.
        let deadline = f.next_timeout().unwrap();
        f.on_timer(deadline).unwrap();
        assert_eq!(f.congestion_window(), 100_000 + 614);
    }

    #[test]
    fn probe_cycle_declares_silent_loss() {
        let mut f = flow();
        let mut d = Driver::new();
        d.send(&mut f, 0, 40_960);

        // Half the window delivered, the rest silent.
        d.ack(&mut f, PICOS_PER_USEC, 20_480, 0, false);

        // A quiet interval later the probe timer fires.
        let quiet = REF_RTT + TARGET;
        let deadline = PICOS_PER_USEC + quiet;
        f.on_timer(deadline).unwrap();
        let bracket = f.poll_probe().expect("probe due");
        assert_eq!(bracket, 40_960);
        assert_eq!(f.stats().probes_sent, 1);

        // The probe comes back with low delay: the pipe is empty, the tail
        // is lost.
        f.on_probe_ack(&AckEvent {
            now: deadline + REF_RTT,
            raw_rtt: REF_RTT + PICOS_PER_USEC,
            ecn: false,
            newly_acked: 0,
            seq_start: 0,
            cumulative_ack: 20_480,
            path_id: 0,
        })
        .unwrap();

        assert_eq!(f.stats().bytes_lost_in_total, 20_480);
        assert_eq!(f.poll_retransmission(), Some(20_480..24_576));
    }

    #[test]
    fn trimmed_segment_goes_straight_to_rtx() {
        let mut f = flow();
        let (engine, log) = recording_engine();
        f.set_multipath_engine(engine);

        let mut d = Driver::new();
        d.send(&mut f, 0, 40_960);

        f.on_nack(&NackEvent {
            now: PICOS_PER_USEC,
            raw_rtt: Some(REF_RTT),
            seq_start: 8192,
            seq_len: 4096,
            path_id: 3,
        })
        .unwrap();

        assert_eq!(f.stats().bytes_trimmed_in_total, 4096);
        assert_eq!(f.poll_retransmission(), Some(8192..12_288));
        assert_eq!(log.borrow().as_slice(), &[(3, PathFeedback::Nack)]);
    }

    #[test]
    fn path_timeout_notifies_engine() {
        let mut f = flow();
        let (engine, log) = recording_engine();
        f.set_multipath_engine(engine);

        f.on_path_timeout(PICOS_PER_USEC, 5).unwrap();
        assert_eq!(log.borrow().as_slice(), &[(5, PathFeedback::Timeout)]);
    }

    #[test]
    fn teardown_rejects_further_events() {
        let mut f = flow();
        let mut d = Driver::new();
        d.send(&mut f, 0, MTU);
        f.close();

        let sent_before = f.stats().bytes_sent_in_total;
        assert_eq!(f.on_packet_sent(0, MTU, 0), Err(Error::FlowTerminated));
        assert_eq!(
            f.on_ack(&AckEvent {
                now: PICOS_PER_USEC,
                raw_rtt: REF_RTT,
                ecn: false,
                newly_acked: MTU,
                seq_start: 0,
                cumulative_ack: MTU,
                path_id: 0,
            }),
            Err(Error::FlowTerminated)
        );
        assert_eq!(f.on_timer(u64::MAX), Err(Error::FlowTerminated));
        assert_eq!(f.stats().bytes_sent_in_total, sent_before);
        assert_eq!(f.next_timeout(), None);
    }

    #[test]
    fn fulfill_records_reach_the_trace_sink() {
        let mut f = flow();
        let sink = RecordingTrace::default();
        let fulfills = sink.fulfills.clone();
        f.set_trace_sink(Box::new(sink));
        f.test_set_cwnd(100_000);

        let mut d = Driver::new();
        let mut now = 0;
        for _ in 0..4 {
            now += REF_RTT;
            d.send(&mut f, now, 40_960);
            d.ack(&mut f, now, 40_960, 0, false);
        }

        let records = fulfills.borrow();
        assert!(!records.is_empty());
        let r = &records[0];
        assert_eq!(r.flow_id, 1);
        assert_eq!(r.bdp, 150_000);
        assert_eq!(r.maxwnd, 225_000);
        assert_eq!(r.target_delay, TARGET);
        assert_eq!(r.quadrant, FulfillRecord::QUADRANT_PROP_INC);
        assert!(r.inc_prop > 0);
    }

    #[test]
    fn quick_adapt_records_reach_the_trace_sink() {
        let mut f = flow();
        let sink = RecordingTrace::default();
        let quick_adapts = sink.quick_adapts.clone();
        f.set_trace_sink(Box::new(sink));

        let mut d = Driver::new();
        d.send(&mut f, 0, 225_000);
        d.ack(&mut f, PICOS_PER_USEC, 1024, 0, false);
        f.on_path_timeout(2 * PICOS_PER_USEC, 0).unwrap();
        d.ack(&mut f, REF_RTT + TARGET, 1024, 0, false);

        let records = quick_adapts.borrow();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].cwnd_before, 225_000);
        assert_eq!(records[0].cwnd_after, MTU);
        assert_eq!(records[0].achieved_bytes, 2048);
    }

    /// Two flows over a shared fluid bottleneck: queuing delay grows with
    /// the overhang of the summed windows past the BDP, switches mark at
    /// the target. Starting maximally unfair, the pair must converge.
    #[test]
    fn fairness_convergence_on_shared_bottleneck() {
        let _ = env_logger::builder().is_test(true).try_init();

        let config = Config::new();
        let mut flows = [
            Nscc::new(&config, REF_RTT, 1).unwrap(),
            Nscc::new(&config, REF_RTT, 2).unwrap(),
        ];
        let mut drivers = [Driver::new(), Driver::new()];
        flows[1].test_set_cwnd(MTU);

        let bdp = 150_000u64;
        // One byte of overhang drains in 8 / 100 Gbps = 80 ps.
        let ps_per_byte = 80u64;

        let mut now = 0;
        let mut delay = 0u64;
        let mut avg_w = [0f64; 2];
        let rounds = 2000;
        let tail = 400;

        for round in 0..rounds {
            now += REF_RTT;
            let sum: u64 = flows.iter().map(|f| f.congestion_window()).sum();

            for (f, d) in flows.iter_mut().zip(drivers.iter_mut()) {
                let w = f.congestion_window();
                d.send(f, now, w);
                d.ack(f, now, w, delay, delay >= TARGET);
            }

            delay = sum.saturating_sub(bdp) * ps_per_byte;

            if round >= rounds - tail {
                for (i, f) in flows.iter().enumerate() {
                    avg_w[i] += f.congestion_window() as f64 / tail as f64;
                }
            }
        }

        // Jain's index over the time-averaged windows.
        let sum: f64 = avg_w.iter().sum();
        let sum_sq: f64 = avg_w.iter().map(|w| w * w).sum();
        let jain = sum * sum / (2.0 * sum_sq);
        assert!(jain >= 0.99, "jain = {:.4}, windows = {:?}", jain, avg_w);

        // Both flows hold a meaningful share of the pipe.
        let fair = sum / 2.0;
        for w in avg_w {
            assert!(
                (w - fair).abs() / fair < 0.2,
                "windows diverged: {:?}",
                avg_w
            );
        }
    }

    #[test]
    fn randomized_event_soup_keeps_invariants() {
        use rand::rngs::StdRng;
        use rand::Rng;
        use rand::SeedableRng;

        // A seeded storm of sends, acks, trims, timeouts and timer firings
        // must never break the window bounds or grow the base RTT.
        let mut rng = StdRng::seed_from_u64(7);
        let mut f = flow();
        let mut d = Driver::new();

        let mut now = 0u64;
        let mut min_rtt_seen = REF_RTT;
        for _ in 0..2000 {
            now += rng.gen_range(1..3 * PICOS_PER_USEC);

            match rng.gen_range(0..10) {
                0..=3 => d.send(&mut f, now, MTU),
                4..=7 => {
                    if d.next_to_ack < d.next_to_send {
                        let raw_rtt = REF_RTT - PICOS_PER_USEC
                            + rng.gen_range(0..30 * PICOS_PER_USEC);
                        min_rtt_seen = min_rtt_seen.min(raw_rtt);
                        let seq_start = d.next_to_ack;
                        d.next_to_ack += MTU.min(d.next_to_send - d.next_to_ack);
                        f.on_ack(&AckEvent {
                            now,
                            raw_rtt,
                            ecn: rng.gen_bool(0.3),
                            newly_acked: d.next_to_ack - seq_start,
                            seq_start,
                            cumulative_ack: d.next_to_ack,
                            path_id: rng.gen_range(0..8),
                        })
                        .unwrap();
                    }
                }
                8 => {
                    if d.next_to_send >= MTU {
                        f.on_nack(&NackEvent {
                            now,
                            raw_rtt: Some(REF_RTT + rng.gen_range(0..PICOS_PER_USEC)),
                            seq_start: d.next_to_send - MTU,
                            seq_len: MTU,
                            path_id: rng.gen_range(0..8),
                        })
                        .unwrap();
                    }
                }
                _ => {
                    if let Some(deadline) = f.next_timeout() {
                        if deadline <= now {
                            f.on_timer(now).unwrap();
                        }
                    }
                    f.poll_probe();
                    f.poll_retransmission();
                }
            }

            assert!(f.congestion_window() >= f.minimal_window());
            assert!(f.congestion_window() <= f.maxwnd());
            assert_eq!(f.base_rtt(), min_rtt_seen);
        }
    }

    #[test]
    fn ack_stream_respects_window_bounds() {
        // A hostile mix of marks, delays and trims must never push the
        // window outside its bounds.
        let mut f = flow();
        let mut d = Driver::new();

        let mut now = 0;
        for i in 0..500u64 {
            now += REF_RTT / 4;
            d.send(&mut f, now, MTU);
            let delay = (i % 7) * 3 * PICOS_PER_USEC;
            let ecn = i % 3 == 0;
            d.ack(&mut f, now, MTU, delay, ecn);

            if i % 11 == 0 {
                f.on_nack(&NackEvent {
                    now,
                    raw_rtt: Some(REF_RTT + delay),
                    seq_start: d.next_to_send - MTU,
                    seq_len: MTU,
                    path_id: 0,
                })
                .unwrap();
            }

            let w = f.congestion_window();
            assert!(w >= f.minimal_window());
            assert!(w <= f.maxwnd());
        }
    }
}
