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

//! Loss detection for a sprayed flow.
//!
//! With per-packet spraying across N equal-cost paths, reordering up to
//! about N positions is normal operation; a fixed dup-ack rule would
//! retransmit constantly. The reorder threshold therefore scales with the
//! congestion window, riding the reorder horizon: 1.5 windows of margin is
//! above one full path rotation, while staying within one extra window of
//! detection delay.
//!
//! A probe channel covers the silent-loss case: after a quiet interval
//! with data outstanding, a probe is sent; if it returns with low delay
//! the pipe has drained, and anything still missing behind it is lost.

use log::*;

use crate::ranges::RangeSet;
use crate::rtx::RtxQueue;
use crate::DurationPico;
use crate::TimePico;

/// Reorder threshold margin over the congestion window.
pub(crate) const LOSS_RETX_FACTOR: f64 = 1.5;

/// Floor of the reorder threshold, in packets.
pub(crate) const MIN_RETX_CFG: u64 = 5;

/// EWMA weight denominator for the average sent-packet size.
const PKT_SIZE_SMOOTHING: u64 = 8;

/// Window-scaled, probe-augmented loss detector state.
#[derive(Debug)]
pub struct Sleek {
    /// ACKs received out of expected order since the counter last reset.
    out_of_order_count: u64,

    /// In recovery mode, bracketed by `recovery_seqno`.
    in_recovery: bool,

    /// Recovery exit bracket: the highest sequence sent at entry.
    recovery_seqno: u64,

    /// Reorder threshold floor in packets.
    min_retx_packets: u64,

    /// Reorder threshold margin over cwnd.
    loss_retx_factor: f64,

    /// Smoothed size of sent packets, bytes.
    avg_pkt_size: u64,

    /// Last send or acknowledgement activity, for the probe quiet timer.
    last_activity: TimePico,

    /// Sequence bracket of the outstanding probe, if one is in the air.
    probe_seqno: Option<u64>,
}

impl Sleek {
    pub fn new(min_retx_packets: u64, loss_retx_factor: f64, mtu: u64) -> Self {
        Self {
            out_of_order_count: 0,
            in_recovery: false,
            recovery_seqno: 0,
            min_retx_packets,
            loss_retx_factor,
            avg_pkt_size: mtu.max(1),
            last_activity: 0,
            probe_seqno: None,
        }
    }

    pub fn in_recovery(&self) -> bool {
        self.in_recovery
    }

    pub fn recovery_seqno(&self) -> u64 {
        self.recovery_seqno
    }

    pub fn out_of_order_count(&self) -> u64 {
        self.out_of_order_count
    }

    /// Reorder threshold in packets at the current window.
    pub fn threshold(&self, cwnd: u64, maxwnd: u64) -> u64 {
        let scaled = ((self.loss_retx_factor * cwnd as f64) as u64).min(maxwnd);
        let bytes = scaled.max(self.min_retx_packets * self.avg_pkt_size);
        (bytes / self.avg_pkt_size).max(1)
    }

    /// Track a sent segment: smooth the packet size and reset the quiet
    /// timer.
    pub fn on_packet_sent(&mut self, now: TimePico, sent_bytes: u64) {
        self.avg_pkt_size = ((PKT_SIZE_SMOOTHING - 1) * self.avg_pkt_size + sent_bytes)
            / PKT_SIZE_SMOOTHING;
        self.avg_pkt_size = self.avg_pkt_size.max(1);
        self.last_activity = now;
    }

    /// An ACK arrived that is not the expected in-order successor.
    pub fn on_out_of_order_ack(&mut self, now: TimePico) {
        self.out_of_order_count += 1;
        self.last_activity = now;
    }

    /// An in-order ACK arrived.
    pub fn on_in_order_ack(&mut self, now: TimePico) {
        self.last_activity = now;
    }

    /// A trimmed packet is disorder by another name.
    pub fn on_nack(&mut self, now: TimePico) {
        self.out_of_order_count += 1;
        self.last_activity = now;
    }

    /// The cumulative cursor advanced: the gap that produced the disorder
    /// healed, and recovery exits once the cursor passes the bracket.
    /// Returns whether recovery mode was exited.
    pub fn on_cumulative_advance(&mut self, cumulative_ack: u64) -> bool {
        self.out_of_order_count = 0;

        if self.in_recovery && cumulative_ack >= self.recovery_seqno {
            self.in_recovery = false;
            debug!("sleek: recovery exited at cum={}", cumulative_ack);
            return true;
        }
        false
    }

    /// Whether the disorder count warrants entering recovery.
    pub fn should_enter_recovery(&self, cwnd: u64, maxwnd: u64, rtx_empty: bool) -> bool {
        !self.in_recovery
            && rtx_empty
            && self.out_of_order_count >= self.threshold(cwnd, maxwnd)
    }

    /// Enter recovery: bracket at the highest sequence sent and queue every
    /// unacknowledged segment below it.
    pub fn enter_recovery(
        &mut self,
        highest_sent: u64,
        cumulative_ack: u64,
        sacked: &RangeSet,
        rtx: &mut RtxQueue,
    ) {
        self.in_recovery = true;
        self.recovery_seqno = highest_sent;
        self.out_of_order_count = 0;

        for gap in sacked.gaps_within(cumulative_ack..highest_sent) {
            rtx.push(gap);
        }

        debug!(
            "sleek: recovery entered, bracket={} cum={}",
            highest_sent, cumulative_ack
        );
    }

    /// Absolute deadline after which a probe should be scheduled, given the
    /// probe quiet interval.
    pub fn probe_deadline(&self, quiet_interval: DurationPico) -> TimePico {
        self.last_activity + quiet_interval
    }

    /// Whether a probe is due: data outstanding and the quiet interval
    /// elapsed. Sending a probe resets the quiet timer, so a lost probe is
    /// followed by another one interval later.
    pub fn should_probe(
        &self,
        now: TimePico,
        quiet_interval: DurationPico,
        outstanding: bool,
    ) -> bool {
        outstanding && now >= self.probe_deadline(quiet_interval)
    }

    /// A probe was handed to the host covering everything sent so far.
    pub fn on_probe_sent(&mut self, now: TimePico, highest_sent: u64) {
        self.probe_seqno = Some(highest_sent);
        self.last_activity = now;
    }

    /// Interpret a probe acknowledgement. A low-delay probe means the pipe
    /// has drained: whatever is still missing behind it did not merely
    /// queue, it is gone. Returns the number of bytes declared lost.
    pub fn on_probe_ack(
        &mut self,
        raw_delay: DurationPico,
        target_qdelay: DurationPico,
        cumulative_ack: u64,
        sacked: &RangeSet,
        rtx: &mut RtxQueue,
    ) -> u64 {
        let probe_seqno = match self.probe_seqno.take() {
            Some(seq) => seq,
            None => return 0,
        };

        if raw_delay >= target_qdelay {
            // The fabric is still queuing; missing data may yet arrive.
            return 0;
        }

        let mut lost = 0;
        for gap in sacked.gaps_within(cumulative_ack..probe_seqno) {
            lost += gap.end - gap.start;
            rtx.push(gap);
        }
        if lost > 0 {
            debug!("sleek: probe declared {} bytes lost", lost);
        }
        lost
    }
}
