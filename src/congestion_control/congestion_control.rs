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

#![allow(unused_variables)]

use core::str::FromStr;
use std::fmt;
use std::ops::Range;

use crate::Error;
use crate::FlowId;
use crate::PathId;
use crate::Result;
use crate::TimePico;
pub use dummy::Dummy;
pub use nscc::Nscc;
pub use quadrant::Quadrant;

/// Available sender congestion control algorithms.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default)]
pub enum CongestionControlAlgorithm {
    /// Network-signal congestion control fuses queuing delay and ECN marks
    /// into a per-ACK decision matrix, batches increases normalized by the
    /// window for fairness, and collapses the window to recently achieved
    /// throughput under severe congestion.
    #[default]
    Nscc,

    /// Dummy is a simple congestion controller with a static congestion
    /// window. It is intended to be used for testing and experiments.
    Dummy,
}

impl FromStr for CongestionControlAlgorithm {
    type Err = Error;

    fn from_str(algor: &str) -> Result<CongestionControlAlgorithm> {
        if algor.eq_ignore_ascii_case("nscc") {
            Ok(CongestionControlAlgorithm::Nscc)
        } else if algor.eq_ignore_ascii_case("dummy") {
            Ok(CongestionControlAlgorithm::Dummy)
        } else {
            Err(Error::InvalidConfig("unknown".into()))
        }
    }
}

/// A positive acknowledgement as delivered by the host NIC interface.
#[derive(Debug, Clone, Copy)]
pub struct AckEvent {
    /// Arrival time on the monotonic clock, picoseconds.
    pub now: TimePico,

    /// Round-trip sample carried by the ACK, picoseconds.
    pub raw_rtt: TimePico,

    /// ECN echo bit.
    pub ecn: bool,

    /// Bytes newly acknowledged by this ACK.
    pub newly_acked: u64,

    /// First byte offset the ACK covers.
    pub seq_start: u64,

    /// The receiver's cumulative cursor after this ACK.
    pub cumulative_ack: u64,

    /// Path the acknowledged packet was sprayed over.
    pub path_id: PathId,
}

/// A negative acknowledgement from packet trimming at a congested switch.
#[derive(Debug, Clone, Copy)]
pub struct NackEvent {
    /// Arrival time on the monotonic clock, picoseconds.
    pub now: TimePico,

    /// Round-trip sample for the trimmed header, if usable. Trimmed packets
    /// can see unusual forwarding delays; consumption is feature-flagged.
    pub raw_rtt: Option<TimePico>,

    /// First byte offset of the trimmed segment.
    pub seq_start: u64,

    /// Length of the trimmed segment in bytes.
    pub seq_len: u64,

    /// Path the trimmed packet was sprayed over.
    pub path_id: PathId,
}

/// Congestion control statistics.
#[derive(Debug, Default, Clone)]
pub struct CongestionStats {
    /// Bytes in flight.
    pub bytes_in_flight: u64,

    /// Total bytes sent.
    pub bytes_sent_in_total: u64,

    /// Total bytes acked.
    pub bytes_acked_in_total: u64,

    /// Total bytes declared lost.
    pub bytes_lost_in_total: u64,

    /// Total bytes trimmed by the fabric.
    pub bytes_trimmed_in_total: u64,

    /// Number of Quick Adapt firings.
    pub quick_adapt_count: u64,

    /// Number of loss recovery entries.
    pub recovery_count: u64,

    /// Number of loss-detection probes sent.
    pub probes_sent: u64,
}

/// Congestion control interfaces shared by different algorithms.
///
/// Each flow is a single-threaded event-driven state machine: every method
/// is an atomic handler that runs to completion, and within a flow the host
/// delivers events in arrival order. Handlers return an error only for
/// fatal conditions; every normal per-ACK outcome is a state mutation plus
/// optional notifications.
pub trait CongestionController {
    /// Name of congestion control algorithm.
    fn name(&self) -> &str;

    /// Callback after new data was sent out. Advances the sequence cursor;
    /// retransmissions go through `on_retransmit_sent` instead.
    fn on_packet_sent(&mut self, now: TimePico, sent_bytes: u64, path_id: PathId) -> Result<()>;

    /// Callback after a queued retransmission was sent out.
    fn on_retransmit_sent(
        &mut self,
        now: TimePico,
        sent_bytes: u64,
        path_id: PathId,
    ) -> Result<()> {
        Ok(())
    }

    /// Callback for processing an acknowledgement.
    fn on_ack(&mut self, ack: &AckEvent) -> Result<()>;

    /// Callback for processing a trim notification.
    fn on_nack(&mut self, nack: &NackEvent) -> Result<()>;

    /// Callback for processing the acknowledgement of a loss probe.
    fn on_probe_ack(&mut self, ack: &AckEvent) -> Result<()>;

    /// Callback for a path that produced no feedback at all.
    fn on_path_timeout(&mut self, now: TimePico, path_id: PathId) -> Result<()>;

    /// Callback from the host scheduler when the earliest deadline fired.
    fn on_timer(&mut self, now: TimePico) -> Result<()>;

    /// Earliest pending deadline, for the host scheduler.
    fn next_timeout(&self) -> Option<TimePico>;

    /// Select the path for the next outgoing segment.
    fn select_path(&mut self) -> Result<PathId>;

    /// Pop the next segment awaiting retransmission, if any.
    fn poll_retransmission(&mut self) -> Option<Range<u64>> {
        None
    }

    /// Take a pending loss probe request: the sequence bracket it covers.
    fn poll_probe(&mut self) -> Option<u64> {
        None
    }

    /// Current congestion window.
    fn congestion_window(&self) -> u64;

    /// Minimal congestion window.
    fn minimal_window(&self) -> u64;

    /// Check if in loss recovery mode.
    fn in_recovery(&self) -> bool {
        false
    }

    /// Congestion stats.
    fn stats(&self) -> &CongestionStats;

    /// Tear the flow down. Subsequent events are rejected without mutating
    /// state and pending deadlines are cancelled.
    fn close(&mut self);
}

impl fmt::Debug for dyn CongestionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "congestion controller.")
    }
}

/// Build a congestion controller for one flow.
///
/// `network_rtt` is the unloaded path round-trip from the topology oracle,
/// or the first flow's measured path RTT when that is more accurate.
pub fn build_congestion_controller(
    conf: &crate::Config,
    network_rtt: TimePico,
    flow_id: FlowId,
) -> Result<Box<dyn CongestionController>> {
    match conf.congestion_control_algorithm() {
        CongestionControlAlgorithm::Nscc => Ok(Box::new(Nscc::new(conf, network_rtt, flow_id)?)),
        CongestionControlAlgorithm::Dummy => Ok(Box::new(Dummy::new(conf, flow_id))),
    }
}


mod delay;
mod dummy;
mod nscc;
mod quadrant;
mod quick_adapt;
mod scaling;
mod sleek;
mod timer;
mod window;
