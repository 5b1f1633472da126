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

//! NSCC is a sender-side congestion control core for multipath datacenter
//! fabrics that spray packets across equal-cost paths, mark with ECN, and
//! optionally trim payloads at congested switches.
//!
//! ## Design
//!
//! * **Four-quadrant decision matrix**: every acknowledgement fuses the
//!   queuing delay magnitude with the ECN echo into one of five window
//!   actions. Raw per-packet delay selects the action; a slow EWMA sizes
//!   the multiplicative decrease.
//! * **Batched window controller**: increase proposals accumulate and are
//!   applied periodically, normalized by the current window so that flows
//!   sharing a bottleneck converge to a common share. Decreases apply
//!   immediately.
//! * **Quick Adapt**: when the fabric turns hostile while a flow is
//!   severely underperforming, the window collapses in one step to the
//!   throughput actually achieved, and feedback from the stale in-flight
//!   pipeline is masked out.
//! * **SLEEK loss detection**: the reorder threshold scales with the
//!   window to ride the spraying reorder horizon, and idle-pipe probes
//!   catch silent tail loss.
//!
//! Each flow is a single-threaded event-driven state machine: the host
//! NIC layer delivers ACK/NACK/timer events in arrival order, and every
//! handler runs to completion without blocking. Timers are surfaced as
//! absolute picosecond deadlines for an external scheduler.

#![allow(unused_imports)]
#![allow(dead_code)]

use std::cmp;

use crate::congestion_control::CongestionControlAlgorithm;
use crate::multipath::MultipathAlgorithm;

pub use crate::error::Error;

/// Monotonic timestamp in picoseconds.
pub type TimePico = u64;

/// Time interval in picoseconds.
pub type DurationPico = u64;

/// Flow identifier assigned by the host.
pub type FlowId = u64;

/// Equal-cost path index within a flow's spray set.
pub type PathId = usize;

/// Picoseconds per second.
pub const PICOS_PER_SEC: u64 = 1_000_000_000_000;

/// Picoseconds per microsecond.
pub const PICOS_PER_USEC: u64 = 1_000_000;

/// Default maximum transmission unit in bytes.
pub const DEFAULT_MTU: u64 = 4096;

/// Default link speed: 100 Gbps.
const DEFAULT_LINKSPEED_BPS: u64 = 100_000_000_000;

/// Default number of equal-cost paths to spray over.
const DEFAULT_PATH_COUNT: usize = 8;

/// Default fulfill adjustment batch, in packets. Batches of this size have
/// been observed within a few percent of per-packet adjustment.
const DEFAULT_ADJUST_BYTES_PACKETS: u64 = 8;

/// Default Quick Adapt underperformance shift: fire below maxwnd / 8.
const DEFAULT_QA_GATE: u8 = 3;

/// Bounds for the window ceiling multiplier over the BDP.
const MAXWND_MULTIPLIER_FLOOR: f64 = 1.25;
const MAXWND_MULTIPLIER_CEILING: f64 = 1.5;

/// Default reorder threshold floor, in packets.
const DEFAULT_MIN_RETX_PACKETS: u64 = 5;

/// Default reorder threshold margin over the congestion window.
const DEFAULT_LOSS_RETX_FACTOR: f64 = 1.5;

/// Result type for congestion control operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Process-wide configuration from which each flow's parameter bundle is
/// derived.
///
/// The configuration may be customized by calling related set methods.
///
/// ## Examples:
///
/// ```
/// let mut conf = nscc::Config::new();
/// conf.set_linkspeed(400_000_000_000);
/// conf.enable_trimming(true);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Link speed in bits per second.
    linkspeed: u64,

    /// Maximum transmission unit in bytes.
    mtu: u64,

    /// Whether the fabric trims packets at congested switches. Trimming
    /// turns losses into NACKs and lowers the default target delay.
    trimming: bool,

    /// Explicit target queuing delay override, picoseconds.
    target_qdelay: Option<DurationPico>,

    /// Window ceiling as a multiple of the bandwidth-delay product.
    maxwnd_multiplier: f64,

    /// Quick Adapt underperformance shift.
    qa_gate: u8,

    /// Fulfill adjustment batch size, in packets.
    adjust_bytes_packets: u64,

    /// Feed NACK round-trips into base RTT refinement.
    nack_rtt_refinement: bool,

    /// The congestion control algorithm used for a flow.
    congestion_control_algorithm: CongestionControlAlgorithm,

    /// The path selection algorithm used for a flow.
    multipath_algorithm: MultipathAlgorithm,

    /// Number of equal-cost paths to spray over.
    path_count: usize,

    /// Reorder threshold floor, in packets.
    min_retx_packets: u64,

    /// Reorder threshold margin over the congestion window.
    loss_retx_factor: f64,

    /// Static window for the Dummy controller, in bytes.
    dummy_cwnd: u64,
}

impl Config {
    /// Create default configuration.
    pub fn new() -> Self {
        Self {
            linkspeed: DEFAULT_LINKSPEED_BPS,
            mtu: DEFAULT_MTU,
            trimming: true,
            target_qdelay: None,
            maxwnd_multiplier: MAXWND_MULTIPLIER_CEILING,
            qa_gate: DEFAULT_QA_GATE,
            adjust_bytes_packets: DEFAULT_ADJUST_BYTES_PACKETS,
            nack_rtt_refinement: true,
            congestion_control_algorithm: CongestionControlAlgorithm::default(),
            multipath_algorithm: MultipathAlgorithm::RoundRobin,
            path_count: DEFAULT_PATH_COUNT,
            min_retx_packets: DEFAULT_MIN_RETX_PACKETS,
            loss_retx_factor: DEFAULT_LOSS_RETX_FACTOR,
            dummy_cwnd: 10 * DEFAULT_MTU,
        }
    }

    /// Set the link speed in bits per second.
    /// The default value is 100 Gbps.
    pub fn set_linkspeed(&mut self, bps: u64) {
        self.linkspeed = bps;
    }

    pub fn linkspeed(&self) -> u64 {
        self.linkspeed
    }

    /// Set the maximum transmission unit in bytes.
    /// The default value is `4096`.
    pub fn set_mtu(&mut self, mtu: u64) {
        self.mtu = cmp::max(mtu, 1);
        self.dummy_cwnd = cmp::max(self.dummy_cwnd, self.mtu);
    }

    pub fn mtu(&self) -> u64 {
        self.mtu
    }

    /// Enable packet trimming support. With trimming the default target
    /// queuing delay drops to three quarters of the network round-trip.
    /// The default value is true.
    pub fn enable_trimming(&mut self, v: bool) {
        self.trimming = v;
    }

    pub fn trimming_enabled(&self) -> bool {
        self.trimming
    }

    /// Override the target queuing delay, in picoseconds. Unset by
    /// default: the target is derived from the network round-trip.
    pub fn set_target_qdelay(&mut self, target: DurationPico) {
        self.target_qdelay = Some(target);
    }

    pub fn target_qdelay(&self) -> Option<DurationPico> {
        self.target_qdelay
    }

    /// Set the window ceiling as a multiple of the bandwidth-delay
    /// product. Clamped to [1.25, 1.5]. The default value is `1.5`.
    pub fn set_maxwnd_multiplier(&mut self, multiplier: f64) {
        self.maxwnd_multiplier =
            multiplier.clamp(MAXWND_MULTIPLIER_FLOOR, MAXWND_MULTIPLIER_CEILING);
    }

    pub fn maxwnd_multiplier(&self) -> f64 {
        self.maxwnd_multiplier
    }

    /// Set the Quick Adapt underperformance shift: the reset fires only
    /// when achieved bytes fall below `maxwnd >> gate`. Clamped to [0, 4].
    /// The default value is `3`.
    pub fn set_qa_gate(&mut self, gate: u8) {
        self.qa_gate = cmp::min(gate, 4);
    }

    pub fn qa_gate(&self) -> u8 {
        self.qa_gate
    }

    /// Set the fulfill adjustment batch size in packets. The relationship
    /// between batch size and reaction frequency is empirical; extreme
    /// values carry no particular throughput promise.
    /// The default value is `8`.
    pub fn set_adjust_bytes_packets(&mut self, packets: u64) {
        self.adjust_bytes_packets = cmp::max(packets, 1);
    }

    pub fn adjust_bytes_packets(&self) -> u64 {
        self.adjust_bytes_packets
    }

    /// Feed NACK round-trip samples into base RTT refinement. Trimmed
    /// packets can see unusual forwarding delays, which makes these
    /// samples slightly suspect; disable if the fabric trims aggressively.
    /// The default value is true.
    pub fn enable_nack_rtt_refinement(&mut self, v: bool) {
        self.nack_rtt_refinement = v;
    }

    pub fn nack_rtt_refinement(&self) -> bool {
        self.nack_rtt_refinement
    }

    /// Set congestion control algorithm that the flow would use.
    /// The default value is Nscc.
    pub fn set_congestion_control_algorithm(&mut self, cca: CongestionControlAlgorithm) {
        self.congestion_control_algorithm = cca;
    }

    pub fn congestion_control_algorithm(&self) -> CongestionControlAlgorithm {
        self.congestion_control_algorithm
    }

    /// Set the path selection algorithm for spraying.
    /// The default value is RoundRobin.
    pub fn set_multipath_algorithm(&mut self, algor: MultipathAlgorithm) {
        self.multipath_algorithm = algor;
    }

    pub fn multipath_algorithm(&self) -> MultipathAlgorithm {
        self.multipath_algorithm
    }

    /// Set the number of equal-cost paths to spray over.
    /// The default value is `8`.
    pub fn set_path_count(&mut self, count: usize) {
        self.path_count = count;
    }

    pub fn path_count(&self) -> usize {
        self.path_count
    }

    /// Set the reorder threshold floor in packets.
    /// The default value is `5`.
    pub fn set_min_retx_packets(&mut self, packets: u64) {
        self.min_retx_packets = cmp::max(packets, 1);
    }

    pub fn min_retx_packets(&self) -> u64 {
        self.min_retx_packets
    }

    /// Set the reorder threshold margin over the congestion window.
    /// The default value is `1.5`.
    pub fn set_loss_retx_factor(&mut self, factor: f64) {
        self.loss_retx_factor = factor.max(1.0);
    }

    pub fn loss_retx_factor(&self) -> f64 {
        self.loss_retx_factor
    }

    /// Set the static window for the Dummy controller, in bytes.
    pub fn set_dummy_cwnd(&mut self, cwnd: u64) {
        self.dummy_cwnd = cmp::max(cwnd, self.mtu);
    }

    pub fn dummy_cwnd(&self) -> u64 {
        self.dummy_cwnd
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}


#[path = "congestion_control/congestion_control.rs"]
pub mod congestion_control;

#[path = "multipath/multipath.rs"]
pub mod multipath;

pub mod error;
mod ranges;
mod rtx;
pub mod timer_queue;
pub mod topology;
pub mod trace;
