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

//! Topology oracle.
//!
//! Consulted once per flow at connection setup to seed the base RTT with
//! the unloaded round-trip between two hosts: round-trip propagation plus
//! per-hop serialization of a full data packet on the forward path and an
//! ACK on the reverse path. The estimator only ever shrinks this seed.

use crate::DurationPico;
use crate::PICOS_PER_SEC;

/// Wire size of an acknowledgement, in bytes.
const ACK_SIZE: u64 = 64;

/// Static description of the fabric between two endpoints.
#[derive(Debug, Clone, Copy)]
pub struct Topology {
    /// One-way hop count between the two hosts.
    hop_count: u32,

    /// Propagation delay of a single hop, in picoseconds.
    per_hop_propagation: DurationPico,

    /// Link speed in bits per second, uniform across hops.
    link_speed_bps: u64,
}

impl Topology {
    pub fn new(hop_count: u32, per_hop_propagation: DurationPico, link_speed_bps: u64) -> Self {
        Self {
            hop_count,
            per_hop_propagation,
            link_speed_bps,
        }
    }

    /// Unloaded round-trip time for a data packet of `data_bytes` and its
    /// ACK, in picoseconds.
    pub fn two_point_rtt(&self, data_bytes: u64) -> DurationPico {
        let hops = self.hop_count as u64;
        let propagation = 2 * hops * self.per_hop_propagation;
        let serialization =
            hops * (self.serialization_time(data_bytes) + self.serialization_time(ACK_SIZE));
        propagation + serialization
    }

    /// Time to put `bytes` on the wire at the link speed, in picoseconds.
    fn serialization_time(&self, bytes: u64) -> DurationPico {
        (bytes as u128 * 8 * PICOS_PER_SEC as u128 / self.link_speed_bps as u128) as u64
    }
}
