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

use crate::congestion_control::AckEvent;
use crate::congestion_control::CongestionController;
use crate::congestion_control::CongestionStats;
use crate::congestion_control::NackEvent;
use crate::multipath::build_multipath_engine;
use crate::multipath::MultipathEngine;
use crate::Config;
use crate::Error;
use crate::FlowId;
use crate::PathId;
use crate::Result;
use crate::TimePico;

/// Dummy is a simple congestion controller with a static congestion window.
/// It is intended to be used for testing and experiments.
pub struct Dummy {
    /// Congestion window in bytes.
    cwnd: u64,

    /// Path selection engine; spraying still rotates under a fixed window.
    multipath: Box<dyn MultipathEngine>,

    /// Congestion statistics.
    stats: CongestionStats,

    /// Rejects events after teardown.
    terminated: bool,
}

impl Dummy {
    pub fn new(conf: &Config, _flow_id: FlowId) -> Self {
        Self {
            cwnd: conf.dummy_cwnd(),
            multipath: build_multipath_engine(conf.multipath_algorithm(), conf.path_count()),
            stats: Default::default(),
            terminated: false,
        }
    }

    fn guard(&self) -> Result<()> {
        if self.terminated {
            return Err(Error::FlowTerminated);
        }
        Ok(())
    }
}

impl CongestionController for Dummy {
    fn name(&self) -> &str {
        "DUMMY"
    }

    fn on_packet_sent(&mut self, now: TimePico, sent_bytes: u64, path_id: PathId) -> Result<()> {
        self.guard()?;
        self.stats.bytes_in_flight = self.stats.bytes_in_flight.saturating_add(sent_bytes);
        self.stats.bytes_sent_in_total = self.stats.bytes_sent_in_total.saturating_add(sent_bytes);
        Ok(())
    }

    fn on_ack(&mut self, ack: &AckEvent) -> Result<()> {
        self.guard()?;
        self.stats.bytes_in_flight = self.stats.bytes_in_flight.saturating_sub(ack.newly_acked);
        self.stats.bytes_acked_in_total = self
            .stats
            .bytes_acked_in_total
            .saturating_add(ack.newly_acked);
        Ok(())
    }

    fn on_nack(&mut self, nack: &NackEvent) -> Result<()> {
        self.guard()?;
        self.stats.bytes_in_flight = self.stats.bytes_in_flight.saturating_sub(nack.seq_len);
        self.stats.bytes_trimmed_in_total = self
            .stats
            .bytes_trimmed_in_total
            .saturating_add(nack.seq_len);
        Ok(())
    }

    fn on_probe_ack(&mut self, ack: &AckEvent) -> Result<()> {
        self.guard()
    }

    fn on_path_timeout(&mut self, now: TimePico, path_id: PathId) -> Result<()> {
        self.guard()
    }

    fn on_timer(&mut self, now: TimePico) -> Result<()> {
        self.guard()
    }

    fn next_timeout(&self) -> Option<TimePico> {
        None
    }

    fn select_path(&mut self) -> Result<PathId> {
        self.multipath.select_next()
    }

    fn congestion_window(&self) -> u64 {
        self.cwnd
    }

    fn minimal_window(&self) -> u64 {
        self.cwnd
    }

    fn stats(&self) -> &CongestionStats {
        &self.stats
    }

    fn close(&mut self) {
        self.terminated = true;
    }
}
