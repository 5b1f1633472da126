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

//! Time-series trace records for window evolution analysis.
//!
//! One record per fulfill adjustment per flow captures window evolution,
//! delay filtering and quadrant decisions; a separate record marks each
//! Quick Adapt firing. For 128 flows over 500us this is a few thousand
//! rows, negligible overhead. Two writers are provided: CSV for plotting
//! pipelines and JSON lines for structured consumers.

use std::io::Write;

use log::*;
use serde::Serialize;

use crate::DurationPico;
use crate::FlowId;
use crate::TimePico;
use crate::PICOS_PER_USEC;

/// One row per fulfill period per flow.
#[derive(Debug, Clone, Serialize)]
pub struct FulfillRecord {
    /// Event time in picoseconds.
    pub time: TimePico,
    pub flow_id: FlowId,
    /// Congestion window after the adjustment, bytes.
    pub cwnd: u64,
    pub in_flight: u64,
    pub bdp: u64,
    pub maxwnd: u64,
    /// Filtered queuing delay, picoseconds.
    pub avg_delay: DurationPico,
    /// Queuing delay of the most recent ACK, picoseconds.
    pub raw_delay: DurationPico,
    pub target_delay: DurationPico,
    pub base_rtt: DurationPico,
    /// ECN echo on the most recent ACK.
    pub ecn: bool,
    /// Quadrant decision code of the most recent ACK; see [`FulfillRecord`]
    /// constants.
    pub quadrant: u8,
    /// Bytes added by fair increase since the previous record.
    pub inc_fair: u64,
    /// Bytes added by proportional increase since the previous record.
    pub inc_prop: u64,
    /// Bytes added by fast increase since the previous record.
    pub inc_fast: u64,
    /// Bytes added by the per-fulfill nudge since the previous record.
    pub inc_eta: u64,
    /// Bytes removed by multiplicative decrease since the previous record.
    pub dec_multi: u64,
    /// Bytes removed by Quick Adapt since the previous record.
    pub dec_quick: u64,
}

impl FulfillRecord {
    pub const QUADRANT_FAIR_INC: u8 = 0;
    pub const QUADRANT_PROP_INC: u8 = 1;
    pub const QUADRANT_MULT_DEC: u8 = 2;
    pub const QUADRANT_NOOP: u8 = 3;
    pub const QUADRANT_FAST_INC: u8 = 4;
    pub const QUADRANT_QUICK_ADAPT: u8 = 5;
}

/// One row per Quick Adapt firing.
#[derive(Debug, Clone, Serialize)]
pub struct QuickAdaptRecord {
    /// Event time in picoseconds.
    pub time: TimePico,
    pub flow_id: FlowId,
    pub cwnd_before: u64,
    pub cwnd_after: u64,
    /// Bytes acknowledged in the evaluation window that fired.
    pub achieved_bytes: u64,
    pub in_flight: u64,
}

/// Consumer of trace records. Attached per flow; all methods are called
/// from the flow's handler chain, so implementations need no locking.
pub trait TraceSink {
    fn on_fulfill(&mut self, record: &FulfillRecord);

    fn on_quick_adapt(&mut self, record: &QuickAdaptRecord);
}

fn as_us(t: TimePico) -> f64 {
    t as f64 / PICOS_PER_USEC as f64
}

/// CSV writer with one header row, times in microseconds.
pub struct CsvTraceWriter<W: Write> {
    out: W,
}

impl<W: Write> CsvTraceWriter<W> {
    pub fn new(mut out: W) -> Self {
        let header = "time_us,flow_id,cwnd,in_flight,bdp,maxwnd,\
                      avg_delay_us,raw_delay_us,target_us,base_rtt_us,\
                      ecn,quadrant,\
                      inc_fair,inc_prop,inc_fast,inc_eta,dec_multi,dec_quick";
        if let Err(e) = writeln!(out, "{}", header) {
            error!("trace: failed to write csv header: {}", e);
        }
        Self { out }
    }
}

impl<W: Write> TraceSink for CsvTraceWriter<W> {
    fn on_fulfill(&mut self, r: &FulfillRecord) {
        let res = writeln!(
            self.out,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            as_us(r.time),
            r.flow_id,
            r.cwnd,
            r.in_flight,
            r.bdp,
            r.maxwnd,
            as_us(r.avg_delay),
            as_us(r.raw_delay),
            as_us(r.target_delay),
            as_us(r.base_rtt),
            r.ecn as u8,
            r.quadrant,
            r.inc_fair,
            r.inc_prop,
            r.inc_fast,
            r.inc_eta,
            r.dec_multi,
            r.dec_quick,
        );
        if let Err(e) = res {
            error!("trace: failed to write fulfill record: {}", e);
        }
    }

    fn on_quick_adapt(&mut self, r: &QuickAdaptRecord) {
        // Quick Adapt rows reuse the sample layout: quadrant=5, with
        // cwnd_before/cwnd_after/achieved in the first accumulator columns.
        let res = writeln!(
            self.out,
            "{},{},{},{},0,0,0,0,0,0,0,{},{},{},{},0,0,0",
            as_us(r.time),
            r.flow_id,
            r.cwnd_after,
            r.in_flight,
            FulfillRecord::QUADRANT_QUICK_ADAPT,
            r.cwnd_before,
            r.cwnd_after,
            r.achieved_bytes,
        );
        if let Err(e) = res {
            error!("trace: failed to write quick adapt record: {}", e);
        }
    }
}

/// JSON-lines writer; one serialized record per line, times in picoseconds.
pub struct JsonTraceWriter<W: Write> {
    out: W,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JsonRecord<'a> {
    Fulfill(&'a FulfillRecord),
    QuickAdapt(&'a QuickAdaptRecord),
}

impl<W: Write> JsonTraceWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    fn write(&mut self, record: &JsonRecord) {
        match serde_json::to_string(record) {
            Ok(line) => {
                if let Err(e) = writeln!(self.out, "{}", line) {
                    error!("trace: failed to write json record: {}", e);
                }
            }
            Err(e) => error!("trace: failed to serialize record: {}", e),
        }
    }
}

impl<W: Write> TraceSink for JsonTraceWriter<W> {
    fn on_fulfill(&mut self, record: &FulfillRecord) {
        self.write(&JsonRecord::Fulfill(record));
    }

    fn on_quick_adapt(&mut self, record: &QuickAdaptRecord) {
        self.write(&JsonRecord::QuickAdapt(record));
    }
}
