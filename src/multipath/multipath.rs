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

use core::str::FromStr;

use self::engine_penalty::*;
use self::engine_rr::*;
use crate::Error;
use crate::PathId;
use crate::Result;

/// Per-packet feedback class handed to the path selection engine.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PathFeedback {
    /// The packet was acknowledged without a congestion mark.
    Good,

    /// The acknowledgement carried an ECN echo.
    Ecn,

    /// The packet was trimmed at a congested switch.
    Nack,

    /// The packet timed out without any feedback.
    Timeout,
}

/// MultipathEngine decides the equal-cost path over which the next segment
/// will be sprayed. The sender core only drives the feedback side; path
/// bookkeeping is entirely internal to the engine.
pub trait MultipathEngine {
    /// Record feedback for a packet that travelled `path_id`.
    fn notify(&mut self, path_id: PathId, feedback: PathFeedback);

    /// Select the path for the next outgoing segment.
    fn select_next(&mut self) -> Result<PathId>;

    /// Number of equal-cost paths the engine sprays over.
    fn path_count(&self) -> usize;
}

/// Available path selection algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipathAlgorithm {
    /// Spray over all paths in strict rotation, ignoring feedback. Matches
    /// the fabric's ECMP assumption and is the baseline for experiments.
    RoundRobin,

    /// Rotate over paths but skip those with recent congestion feedback for
    /// a bounded number of turns. ECN is a mild penalty, a trim is
    /// stronger, a timeout strongest.
    Penalty,
}

impl FromStr for MultipathAlgorithm {
    type Err = Error;

    fn from_str(algor: &str) -> Result<MultipathAlgorithm> {
        if algor.eq_ignore_ascii_case("roundrobin") {
            Ok(MultipathAlgorithm::RoundRobin)
        } else if algor.eq_ignore_ascii_case("penalty") {
            Ok(MultipathAlgorithm::Penalty)
        } else {
            Err(Error::InvalidConfig("unknown".into()))
        }
    }
}

/// Build a path selection engine spraying over `path_count` paths.
pub fn build_multipath_engine(
    algor: MultipathAlgorithm,
    path_count: usize,
) -> Box<dyn MultipathEngine> {
    match algor {
        MultipathAlgorithm::RoundRobin => Box::new(RoundRobinEngine::new(path_count)),
        MultipathAlgorithm::Penalty => Box::new(PenaltyEngine::new(path_count)),
    }
}


mod engine_penalty;
mod engine_rr;
