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

use log::*;
use rustc_hash::FxHashMap;

use crate::multipath::MultipathEngine;
use crate::multipath::PathFeedback;
use crate::Error;
use crate::PathId;
use crate::Result;

/// Skip turns charged per feedback class. A path that only saw an ECN mark
/// comes back quickly; a trimmed or timed-out path sits out longer.
const PENALTY_ECN: u32 = 1;
const PENALTY_NACK: u32 = 2;
const PENALTY_TIMEOUT: u32 = 4;

/// Upper bound on accumulated skip turns so a path under a burst of marks
/// is not exiled for the rest of the flow.
const PENALTY_CAP: u32 = 8;

/// PenaltyEngine rotates over paths but skips recently penalized ones.
///
/// Each congestion signal charges the path a number of skip turns; every
/// time the rotation would land on a penalized path, one turn is consumed
/// and the next path is considered instead. A clean acknowledgement clears
/// the path outright. When every path is penalized the engine still picks
/// one rather than stall the sender.
pub struct PenaltyEngine {
    path_count: usize,
    next: usize,

    /// Remaining skip turns per penalized path. Absent means clean.
    penalties: FxHashMap<PathId, u32>,
}

impl PenaltyEngine {
    pub fn new(path_count: usize) -> PenaltyEngine {
        PenaltyEngine {
            path_count,
            next: 0,
            penalties: FxHashMap::default(),
        }
    }

    fn advance(&mut self) -> PathId {
        let pid = self.next;
        self.next = (self.next + 1) % self.path_count;
        pid
    }
}

impl MultipathEngine for PenaltyEngine {
    fn notify(&mut self, path_id: PathId, feedback: PathFeedback) {
        if path_id >= self.path_count {
            return;
        }
        match feedback {
            PathFeedback::Good => {
                self.penalties.remove(&path_id);
            }
            PathFeedback::Ecn => {
                let p = self.penalties.entry(path_id).or_insert(0);
                *p = (*p + PENALTY_ECN).min(PENALTY_CAP);
            }
            PathFeedback::Nack => {
                let p = self.penalties.entry(path_id).or_insert(0);
                *p = (*p + PENALTY_NACK).min(PENALTY_CAP);
            }
            PathFeedback::Timeout => {
                let p = self.penalties.entry(path_id).or_insert(0);
                *p = (*p + PENALTY_TIMEOUT).min(PENALTY_CAP);
                trace!("multipath: path {} timed out, penalty charged", path_id);
            }
        }
    }

    fn select_next(&mut self) -> Result<PathId> {
        if self.path_count == 0 {
            return Err(Error::Done);
        }

        // One full sweep; consume a skip turn from each penalized path we
        // pass over.
        for _ in 0..self.path_count {
            let pid = self.advance();
            match self.penalties.get_mut(&pid) {
                Some(p) if *p > 0 => {
                    *p -= 1;
                    if *p == 0 {
                        self.penalties.remove(&pid);
                    }
                }
                _ => return Ok(pid),
            }
        }

        // Everything is penalized; sending must not stall.
        let pid = self.advance();
        self.penalties.remove(&pid);
        Ok(pid)
    }

    fn path_count(&self) -> usize {
        self.path_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_penalized_path() {
        let mut engine = PenaltyEngine::new(3);
        engine.notify(1, PathFeedback::Nack);

        // Path 1 sits out two turns.
        assert_eq!(engine.select_next(), Ok(0));
        assert_eq!(engine.select_next(), Ok(2));
        assert_eq!(engine.select_next(), Ok(0));
        assert_eq!(engine.select_next(), Ok(2));

        // Penalty consumed; back in rotation.
        assert_eq!(engine.select_next(), Ok(0));
        assert_eq!(engine.select_next(), Ok(1));
    }

    #[test]
    fn good_feedback_clears_penalty() {
        let mut engine = PenaltyEngine::new(2);
        engine.notify(0, PathFeedback::Timeout);
        engine.notify(0, PathFeedback::Good);

        assert_eq!(engine.select_next(), Ok(0));
    }

    #[test]
    fn never_stalls_when_all_penalized() {
        let mut engine = PenaltyEngine::new(2);
        engine.notify(0, PathFeedback::Timeout);
        engine.notify(1, PathFeedback::Timeout);

        // Some path is always returned.
        assert!(engine.select_next().is_ok());
        assert!(engine.select_next().is_ok());
    }

    #[test]
    fn penalty_is_capped() {
        let mut engine = PenaltyEngine::new(2);
        for _ in 0..100 {
            engine.notify(1, PathFeedback::Timeout);
        }

        // Path 1 returns after at most PENALTY_CAP skipped turns.
        let mut saw_path_1 = false;
        for _ in 0..2 * (PENALTY_CAP as usize + 1) {
            if engine.select_next() == Ok(1) {
                saw_path_1 = true;
                break;
            }
        }
        assert!(saw_path_1);
    }
}
