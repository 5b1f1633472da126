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

use crate::multipath::MultipathEngine;
use crate::multipath::PathFeedback;
use crate::Error;
use crate::PathId;
use crate::Result;

/// RoundRobinEngine sprays over all equal-cost paths in strict rotation.
///
/// The distribution across paths is equal regardless of feedback, which is
/// the plain ECMP spraying model and the baseline the penalty engine is
/// measured against.
pub struct RoundRobinEngine {
    path_count: usize,
    next: usize,
}

impl RoundRobinEngine {
    pub fn new(path_count: usize) -> RoundRobinEngine {
        RoundRobinEngine {
            path_count,
            next: 0,
        }
    }
}

impl MultipathEngine for RoundRobinEngine {
    fn notify(&mut self, _path_id: PathId, _feedback: PathFeedback) {
        // Rotation ignores feedback.
    }

    fn select_next(&mut self) -> Result<PathId> {
        if self.path_count == 0 {
            return Err(Error::Done);
        }
        let pid = self.next;
        self.next = (self.next + 1) % self.path_count;
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
    fn rotation() {
        let mut engine = RoundRobinEngine::new(3);
        assert_eq!(engine.select_next(), Ok(0));
        assert_eq!(engine.select_next(), Ok(1));
        assert_eq!(engine.select_next(), Ok(2));
        assert_eq!(engine.select_next(), Ok(0));
    }

    #[test]
    fn feedback_ignored() {
        let mut engine = RoundRobinEngine::new(2);
        engine.notify(0, PathFeedback::Nack);
        engine.notify(0, PathFeedback::Timeout);
        assert_eq!(engine.select_next(), Ok(0));
        assert_eq!(engine.select_next(), Ok(1));
    }
}
