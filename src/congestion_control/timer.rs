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

use strum::EnumCount;
use strum_macros::EnumCount;
use strum_macros::EnumIter;

use crate::TimePico;

/// Per-flow timers. Deadlines are absolute and handed to the host
/// scheduler; the host calls back into the flow when the earliest fires.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, EnumIter, EnumCount)]
pub(crate) enum Timer {
    /// When to force a fulfill adjustment if the received-bytes trigger has
    /// not fired on its own.
    FulfillAdjust,

    /// When to run the next Quick Adapt boundary evaluation.
    QuickAdaptEval,

    /// When to send a loss-detection probe after a quiet interval.
    Probe,
}

/// Associated deadline for each `Timer`.
#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct TimerTable {
    expires: [Option<TimePico>; Timer::COUNT],
}

impl TimerTable {
    /// Set the deadline for the given timer.
    pub fn set(&mut self, timer: Timer, time: TimePico) {
        self.expires[timer as usize] = Some(time);
    }

    /// Get the deadline for the given timer.
    pub fn get(&self, timer: Timer) -> Option<TimePico> {
        self.expires[timer as usize]
    }

    /// Cancel the given timer.
    pub fn stop(&mut self, timer: Timer) {
        self.expires[timer as usize] = None;
    }

    /// Get the earliest armed deadline.
    pub fn next_timeout(&self) -> Option<TimePico> {
        self.expires.iter().filter_map(|&x| x).min()
    }

    /// Check whether the given timer has expired.
    pub fn is_expired(&self, timer: Timer, after: TimePico) -> bool {
        self.expires[timer as usize].map_or(false, |x| x <= after)
    }

    /// Cancel every timer. Called at flow teardown so no callback can
    /// reach the flow afterwards.
    pub fn clear(&mut self) {
        self.expires = [None; Timer::COUNT];
    }
}
