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

//! Error type for congestion control operations.

use strum::IntoEnumIterator;
use strum_macros::EnumIter;

/// Errors surfaced by the per-flow sender core.
///
/// Normal operation never returns an error: transient network events (NACK,
/// out-of-order ACK, probe miss) are absorbed by the loss detector, and
/// degradation events (Quick Adapt firing, recovery entry) are expressed as
/// state bits plus log records. Errors are reserved for conditions that must
/// stop the flow or reject the call.
#[derive(Clone, Debug, Default, PartialEq, Eq, EnumIter)]
pub enum Error {
    /// The core encountered an unexpected internal condition and cannot
    /// continue driving the flow.
    #[default]
    InternalError,

    /// There is no more work to do. Used by the multipath engine when no
    /// path is currently selectable.
    Done,

    /// The configuration is invalid.
    InvalidConfig(String),

    /// The operation was attempted in a state that does not permit it.
    InvalidState(String),

    /// An event was delivered to a flow that has already been torn down.
    /// Pending timers and late feedback for a terminated flow are dropped
    /// without mutating state.
    FlowTerminated,

    /// A state invariant was violated (window outside its bounds after a
    /// clamp, base RTT attempting to grow, sequence cursors crossing). The
    /// flow is marked terminal and must not be driven further.
    InvariantViolation(String),

    /// I/O error from a trace sink.
    IoError(String),
}

impl Error {
    /// Whether the error aborts the flow. Non-fatal errors describe a
    /// rejected call; the flow itself remains usable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InternalError | Error::FlowTerminated | Error::InvariantViolation(_)
        )
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl std::convert::From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(format!("{}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        for err in Error::iter() {
            assert!(!format!("{}", err).is_empty());
        }
    }

    #[test]
    fn error_fatality() {
        let cases = [
            (Error::InternalError, true),
            (Error::Done, false),
            (Error::InvalidConfig("bad".into()), false),
            (Error::InvalidState("bad".into()), false),
            (Error::FlowTerminated, true),
            (Error::InvariantViolation("cwnd".into()), true),
            (Error::IoError("eof".into()), false),
        ];
        for (err, fatal) in cases {
            assert_eq!(err.is_fatal(), fatal);
        }
    }

    #[test]
    fn io_error() {
        use std::error::Error;
        let e = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        let e = super::Error::from(e);

        assert_eq!(format!("{}", e), "IoError(\"unexpected end of file\")");
        assert!(e.source().is_none());
    }
}
