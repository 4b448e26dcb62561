//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! Runtime states and the handle's believed lifecycle

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Container state as reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum State {
    Stopped,
    Starting,
    Running,
    Stopping,
    Aborting,
    Freezing,
    Frozen,
    Thawed,
}

impl State {
    pub const ALL: [State; 8] = [
        State::Stopped,
        State::Starting,
        State::Running,
        State::Stopping,
        State::Aborting,
        State::Freezing,
        State::Frozen,
        State::Thawed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Stopped => "STOPPED",
            State::Starting => "STARTING",
            State::Running => "RUNNING",
            State::Stopping => "STOPPING",
            State::Aborting => "ABORTING",
            State::Freezing => "FREEZING",
            State::Frozen => "FROZEN",
            State::Thawed => "THAWED",
        }
    }

    /// True for every state in which an init process exists.
    pub fn is_active(&self) -> bool {
        !matches!(self, State::Stopped | State::Aborting)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        State::ALL
            .iter()
            .copied()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::parse("container state", s))
    }
}

/// What a handle believes about its container.
///
/// `Frozen` is a sub-state of `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Undefined,
    Defined,
    Running,
    Frozen,
}

impl Lifecycle {
    pub(crate) fn derive(defined: bool, state: State) -> Self {
        match state {
            State::Frozen | State::Freezing => Lifecycle::Frozen,
            s if s.is_active() => Lifecycle::Running,
            _ if defined => Lifecycle::Defined,
            _ => Lifecycle::Undefined,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Lifecycle::Running | Lifecycle::Frozen)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Undefined => "undefined",
            Lifecycle::Defined => "defined",
            Lifecycle::Running => "running",
            Lifecycle::Frozen => "frozen",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_parse_roundtrip() {
        for state in State::ALL {
            assert_eq!(state.as_str().parse::<State>().unwrap(), state);
        }
        assert_eq!("frozen".parse::<State>().unwrap(), State::Frozen);
    }

    #[test]
    fn test_state_parse_unknown() {
        let err = "SLEEPING".parse::<State>().unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_lifecycle_derivation() {
        assert_eq!(Lifecycle::derive(false, State::Stopped), Lifecycle::Undefined);
        assert_eq!(Lifecycle::derive(true, State::Stopped), Lifecycle::Defined);
        assert_eq!(Lifecycle::derive(true, State::Running), Lifecycle::Running);
        assert_eq!(Lifecycle::derive(true, State::Thawed), Lifecycle::Running);
        assert_eq!(Lifecycle::derive(true, State::Frozen), Lifecycle::Frozen);
        assert!(Lifecycle::Frozen.is_running());
        assert!(!Lifecycle::Defined.is_running());
    }

    #[test]
    fn test_state_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&State::Running).unwrap(), "\"RUNNING\"");
    }
}
