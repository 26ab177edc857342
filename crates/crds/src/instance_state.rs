//! ECS instance lifecycle states
//!
//! Provider states arrive as opaque strings. Known states parse into named
//! variants; anything else is kept verbatim in `Unrecognized` so it can be
//! reported back to the operator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a provider instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
    /// Any state string not covered above
    Unrecognized(String),
}

impl InstanceState {
    /// Parses a provider state string.
    ///
    /// Matching ignores case and `-`/`_` separators, so "shutting-down",
    /// "ShuttingDown" and "SHUTTING_DOWN" are the same state.
    pub fn parse(raw: &str) -> Self {
        let normalized: String = raw
            .chars()
            .filter(|c| *c != '-' && *c != '_' && !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "shuttingdown" => Self::ShuttingDown,
            "terminated" => Self::Terminated,
            _ => Self::Unrecognized(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
            Self::Stopped => "Stopped",
            Self::ShuttingDown => "ShuttingDown",
            Self::Terminated => "Terminated",
            Self::Unrecognized(raw) => raw,
        }
    }

    /// The instance is gone or going away on the provider side
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ShuttingDown | Self::Terminated)
    }
}

impl From<&str> for InstanceState {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<String> for InstanceState {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<InstanceState> for String {
    fn from(state: InstanceState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
