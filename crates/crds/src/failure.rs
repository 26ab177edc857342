//! Terminal machine failure
//!
//! Persisted as the Cluster API `failureReason` / `failureMessage` pair, read
//! back as a single tagged state.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cluster API machine status error reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum MachineStatusError {
    /// The machine configuration is invalid
    InvalidConfiguration,
    /// The requested change cannot be applied to an existing machine
    UnsupportedChange,
    /// Creating the machine failed in a way that will not be fixed by retrying
    CreateError,
    /// Updating or observing the machine failed in a way that will not be fixed by retrying
    #[serde(rename = "UpdateError")]
    UpdateMachineError,
    /// Deleting the machine failed in a way that will not be fixed by retrying
    DeleteError,
    /// Not enough provider capacity to run the machine
    InsufficientResources,
}

impl MachineStatusError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration => "InvalidConfiguration",
            Self::UnsupportedChange => "UnsupportedChange",
            Self::CreateError => "CreateError",
            Self::UpdateMachineError => "UpdateError",
            Self::DeleteError => "DeleteError",
            Self::InsufficientResources => "InsufficientResources",
        }
    }
}

impl fmt::Display for MachineStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a machine may still be reconciled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureState {
    Active,
    /// Sticky until the resource is deleted and recreated.
    /// Either field alone is enough to mark a machine failed.
    Failed {
        reason: Option<MachineStatusError>,
        message: Option<String>,
    },
}

impl FailureState {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}
