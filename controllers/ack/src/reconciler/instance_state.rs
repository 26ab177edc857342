//! Instance state machine
//!
//! Maps a provider instance state onto machine readiness plus the warning
//! and terminal failure, if any, the caller must apply. Total over every
//! `InstanceState`, including states the provider adds later.

use crate::events::reasons;
use crds::{InstanceState, MachineStatusError};

/// What a provider state means for the machine resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateProjection {
    pub ready: bool,
    /// Warning event to emit, as (reason, note)
    pub warning: Option<(&'static str, String)>,
    /// Terminal failure to record
    pub failure: Option<(MachineStatusError, String)>,
}

pub fn project(state: &InstanceState) -> StateProjection {
    match state {
        InstanceState::Pending | InstanceState::Stopping | InstanceState::Stopped => StateProjection {
            ready: false,
            warning: None,
            failure: None,
        },
        InstanceState::Running => StateProjection { ready: true, warning: None, failure: None },
        InstanceState::ShuttingDown | InstanceState::Terminated => StateProjection {
            ready: false,
            warning: Some((
                reasons::INSTANCE_UNEXPECTED_TERMINATION,
                format!("Instance is in state {}", state),
            )),
            failure: None,
        },
        InstanceState::Unrecognized(raw) => {
            let message = format!("ECS instance state {:?} is unexpected", raw);
            StateProjection {
                ready: false,
                warning: Some((reasons::INSTANCE_UNHANDLED_STATE, message.clone())),
                failure: Some((MachineStatusError::UpdateMachineError, message)),
            }
        }
    }
}
