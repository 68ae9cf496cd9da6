use std::io;

use thiserror::Error;

use crate::models::Mirror;
use crate::safety::FaultCode;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConcurrencyViolation {
    #[error("an alignment session is already active")]
    SessionActive,
    #[error("step already in progress")]
    StepInProgress,
    #[error("actuator is locked by {owner}")]
    LockHeld { owner: String },
    #[error("no alignment session is active")]
    NoSession,
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("actuator transport fault: {0}")]
    Transport(#[source] io::Error),
    #[error("detector fault: {0}")]
    Detector(#[source] io::Error),
    #[error("recovery from {fault:?} failed: {source}")]
    Recovery {
        fault: FaultCode,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyViolation),
    #[error("operation interrupted")]
    Interrupted,
    #[error("calibration of {mirror} failed: {source}")]
    Calibration {
        mirror: Mirror,
        #[source]
        source: Box<ControlError>,
    },
    #[error("geometry produced a non-finite correction")]
    InvalidCorrection,
}

impl ControlError {
    /// Whether the error ends the current alignment session.
    pub fn is_fatal(&self) -> bool {
        match self {
            ControlError::Transport(_) | ControlError::Detector(_) | ControlError::Recovery { .. } => true,
            ControlError::Calibration { source, .. } => source.is_fatal(),
            ControlError::Concurrency(_) | ControlError::Interrupted | ControlError::InvalidCorrection => {
                false
            }
        }
    }

    pub(crate) fn from_join(error: tokio::task::JoinError) -> ControlError {
        if error.is_panic() {
            std::panic::resume_unwind(error.into_panic());
        }
        ControlError::Interrupted
    }
}

impl From<crate::hardware::LockHeld> for ControlError {
    fn from(held: crate::hardware::LockHeld) -> Self {
        ControlError::Concurrency(ConcurrencyViolation::LockHeld { owner: held.owner })
    }
}
