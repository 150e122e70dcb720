//! Session error types

use thiserror::Error;

use super::{LifecycleState, Phase};
use crate::comms::CommsError;

/// A field that failed payload validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Raised by the state machine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid state transition to {to}: expected from state {expected}, current state is {actual}")]
    InvalidTransition {
        expected: LifecycleState,
        actual: LifecycleState,
        to: LifecycleState,
    },

    #[error("Transition handler for {state} failed: {message}")]
    Handler {
        state: LifecycleState,
        message: String,
    },
}

/// Synchronous rejection of a lifecycle operation
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Not connected to a drone")]
    NotConnected,

    #[error("Already connected to a drone")]
    AlreadyConnected,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Transport failure: {0}")]
    Transport(#[from] CommsError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("A {phase} request is already in flight")]
    Busy { phase: Phase },

    #[error("Session orchestrator has shut down")]
    Closed,
}
