//! Drone lifecycle session
//!
//! This module handles:
//! - The guarded lifecycle state machine
//! - One-shot request deadlines
//! - The sync, config, start, stop and disconnect exchanges
//! - The facade the operator interface drives

mod error;
mod events;
mod facade;
mod machine;
mod orchestrator;
mod payload;
mod pending;
mod state;
mod timer;

pub use error::{SessionError, TransitionError, ValidationError};
pub use events::{EventReceiver, EventSink, SessionEvent};
pub use facade::{Lifecycle, SessionHandle};
pub use machine::{StateMachine, TimeoutHandler, TransitionHandler};
pub use orchestrator::PhaseOrchestrator;
pub use payload::PingFinderSettings;
pub use pending::{Outcome, PendingRequest, RequestId};
pub use state::{LifecycleState, Phase, StateTransition};
pub use timer::{TimerHandle, TimerService};
