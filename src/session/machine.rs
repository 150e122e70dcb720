//! Guarded lifecycle state machine
//!
//! Holds the current state plus at most one transition handler and one
//! timeout handler per state. Handlers receive a mutable context `X` owned
//! by the caller, so they can act on the link without the machine owning it.

use tracing::{debug, error, info, warn};

use super::events::{EventSink, SessionEvent};
use super::{LifecycleState, StateTransition, TransitionError};

/// Runs on entry to a state
pub type TransitionHandler<X> = Box<dyn FnMut(&mut X) -> anyhow::Result<()> + Send>;

/// Runs when a state's deadline elapses
pub type TimeoutHandler<X> = Box<dyn FnMut(&mut X) + Send>;

pub struct StateMachine<X> {
    current: LifecycleState,
    transition_handlers: [Option<TransitionHandler<X>>; LifecycleState::COUNT],
    timeout_handlers: [Option<TimeoutHandler<X>>; LifecycleState::COUNT],
    events: EventSink,
}

impl<X> StateMachine<X> {
    pub fn new(events: EventSink) -> Self {
        Self {
            current: LifecycleState::default(),
            transition_handlers: std::array::from_fn(|_| None),
            timeout_handlers: std::array::from_fn(|_| None),
            events,
        }
    }

    pub fn current(&self) -> LifecycleState {
        self.current
    }

    /// Set the handler run on entry to `state`, replacing any previous one
    pub fn register_transition_handler<F>(&mut self, state: LifecycleState, handler: F)
    where
        F: FnMut(&mut X) -> anyhow::Result<()> + Send + 'static,
    {
        if self.transition_handlers[state.index()]
            .replace(Box::new(handler))
            .is_some()
        {
            debug!("Replaced transition handler for {state}");
        }
    }

    /// Set the handler run when `state` times out, replacing any previous one
    pub fn register_timeout_handler<F>(&mut self, state: LifecycleState, handler: F)
    where
        F: FnMut(&mut X) + Send + 'static,
    {
        if self.timeout_handlers[state.index()]
            .replace(Box::new(handler))
            .is_some()
        {
            debug!("Replaced timeout handler for {state}");
        }
    }

    /// Verify the machine is in `transition.from`
    ///
    /// A mismatch is published as a state error.
    pub fn check(&self, transition: &StateTransition) -> Result<(), TransitionError> {
        if self.current == transition.from {
            return Ok(());
        }

        let err = TransitionError::InvalidTransition {
            expected: transition.from,
            actual: self.current,
            to: transition.to,
        };
        warn!("{err}");
        self.events.emit(SessionEvent::StateError {
            message: err.to_string(),
        });
        Err(err)
    }

    /// Move to `new_state` and run its transition handler
    ///
    /// With a `transition`, its `from` must match the current state or nothing
    /// changes. The new state is committed before the handler runs and stays
    /// committed if the handler fails; only a clean run publishes
    /// [`SessionEvent::StateChanged`].
    pub fn transition_to(
        &mut self,
        ctx: &mut X,
        new_state: LifecycleState,
        transition: Option<&StateTransition>,
    ) -> Result<(), TransitionError> {
        if let Some(transition) = transition {
            self.check(transition)?;
        }

        let old_state = self.current;
        self.current = new_state;
        info!("State transition: {old_state} -> {new_state}");

        if let Some(handler) = self.transition_handlers[new_state.index()].as_mut() {
            if let Err(e) = handler(ctx) {
                let err = TransitionError::Handler {
                    state: new_state,
                    message: format!("{e:#}"),
                };
                error!("{err}");
                self.events.emit(SessionEvent::StateError {
                    message: err.to_string(),
                });
                return Err(err);
            }
        }

        self.events.emit(SessionEvent::StateChanged {
            from: old_state,
            to: new_state,
        });
        Ok(())
    }

    /// Run the timeout handler for `state`; false if none is registered
    pub fn handle_timeout(&mut self, ctx: &mut X, state: LifecycleState) -> bool {
        match self.timeout_handlers[state.index()].as_mut() {
            Some(handler) => {
                handler(ctx);
                true
            }
            None => false,
        }
    }
}
