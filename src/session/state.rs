//! Lifecycle states and phases

use std::fmt;

use rtt_shared::PacketKind;
use serde::Serialize;

/// Where the ground station is in the drone lifecycle
///
/// `*Input` states wait for the operator, `*Waiting` states wait for the drone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Disconnected,
    RadioConfigInput,
    RadioConfigWaiting,
    PingConfigInput,
    PingConfigWaiting,
    StartInput,
    StartWaiting,
    StopInput,
    StopWaiting,
    Error,
}

impl LifecycleState {
    pub const COUNT: usize = 10;

    pub const ALL: [LifecycleState; Self::COUNT] = [
        LifecycleState::Disconnected,
        LifecycleState::RadioConfigInput,
        LifecycleState::RadioConfigWaiting,
        LifecycleState::PingConfigInput,
        LifecycleState::PingConfigWaiting,
        LifecycleState::StartInput,
        LifecycleState::StartWaiting,
        LifecycleState::StopInput,
        LifecycleState::StopWaiting,
        LifecycleState::Error,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            LifecycleState::Disconnected => "DISCONNECTED",
            LifecycleState::RadioConfigInput => "RADIO_CONFIG_INPUT",
            LifecycleState::RadioConfigWaiting => "RADIO_CONFIG_WAITING",
            LifecycleState::PingConfigInput => "PING_FINDER_CONFIG_INPUT",
            LifecycleState::PingConfigWaiting => "PING_FINDER_CONFIG_WAITING",
            LifecycleState::StartInput => "START_INPUT",
            LifecycleState::StartWaiting => "START_WAITING",
            LifecycleState::StopInput => "STOP_INPUT",
            LifecycleState::StopWaiting => "STOP_WAITING",
            LifecycleState::Error => "ERROR",
        }
    }

}

impl Default for LifecycleState {
    fn default() -> Self {
        LifecycleState::RadioConfigInput
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A guarded transition with operator-facing outcome messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub success_message: String,
    pub failure_message: String,
}

impl StateTransition {
    pub fn new(
        from: LifecycleState,
        to: LifecycleState,
        success_message: impl Into<String>,
        failure_message: impl Into<String>,
    ) -> Self {
        Self {
            from,
            to,
            success_message: success_message.into(),
            failure_message: failure_message.into(),
        }
    }
}

/// One request/response exchange with the drone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Sync,
    Config,
    Start,
    Stop,
    Disconnect,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Sync,
        Phase::Config,
        Phase::Start,
        Phase::Stop,
        Phase::Disconnect,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::Sync => "sync",
            Phase::Config => "config",
            Phase::Start => "start",
            Phase::Stop => "stop",
            Phase::Disconnect => "disconnect",
        }
    }

    /// State the operator issues this phase from
    pub fn input_state(self) -> Option<LifecycleState> {
        match self {
            Phase::Sync => Some(LifecycleState::RadioConfigInput),
            Phase::Config => Some(LifecycleState::PingConfigInput),
            Phase::Start => Some(LifecycleState::StartInput),
            Phase::Stop => Some(LifecycleState::StopInput),
            Phase::Disconnect => None,
        }
    }

    /// State held while the response is outstanding
    ///
    /// Disconnect has none: the state is left alone until it concludes.
    pub fn waiting_state(self) -> Option<LifecycleState> {
        match self {
            Phase::Sync => Some(LifecycleState::RadioConfigWaiting),
            Phase::Config => Some(LifecycleState::PingConfigWaiting),
            Phase::Start => Some(LifecycleState::StartWaiting),
            Phase::Stop => Some(LifecycleState::StopWaiting),
            Phase::Disconnect => None,
        }
    }

    /// State entered on a successful response
    pub fn next_state(self) -> LifecycleState {
        match self {
            Phase::Sync => LifecycleState::PingConfigInput,
            Phase::Config => LifecycleState::StartInput,
            Phase::Start => LifecycleState::StopInput,
            Phase::Stop => LifecycleState::PingConfigInput,
            Phase::Disconnect => LifecycleState::RadioConfigInput,
        }
    }

    /// Response packet that concludes this phase
    pub fn response_kind(self) -> PacketKind {
        match self {
            Phase::Sync => PacketKind::SyncResponse,
            Phase::Config => PacketKind::ConfigResponse,
            Phase::Start => PacketKind::StartResponse,
            Phase::Stop | Phase::Disconnect => PacketKind::StopResponse,
        }
    }

    /// Whether the phase may be issued from `state`
    ///
    /// A phase may be re-issued while parked in its own waiting state after a
    /// timeout. Sync is also accepted after a fatal error dropped the link and
    /// from `Error`, where reconnecting is the way back.
    pub fn accepts(self, state: LifecycleState) -> bool {
        match self {
            Phase::Sync => matches!(
                state,
                LifecycleState::RadioConfigInput
                    | LifecycleState::Disconnected
                    | LifecycleState::Error
            ),
            Phase::Disconnect => true,
            _ => self.input_state() == Some(state) || self.waiting_state() == Some(state),
        }
    }

    pub fn success_message(self) -> &'static str {
        match self {
            Phase::Sync => "Successfully connected to drone.",
            Phase::Config => "Config sent to drone.",
            Phase::Start => "Drone is now starting.",
            Phase::Stop => "Drone is now stopping.",
            Phase::Disconnect => "Drone is now disconnected.",
        }
    }

    pub fn failure_message(self) -> &'static str {
        match self {
            Phase::Sync => "Drone rejected the sync request.",
            Phase::Config => "Drone rejected the configuration.",
            Phase::Start => "Drone failed to start.",
            Phase::Stop => "Drone failed to stop.",
            Phase::Disconnect => "Drone rejected the disconnect request.",
        }
    }

    /// Transition taken when the request is sent from `current`
    ///
    /// When `current` is not an accepted state the guard names the input
    /// state, so the state machine reports the mismatch.
    pub fn entry(self, current: LifecycleState) -> StateTransition {
        let from = if self.accepts(current) {
            current
        } else {
            self.input_state().unwrap_or(current)
        };
        let to = self.waiting_state().unwrap_or(from);
        StateTransition::new(from, to, self.success_message(), self.failure_message())
    }

    /// Transition taken on a successful response, given the entry transition
    pub fn completion(self, entry: &StateTransition) -> StateTransition {
        StateTransition::new(
            entry.to,
            self.next_state(),
            self.success_message(),
            self.failure_message(),
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
