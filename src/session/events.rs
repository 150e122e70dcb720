//! Notifications published to the operator interface

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

use super::{LifecycleState, Phase};
use crate::telemetry::{GpsFix, LocationEstimate, PingDetection};

/// Everything the session reports outward
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Drone acknowledged a phase
    Succeeded { phase: Phase, message: String },
    /// Phase was rejected locally or by the drone
    Failed { phase: Phase, message: String },
    /// No response within `ack_timeout × max_retries`
    TimedOut { phase: Phase },
    /// Drone reported an error or the link was lost
    FatalError { message: String },
    StateChanged {
        from: LifecycleState,
        to: LifecycleState,
    },
    /// Rejected transition or failed transition handler
    StateError { message: String },
    Position(GpsFix),
    Ping(PingDetection),
    LocationEstimate(LocationEstimate),
}

pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Sending side of the event channel
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            trace!("Event receiver dropped");
        }
    }
}
