//! Per-phase request orchestration
//!
//! Every phase follows the same shape: check the precondition, arm a one-shot
//! response listener, send, enter the waiting state, and arm a deadline of
//! `ack_timeout × max_retries`. Whichever of response, deadline or
//! cancellation arrives first settles the request.

use std::collections::HashMap;
use std::sync::Arc;

use rtt_shared::{PacketKind, Payload};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::events::{EventSink, SessionEvent};
use super::facade::SessionMsg;
use super::machine::StateMachine;
use super::pending::{Outcome, PendingRequest, RequestId};
use super::timer::TimerService;
use super::{Phase, SessionError};
use crate::comms::{DroneComms, HandlerId, PacketHandler, Request};
use crate::config::AckTiming;

/// Registrations the session keeps on the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Listener {
    Response(Phase),
    Gps,
    Ping,
    LocEst,
    Error,
}

impl Listener {
    pub fn kind(self) -> PacketKind {
        match self {
            Listener::Response(phase) => phase.response_kind(),
            Listener::Gps => PacketKind::Gps,
            Listener::Ping => PacketKind::Ping,
            Listener::LocEst => PacketKind::LocEst,
            Listener::Error => PacketKind::Error,
        }
    }

    /// Responses are consumed by their first delivery
    pub fn once(self) -> bool {
        matches!(self, Listener::Response(_))
    }
}

/// Work posted back to the session task from link and timer callbacks
#[derive(Debug)]
pub(crate) enum Inbound {
    Packet {
        epoch: u64,
        listener: Listener,
        payload: Payload,
    },
    Deadline {
        phase: Phase,
        request: RequestId,
    },
}

/// The session's view of the current link
///
/// `epoch` increases on every attach so packets queued by a previous link
/// can be recognised and dropped.
pub(crate) struct Link<C> {
    comms: Option<C>,
    epoch: u64,
    listeners: HashMap<Listener, HandlerId>,
    mailbox: mpsc::WeakUnboundedSender<SessionMsg>,
    events: EventSink,
}

impl<C: DroneComms> Link<C> {
    pub fn new(mailbox: mpsc::WeakUnboundedSender<SessionMsg>, events: EventSink) -> Self {
        Self {
            comms: None,
            epoch: 0,
            listeners: HashMap::new(),
            mailbox,
            events,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.comms.is_some()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn comms(&self) -> Result<&C, SessionError> {
        self.comms.as_ref().ok_or(SessionError::NotConnected)
    }

    pub fn attach(&mut self, comms: C) {
        self.epoch += 1;
        self.listeners.clear();
        self.comms = Some(comms);
    }

    /// Unregister every listener and close the link
    pub fn detach(&mut self) {
        let Some(comms) = self.comms.take() else {
            return;
        };
        for (listener, id) in self.listeners.drain() {
            comms.unregister(listener.kind(), id);
        }
        comms.close();
        info!("Link detached");
    }

    /// Register `listener`, replacing whatever held its packet kind
    pub fn arm(&mut self, listener: Listener) -> Result<(), SessionError> {
        let comms = self.comms.as_ref().ok_or(SessionError::NotConnected)?;
        let epoch = self.epoch;
        let mailbox = self.mailbox.clone();
        let handler: PacketHandler = Arc::new(move |payload: &Payload| {
            post(
                &mailbox,
                Inbound::Packet {
                    epoch,
                    listener,
                    payload: payload.clone(),
                },
            );
        });

        let id = comms.register(listener.kind(), handler, listener.once());
        // One registry slot per kind
        self.listeners.retain(|l, _| l.kind() != listener.kind());
        self.listeners.insert(listener, id);
        Ok(())
    }

    /// Arm `listener` unless it already holds its slot
    pub fn ensure_armed(&mut self, listener: Listener) -> Result<(), SessionError> {
        if self.listeners.contains_key(&listener) {
            return Ok(());
        }
        self.arm(listener)
    }

    pub fn disarm(&mut self, listener: Listener) -> bool {
        match (self.listeners.remove(&listener), self.comms.as_ref()) {
            (Some(id), Some(comms)) => comms.unregister(listener.kind(), id),
            _ => false,
        }
    }

    /// Drop bookkeeping for a one-shot listener that has fired
    pub fn forget(&mut self, listener: Listener) {
        self.listeners.remove(&listener);
    }

    pub fn notify(&self, event: SessionEvent) {
        self.events.emit(event);
    }

    pub fn mailbox(&self) -> mpsc::WeakUnboundedSender<SessionMsg> {
        self.mailbox.clone()
    }
}

pub(crate) fn post(mailbox: &mpsc::WeakUnboundedSender<SessionMsg>, inbound: Inbound) {
    match mailbox.upgrade() {
        Some(tx) => {
            let _ = tx.send(SessionMsg::Inbound(inbound));
        }
        None => debug!("Session gone, dropping {inbound:?}"),
    }
}

/// Drives one phase's request through to its outcome
#[derive(Debug)]
pub struct PhaseOrchestrator {
    phase: Phase,
    pending: Option<PendingRequest>,
}

impl PhaseOrchestrator {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            pending: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(PendingRequest::is_pending)
    }

    /// Issue `request`
    ///
    /// On a send failure the listener is disarmed and no state change or
    /// deadline happens.
    pub(crate) fn begin<C: DroneComms>(
        &mut self,
        machine: &mut StateMachine<Link<C>>,
        link: &mut Link<C>,
        timer: &TimerService,
        timing: &AckTiming,
        id: RequestId,
        request: Request,
    ) -> Result<(), SessionError> {
        let phase = self.phase;
        let entry = phase.entry(machine.current());
        machine.check(&entry)?;

        let listener = Listener::Response(phase);
        link.arm(listener)?;

        let packet_id = match link.comms()?.send(request) {
            Ok(packet_id) => packet_id,
            Err(e) => {
                link.disarm(listener);
                warn!("Failed to send {phase} request: {e}");
                return Err(SessionError::Transport(e));
            }
        };

        if let Some(waiting) = phase.waiting_state() {
            // The state is committed even if the entry handler fails
            if let Err(e) = machine.transition_to(link, waiting, Some(&entry)) {
                warn!("Entering {waiting}: {e}");
            }
        }

        let mailbox = link.mailbox();
        let deadline = timer.schedule(timing.deadline(), move || {
            post(&mailbox, Inbound::Deadline { phase, request: id });
        });

        info!(
            packet_id,
            deadline = ?timing.deadline(),
            "Sent {phase} request"
        );
        self.pending = Some(PendingRequest::new(id, phase, packet_id, entry, deadline));
        Ok(())
    }

    /// Settle with the drone's response; `None` if nothing was pending
    pub(crate) fn resolve(&mut self, success: bool) -> Option<PendingRequest> {
        self.settle_if(Outcome::Resolved { success }, |_| true)
    }

    /// Settle by deadline, only if `id` is still the live request
    pub(crate) fn expire(&mut self, id: RequestId) -> Option<PendingRequest> {
        self.settle_if(Outcome::TimedOut, |pending| pending.id() == id)
    }

    /// Withdraw the live request and its listener
    pub(crate) fn cancel<C: DroneComms>(&mut self, link: &mut Link<C>) -> bool {
        let cancelled = self.settle_if(Outcome::Cancelled, |_| true).is_some();
        if cancelled {
            link.disarm(Listener::Response(self.phase));
        }
        cancelled
    }

    /// Drop the live request without touching the link
    pub(crate) fn abandon(&mut self) -> bool {
        self.settle_if(Outcome::Cancelled, |_| true).is_some()
    }

    fn settle_if(
        &mut self,
        outcome: Outcome,
        matches: impl FnOnce(&PendingRequest) -> bool,
    ) -> Option<PendingRequest> {
        let pending = self.pending.as_mut()?;
        if matches(pending) && pending.settle(outcome) {
            self.pending.take()
        } else {
            None
        }
    }
}
