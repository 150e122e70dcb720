//! Lifecycle facade
//!
//! One task owns the state machine, the link and the phase orchestrators.
//! Operator commands, inbound packets and deadlines all arrive through a
//! single mailbox and are handled one at a time, so a response, its deadline
//! and a cancellation can never interleave.

use std::sync::Arc;

use rtt_shared::{now_ms, Payload, SyncRequest};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::events::{EventReceiver, EventSink, SessionEvent};
use super::machine::StateMachine;
use super::orchestrator::{Inbound, Link, Listener, PhaseOrchestrator};
use super::pending::RequestId;
use super::timer::TimerService;
use super::{LifecycleState, Phase, PingFinderSettings, SessionError, StateTransition};
use crate::comms::{CommsConnector, Request};
use crate::config::{AckTiming, RadioConfig};
use crate::telemetry::{GpsFix, LocationEstimate, PingDetection, TelemetryStore};

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

pub(crate) enum SessionMsg {
    Command(Command),
    Inbound(Inbound),
}

pub(crate) enum Command {
    Connect {
        radio: RadioConfig,
        timing: AckTiming,
        reply: Reply<()>,
    },
    CancelConnect {
        reply: Reply<bool>,
    },
    Send {
        request: PhaseRequest,
        reply: Reply<()>,
    },
    Cancel {
        phase: Phase,
        reply: Reply<bool>,
    },
    State {
        reply: oneshot::Sender<LifecycleState>,
    },
    Shutdown,
}

/// Operator requests issued over an open link
pub(crate) enum PhaseRequest {
    Config(PingFinderSettings),
    Start,
    Stop,
    Disconnect,
}

impl PhaseRequest {
    fn phase(&self) -> Phase {
        match self {
            PhaseRequest::Config(_) => Phase::Config,
            PhaseRequest::Start => Phase::Start,
            PhaseRequest::Stop => Phase::Stop,
            PhaseRequest::Disconnect => Phase::Disconnect,
        }
    }
}

/// Cloneable handle to a running session
///
/// Every `send_*` call returns once the request is on the wire; the drone's
/// answer arrives later as a [`SessionEvent`].
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionMsg>,
    telemetry: Arc<TelemetryStore>,
}

impl SessionHandle {
    /// Open the link and send the sync request
    pub async fn connect(&self, radio: RadioConfig, timing: AckTiming) -> Result<(), SessionError> {
        self.request(|reply| Command::Connect {
            radio,
            timing,
            reply,
        })
        .await
    }

    /// Abandon a connection attempt still waiting for its sync response, or
    /// drop the link left open after the drone rejected a request
    pub async fn cancel_connect(&self) -> Result<bool, SessionError> {
        self.request(|reply| Command::CancelConnect { reply }).await
    }

    pub async fn send_config(&self, settings: PingFinderSettings) -> Result<(), SessionError> {
        self.send(PhaseRequest::Config(settings)).await
    }

    pub async fn cancel_config(&self) -> Result<bool, SessionError> {
        self.cancel(Phase::Config).await
    }

    pub async fn send_start(&self) -> Result<(), SessionError> {
        self.send(PhaseRequest::Start).await
    }

    pub async fn cancel_start(&self) -> Result<bool, SessionError> {
        self.cancel(Phase::Start).await
    }

    pub async fn send_stop(&self) -> Result<(), SessionError> {
        self.send(PhaseRequest::Stop).await
    }

    pub async fn cancel_stop(&self) -> Result<bool, SessionError> {
        self.cancel(Phase::Stop).await
    }

    /// Stop the drone and close the link
    ///
    /// Preempts any other in-flight request. If the drone does not answer the
    /// link is torn down anyway once the deadline passes.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.send(PhaseRequest::Disconnect).await
    }

    pub async fn state(&self) -> Result<LifecycleState, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.post(Command::State { reply })?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub fn telemetry(&self) -> Arc<TelemetryStore> {
        self.telemetry.clone()
    }

    /// Stop the session task, closing any open link
    pub fn shutdown(&self) {
        let _ = self.post(Command::Shutdown);
    }

    async fn send(&self, request: PhaseRequest) -> Result<(), SessionError> {
        self.request(|reply| Command::Send { request, reply }).await
    }

    async fn cancel(&self, phase: Phase) -> Result<bool, SessionError> {
        self.request(|reply| Command::Cancel { phase, reply }).await
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.post(build(reply))?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    fn post(&self, command: Command) -> Result<(), SessionError> {
        self.tx
            .send(SessionMsg::Command(command))
            .map_err(|_| SessionError::Closed)
    }
}

/// The session task
pub struct Lifecycle<K: CommsConnector> {
    connector: K,
    machine: StateMachine<Link<K::Comms>>,
    link: Link<K::Comms>,
    orchestrators: [PhaseOrchestrator; 5],
    timer: TimerService,
    timing: AckTiming,
    telemetry: Arc<TelemetryStore>,
    next_request: u64,
}

impl<K: CommsConnector> Lifecycle<K> {
    /// Start a session task that opens links through `connector`
    ///
    /// Must be called from within a tokio runtime. The task exits on
    /// [`SessionHandle::shutdown`] or once every handle is dropped.
    pub fn spawn(connector: K) -> (SessionHandle, EventReceiver) {
        let (events, event_rx) = EventSink::channel();
        let (tx, rx) = mpsc::unbounded_channel();
        let telemetry = Arc::new(TelemetryStore::new());

        let mut machine = StateMachine::new(events.clone());
        Self::install_handlers(&mut machine);

        let lifecycle = Self {
            connector,
            machine,
            link: Link::new(tx.downgrade(), events),
            orchestrators: Phase::ALL.map(PhaseOrchestrator::new),
            timer: TimerService::new(),
            timing: AckTiming::default(),
            telemetry: telemetry.clone(),
            next_request: 0,
        };
        tokio::spawn(lifecycle.run(rx));

        (SessionHandle { tx, telemetry }, event_rx)
    }

    fn install_handlers(machine: &mut StateMachine<Link<K::Comms>>) {
        for phase in Phase::ALL {
            let Some(waiting) = phase.waiting_state() else {
                continue;
            };

            machine.register_transition_handler(waiting, move |link: &mut Link<K::Comms>| {
                Ok(link.ensure_armed(Listener::Response(phase))?)
            });
            machine.register_timeout_handler(waiting, move |link: &mut Link<K::Comms>| {
                warn!("No {phase} response from drone, holding in {waiting}");
                link.notify(SessionEvent::TimedOut { phase });
            });
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionMsg>) {
        info!(connector = self.connector.name(), "Session started");

        while let Some(msg) = rx.recv().await {
            match msg {
                SessionMsg::Command(Command::Shutdown) => break,
                SessionMsg::Command(command) => self.handle_command(command).await,
                SessionMsg::Inbound(inbound) => self.handle_inbound(inbound).await,
            }
        }

        self.abandon_all();
        self.link.detach();
        info!("Session stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                radio,
                timing,
                reply,
            } => {
                let result = self.connect(radio, timing).await;
                let _ = reply.send(result);
            }
            Command::CancelConnect { reply } => {
                let _ = reply.send(self.cancel_connect());
            }
            Command::Send { request, reply } => {
                let _ = reply.send(self.send(request));
            }
            Command::Cancel { phase, reply } => {
                let _ = reply.send(self.cancel(phase));
            }
            Command::State { reply } => {
                let _ = reply.send(self.machine.current());
            }
            Command::Shutdown => {}
        }
    }

    async fn connect(&mut self, radio: RadioConfig, timing: AckTiming) -> Result<(), SessionError> {
        let result = self.open_and_sync(radio, timing).await;
        if let Err(e) = &result {
            warn!("Connect failed: {e}");
            self.link.notify(SessionEvent::Failed {
                phase: Phase::Sync,
                message: e.to_string(),
            });
        }
        result
    }

    async fn open_and_sync(&mut self, radio: RadioConfig, timing: AckTiming) -> Result<(), SessionError> {
        let recovering = self.machine.current() == LifecycleState::Error;
        if self.link.is_connected() && !recovering {
            return Err(SessionError::AlreadyConnected);
        }
        self.ensure_idle()?;
        self.machine.check(&Phase::Sync.entry(self.machine.current()))?;

        if self.link.is_connected() {
            info!("Replacing link left open in {}", LifecycleState::Error);
            self.link.detach();
        }

        info!(
            endpoint = %radio.endpoint(),
            connector = self.connector.name(),
            "Connecting to drone"
        );
        let comms = self.connector.connect(&radio, &timing).await?;
        self.timing = timing;
        self.link.attach(comms);

        let request = Request::Sync(SyncRequest::new(timing.ack_timeout_ms(), timing.max_retries()));
        if let Err(e) = self
            .link
            .arm(Listener::Error)
            .and_then(|()| self.begin(Phase::Sync, request))
        {
            self.link.detach();
            return Err(e);
        }
        Ok(())
    }

    fn cancel_connect(&mut self) -> Result<bool, SessionError> {
        let current = self.machine.current();
        let cancellable = matches!(
            current,
            LifecycleState::RadioConfigWaiting | LifecycleState::Error
        );
        if !self.link.is_connected() || !cancellable {
            return Ok(false);
        }

        for orchestrator in self.orchestrators.iter_mut() {
            orchestrator.cancel(&mut self.link);
        }
        self.link.detach();
        self.enter(LifecycleState::RadioConfigInput, None);
        info!("Connection cancelled from {current}");
        Ok(true)
    }

    fn send(&mut self, request: PhaseRequest) -> Result<(), SessionError> {
        let phase = request.phase();
        let result = self.issue(request);

        if let Err(e) = &result {
            warn!("{phase} request rejected: {e}");
            self.link.notify(SessionEvent::Failed {
                phase,
                message: e.to_string(),
            });
            if phase == Phase::Disconnect && matches!(e, SessionError::Transport(_)) {
                warn!("Forcing cleanup after failed disconnect");
                self.cleanup();
            }
        }
        result
    }

    fn issue(&mut self, request: PhaseRequest) -> Result<(), SessionError> {
        self.link.comms()?;

        let phase = request.phase();
        let wire = match request {
            PhaseRequest::Config(settings) => {
                settings.validate()?;
                Request::Config(settings.to_request(run_number()))
            }
            PhaseRequest::Start => Request::Start,
            PhaseRequest::Stop | PhaseRequest::Disconnect => Request::Stop,
        };

        if phase == Phase::Disconnect {
            if self.orchestrators[phase.index()].is_pending() {
                return Err(SessionError::Busy { phase });
            }
            for orchestrator in self.orchestrators.iter_mut() {
                if orchestrator.cancel(&mut self.link) {
                    info!("Disconnect preempts pending {} request", orchestrator.phase());
                }
            }
        } else {
            self.ensure_idle()?;
        }

        self.begin(phase, wire)
    }

    fn cancel(&mut self, phase: Phase) -> Result<bool, SessionError> {
        if !self.link.is_connected() {
            self.link.notify(SessionEvent::Failed {
                phase,
                message: SessionError::NotConnected.to_string(),
            });
            return Err(SessionError::NotConnected);
        }

        let cancelled = self.orchestrators[phase.index()].cancel(&mut self.link);
        if cancelled {
            info!("Cancelled {phase} request");
        } else {
            debug!("No {phase} request to cancel");
        }
        Ok(cancelled)
    }

    fn begin(&mut self, phase: Phase, request: Request) -> Result<(), SessionError> {
        self.next_request += 1;
        let id = RequestId(self.next_request);
        self.orchestrators[phase.index()].begin(
            &mut self.machine,
            &mut self.link,
            &self.timer,
            &self.timing,
            id,
            request,
        )
    }

    fn ensure_idle(&self) -> Result<(), SessionError> {
        match self.orchestrators.iter().find(|o| o.is_pending()) {
            Some(o) => Err(SessionError::Busy { phase: o.phase() }),
            None => Ok(()),
        }
    }

    async fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Packet {
                epoch,
                listener,
                payload,
            } => {
                if epoch != self.link.epoch() || !self.link.is_connected() {
                    debug!(epoch, "Dropping {} from a closed link", payload.kind());
                    return;
                }
                self.on_packet(listener, payload).await;
            }
            Inbound::Deadline { phase, request } => self.on_deadline(phase, request),
        }
    }

    async fn on_packet(&mut self, listener: Listener, payload: Payload) {
        let received_ms = now_ms();
        match (listener, payload) {
            (Listener::Response(phase), payload) => {
                self.link.forget(listener);
                self.on_response(phase, &payload);
            }
            (Listener::Gps, Payload::Gps(gps)) => {
                let fix = GpsFix::from_packet(&gps, received_ms);
                self.telemetry.update_position(fix.clone()).await;
                self.link.notify(SessionEvent::Position(fix));
            }
            (Listener::Ping, Payload::Ping(ping)) => {
                let ping = PingDetection::from_packet(&ping, received_ms);
                self.telemetry.add_ping(ping.clone()).await;
                self.link.notify(SessionEvent::Ping(ping));
            }
            (Listener::LocEst, Payload::LocEst(est)) => {
                let est = LocationEstimate::from_packet(&est, received_ms);
                self.telemetry.update_estimate(est.clone()).await;
                self.link.notify(SessionEvent::LocationEstimate(est));
            }
            (Listener::Error, Payload::Error(report)) => self.on_fatal(report.message),
            (listener, payload) => {
                warn!("Unexpected {} delivered to {listener:?} listener", payload.kind());
            }
        }
    }

    fn on_response(&mut self, phase: Phase, payload: &Payload) {
        let Some(success) = payload.response_success() else {
            warn!("{} is not a {phase} response", payload.kind());
            return;
        };
        let Some(pending) = self.orchestrators[phase.index()].resolve(success) else {
            debug!("Ignoring late {phase} response");
            return;
        };
        let completion = pending.completion();

        if !success {
            warn!(packet_id = pending.packet_id(), "Drone rejected {phase} request");
            self.link.notify(SessionEvent::Failed {
                phase,
                message: completion.failure_message,
            });
            self.enter(LifecycleState::Error, None);
            return;
        }

        info!(packet_id = pending.packet_id(), "{}", completion.success_message);
        self.link.notify(SessionEvent::Succeeded {
            phase,
            message: completion.success_message.clone(),
        });

        let armed = match phase {
            Phase::Sync => self.link.arm(Listener::Gps),
            Phase::Config => Ok(()),
            Phase::Start => self
                .link
                .arm(Listener::Ping)
                .and_then(|()| self.link.arm(Listener::LocEst)),
            Phase::Stop => {
                self.link.disarm(Listener::Ping);
                self.link.disarm(Listener::LocEst);
                Ok(())
            }
            Phase::Disconnect => {
                self.cleanup();
                return;
            }
        };
        if let Err(e) = armed {
            warn!("Arming telemetry listeners after {phase}: {e}");
        }

        self.enter(completion.to, Some(&completion));
    }

    fn on_deadline(&mut self, phase: Phase, request: RequestId) {
        let Some(pending) = self.orchestrators[phase.index()].expire(request) else {
            debug!(?request, "Ignoring deadline of a settled {phase} request");
            return;
        };
        debug!(
            packet_id = pending.packet_id(),
            deadline = ?self.timing.deadline(),
            "{phase} deadline elapsed"
        );
        self.link.disarm(Listener::Response(phase));

        match phase.waiting_state() {
            Some(waiting) => {
                if !self.machine.handle_timeout(&mut self.link, waiting) {
                    self.link.notify(SessionEvent::TimedOut { phase });
                }
            }
            None => {
                warn!("No disconnect response from drone, forcing cleanup");
                self.link.notify(SessionEvent::Failed {
                    phase,
                    message: "No response to disconnect request, link closed anyway.".into(),
                });
                self.cleanup();
            }
        }
    }

    fn on_fatal(&mut self, message: String) {
        error!("Fatal error on drone link: {message}");
        self.link.notify(SessionEvent::FatalError { message });
        self.abandon_all();
        self.link.detach();
        self.enter(LifecycleState::Disconnected, None);
    }

    /// Drop every listener and the link, returning to radio configuration
    fn cleanup(&mut self) {
        self.abandon_all();
        self.link.detach();
        self.enter(LifecycleState::RadioConfigInput, None);
    }

    fn abandon_all(&mut self) {
        for orchestrator in self.orchestrators.iter_mut() {
            if orchestrator.abandon() {
                debug!("Abandoned pending {} request", orchestrator.phase());
            }
        }
    }

    fn enter(&mut self, state: LifecycleState, transition: Option<&StateTransition>) {
        // Failures are already published by the machine
        if let Err(e) = self.machine.transition_to(&mut self.link, state, transition) {
            debug!("Transition to {state}: {e}");
        }
    }
}

/// Run number sent with each configuration, seconds since the Unix epoch
fn run_number() -> u32 {
    u32::try_from(now_ms() / 1000).unwrap_or(u32::MAX)
}
