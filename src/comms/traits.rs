//! Comms abstraction for pluggable radio backends

use std::sync::Arc;

use async_trait::async_trait;
use rtt_shared::{ConfigRequest, PacketKind, Payload, StartRequest, StopRequest, SyncRequest};

use super::CommsError;
use crate::config::{AckTiming, RadioConfig};

/// Callback invoked with each inbound payload of the registered kind
pub type PacketHandler = Arc<dyn Fn(&Payload) + Send + Sync>;

/// Identifies one registration so a stale unregister cannot remove a newer one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub(crate) u64);

/// Outbound requests the ground station issues
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Sync(SyncRequest),
    Config(ConfigRequest),
    Start,
    Stop,
}

impl Request {
    pub fn kind(&self) -> PacketKind {
        match self {
            Request::Sync(_) => PacketKind::SyncRequest,
            Request::Config(_) => PacketKind::ConfigRequest,
            Request::Start => PacketKind::StartRequest,
            Request::Stop => PacketKind::StopRequest,
        }
    }

    pub fn into_payload(self) -> Payload {
        match self {
            Request::Sync(req) => Payload::SyncRequest(req),
            Request::Config(req) => Payload::ConfigRequest(req),
            Request::Start => Payload::StartRequest(StartRequest {}),
            Request::Stop => Payload::StopRequest(StopRequest {}),
        }
    }
}

/// An open link to the drone
///
/// Registration is single-slot per packet kind: registering again for a kind
/// replaces the previous handler. `once` handlers are removed before they run.
pub trait DroneComms: Send + Sync + 'static {
    /// Queue a request, returning its packet id
    fn send(&self, request: Request) -> Result<u32, CommsError>;

    fn register(&self, kind: PacketKind, handler: PacketHandler, once: bool) -> HandlerId;

    /// Remove the handler for `kind` if it is still the one identified by `id`
    fn unregister(&self, kind: PacketKind, id: HandlerId) -> bool;

    /// Stop all link activity; later sends fail with [`CommsError::Closed`]
    fn close(&self);
}

/// Factory for opening links
#[async_trait]
pub trait CommsConnector: Send + Sync + 'static {
    /// The link type this connector produces
    type Comms: DroneComms;

    /// Open a link described by `radio`
    async fn connect(&self, radio: &RadioConfig, timing: &AckTiming)
        -> Result<Self::Comms, CommsError>;

    /// Human-readable name for this connector
    fn name(&self) -> &'static str;
}
