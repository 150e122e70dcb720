//! In-memory link for exercising the session without a radio

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rtt_shared::{PacketKind, Payload};

use super::{CommsConnector, CommsError, DroneComms, HandlerId, HandlerRegistry, PacketHandler, Request};
use crate::config::{AckTiming, RadioConfig};

#[derive(Default)]
struct Log {
    sent: Vec<Request>,
    registered: Vec<(PacketKind, bool)>,
    unregistered: Vec<PacketKind>,
}

/// Records every call and lets tests deliver packets through the real registry
#[derive(Clone, Default)]
pub(crate) struct FakeComms {
    registry: Arc<HandlerRegistry>,
    log: Arc<Mutex<Log>>,
    fail_sends: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl FakeComms {
    pub fn deliver(&self, payload: Payload) -> bool {
        self.registry.dispatch(&payload)
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Request> {
        self.log.lock().unwrap().sent.clone()
    }

    pub fn registrations(&self, kind: PacketKind) -> usize {
        self.log.lock().unwrap().registered.iter().filter(|(k, _)| *k == kind).count()
    }

    pub fn unregistrations(&self, kind: PacketKind) -> usize {
        self.log.lock().unwrap().unregistered.iter().filter(|k| **k == kind).count()
    }

    pub fn has_handler(&self, kind: PacketKind) -> bool {
        self.registry.is_registered(kind)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl DroneComms for FakeComms {
    fn send(&self, request: Request) -> Result<u32, CommsError> {
        if self.is_closed() {
            return Err(CommsError::Closed);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(CommsError::QueueFull);
        }
        let mut log = self.log.lock().unwrap();
        log.sent.push(request);
        Ok(log.sent.len() as u32)
    }

    fn register(&self, kind: PacketKind, handler: PacketHandler, once: bool) -> HandlerId {
        self.log.lock().unwrap().registered.push((kind, once));
        self.registry.register(kind, handler, once)
    }

    fn unregister(&self, kind: PacketKind, id: HandlerId) -> bool {
        let removed = self.registry.unregister(kind, id);
        if removed {
            self.log.lock().unwrap().unregistered.push(kind);
        }
        removed
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.registry.clear();
    }
}

/// Hands out clones of one [`FakeComms`]
#[derive(Clone, Default)]
pub(crate) struct FakeConnector {
    pub comms: FakeComms,
    pub refuse: Arc<AtomicBool>,
}

impl FakeConnector {
    pub fn new(comms: FakeComms) -> Self {
        Self {
            comms,
            refuse: Arc::default(),
        }
    }
}

#[async_trait]
impl CommsConnector for FakeConnector {
    type Comms = FakeComms;

    async fn connect(&self, radio: &RadioConfig, _timing: &AckTiming) -> Result<FakeComms, CommsError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(CommsError::ConnectTimeout(radio.endpoint()));
        }
        self.comms.closed.store(false, Ordering::SeqCst);
        Ok(self.comms.clone())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}
