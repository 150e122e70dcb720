//! Single-slot packet handler registry

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rtt_shared::{PacketKind, Payload};
use tracing::trace;

use super::{HandlerId, PacketHandler};

struct Slot {
    id: HandlerId,
    once: bool,
    handler: PacketHandler,
}

/// Maps each packet kind to at most one handler
#[derive(Default)]
pub struct HandlerRegistry {
    slots: Mutex<HashMap<PacketKind, Slot>>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<PacketKind, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `handler` for `kind`, replacing any existing one
    pub fn register(&self, kind: PacketKind, handler: PacketHandler, once: bool) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let replaced = self
            .slots()
            .insert(kind, Slot { id, once, handler })
            .is_some();
        trace!(%kind, ?id, once, replaced, "Handler registered");
        id
    }

    pub fn unregister(&self, kind: PacketKind, id: HandlerId) -> bool {
        let mut slots = self.slots();
        match slots.get(&kind) {
            Some(slot) if slot.id == id => {
                slots.remove(&kind);
                trace!(%kind, ?id, "Handler unregistered");
                true
            }
            _ => false,
        }
    }

    pub fn is_registered(&self, kind: PacketKind) -> bool {
        self.slots().contains_key(&kind)
    }

    /// Hand `payload` to the handler for its kind
    ///
    /// The handler runs outside the lock so it may register or unregister.
    /// Returns false when nothing was registered.
    pub fn dispatch(&self, payload: &Payload) -> bool {
        let kind = payload.kind();
        let handler = {
            let mut slots = self.slots();
            match slots.get(&kind) {
                Some(slot) if slot.once => slots.remove(&kind).map(|slot| slot.handler),
                Some(slot) => Some(slot.handler.clone()),
                None => None,
            }
        };

        match handler {
            Some(handler) => {
                handler(payload);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        self.slots().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtt_shared::{Gps, StopResponse};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, PacketHandler) {
        let count = Arc::new(AtomicUsize::new(0));
        let handler_count = count.clone();
        let handler: PacketHandler = Arc::new(move |_: &Payload| {
            handler_count.fetch_add(1, Ordering::SeqCst);
        });
        (count, handler)
    }

    #[test]
    fn test_once_handler_fires_once() {
        let registry = HandlerRegistry::new();
        let (count, handler) = counter();
        registry.register(PacketKind::StopResponse, handler, true);

        let payload = Payload::StopResponse(StopResponse { success: true });
        assert!(registry.dispatch(&payload));
        assert!(!registry.dispatch(&payload));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_persistent_handler_and_replacement() {
        let registry = HandlerRegistry::new();
        let (first, first_handler) = counter();
        let (second, second_handler) = counter();

        let first_id = registry.register(PacketKind::Gps, first_handler, false);
        registry.dispatch(&Payload::Gps(Gps::default()));
        registry.dispatch(&Payload::Gps(Gps::default()));

        registry.register(PacketKind::Gps, second_handler, false);
        registry.dispatch(&Payload::Gps(Gps::default()));

        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        // The stale id no longer owns the slot
        assert!(!registry.unregister(PacketKind::Gps, first_id));
        assert!(registry.is_registered(PacketKind::Gps));
    }

    #[test]
    fn test_handler_may_reenter_registry() {
        let registry = Arc::new(HandlerRegistry::new());
        let inner = registry.clone();
        let handler: PacketHandler = Arc::new(move |_: &Payload| {
            inner.clear();
        });
        registry.register(PacketKind::Gps, handler, false);

        assert!(registry.dispatch(&Payload::Gps(Gps::default())));
        assert!(!registry.is_registered(PacketKind::Gps));
    }
}
