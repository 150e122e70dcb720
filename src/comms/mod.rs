//! Drone communications
//!
//! This module handles:
//! - The request and handler-registration contract the session relies on
//! - Single-slot handler registration per packet kind
//! - A framed radio link over a serial port or TCP

mod error;
mod radio;
mod registry;
mod traits;

#[cfg(test)]
pub(crate) mod fake;

pub use error::CommsError;
pub use radio::{RadioComms, RadioConnector};
pub use registry::HandlerRegistry;
pub use traits::{CommsConnector, DroneComms, HandlerId, PacketHandler, Request};
