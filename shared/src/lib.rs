//! Radio Telemetry Tracker Shared Packet Types
//!
//! This crate provides the packet definitions and framing codec used on the
//! link between the ground control station and the tracking drone.

pub mod codec;
pub mod packets;

use std::time::{SystemTime, UNIX_EPOCH};

// Re-export commonly used types at crate root
pub use packets::*;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Link parameters shared by both ends
pub mod link {
    /// Default per-attempt acknowledgment timeout in seconds
    pub const DEFAULT_ACK_TIMEOUT_SECS: f64 = 2.0;

    /// Default number of attempts per packet
    pub const DEFAULT_MAX_RETRIES: u32 = 5;

    /// Upper bound accepted for the attempt count
    pub const MAX_RETRIES_LIMIT: u32 = 100;

    /// Default TCP port of the drone-side radio bridge
    pub const DEFAULT_TCP_PORT: u16 = 9000;
}

impl SyncRequest {
    /// Build a sync request advertising the ground station's ack parameters
    pub fn new(ack_timeout_ms: u32, max_retries: u32) -> Self {
        Self {
            ack_timeout_ms,
            max_retries,
        }
    }
}

impl ErrorReport {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_header() {
        let env = Envelope::new(42, Payload::StartRequest(StartRequest {}));
        let header = env.header.as_ref().expect("header");
        assert_eq!(header.packet_id, 42);
        assert!(header.timestamp_ms > 0);
    }

    #[test]
    fn test_sync_request_creation() {
        let req = SyncRequest::new(2000, link::DEFAULT_MAX_RETRIES);
        assert_eq!(req.ack_timeout_ms, 2000);
        assert_eq!(req.max_retries, 5);
    }
}
