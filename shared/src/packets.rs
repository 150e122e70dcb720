//! Packet definitions for the ground station <-> drone link
//!
//! Messages are declared directly with `prost` derives so the crate builds
//! without a protobuf toolchain. Field tags are part of the wire contract with
//! the drone firmware and must not be renumbered.

use prost::Message;

/// Common header carried by every envelope
#[derive(Clone, PartialEq, Message)]
pub struct Header {
    #[prost(uint32, tag = "1")]
    pub packet_id: u32,
    #[prost(uint64, tag = "2")]
    pub timestamp_ms: u64,
}

/// Radio sync request, the first packet of a session
#[derive(Clone, PartialEq, Message)]
pub struct SyncRequest {
    /// Per-attempt acknowledgment timeout the ground station uses
    #[prost(uint32, tag = "1")]
    pub ack_timeout_ms: u32,
    /// Attempts before the ground station gives up on a packet
    #[prost(uint32, tag = "2")]
    pub max_retries: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct SyncResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
}

/// Ping finder configuration
#[derive(Clone, PartialEq, Message)]
pub struct ConfigRequest {
    #[prost(double, tag = "1")]
    pub gain: f64,
    #[prost(uint32, tag = "2")]
    pub sampling_rate: u32,
    #[prost(uint32, tag = "3")]
    pub center_frequency: u32,
    #[prost(uint32, tag = "4")]
    pub run_num: u32,
    #[prost(bool, tag = "5")]
    pub enable_test_data: bool,
    #[prost(uint32, tag = "6")]
    pub ping_width_ms: u32,
    #[prost(uint32, tag = "7")]
    pub ping_min_snr: u32,
    #[prost(double, tag = "8")]
    pub ping_max_len_mult: f64,
    #[prost(double, tag = "9")]
    pub ping_min_len_mult: f64,
    #[prost(uint32, repeated, tag = "10")]
    pub target_frequencies: Vec<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ConfigResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct StartRequest {}

#[derive(Clone, PartialEq, Message)]
pub struct StartResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct StopRequest {}

#[derive(Clone, PartialEq, Message)]
pub struct StopResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
}

/// Drone position in UTM coordinates
#[derive(Clone, PartialEq, Message)]
pub struct Gps {
    #[prost(double, tag = "1")]
    pub easting: f64,
    #[prost(double, tag = "2")]
    pub northing: f64,
    #[prost(double, tag = "3")]
    pub altitude: f64,
    #[prost(double, tag = "4")]
    pub heading: f64,
    #[prost(uint32, tag = "5")]
    pub epsg_code: u32,
}

/// A single detected transmitter ping
#[derive(Clone, PartialEq, Message)]
pub struct Ping {
    #[prost(uint32, tag = "1")]
    pub frequency: u32,
    #[prost(double, tag = "2")]
    pub amplitude: f64,
    #[prost(double, tag = "3")]
    pub easting: f64,
    #[prost(double, tag = "4")]
    pub northing: f64,
    #[prost(double, tag = "5")]
    pub altitude: f64,
    #[prost(uint32, tag = "6")]
    pub epsg_code: u32,
}

/// Onboard estimate of a transmitter's location
#[derive(Clone, PartialEq, Message)]
pub struct LocEst {
    #[prost(uint32, tag = "1")]
    pub frequency: u32,
    #[prost(double, tag = "2")]
    pub easting: f64,
    #[prost(double, tag = "3")]
    pub northing: f64,
    #[prost(uint32, tag = "4")]
    pub epsg_code: u32,
}

/// Unrecoverable condition reported by the drone (or by the local link)
#[derive(Clone, PartialEq, Message)]
pub struct ErrorReport {
    #[prost(string, tag = "1")]
    pub message: String,
}

/// Top-level frame body
#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    #[prost(message, optional, tag = "1")]
    pub header: Option<Header>,
    #[prost(
        oneof = "envelope::Payload",
        tags = "2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13"
    )]
    pub payload: Option<envelope::Payload>,
}

pub mod envelope {
    /// Packet body variants
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "2")]
        SyncRequest(super::SyncRequest),
        #[prost(message, tag = "3")]
        SyncResponse(super::SyncResponse),
        #[prost(message, tag = "4")]
        ConfigRequest(super::ConfigRequest),
        #[prost(message, tag = "5")]
        ConfigResponse(super::ConfigResponse),
        #[prost(message, tag = "6")]
        StartRequest(super::StartRequest),
        #[prost(message, tag = "7")]
        StartResponse(super::StartResponse),
        #[prost(message, tag = "8")]
        StopRequest(super::StopRequest),
        #[prost(message, tag = "9")]
        StopResponse(super::StopResponse),
        #[prost(message, tag = "10")]
        Gps(super::Gps),
        #[prost(message, tag = "11")]
        Ping(super::Ping),
        #[prost(message, tag = "12")]
        LocEst(super::LocEst),
        #[prost(message, tag = "13")]
        Error(super::ErrorReport),
    }
}

pub use envelope::Payload;

/// Discriminant of a payload, used to key handler registrations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    SyncRequest,
    SyncResponse,
    ConfigRequest,
    ConfigResponse,
    StartRequest,
    StartResponse,
    StopRequest,
    StopResponse,
    Gps,
    Ping,
    LocEst,
    Error,
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

impl Payload {
    /// Get the kind of this payload
    pub fn kind(&self) -> PacketKind {
        match self {
            Payload::SyncRequest(_) => PacketKind::SyncRequest,
            Payload::SyncResponse(_) => PacketKind::SyncResponse,
            Payload::ConfigRequest(_) => PacketKind::ConfigRequest,
            Payload::ConfigResponse(_) => PacketKind::ConfigResponse,
            Payload::StartRequest(_) => PacketKind::StartRequest,
            Payload::StartResponse(_) => PacketKind::StartResponse,
            Payload::StopRequest(_) => PacketKind::StopRequest,
            Payload::StopResponse(_) => PacketKind::StopResponse,
            Payload::Gps(_) => PacketKind::Gps,
            Payload::Ping(_) => PacketKind::Ping,
            Payload::LocEst(_) => PacketKind::LocEst,
            Payload::Error(_) => PacketKind::Error,
        }
    }

    /// The `success` flag of a response payload, `None` for anything else
    pub fn response_success(&self) -> Option<bool> {
        match self {
            Payload::SyncResponse(r) => Some(r.success),
            Payload::ConfigResponse(r) => Some(r.success),
            Payload::StartResponse(r) => Some(r.success),
            Payload::StopResponse(r) => Some(r.success),
            _ => None,
        }
    }
}

impl Envelope {
    /// Wrap a payload with a fresh header
    pub fn new(packet_id: u32, payload: Payload) -> Self {
        Self {
            header: Some(Header {
                packet_id,
                timestamp_ms: crate::now_ms(),
            }),
            payload: Some(payload),
        }
    }

    /// Packet id from the header, 0 when absent
    pub fn packet_id(&self) -> u32 {
        self.header.as_ref().map(|h| h.packet_id).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_kind() {
        let payload = Payload::StopResponse(StopResponse { success: true });
        assert_eq!(payload.kind(), PacketKind::StopResponse);
        assert_eq!(payload.response_success(), Some(true));

        let gps = Payload::Gps(Gps::default());
        assert_eq!(gps.kind(), PacketKind::Gps);
        assert_eq!(gps.response_success(), None);
    }

    #[test]
    fn test_config_request_wire_size() {
        let req = ConfigRequest {
            gain: 56.0,
            sampling_rate: 2_500_000,
            center_frequency: 173_500_000,
            target_frequencies: vec![173_043_000, 173_920_000],
            ..Default::default()
        };
        let env = Envelope::new(7, Payload::ConfigRequest(req.clone()));
        let bytes = env.encode_to_vec();
        let decoded = Envelope::decode(bytes.as_slice()).expect("decode failed");

        assert_eq!(decoded.packet_id(), 7);
        assert_eq!(decoded.payload, Some(Payload::ConfigRequest(req)));
    }
}
