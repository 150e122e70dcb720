//! Drone telemetry received during a session
//!
//! Positions stay in the UTM coordinates the drone reports; conversion for
//! display is left to the operator interface.

mod store;

use rtt_shared::{Gps, LocEst, Ping};
use serde::Serialize;

pub use store::TelemetryStore;

/// Latest drone position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpsFix {
    pub easting: f64,
    pub northing: f64,
    pub altitude: f64,
    pub heading: f64,
    pub epsg_code: u32,
    /// Receipt time, ms since the Unix epoch
    pub received_ms: u64,
}

impl GpsFix {
    pub fn from_packet(gps: &Gps, received_ms: u64) -> Self {
        Self {
            easting: gps.easting,
            northing: gps.northing,
            altitude: gps.altitude,
            heading: gps.heading,
            epsg_code: gps.epsg_code,
            received_ms,
        }
    }
}

/// A ping heard by the drone, tagged with where it was heard
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PingDetection {
    pub frequency: u32,
    pub amplitude: f64,
    pub easting: f64,
    pub northing: f64,
    pub altitude: f64,
    pub epsg_code: u32,
    pub received_ms: u64,
}

impl PingDetection {
    pub fn from_packet(ping: &Ping, received_ms: u64) -> Self {
        Self {
            frequency: ping.frequency,
            amplitude: ping.amplitude,
            easting: ping.easting,
            northing: ping.northing,
            altitude: ping.altitude,
            epsg_code: ping.epsg_code,
            received_ms,
        }
    }
}

/// The drone's current estimate of a transmitter's position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationEstimate {
    pub frequency: u32,
    pub easting: f64,
    pub northing: f64,
    pub epsg_code: u32,
    pub received_ms: u64,
}

impl LocationEstimate {
    pub fn from_packet(est: &LocEst, received_ms: u64) -> Self {
        Self {
            frequency: est.frequency,
            easting: est.easting,
            northing: est.northing,
            epsg_code: est.epsg_code,
            received_ms,
        }
    }
}
