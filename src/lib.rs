//! Ground control station for a radio telemetry tracking drone
//!
//! Drives the drone through its session lifecycle (sync, configure, start,
//! stop, disconnect) over a serial or TCP radio link and collects the
//! position, ping and location-estimate telemetry it streams back.

pub mod comms;
pub mod config;
pub mod console;
pub mod session;
pub mod telemetry;
