//! Simulated tracking drone
//!
//! Listens on TCP, answers every request the ground station sends and, once
//! synced, streams GPS fixes from a circular survey flight. While started it
//! also emits pings for each configured frequency and an amplitude-weighted
//! location estimate.

use std::collections::HashMap;
use std::time::Duration;

use rtt_shared::codec::{self, FrameDecoder};
use rtt_shared::{
    link, ConfigRequest, ConfigResponse, Envelope, Gps, LocEst, Payload, Ping, StartResponse,
    StopResponse, SyncResponse,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::interval;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// UTM zone 11N
const EPSG_CODE: u32 = 32611;
const CENTER: (f64, f64) = (478_000.0, 3_638_000.0);
const FLIGHT_RADIUS_M: f64 = 150.0;
const ALTITUDE_M: f64 = 30.0;
/// Degrees of orbit flown per GPS tick
const ORBIT_STEP_DEG: f64 = 6.0;

const GPS_PERIOD: Duration = Duration::from_secs(1);
const PING_PERIOD: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| format!("127.0.0.1:{}", link::DEFAULT_TCP_PORT));
    let listener = TcpListener::bind(&addr).await?;
    info!("Simulated drone listening on {addr}");

    loop {
        let (socket, peer) = listener.accept().await?;
        info!("Ground station connected: {peer}");

        tokio::spawn(async move {
            if let Err(e) = serve(socket).await {
                warn!("Session with {peer} ended: {e:#}");
            }
            info!("Ground station disconnected: {peer}");
        });
    }
}

async fn serve(socket: TcpStream) -> anyhow::Result<()> {
    socket.set_nodelay(true)?;
    let (mut reader, mut writer) = socket.into_split();
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; 4096];
    let mut drone = SimDrone::new();

    let mut gps_tick = interval(GPS_PERIOD);
    let mut ping_tick = interval(PING_PERIOD);

    loop {
        let outgoing = tokio::select! {
            read = reader.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    return Ok(());
                }
                decoder.extend(&buf[..n]);

                let mut replies = Vec::new();
                while let Some(envelope) = decoder.decode_next()? {
                    replies.extend(drone.handle(envelope));
                }
                replies
            }
            _ = gps_tick.tick(), if drone.synced => vec![drone.gps()],
            _ = ping_tick.tick(), if drone.running => drone.detections(),
        };

        for envelope in outgoing {
            writer.write_all(&codec::encode(&envelope)?).await?;
        }
    }
}

#[derive(Debug, Default)]
struct Estimate {
    weight: f64,
    easting: f64,
    northing: f64,
}

#[derive(Debug, Default)]
struct SimDrone {
    synced: bool,
    running: bool,
    config: Option<ConfigRequest>,
    orbit_deg: f64,
    next_packet_id: u32,
    estimates: HashMap<u32, Estimate>,
}

impl SimDrone {
    fn new() -> Self {
        Self::default()
    }

    fn envelope(&mut self, payload: Payload) -> Envelope {
        self.next_packet_id = self.next_packet_id.wrapping_add(1);
        Envelope::new(self.next_packet_id, payload)
    }

    /// Answer one request from the ground station
    fn handle(&mut self, envelope: Envelope) -> Option<Envelope> {
        let packet_id = envelope.packet_id();
        let payload = envelope.payload?;
        debug!(packet_id, "Received {}", payload.kind());

        let reply = match payload {
            Payload::SyncRequest(req) => {
                info!(
                    "Sync: ack timeout {}ms x {} attempts",
                    req.ack_timeout_ms, req.max_retries
                );
                self.synced = true;
                Payload::SyncResponse(SyncResponse { success: true })
            }
            Payload::ConfigRequest(req) => {
                let success = !req.target_frequencies.is_empty();
                if success {
                    info!(
                        run = req.run_num,
                        "Configured for {:?}", req.target_frequencies
                    );
                    self.estimates.clear();
                    self.config = Some(req);
                } else {
                    warn!("Rejecting config without target frequencies");
                }
                Payload::ConfigResponse(ConfigResponse { success })
            }
            Payload::StartRequest(_) => {
                let success = self.config.is_some();
                self.running = success;
                info!("Start: {success}");
                Payload::StartResponse(StartResponse { success })
            }
            Payload::StopRequest(_) => {
                self.running = false;
                info!("Stopped");
                Payload::StopResponse(StopResponse { success: true })
            }
            other => {
                warn!("Ignoring unexpected {}", other.kind());
                return None;
            }
        };

        Some(self.envelope(reply))
    }

    fn position(&self) -> (f64, f64) {
        let angle = self.orbit_deg.to_radians();
        (
            CENTER.0 + FLIGHT_RADIUS_M * angle.cos(),
            CENTER.1 + FLIGHT_RADIUS_M * angle.sin(),
        )
    }

    /// Advance along the orbit and report the new position
    fn gps(&mut self) -> Envelope {
        self.orbit_deg = (self.orbit_deg + ORBIT_STEP_DEG) % 360.0;
        let (easting, northing) = self.position();
        let gps = Gps {
            easting,
            northing,
            altitude: ALTITUDE_M,
            heading: (self.orbit_deg + 90.0) % 360.0,
            epsg_code: EPSG_CODE,
        };
        self.envelope(Payload::Gps(gps))
    }

    /// One ping per configured frequency plus the updated estimates
    fn detections(&mut self) -> Vec<Envelope> {
        let Some(frequencies) = self.config.as_ref().map(|c| c.target_frequencies.clone()) else {
            return Vec::new();
        };
        let (easting, northing) = self.position();

        let mut out = Vec::with_capacity(frequencies.len() * 2);
        for (i, frequency) in frequencies.into_iter().enumerate() {
            let (tx_e, tx_n) = transmitter(i);
            let distance = (easting - tx_e).hypot(northing - tx_n);
            let amplitude = 100.0 / (1.0 + distance / 50.0);

            let est = self.estimates.entry(frequency).or_default();
            est.weight += amplitude;
            est.easting += amplitude * easting;
            est.northing += amplitude * northing;
            let loc_est = LocEst {
                frequency,
                easting: est.easting / est.weight,
                northing: est.northing / est.weight,
                epsg_code: EPSG_CODE,
            };

            let ping = Ping {
                frequency,
                amplitude,
                easting,
                northing,
                altitude: ALTITUDE_M,
                epsg_code: EPSG_CODE,
            };
            out.push(self.envelope(Payload::Ping(ping)));
            out.push(self.envelope(Payload::LocEst(loc_est)));
        }
        out
    }
}

/// Hidden transmitter positions, one per configured frequency
fn transmitter(index: usize) -> (f64, f64) {
    let angle = (index as f64 * 137.5).to_radians();
    (
        CENTER.0 + 80.0 * angle.cos(),
        CENTER.1 + 80.0 * angle.sin(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtt_shared::{StartRequest, StopRequest, SyncRequest};

    fn request(payload: Payload) -> Envelope {
        Envelope::new(1, payload)
    }

    fn config(frequencies: Vec<u32>) -> Payload {
        Payload::ConfigRequest(ConfigRequest {
            target_frequencies: frequencies,
            ..Default::default()
        })
    }

    #[test]
    fn test_lifecycle_responses() {
        let mut drone = SimDrone::new();

        let reply = drone.handle(request(Payload::SyncRequest(SyncRequest::new(2000, 5))));
        assert_eq!(reply.and_then(|e| e.payload).and_then(|p| p.response_success()), Some(true));
        assert!(drone.synced);

        // Start before config is refused
        let reply = drone.handle(request(Payload::StartRequest(StartRequest {})));
        assert_eq!(reply.and_then(|e| e.payload).and_then(|p| p.response_success()), Some(false));

        let reply = drone.handle(request(config(vec![173_043_000])));
        assert_eq!(reply.and_then(|e| e.payload).and_then(|p| p.response_success()), Some(true));

        drone.handle(request(Payload::StartRequest(StartRequest {})));
        assert!(drone.running);

        drone.handle(request(Payload::StopRequest(StopRequest {})));
        assert!(!drone.running);
    }

    #[test]
    fn test_empty_config_rejected() {
        let mut drone = SimDrone::new();
        let reply = drone.handle(request(config(Vec::new())));
        assert_eq!(reply.and_then(|e| e.payload).and_then(|p| p.response_success()), Some(false));
        assert!(drone.config.is_none());
    }

    #[test]
    fn test_detections_per_frequency() {
        let mut drone = SimDrone::new();
        drone.handle(request(config(vec![173_043_000, 173_920_000])));

        let out = drone.detections();
        assert_eq!(out.len(), 4);
        assert!(matches!(out[0].payload, Some(Payload::Ping(ref p)) if p.frequency == 173_043_000));
        assert!(matches!(out[3].payload, Some(Payload::LocEst(ref e)) if e.frequency == 173_920_000));

        // Packet ids keep increasing
        assert!(out[3].packet_id() > out[0].packet_id());
    }

    #[test]
    fn test_gps_stays_on_orbit() {
        let mut drone = SimDrone::new();
        for _ in 0..10 {
            let Some(Payload::Gps(gps)) = drone.gps().payload else {
                panic!("expected gps");
            };
            let radius = (gps.easting - CENTER.0).hypot(gps.northing - CENTER.1);
            assert!((radius - FLIGHT_RADIUS_M).abs() < 1e-6);
        }
    }
}
