//! Shared telemetry state

use std::collections::{BTreeSet, HashMap};

use tokio::sync::RwLock;
use tracing::debug;

use super::{GpsFix, LocationEstimate, PingDetection};

/// Telemetry grouped by transmitter frequency
#[derive(Debug, Default)]
pub struct TelemetryStore {
    position: RwLock<Option<GpsFix>>,
    pings: RwLock<HashMap<u32, Vec<PingDetection>>>,
    estimates: RwLock<HashMap<u32, LocationEstimate>>,
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update_position(&self, fix: GpsFix) {
        *self.position.write().await = Some(fix);
    }

    pub async fn add_ping(&self, ping: PingDetection) {
        self.pings
            .write()
            .await
            .entry(ping.frequency)
            .or_default()
            .push(ping);
    }

    /// Replace the estimate for its frequency
    pub async fn update_estimate(&self, estimate: LocationEstimate) {
        self.estimates
            .write()
            .await
            .insert(estimate.frequency, estimate);
    }

    pub async fn latest_position(&self) -> Option<GpsFix> {
        self.position.read().await.clone()
    }

    pub async fn pings_for(&self, frequency: u32) -> Vec<PingDetection> {
        self.pings
            .read()
            .await
            .get(&frequency)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn estimate_for(&self, frequency: u32) -> Option<LocationEstimate> {
        self.estimates.read().await.get(&frequency).cloned()
    }

    /// Every frequency with pings or an estimate, ascending
    pub async fn frequencies(&self) -> Vec<u32> {
        let mut freqs: BTreeSet<u32> = self.pings.read().await.keys().copied().collect();
        freqs.extend(self.estimates.read().await.keys().copied());
        freqs.into_iter().collect()
    }

    /// Drop pings and the estimate for one frequency; false if there were none
    pub async fn clear_frequency(&self, frequency: u32) -> bool {
        let had_pings = self.pings.write().await.remove(&frequency).is_some();
        let had_estimate = self.estimates.write().await.remove(&frequency).is_some();
        debug!(frequency, had_pings, had_estimate, "Cleared frequency data");
        had_pings || had_estimate
    }

    /// Drop all per-frequency data, returning the frequencies cleared
    pub async fn clear_all(&self) -> Vec<u32> {
        let cleared = self.frequencies().await;
        self.pings.write().await.clear();
        self.estimates.write().await.clear();
        cleared
    }
}
