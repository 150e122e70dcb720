//! Ground station configuration
//!
//! Loaded from a JSON file when one is given, otherwise every section falls
//! back to development defaults that point at the simulated drone.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rtt_shared::link;
use serde::{Deserialize, Serialize};

use crate::session::{PingFinderSettings, ValidationError};

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "RTT_GCS_CONFIG";

/// Physical interface to the drone's radio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    Serial,
    Tcp,
}

/// Transport endpoint description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub interface: InterfaceType,
    /// Serial device (e.g. "/dev/ttyUSB0" or "COM3")
    pub port: String,
    pub baudrate: u32,
    pub host: String,
    pub tcp_port: u16,
}

impl Default for RadioConfig {
    fn default() -> Self {
        // Default to the simulator for development
        Self {
            interface: InterfaceType::Tcp,
            port: "/dev/ttyUSB0".into(),
            baudrate: 57_600,
            host: "127.0.0.1".into(),
            tcp_port: link::DEFAULT_TCP_PORT,
        }
    }
}

impl RadioConfig {
    /// Human-readable endpoint for logs
    pub fn endpoint(&self) -> String {
        match self.interface {
            InterfaceType::Serial => format!("{}@{}", self.port, self.baudrate),
            InterfaceType::Tcp => format!("{}:{}", self.host, self.tcp_port),
        }
    }
}

/// Acknowledgment parameters as written in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AckSettings {
    pub ack_timeout_secs: f64,
    pub max_retries: u32,
}

impl Default for AckSettings {
    fn default() -> Self {
        Self {
            ack_timeout_secs: link::DEFAULT_ACK_TIMEOUT_SECS,
            max_retries: link::DEFAULT_MAX_RETRIES,
        }
    }
}

impl AckSettings {
    pub fn timing(&self) -> Result<AckTiming, ValidationError> {
        AckTiming::from_secs(self.ack_timeout_secs, self.max_retries)
    }
}

/// Validated acknowledgment parameters
///
/// Every request deadline is `ack_timeout × max_retries`: the transport may
/// retry internally, and only once all attempts are spent is the request
/// considered unanswered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckTiming {
    ack_timeout: Duration,
    max_retries: u32,
}

impl AckTiming {
    pub fn new(ack_timeout: Duration, max_retries: u32) -> Result<Self, ValidationError> {
        if ack_timeout.is_zero() {
            return Err(ValidationError::new("ack_timeout", "must be positive"));
        }
        if !(1..=link::MAX_RETRIES_LIMIT).contains(&max_retries) {
            return Err(ValidationError::new(
                "max_retries",
                format!("must be between 1 and {}", link::MAX_RETRIES_LIMIT),
            ));
        }
        Ok(Self {
            ack_timeout,
            max_retries,
        })
    }

    pub fn from_secs(ack_timeout_secs: f64, max_retries: u32) -> Result<Self, ValidationError> {
        if !ack_timeout_secs.is_finite() || ack_timeout_secs <= 0.0 {
            return Err(ValidationError::new(
                "ack_timeout",
                format!("{ack_timeout_secs} is not a positive number of seconds"),
            ));
        }
        let ack_timeout = Duration::try_from_secs_f64(ack_timeout_secs)
            .map_err(|e| ValidationError::new("ack_timeout", e.to_string()))?;
        Self::new(ack_timeout, max_retries)
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Per-attempt timeout in whole milliseconds, as advertised to the drone
    pub fn ack_timeout_ms(&self) -> u32 {
        u32::try_from(self.ack_timeout.as_millis()).unwrap_or(u32::MAX)
    }

    /// How long a request may go unanswered
    pub fn deadline(&self) -> Duration {
        self.ack_timeout.saturating_mul(self.max_retries)
    }
}

impl Default for AckTiming {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs_f64(link::DEFAULT_ACK_TIMEOUT_SECS),
            max_retries: link::DEFAULT_MAX_RETRIES,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcsConfig {
    pub radio: RadioConfig,
    pub ack: AckSettings,
    /// Time allowed for opening the link
    pub connect_timeout_secs: f64,
    /// Ping finder settings sent by the configure phase
    pub ping_finder: PingFinderSettings,
    /// Used when RUST_LOG is not set
    pub log_filter: String,
}

impl Default for GcsConfig {
    fn default() -> Self {
        Self {
            radio: RadioConfig::default(),
            ack: AckSettings::default(),
            connect_timeout_secs: 5.0,
            ping_finder: PingFinderSettings::default(),
            log_filter: "info".into(),
        }
    }
}

impl GcsConfig {
    /// Load a config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.ack.timing()?;
        Ok(config)
    }

    /// Load from an explicit path, then `RTT_GCS_CONFIG`, then defaults
    pub fn resolve(path: Option<String>) -> Result<Self> {
        match path.or_else(|| std::env::var(CONFIG_ENV).ok()) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.connect_timeout_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_is_timeout_times_retries() {
        let timing = AckTiming::from_secs(1.0, 3).expect("valid timing");
        assert_eq!(timing.deadline(), Duration::from_secs(3));
        assert_eq!(timing.ack_timeout_ms(), 1000);

        let timing = AckTiming::from_secs(0.25, 5).expect("valid timing");
        assert_eq!(timing.deadline(), Duration::from_millis(1250));
    }

    #[test]
    fn test_invalid_timing_rejected() {
        assert!(AckTiming::from_secs(0.0, 3).is_err());
        assert!(AckTiming::from_secs(-1.0, 3).is_err());
        assert!(AckTiming::from_secs(f64::NAN, 3).is_err());
        assert!(AckTiming::from_secs(1.0, 0).is_err());

        let err = AckTiming::from_secs(1.0, link::MAX_RETRIES_LIMIT + 1).unwrap_err();
        assert_eq!(err.field, "max_retries");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: GcsConfig = serde_json::from_str(
            r#"{ "radio": { "interface": "serial", "port": "COM3", "baudrate": 9600 },
                 "ack": { "ack_timeout_secs": 3.0 } }"#,
        )
        .expect("parse config");

        assert_eq!(config.radio.interface, InterfaceType::Serial);
        assert_eq!(config.radio.endpoint(), "COM3@9600");
        assert_eq!(config.radio.tcp_port, link::DEFAULT_TCP_PORT);
        assert_eq!(config.ack.max_retries, link::DEFAULT_MAX_RETRIES);
        assert_eq!(
            config.ack.timing().expect("timing").deadline(),
            Duration::from_secs(15)
        );
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_connect_timeout_fallback() {
        let config = GcsConfig {
            connect_timeout_secs: -2.0,
            ..Default::default()
        };
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
    }
}
