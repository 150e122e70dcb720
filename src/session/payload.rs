//! Ping finder settings carried by the configure phase

use rtt_shared::ConfigRequest;
use serde::{Deserialize, Serialize};

use super::ValidationError;

/// Operator-editable ping finder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PingFinderSettings {
    /// SDR gain in dB
    pub gain: f64,
    /// Samples per second
    pub sampling_rate: u32,
    /// Hz
    pub center_frequency: u32,
    pub enable_test_data: bool,
    pub ping_width_ms: u32,
    pub ping_min_snr: u32,
    pub ping_max_len_mult: f64,
    pub ping_min_len_mult: f64,
    /// Transmitter frequencies to search for, in Hz
    pub target_frequencies: Vec<u32>,
}

impl Default for PingFinderSettings {
    fn default() -> Self {
        Self {
            gain: 56.0,
            sampling_rate: 2_500_000,
            center_frequency: 173_500_000,
            enable_test_data: false,
            ping_width_ms: 25,
            ping_min_snr: 25,
            ping_max_len_mult: 1.5,
            ping_min_len_mult: 0.5,
            target_frequencies: Vec::new(),
        }
    }
}

impl PingFinderSettings {
    /// Apply operator-entered `key=value` fields on top of `self`
    ///
    /// Integer fields accept integral decimal input such as `2.5e6`.
    pub fn with_fields<'a, I>(&self, fields: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut settings = self.clone();
        for (key, value) in fields {
            let value = value.trim();
            match key.trim() {
                "gain" => settings.gain = parse_f64("gain", value)?,
                "sampling_rate" => settings.sampling_rate = parse_u32("sampling_rate", value)?,
                "center_frequency" => {
                    settings.center_frequency = parse_u32("center_frequency", value)?
                }
                "enable_test_data" => {
                    settings.enable_test_data = parse_bool("enable_test_data", value)?
                }
                "ping_width_ms" => settings.ping_width_ms = parse_u32("ping_width_ms", value)?,
                "ping_min_snr" => settings.ping_min_snr = parse_u32("ping_min_snr", value)?,
                "ping_max_len_mult" => {
                    settings.ping_max_len_mult = parse_f64("ping_max_len_mult", value)?
                }
                "ping_min_len_mult" => {
                    settings.ping_min_len_mult = parse_f64("ping_min_len_mult", value)?
                }
                "target_frequencies" => {
                    settings.target_frequencies = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(|s| parse_u32("target_frequencies", s))
                        .collect::<Result<_, _>>()?
                }
                other => return Err(ValidationError::new(other, "unknown field")),
            }
        }
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.gain.is_finite() || !(0.0..=100.0).contains(&self.gain) {
            return Err(ValidationError::new("gain", "must be between 0 and 100 dB"));
        }
        if self.sampling_rate == 0 {
            return Err(ValidationError::new("sampling_rate", "must be positive"));
        }
        if self.center_frequency == 0 {
            return Err(ValidationError::new("center_frequency", "must be positive"));
        }
        if self.ping_width_ms == 0 {
            return Err(ValidationError::new("ping_width_ms", "must be positive"));
        }
        for (field, mult) in [
            ("ping_max_len_mult", self.ping_max_len_mult),
            ("ping_min_len_mult", self.ping_min_len_mult),
        ] {
            if !mult.is_finite() || mult <= 0.0 {
                return Err(ValidationError::new(field, "must be a positive number"));
            }
        }
        if self.ping_min_len_mult > self.ping_max_len_mult {
            return Err(ValidationError::new(
                "ping_min_len_mult",
                "must not exceed ping_max_len_mult",
            ));
        }
        if self.target_frequencies.is_empty() {
            return Err(ValidationError::new(
                "target_frequencies",
                "at least one frequency is required",
            ));
        }
        if self.target_frequencies.contains(&0) {
            return Err(ValidationError::new("target_frequencies", "must be positive"));
        }
        Ok(())
    }

    /// Wire request for run number `run_num`
    pub fn to_request(&self, run_num: u32) -> ConfigRequest {
        ConfigRequest {
            gain: self.gain,
            sampling_rate: self.sampling_rate,
            center_frequency: self.center_frequency,
            run_num,
            enable_test_data: self.enable_test_data,
            ping_width_ms: self.ping_width_ms,
            ping_min_snr: self.ping_min_snr,
            ping_max_len_mult: self.ping_max_len_mult,
            ping_min_len_mult: self.ping_min_len_mult,
            target_frequencies: self.target_frequencies.clone(),
        }
    }
}

fn parse_f64(field: &str, value: &str) -> Result<f64, ValidationError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ValidationError::new(field, format!("'{value}' is not a number")))
}

fn parse_u32(field: &str, value: &str) -> Result<u32, ValidationError> {
    if let Ok(v) = value.parse::<u32>() {
        return Ok(v);
    }
    let v = parse_f64(field, value)?;
    if v.fract() != 0.0 || v < 0.0 || v > f64::from(u32::MAX) {
        return Err(ValidationError::new(
            field,
            format!("'{value}' is not a non-negative integer"),
        ));
    }
    Ok(v as u32)
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ValidationError::new(field, format!("'{value}' is not a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_are_coerced() {
        let settings = PingFinderSettings::default()
            .with_fields([
                ("sampling_rate", "2.5e6"),
                ("gain", "40"),
                ("enable_test_data", "yes"),
                ("target_frequencies", "173043000, 173920000"),
            ])
            .expect("fields rejected");

        assert_eq!(settings.sampling_rate, 2_500_000);
        assert_eq!(settings.gain, 40.0);
        assert!(settings.enable_test_data);
        assert_eq!(settings.target_frequencies, vec![173_043_000, 173_920_000]);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_bad_fields_rejected() {
        let base = PingFinderSettings::default();
        let err = base.with_fields([("sampling_rate", "1.5")]).unwrap_err();
        assert_eq!(err.field, "sampling_rate");

        let err = base.with_fields([("center_frequency", "-4")]).unwrap_err();
        assert_eq!(err.field, "center_frequency");

        let err = base.with_fields([("bogus", "1")]).unwrap_err();
        assert_eq!(err.field, "bogus");
    }

    #[test]
    fn test_validation() {
        let settings = PingFinderSettings::default();
        assert_eq!(
            settings.validate().unwrap_err().field,
            "target_frequencies"
        );

        let settings = PingFinderSettings {
            target_frequencies: vec![173_043_000],
            ping_min_len_mult: 2.0,
            ..Default::default()
        };
        assert_eq!(settings.validate().unwrap_err().field, "ping_min_len_mult");
    }

    #[test]
    fn test_request_carries_run_number() {
        let settings = PingFinderSettings {
            target_frequencies: vec![173_043_000],
            ..Default::default()
        };
        let request = settings.to_request(1_700_000_000);
        assert_eq!(request.run_num, 1_700_000_000);
        assert_eq!(request.target_frequencies, vec![173_043_000]);
        assert_eq!(request.center_frequency, 173_500_000);
    }
}
