// Timeouts, ports, topics and drive tuning
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::DriveError;

// Serial ports for the two VESC controllers
pub const SERIAL_LEFT: &str = "/dev/ttyACM0";
pub const SERIAL_RIGHT: &str = "/dev/ttyACM1";
pub const SERIAL_BAUDRATE: u32 = 115_200;
pub const SERIAL_TIMEOUT: Duration = Duration::from_millis(50);

// Transmit loop frequency (keep-alive to the controllers)
pub const TRANSMIT_HZ: u64 = 20;

// Pause between two ramp steps
pub const STEP_INTERVAL: Duration = Duration::from_millis(100);

// Extra wait after a failed transmit before the loop retries
pub const TRANSMIT_BACKOFF: Duration = Duration::from_millis(100);

// Duty cycle limits
pub const MAX_DUTY_CYCLE: f64 = 0.6;
pub const MIN_DUTY_CYCLE: f64 = 0.05; // below this the motor draws current but does not turn

// Ramp steps: stop faster than you start
pub const ACC_STEP: f64 = 0.02;
pub const DEC_STEP: f64 = 0.02;
pub const BRK_STEP: f64 = 0.04;

// Command front end, the BLE bridge connects here
pub const LISTEN_ADDR: &str = "127.0.0.1:65432";

// Zenoh topics
pub const TOPIC_CMD: &str = "skateback/cmd"; // commands
pub const TOPIC_WHEELS: &str = "skateback/state/wheels"; // duty cycle telemetry
pub const TOPIC_HEALTH: &str = "skateback/state/health"; // link health

/// Tunable drive parameters. Every field falls back to the constants above,
/// so a config file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub max_duty_cycle: f64,
    pub min_duty_cycle: f64,
    pub acc_step: f64,
    pub dec_step: f64,
    pub brk_step: f64,
    #[serde(with = "millis")]
    pub step_interval: Duration,
    #[serde(with = "millis")]
    pub transmit_period: Duration,
    #[serde(with = "millis")]
    pub transmit_backoff: Duration,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            max_duty_cycle: MAX_DUTY_CYCLE,
            min_duty_cycle: MIN_DUTY_CYCLE,
            acc_step: ACC_STEP,
            dec_step: DEC_STEP,
            brk_step: BRK_STEP,
            step_interval: STEP_INTERVAL,
            transmit_period: Duration::from_millis(1000 / TRANSMIT_HZ),
            transmit_backoff: TRANSMIT_BACKOFF,
        }
    }
}

impl DriveConfig {
    /// Load a JSON config file and validate it
    pub fn from_file(path: &Path) -> Result<Self, DriveError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DriveError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            DriveError::InvalidConfig(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DriveError> {
        let invalid = |reason: String| Err(DriveError::InvalidConfig(reason));

        if !(self.max_duty_cycle > 0.0 && self.max_duty_cycle <= 1.0) {
            return invalid(format!(
                "max_duty_cycle must be in (0, 1], got {}",
                self.max_duty_cycle
            ));
        }
        if !(self.min_duty_cycle >= 0.0 && self.min_duty_cycle < self.max_duty_cycle) {
            return invalid(format!(
                "min_duty_cycle must be in [0, {}), got {}",
                self.max_duty_cycle, self.min_duty_cycle
            ));
        }
        for (name, step) in [
            ("acc_step", self.acc_step),
            ("dec_step", self.dec_step),
            ("brk_step", self.brk_step),
        ] {
            if !(step > 0.0 && step <= self.max_duty_cycle) {
                return invalid(format!(
                    "{} must be in (0, {}], got {}",
                    name, self.max_duty_cycle, step
                ));
            }
        }
        if self.brk_step < self.dec_step || self.dec_step < self.acc_step {
            return invalid(format!(
                "steps must satisfy brk_step >= dec_step >= acc_step, got {} / {} / {}",
                self.brk_step, self.dec_step, self.acc_step
            ));
        }
        if self.transmit_period.is_zero() {
            return invalid("transmit_period must be non-zero".to_string());
        }
        Ok(())
    }
}

// Durations are written as integer milliseconds in config files
mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DriveConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.transmit_period, Duration::from_millis(50));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: DriveConfig =
            serde_json::from_str(r#"{"max_duty_cycle": 0.4, "step_interval": 20}"#).unwrap();
        assert_eq!(config.max_duty_cycle, 0.4);
        assert_eq!(config.step_interval, Duration::from_millis(20));
        assert_eq!(config.acc_step, ACC_STEP);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_step_ordering_enforced() {
        let config = DriveConfig {
            brk_step: 0.01,
            ..DriveConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DriveError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_min_must_be_below_max() {
        let config = DriveConfig {
            min_duty_cycle: 0.7,
            ..DriveConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
