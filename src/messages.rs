// Define message types for the front ends

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::drive::Wheel;

// Command from the phone app / BLE bridge / teleop -> runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Accelerate,
    Decelerate,
    Stop,
    #[serde(alias = "estop")]
    EmergencyStop,
    Status,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Accelerate => "accelerate",
            Command::Decelerate => "decelerate",
            Command::Stop => "stop",
            Command::EmergencyStop => "emergency_stop",
            Command::Status => "status",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised for text that is not one of the known commands
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Unknown command: {0}")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "accelerate" => Ok(Command::Accelerate),
            "decelerate" => Ok(Command::Decelerate),
            "stop" => Ok(Command::Stop),
            "emergency_stop" | "estop" => Ok(Command::EmergencyStop),
            "status" => Ok(Command::Status),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}

// Commanded duty cycles, published as telemetry and returned by `status`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct WheelTelemetry {
    pub left: f64,
    pub right: f64,
}

impl WheelTelemetry {
    pub fn get(&self, wheel: Wheel) -> f64 {
        match wheel {
            Wheel::Left => self.left,
            Wheel::Right => self.right,
        }
    }
}

impl fmt::Display for WheelTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, wheel) in Wheel::ALL.into_iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {:.3}", wheel.short_name(), self.get(wheel))?;
        }
        Ok(())
    }
}

/// Link health published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LinkHealth {
    Ok,
    LinkFault,
}
