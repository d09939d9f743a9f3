use crate::drive::Wheel;
use crate::motor::LinkError;

/// Errors surfaced by the drive layer
#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("Duty cycle {value} out of range (max magnitude {max})")]
    OutOfRange { value: f64, max: f64 },

    #[error("Unknown wheel '{0}', expected L or R")]
    UnknownWheel(String),

    #[error("{wheel} motor link failed: {source}")]
    Link {
        wheel: Wheel,
        #[source]
        source: LinkError,
    },

    #[error("Failed to open {wheel} motor link: {source}")]
    Init {
        wheel: Wheel,
        #[source]
        source: LinkError,
    },

    #[error("{wheel} ramp preempted by emergency stop")]
    Preempted { wheel: Wheel },

    #[error("Invalid drive configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, DriveError>;
