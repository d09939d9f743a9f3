// Drive core for the SkateBack board
//
// Provides:
// - Duty cycle ramp math
// - Per-wheel controller with its lock and ramps
// - Fixed-rate transmit loop (keep-alive)
// - Vehicle controller fanning commands out to both wheels

pub mod ramp;
mod transmit;
mod vehicle;
mod wheel;

pub use ramp::Limits;
pub use transmit::TransmitLoop;
pub use vehicle::{SerialPorts, VehicleController};
pub use wheel::{RampParams, Wheel, WheelController};
