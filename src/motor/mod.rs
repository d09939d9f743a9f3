// Motor link module for the SkateBack wheels
//
// Provides:
// - The MotorLink transport trait used by the drive core
// - VESC serial protocol implementation
// - A simulated link for dry runs and tests

mod link;
pub mod sim;
pub mod vesc;

pub use link::{LinkError, MotorLink};
pub use sim::{Frame, SimHandle, SimulatedLink};
pub use vesc::VescLink;
