// Transport seam between the drive core and a wheel's motor controller

/// Error types for motor link communication
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Link is closed")]
    Closed,

    #[error("Value {value} cannot be encoded")]
    Unencodable { value: f64 },
}

pub type Result<T> = std::result::Result<T, LinkError>;

/// One wheel's motor controller connection
///
/// Both sends are fire-and-forget: the controller does not acknowledge them.
pub trait MotorLink: Send {
    /// Command a signed duty cycle
    fn send_duty_cycle(&mut self, duty_cycle: f64) -> Result<()>;

    /// Command zero motor current (the controller's kill command)
    fn send_zero_current(&mut self) -> Result<()>;

    /// Release the connection. Calling it again is a no-op.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}
