//! Output traits for the stage actuators.
//!
//! The stepper and LED drivers only ever write levels; they never read back
//! position or brightness. Implementations exist for GPIO character devices
//! ([`crate::gpio`], Linux only) and for recording mocks ([`crate::mock`]).

use thiserror::Error;

/// Highest duty value accepted by an [`IlluminationOutput`].
pub const MAX_DUTY: u8 = u8::MAX;

/// Errors raised while driving an output line.
#[derive(Error, Debug)]
pub enum ActuatorError {
    /// Low-level I/O error from the line driver.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The output has been shut down and no longer accepts writes.
    #[error("Output disconnected: {0}")]
    Disconnected(String),
}

/// Result type for actuator writes.
pub type ActuatorResult<T> = Result<T, ActuatorError>;

/// Four coil lines of a unipolar stepper (IN1..IN4 on a ULN2003 board).
pub trait CoilOutput: Send {
    /// Drive all four coils at once.
    fn set_coils(&mut self, levels: [bool; 4]) -> ActuatorResult<()>;
}

/// PWM-driven illumination source.
pub trait IlluminationOutput: Send {
    /// Apply a duty value in `0..=MAX_DUTY`.
    fn set_duty(&mut self, duty: u8) -> ActuatorResult<()>;
}
