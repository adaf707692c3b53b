//! Half-step driver for 28BYJ-48 style unipolar steppers.
//!
//! The motor has no position feedback. Every move is dead reckoning: the driver
//! only knows how many half steps it pulsed, never where the stage actually is.
//! Coils are released after each move so the motor does not heat up while idle.

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{trace, warn};

use crate::actuator::{ActuatorError, CoilOutput};

/// Coil pattern for each of the eight half-step phases.
pub const HALF_STEP_SEQUENCE: [[bool; 4]; 8] = [
    [true, false, false, false],
    [true, true, false, false],
    [false, true, false, false],
    [false, true, true, false],
    [false, false, true, false],
    [false, false, true, true],
    [false, false, false, true],
    [true, false, false, true],
];

const RELEASED: [bool; 4] = [false; 4];

/// Rotation direction as seen from the shaft end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Clockwise,
    CounterClockwise,
}

impl Direction {
    /// Split a signed step count into direction and magnitude.
    ///
    /// Negative counts run counter-clockwise. Returns `None` for zero.
    pub fn from_signed(steps: i64) -> Option<(Direction, u64)> {
        match steps {
            0 => None,
            s if s < 0 => Some((Direction::CounterClockwise, s.unsigned_abs())),
            s => Some((Direction::Clockwise, s.unsigned_abs())),
        }
    }
}

/// Errors raised while pulsing a stepper.
#[derive(Error, Debug)]
pub enum StepperError {
    /// A coil write failed part way through a move.
    #[error("{motor}: coil write failed after {completed} of {requested} steps: {source}")]
    CoilWrite {
        motor: String,
        completed: u64,
        requested: u64,
        #[source]
        source: ActuatorError,
    },
}

/// Timing of a completed move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRun {
    pub steps: u64,
    pub direction: Direction,
    /// Instant the first coil pattern was written
    pub started: Instant,
    /// Instant the coils were released
    pub finished: Instant,
}

/// A single stepper motor on four coil lines.
pub struct StepperMotor {
    name: String,
    coils: Box<dyn CoilOutput>,
    phase: usize,
    step_delay: Duration,
}

impl StepperMotor {
    pub fn new(name: impl Into<String>, coils: Box<dyn CoilOutput>, step_delay: Duration) -> Self {
        Self {
            name: name.into(),
            coils,
            phase: 0,
            step_delay,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pulse `steps` half steps in `direction`, then release the coils.
    ///
    /// The phase carries over between moves so consecutive runs stay in sync with
    /// the rotor. A failed write is returned as-is and never retried: a retry could
    /// move the stage twice.
    pub fn run(&mut self, steps: u64, direction: Direction) -> Result<StepRun, StepperError> {
        let started = Instant::now();

        for completed in 0..steps {
            self.phase = match direction {
                Direction::Clockwise => (self.phase + 1) % HALF_STEP_SEQUENCE.len(),
                Direction::CounterClockwise => {
                    (self.phase + HALF_STEP_SEQUENCE.len() - 1) % HALF_STEP_SEQUENCE.len()
                }
            };

            if let Err(source) = self.coils.set_coils(HALF_STEP_SEQUENCE[self.phase]) {
                self.release_best_effort();
                return Err(StepperError::CoilWrite {
                    motor: self.name.clone(),
                    completed,
                    requested: steps,
                    source,
                });
            }

            if !self.step_delay.is_zero() {
                std::thread::sleep(self.step_delay);
            }
        }

        if let Err(source) = self.coils.set_coils(RELEASED) {
            return Err(StepperError::CoilWrite {
                motor: self.name.clone(),
                completed: steps,
                requested: steps,
                source,
            });
        }

        let finished = Instant::now();
        trace!(
            "{}: {} steps {:?} in {:?}",
            self.name,
            steps,
            direction,
            finished - started
        );

        Ok(StepRun {
            steps,
            direction,
            started,
            finished,
        })
    }

    fn release_best_effort(&mut self) {
        if let Err(e) = self.coils.set_coils(RELEASED) {
            warn!("{}: failed to release coils: {}", self.name, e);
        }
    }
}
