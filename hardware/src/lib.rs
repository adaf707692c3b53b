//! Hardware drivers for the motorized camera stage.
//!
//! Every driver sits behind a trait so the server can run against recording mocks
//! on any machine and against real devices on the stage computer.
//!
//! # Features
//!
//! ## Individual Drivers
//! - `v4l2` - V4L2 MJPEG camera driver (Linux only)
//! - `gpio` - GPIO character-device coils and software PWM LED (Linux only)
//!
//! ## Convenience Features
//! - `full-linux` - All drivers for the stage computer

pub mod actuator;
pub mod camera;
pub mod mock;
pub mod stepper;

#[cfg(all(target_os = "linux", feature = "gpio"))]
pub mod gpio;

pub use actuator::{ActuatorError, CoilOutput, IlluminationOutput, MAX_DUTY};
pub use camera::{
    CameraDevice, CameraError, CameraResult, CaptureMode, CaptureProfile, CaptureProfiles,
    CapturedFrame,
};
pub use stepper::{Direction, StepRun, StepperError, StepperMotor};
