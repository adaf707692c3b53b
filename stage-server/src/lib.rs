//! HTTP server for a motorized microscope stage with a live camera feed.
//!
//! - [`camera_source`] - owns the camera, streams video frames and performs
//!   exclusive still captures
//! - [`motion`] - per-axis stepper workers and the illumination output
//! - [`mjpeg`] - multipart live feed encoding
//! - [`server`] - axum router and startup
//! - [`args`] - CLI arguments shared by the binaries

pub mod args;
pub mod camera_source;
pub mod error;
pub mod mjpeg;
pub mod motion;
pub mod server;

pub use args::ServerArgs;
pub use camera_source::{CameraSource, CameraState};
pub use error::StageError;
pub use motion::{Axis, MotionController, MoveReceipt};
pub use server::{create_router, run_server, AppState, StageHardware, StageServer};
