//! Shared building blocks for the stage server.
//!
//! - [`frame_buffer`] - latest-frame-wins broadcast between the camera producer and
//!   HTTP consumers
//! - [`jpeg`] - JPEG encoding helpers
//! - [`stage_config`] / [`config_storage`] - device wiring and its on-disk storage

pub mod config_storage;
pub mod frame_buffer;
pub mod jpeg;
pub mod stage_config;

pub use frame_buffer::{Frame, FrameBuffer};
pub use stage_config::{Resolution, StageConfig};
