//! Camera device abstraction.
//!
//! A [`CameraDevice`] is driven by exactly one owner. It is configured into either
//! the continuous video profile or the one-shot still profile and then asked for
//! frames, each already JPEG-encoded by the device (or by the driver on its behalf).
//! The sensor can only be in one configuration at a time, so switching modes always
//! goes through [`CameraDevice::configure`].

pub mod mock;
#[cfg(all(target_os = "linux", feature = "v4l2"))]
pub mod v4l2;

use bytes::Bytes;
use shared::stage_config::{CameraSettings, Resolution};
use thiserror::Error;

/// Which of the two sensor configurations is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureMode {
    /// Continuous low-resolution capture for the live feed
    Video,
    /// Single high-resolution acquisition
    Still,
}

impl std::fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureMode::Video => write!(f, "video"),
            CaptureMode::Still => write!(f, "still"),
        }
    }
}

/// Full description of a sensor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureProfile {
    pub mode: CaptureMode,
    pub resolution: Resolution,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
}

impl CaptureProfile {
    pub fn video(resolution: Resolution, jpeg_quality: u8) -> Self {
        Self {
            mode: CaptureMode::Video,
            resolution,
            jpeg_quality,
        }
    }

    pub fn still(resolution: Resolution, jpeg_quality: u8) -> Self {
        Self {
            mode: CaptureMode::Still,
            resolution,
            jpeg_quality,
        }
    }
}

/// The pair of profiles a camera alternates between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureProfiles {
    pub video: CaptureProfile,
    pub still: CaptureProfile,
}

impl From<&CameraSettings> for CaptureProfiles {
    fn from(settings: &CameraSettings) -> Self {
        Self {
            video: CaptureProfile::video(settings.video, settings.video_quality),
            still: CaptureProfile::still(settings.still, settings.still_quality),
        }
    }
}

/// One frame as delivered by the device.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// JPEG-encoded image data
    pub jpeg_data: Bytes,
    pub width: u32,
    pub height: u32,
}

/// Errors reported by camera drivers.
#[derive(Error, Debug)]
pub enum CameraError {
    /// Low-level I/O error talking to the device.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A capture was requested before any profile was applied.
    #[error("Camera not configured")]
    NotConfigured,

    /// The device refused the requested configuration.
    #[error("Unsupported configuration: {0}")]
    Unsupported(String),

    /// The device reported a failure while configuring or capturing.
    #[error("Device error: {0}")]
    Device(String),

    /// Encoding the frame to JPEG failed.
    #[error("Encoding failed: {0}")]
    Encode(String),
}

/// Result type for camera operations.
pub type CameraResult<T> = Result<T, CameraError>;

/// A camera owned by a single driver thread.
pub trait CameraDevice: Send {
    /// Human readable device name
    fn name(&self) -> &str;

    /// Put the sensor into `profile`, tearing down any running acquisition first.
    fn configure(&mut self, profile: &CaptureProfile) -> CameraResult<()>;

    /// Block until the next frame of the active profile is available.
    fn capture_frame(&mut self) -> CameraResult<CapturedFrame>;
}

impl<T: CameraDevice + ?Sized> CameraDevice for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn configure(&mut self, profile: &CaptureProfile) -> CameraResult<()> {
        (**self).configure(profile)
    }

    fn capture_frame(&mut self) -> CameraResult<CapturedFrame> {
        (**self).capture_frame()
    }
}
