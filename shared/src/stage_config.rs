//! Device wiring and camera settings for the motorized stage.
//!
//! Defaults describe the reference build: a Raspberry Pi camera streaming 1280x720
//! MJPEG, three 28BYJ-48 steppers on ULN2003 drivers, and an LED on GPIO 21.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Camera settings for the streaming and still-capture modes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// V4L2 device node
    pub device_path: String,
    /// Resolution of the live feed
    pub video: Resolution,
    /// JPEG quality of the live feed (1-100)
    pub video_quality: u8,
    /// Resolution of one-shot still captures
    pub still: Resolution,
    /// JPEG quality of still captures (1-100)
    pub still_quality: u8,
    /// Frame period of the synthetic camera
    pub mock_frame_interval_ms: u64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device_path: "/dev/video0".to_string(),
            video: Resolution::new(1280, 720),
            video_quality: 80,
            still: Resolution::new(2592, 1944),
            still_quality: 95,
            mock_frame_interval_ms: 33,
        }
    }
}

/// Stepper wiring. Each axis drives four coil lines in IN1..IN4 order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorSettings {
    /// GPIO character device name or path
    pub gpio_chip: String,
    pub x_pins: [u32; 4],
    pub y_pins: [u32; 4],
    pub z_pins: [u32; 4],
    /// Delay between half steps
    pub step_delay_us: u64,
}

impl MotorSettings {
    pub fn step_delay(&self) -> Duration {
        Duration::from_micros(self.step_delay_us)
    }
}

impl Default for MotorSettings {
    fn default() -> Self {
        Self {
            gpio_chip: "gpiochip0".to_string(),
            x_pins: [1, 12, 16, 20],
            y_pins: [14, 15, 18, 23],
            z_pins: [24, 25, 8, 7],
            step_delay_us: 1_000,
        }
    }
}

/// Illumination LED settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IlluminationSettings {
    pub pin: u32,
    pub pwm_frequency_hz: u32,
    /// Duty applied before the server starts accepting requests
    pub initial_duty: u8,
}

impl Default for IlluminationSettings {
    fn default() -> Self {
        Self {
            pin: 21,
            pwm_frequency_hz: 1_000,
            initial_duty: 255,
        }
    }
}

/// Complete stage configuration as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub camera: CameraSettings,
    pub motors: MotorSettings,
    pub illumination: IlluminationSettings,
}

impl StageConfig {
    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Load from JSON file. Missing fields take their default values.
    pub fn load_from_file(path: &Path) -> Result<Self, std::io::Error> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_wiring() {
        let config = StageConfig::default();
        assert_eq!(config.motors.x_pins, [1, 12, 16, 20]);
        assert_eq!(config.motors.y_pins, [14, 15, 18, 23]);
        assert_eq!(config.motors.z_pins, [24, 25, 8, 7]);
        assert_eq!(config.illumination.pin, 21);
        assert_eq!(config.illumination.initial_duty, 255);
        assert_eq!(config.camera.video, Resolution::new(1280, 720));
        assert_eq!(config.motors.step_delay(), Duration::from_millis(1));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{ "camera": { "video": { "width": 640, "height": 480 } } }"#;
        let config: StageConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.camera.video, Resolution::new(640, 480));
        assert_eq!(config.camera.still, CameraSettings::default().still);
        assert_eq!(config.motors, MotorSettings::default());
    }

    #[test]
    fn test_resolution_display() {
        assert_eq!(Resolution::new(1280, 720).to_string(), "1280x720");
    }
}
