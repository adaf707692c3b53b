//! V4L2 camera driver.
//!
//! Requests MJPEG from the sensor pipeline so frames arrive already encoded. The
//! mmap stream is torn down before every format change, since V4L2 refuses
//! `S_FMT` while buffers are allocated.

use bytes::Bytes;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use super::{CameraDevice, CameraError, CameraResult, CaptureProfile, CapturedFrame};

const MJPEG_FOURCC: &[u8; 4] = b"MJPG";
const STREAM_BUFFERS: u32 = 4;

/// A V4L2 capture device delivering MJPEG frames.
pub struct V4l2Camera {
    name: String,
    device: Device,
    stream: Option<MmapStream<'static>>,
    width: u32,
    height: u32,
}

impl V4l2Camera {
    /// Open the device node at `device_path`.
    pub fn open(device_path: &str) -> CameraResult<Self> {
        let device = Device::with_path(device_path)?;

        let name = match device.query_caps() {
            Ok(caps) => format!("{} ({})", caps.card, device_path),
            Err(_) => device_path.to_string(),
        };
        info!("Opened V4L2 camera: {}", name);

        Ok(Self {
            name,
            device,
            stream: None,
            width: 0,
            height: 0,
        })
    }

    fn apply_quality(&self, quality: u8) {
        let Ok(controls) = self.device.query_controls() else {
            return;
        };

        for control_desc in controls {
            if matches!(
                control_desc.name.as_str(),
                "Compression Quality" | "compression_quality"
            ) {
                let ctrl = v4l::Control {
                    id: control_desc.id,
                    value: v4l::control::Value::Integer(quality as i64),
                };
                if let Err(e) = self.device.set_control(ctrl) {
                    warn!("Failed to set JPEG quality {}: {}", quality, e);
                }
            }
        }
    }
}

impl CameraDevice for V4l2Camera {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&mut self, profile: &CaptureProfile) -> CameraResult<()> {
        self.stream.take();

        let mut format = self.device.format()?;
        format.width = profile.resolution.width;
        format.height = profile.resolution.height;
        format.fourcc = v4l::FourCC::new(MJPEG_FOURCC);
        let format = self.device.set_format(&format)?;

        if format.fourcc != v4l::FourCC::new(MJPEG_FOURCC) {
            return Err(CameraError::Unsupported(format!(
                "device does not offer MJPEG (got {})",
                format.fourcc
            )));
        }

        self.apply_quality(profile.jpeg_quality);

        let stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, STREAM_BUFFERS)?;
        self.stream = Some(stream);
        self.width = format.width;
        self.height = format.height;

        debug!(
            "V4L2 configured for {} at {}x{}",
            profile.mode, format.width, format.height
        );
        Ok(())
    }

    fn capture_frame(&mut self) -> CameraResult<CapturedFrame> {
        let stream = self.stream.as_mut().ok_or(CameraError::NotConfigured)?;

        let (buf, meta) = stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());
        if used == 0 {
            return Err(CameraError::Device("empty frame from driver".to_string()));
        }

        Ok(CapturedFrame {
            jpeg_data: Bytes::copy_from_slice(&buf[..used]),
            width: self.width,
            height: self.height,
        })
    }
}
