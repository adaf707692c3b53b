//! Synthetic camera for development and tests.
//!
//! Renders a drifting grayscale test pattern, paced at a fixed frame interval in
//! video mode. Failures and slow still captures can be injected at runtime through
//! the shared [`MockFaults`] handle.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::Array2;
use shared::jpeg::encode_ndarray_jpeg;
use tracing::debug;

use super::{CameraDevice, CameraError, CameraResult, CaptureMode, CaptureProfile, CapturedFrame};

/// Runtime fault injection and call counters for [`MockCamera`].
#[derive(Debug, Default)]
pub struct MockFaults {
    fail_configure: AtomicUsize,
    fail_capture: AtomicUsize,
    fail_still_capture: AtomicUsize,
    still_delay_ms: AtomicU64,
    configure_calls: AtomicUsize,
    still_captures: AtomicUsize,
}

impl MockFaults {
    /// Fail the next `count` calls to `configure`.
    pub fn fail_next_configures(&self, count: usize) {
        self.fail_configure.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` captures in any mode.
    pub fn fail_next_captures(&self, count: usize) {
        self.fail_capture.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` captures made in still mode.
    pub fn fail_next_still_captures(&self, count: usize) {
        self.fail_still_capture.store(count, Ordering::SeqCst);
    }

    /// Extra time a still capture takes before returning.
    pub fn set_still_delay(&self, delay: Duration) {
        self.still_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of `configure` calls so far, including failed ones.
    pub fn configure_calls(&self) -> usize {
        self.configure_calls.load(Ordering::SeqCst)
    }

    /// Number of successful still captures.
    pub fn still_captures(&self) -> usize {
        self.still_captures.load(Ordering::SeqCst)
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Camera that renders a synthetic pattern instead of reading a sensor.
pub struct MockCamera {
    name: String,
    profile: Option<CaptureProfile>,
    frame_interval: Duration,
    frame_counter: u64,
    last_frame: Option<Instant>,
    faults: Arc<MockFaults>,
}

impl MockCamera {
    /// Create a mock camera producing a video frame every `frame_interval`.
    pub fn new(frame_interval: Duration) -> Self {
        Self {
            name: "Mock Camera".to_string(),
            profile: None,
            frame_interval,
            frame_counter: 0,
            last_frame: None,
            faults: Arc::new(MockFaults::default()),
        }
    }

    /// Handle for injecting faults after the camera has been moved into its owner.
    pub fn faults(&self) -> Arc<MockFaults> {
        self.faults.clone()
    }

    fn pace(&mut self) {
        if let Some(last) = self.last_frame {
            let due = last + self.frame_interval;
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.last_frame = Some(Instant::now());
    }

    fn render(&self, profile: &CaptureProfile) -> CameraResult<CapturedFrame> {
        let width = profile.resolution.width as usize;
        let height = profile.resolution.height as usize;
        let offset = self.frame_counter as usize;

        let pattern = Array2::from_shape_fn((height, width), |(row, col)| {
            ((row + col + offset * 4) % 256) as u8
        });

        let jpeg_data = encode_ndarray_jpeg(&pattern, profile.jpeg_quality).ok_or_else(|| {
            CameraError::Encode(format!("failed to encode {} frame", profile.resolution))
        })?;

        Ok(CapturedFrame {
            jpeg_data,
            width: profile.resolution.width,
            height: profile.resolution.height,
        })
    }
}

impl CameraDevice for MockCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&mut self, profile: &CaptureProfile) -> CameraResult<()> {
        self.faults.configure_calls.fetch_add(1, Ordering::SeqCst);
        self.profile = None;

        if MockFaults::take(&self.faults.fail_configure) {
            return Err(CameraError::Device(format!(
                "injected failure configuring {} mode",
                profile.mode
            )));
        }

        debug!(
            "Mock camera configured: {} {} q={}",
            profile.mode, profile.resolution, profile.jpeg_quality
        );
        self.profile = Some(*profile);
        self.last_frame = None;
        Ok(())
    }

    fn capture_frame(&mut self) -> CameraResult<CapturedFrame> {
        let profile = self.profile.ok_or(CameraError::NotConfigured)?;

        match profile.mode {
            CaptureMode::Video => self.pace(),
            CaptureMode::Still => {
                let delay = self.faults.still_delay_ms.load(Ordering::SeqCst);
                if delay > 0 {
                    std::thread::sleep(Duration::from_millis(delay));
                }
            }
        }

        if MockFaults::take(&self.faults.fail_capture)
            || (profile.mode == CaptureMode::Still
                && MockFaults::take(&self.faults.fail_still_capture))
        {
            return Err(CameraError::Device(format!(
                "injected {} capture failure",
                profile.mode
            )));
        }

        let frame = self.render(&profile)?;
        self.frame_counter += 1;

        if profile.mode == CaptureMode::Still {
            self.faults.still_captures.fetch_add(1, Ordering::SeqCst);
        }

        Ok(frame)
    }
}
