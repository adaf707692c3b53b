//! Camera ownership: continuous streaming plus exclusive still captures.
//!
//! The [`CameraSource`] owns the [`CameraDevice`] and a dedicated producer thread
//! that captures video frames into the shared [`FrameBuffer`]. The producer never
//! waits on consumers.
//!
//! A still capture is a critical section against the producer:
//!
//! ```text
//! Streaming -> Reconfiguring -> StillCapturing -> Reconfiguring -> Streaming
//!                   |                 |                 |
//!                   +-----------------+-----------------+--> Faulted
//! ```
//!
//! The still path first marks an exclusive operation as pending, which parks the
//! producer between frames, then takes the device lock for the whole sequence.
//! Only one exclusive operation may be pending: a second still request fails with
//! [`StageError::CameraBusy`] instead of interleaving reconfigurations.
//!
//! Any device failure inside the sequence triggers one attempt to restore the
//! video profile. If that also fails the source is `Faulted` until
//! [`CameraSource::reinitialize`] succeeds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use hardware::{CameraDevice, CameraError, CaptureProfiles, CapturedFrame};
use serde::Serialize;
use shared::FrameBuffer;
use tracing::{debug, error, info, warn};

use crate::error::StageError;

/// How long the parked producer sleeps between checks of the stop flag.
const PRODUCER_IDLE_POLL: Duration = Duration::from_millis(100);

/// Camera mode as seen by request handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraState {
    Streaming,
    Reconfiguring,
    StillCapturing,
    Faulted,
    Stopped,
}

impl std::fmt::Display for CameraState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CameraState::Streaming => "streaming",
            CameraState::Reconfiguring => "reconfiguring",
            CameraState::StillCapturing => "still_capturing",
            CameraState::Faulted => "faulted",
            CameraState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct Mode {
    state: CameraState,
    /// A still capture or reinitialization owns the device
    exclusive: bool,
}

struct Shared {
    device: Mutex<Box<dyn CameraDevice>>,
    mode: Mutex<Mode>,
    mode_changed: Condvar,
    stop: AtomicBool,
    frames: Arc<FrameBuffer>,
    profiles: CaptureProfiles,
}

impl Shared {
    fn lock_device(&self) -> MutexGuard<'_, Box<dyn CameraDevice>> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_mode(&self) -> MutexGuard<'_, Mode> {
        self.mode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> CameraState {
        self.lock_mode().state
    }

    fn set_state(&self, next: CameraState) {
        let mut mode = self.lock_mode();
        if mode.state == CameraState::Stopped || mode.state == next {
            return;
        }
        debug!("Camera state {} -> {}", mode.state, next);
        mode.state = next;
        drop(mode);
        self.mode_changed.notify_all();
    }

    /// Park until the producer may capture. Returns false on timeout or stop.
    fn wait_for_streaming(&self) -> bool {
        let mode = self.lock_mode();
        let (mode, _) = self
            .mode_changed
            .wait_timeout_while(mode, PRODUCER_IDLE_POLL, |mode| {
                !self.stop.load(Ordering::SeqCst)
                    && (mode.state != CameraState::Streaming || mode.exclusive)
            })
            .unwrap_or_else(PoisonError::into_inner);

        !self.stop.load(Ordering::SeqCst) && mode.state == CameraState::Streaming && !mode.exclusive
    }

    fn producer_may_capture(&self) -> bool {
        let mode = self.lock_mode();
        mode.state == CameraState::Streaming && !mode.exclusive
    }

    /// Try to put the device back into video mode after `cause`.
    ///
    /// Returns the error to report for the failed operation.
    fn recover(&self, device: &mut dyn CameraDevice, cause: CameraError) -> StageError {
        warn!("Camera error: {}, restoring video mode", cause);
        self.set_state(CameraState::Reconfiguring);

        match device.configure(&self.profiles.video) {
            Ok(()) => {
                info!("Camera video mode restored");
                self.set_state(CameraState::Streaming);
                StageError::CameraFault(cause.to_string())
            }
            Err(restore) => {
                error!(
                    "Failed to restore video mode: {}; camera faulted until reinitialized",
                    restore
                );
                self.set_state(CameraState::Faulted);
                StageError::CameraFault(format!(
                    "{cause}; restoring video mode failed: {restore}"
                ))
            }
        }
    }

    fn still_sequence(&self, device: &mut dyn CameraDevice) -> Result<CapturedFrame, StageError> {
        self.set_state(CameraState::Reconfiguring);
        if let Err(e) = device.configure(&self.profiles.still) {
            return Err(self.recover(device, e));
        }

        self.set_state(CameraState::StillCapturing);
        let frame = match device.capture_frame() {
            Ok(frame) => frame,
            Err(e) => return Err(self.recover(device, e)),
        };

        self.set_state(CameraState::Reconfiguring);
        if let Err(e) = device.configure(&self.profiles.video) {
            error!("Failed to resume video mode after still capture: {}", e);
            self.set_state(CameraState::Faulted);
            return Err(StageError::CameraFault(format!(
                "resuming video mode failed: {e}"
            )));
        }

        self.set_state(CameraState::Streaming);
        Ok(frame)
    }
}

/// Clears the exclusive flag and wakes the producer, even if the holder panics.
struct ExclusiveGuard<'a> {
    shared: &'a Shared,
}

impl<'a> ExclusiveGuard<'a> {
    fn acquire(shared: &'a Shared, allow_faulted: bool) -> Result<Self, StageError> {
        let mut mode = shared.lock_mode();

        if mode.state == CameraState::Stopped {
            return Err(StageError::ShuttingDown);
        }
        if mode.exclusive {
            return Err(StageError::CameraBusy);
        }
        if mode.state == CameraState::Faulted && !allow_faulted {
            return Err(StageError::CameraFault(
                "camera is faulted and must be reinitialized".to_string(),
            ));
        }

        mode.exclusive = true;
        Ok(Self { shared })
    }
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.shared.lock_mode().exclusive = false;
        self.shared.mode_changed.notify_all();
    }
}

/// Owner of the camera device and its streaming producer thread.
pub struct CameraSource {
    shared: Arc<Shared>,
    name: String,
    producer: Mutex<Option<JoinHandle<()>>>,
}

impl CameraSource {
    /// Configure the camera for video and start publishing frames into `frames`.
    pub fn start<C: CameraDevice + 'static>(
        mut camera: C,
        profiles: CaptureProfiles,
        frames: Arc<FrameBuffer>,
    ) -> Result<Self, StageError> {
        let name = camera.name().to_string();
        camera
            .configure(&profiles.video)
            .map_err(|e| StageError::CameraFault(format!("initial configuration failed: {e}")))?;

        info!(
            "Camera {}: video {} q={}, still {} q={}",
            name,
            profiles.video.resolution,
            profiles.video.jpeg_quality,
            profiles.still.resolution,
            profiles.still.jpeg_quality
        );

        let shared = Arc::new(Shared {
            device: Mutex::new(Box::new(camera)),
            mode: Mutex::new(Mode {
                state: CameraState::Streaming,
                exclusive: false,
            }),
            mode_changed: Condvar::new(),
            stop: AtomicBool::new(false),
            frames,
            profiles,
        });

        let producer = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name("camera-capture".to_string())
                .spawn(move || producer_loop(shared))
                .map_err(|e| StageError::CameraFault(format!("failed to spawn producer: {e}")))?
        };

        Ok(Self {
            shared,
            name,
            producer: Mutex::new(Some(producer)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CameraState {
        self.shared.state()
    }

    pub fn frames(&self) -> &Arc<FrameBuffer> {
        &self.shared.frames
    }

    /// Pause streaming, capture one still frame, and resume streaming.
    ///
    /// Blocks for the whole sequence; call from a blocking context.
    pub fn capture_still(&self) -> Result<CapturedFrame, StageError> {
        let _exclusive = ExclusiveGuard::acquire(&self.shared, false)?;
        let start = Instant::now();
        info!("Still capture requested");

        let result = {
            let mut device = self.shared.lock_device();
            // The producer may have faulted the camera while we waited for the device
            match self.shared.state() {
                CameraState::Stopped => Err(StageError::ShuttingDown),
                CameraState::Faulted => Err(StageError::CameraFault(
                    "camera is faulted and must be reinitialized".to_string(),
                )),
                _ => self.shared.still_sequence(device.as_mut()),
            }
        };

        match &result {
            Ok(frame) => info!(
                "Still capture {}x{} ({} bytes) in {:.1}ms",
                frame.width,
                frame.height,
                frame.jpeg_data.len(),
                start.elapsed().as_secs_f64() * 1000.0
            ),
            Err(e) => warn!("Still capture failed: {}", e),
        }

        result
    }

    /// Reconfigure the device for video and resume streaming.
    ///
    /// This is the only way out of [`CameraState::Faulted`].
    pub fn reinitialize(&self) -> Result<CameraState, StageError> {
        let _exclusive = ExclusiveGuard::acquire(&self.shared, true)?;
        info!("Reinitializing camera");

        let mut device = self.shared.lock_device();
        if self.shared.state() == CameraState::Stopped {
            return Err(StageError::ShuttingDown);
        }
        self.shared.set_state(CameraState::Reconfiguring);

        match device.configure(&self.shared.profiles.video) {
            Ok(()) => {
                self.shared.set_state(CameraState::Streaming);
                info!("Camera reinitialized");
                Ok(CameraState::Streaming)
            }
            Err(e) => {
                error!("Camera reinitialization failed: {}", e);
                self.shared.set_state(CameraState::Faulted);
                Err(StageError::CameraFault(format!(
                    "reinitialization failed: {e}"
                )))
            }
        }
    }

    /// Stop the producer thread and wait for it to exit.
    pub fn stop(&self) {
        {
            let mut mode = self.shared.lock_mode();
            self.shared.stop.store(true, Ordering::SeqCst);
            mode.state = CameraState::Stopped;
        }
        self.shared.mode_changed.notify_all();

        let handle = self
            .producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Camera producer thread panicked");
            }
            info!("Camera producer stopped");
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn producer_loop(shared: Arc<Shared>) {
    debug!("Camera producer started");
    let mut published = 0u64;

    while !shared.stop.load(Ordering::SeqCst) {
        if !shared.wait_for_streaming() {
            continue;
        }

        let mut device = shared.lock_device();

        // An exclusive operation may have claimed the camera while we waited
        if !shared.producer_may_capture() {
            continue;
        }

        match device.capture_frame() {
            Ok(frame) => {
                let version = shared
                    .frames
                    .publish(frame.jpeg_data, frame.width, frame.height);
                published += 1;
                tracing::trace!("Published frame {}", version);
            }
            Err(e) => {
                shared.recover(device.as_mut(), e);
            }
        }
    }

    debug!("Camera producer exiting after {} frames", published);
}
