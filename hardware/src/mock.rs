//! Recording stand-ins for the GPIO outputs.
//!
//! Every write is appended to a shared log with a timestamp, so tests can check
//! pulse ordering without hardware. The mock server uses a bounded log.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::actuator::{ActuatorError, ActuatorResult, CoilOutput, IlluminationOutput};

/// A single coil write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoilEvent {
    pub at: Instant,
    pub levels: [bool; 4],
}

impl CoilEvent {
    /// True for the all-off pattern written at the end of a move.
    pub fn is_release(&self) -> bool {
        self.levels == [false; 4]
    }
}

#[derive(Debug, Default)]
struct CoilHistory {
    events: VecDeque<CoilEvent>,
    writes: usize,
}

/// Shared log behind a [`RecordingCoils`].
///
/// Keeps at most `limit` of the most recent writes; [`writes`](Self::writes)
/// counts every accepted write regardless.
#[derive(Debug)]
pub struct CoilLog {
    history: Mutex<CoilHistory>,
    limit: usize,
    fail_after: AtomicUsize,
}

impl CoilLog {
    fn with_limit(limit: usize) -> Self {
        Self {
            history: Mutex::new(CoilHistory::default()),
            limit: limit.max(1),
            fail_after: AtomicUsize::new(usize::MAX),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CoilHistory> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the retained writes, oldest first.
    pub fn events(&self) -> Vec<CoilEvent> {
        self.lock().events.iter().copied().collect()
    }

    /// Total writes accepted so far, including ones no longer retained.
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    /// Number of retained energizing writes (releases excluded).
    pub fn pulse_count(&self) -> usize {
        self.lock().events.iter().filter(|e| !e.is_release()).count()
    }

    /// Accept `writes` more writes, then fail every one after that.
    pub fn fail_after(&self, writes: usize) {
        let accepted = self.writes();
        self.fail_after
            .store(accepted.saturating_add(writes), Ordering::SeqCst);
    }
}

impl Default for CoilLog {
    fn default() -> Self {
        Self::with_limit(usize::MAX)
    }
}

/// Coil output that records instead of driving lines.
#[derive(Debug, Default)]
pub struct RecordingCoils {
    log: Arc<CoilLog>,
}

impl RecordingCoils {
    /// Record every write.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record only the most recent `limit` writes, for long-running mock servers.
    pub fn bounded(limit: usize) -> Self {
        Self {
            log: Arc::new(CoilLog::with_limit(limit)),
        }
    }

    /// Handle to the write log, valid after the coils are moved into a motor.
    pub fn log(&self) -> Arc<CoilLog> {
        self.log.clone()
    }
}

impl CoilOutput for RecordingCoils {
    fn set_coils(&mut self, levels: [bool; 4]) -> ActuatorResult<()> {
        let mut history = self.log.lock();

        if history.writes >= self.log.fail_after.load(Ordering::SeqCst) {
            return Err(ActuatorError::Disconnected(
                "injected coil failure".to_string(),
            ));
        }

        if history.events.len() >= self.log.limit {
            history.events.pop_front();
        }
        history.events.push_back(CoilEvent {
            at: Instant::now(),
            levels,
        });
        history.writes += 1;
        Ok(())
    }
}

/// Shared log behind a [`RecordingIllumination`].
#[derive(Debug, Default)]
pub struct DutyLog {
    current: AtomicU8,
    history: Mutex<Vec<u8>>,
}

impl DutyLog {
    /// Last duty written.
    pub fn current(&self) -> u8 {
        self.current.load(Ordering::SeqCst)
    }

    /// Every duty written, oldest first.
    pub fn history(&self) -> Vec<u8> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Illumination output that records duty values.
#[derive(Debug, Default)]
pub struct RecordingIllumination {
    log: Arc<DutyLog>,
}

impl RecordingIllumination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Arc<DutyLog> {
        self.log.clone()
    }
}

impl IlluminationOutput for RecordingIllumination {
    fn set_duty(&mut self, duty: u8) -> ActuatorResult<()> {
        self.log.current.store(duty, Ordering::SeqCst);
        self.log
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duty);
        Ok(())
    }
}
