//! Stage motion and illumination.
//!
//! Each axis owns a worker thread with a FIFO of step jobs, so moves on one axis run
//! strictly in submission order while different axes run concurrently. A request
//! returns as soon as its jobs are queued; callers that need completion hold on to
//! the [`MoveReceipt`].
//!
//! Positions are never tracked. The steppers are open loop and the controller only
//! knows which step counts it was asked to pulse.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use hardware::{Direction, IlluminationOutput, StepRun, StepperMotor, MAX_DUTY};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::error::StageError;

/// One of the three stage axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    fn actuator(self) -> String {
        format!("{self} axis")
    }
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::X => write!(f, "x"),
            Axis::Y => write!(f, "y"),
            Axis::Z => write!(f, "z"),
        }
    }
}

type MoveResult = Result<StepRun, StageError>;

struct AxisJob {
    steps: u64,
    direction: Direction,
    done: oneshot::Sender<MoveResult>,
}

#[derive(Default)]
struct AxisStatus {
    queued: AtomicUsize,
    last_fault: Mutex<Option<String>>,
}

impl AxisStatus {
    fn set_fault(&self, fault: Option<String>) {
        *self.last_fault.lock().unwrap_or_else(PoisonError::into_inner) = fault;
    }

    fn fault(&self) -> Option<String> {
        self.last_fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

struct AxisWorker {
    axis: Axis,
    jobs: Mutex<Option<mpsc::Sender<AxisJob>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    status: Arc<AxisStatus>,
}

impl AxisWorker {
    fn spawn(axis: Axis, motor: StepperMotor) -> Result<Self, StageError> {
        let (tx, rx) = mpsc::channel();
        let status = Arc::new(AxisStatus::default());

        let handle = {
            let status = status.clone();
            std::thread::Builder::new()
                .name(format!("axis-{axis}"))
                .spawn(move || axis_loop(axis, motor, rx, status))
                .map_err(|e| StageError::Actuator {
                    actuator: axis.actuator(),
                    message: format!("failed to spawn worker: {e}"),
                })?
        };

        Ok(Self {
            axis,
            jobs: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            status,
        })
    }

    fn lock_jobs(&self) -> MutexGuard<'_, Option<mpsc::Sender<AxisJob>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn submit(
        &self,
        sender: &mpsc::Sender<AxisJob>,
        steps: u64,
        direction: Direction,
    ) -> Result<oneshot::Receiver<MoveResult>, StageError> {
        let (done, receipt) = oneshot::channel();
        self.status.queued.fetch_add(1, Ordering::SeqCst);
        if sender
            .send(AxisJob {
                steps,
                direction,
                done,
            })
            .is_err()
        {
            self.status.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(StageError::Actuator {
                actuator: self.axis.actuator(),
                message: "axis worker is not running".to_string(),
            });
        }

        Ok(receipt)
    }

    fn shutdown(&self) {
        self.lock_jobs().take();

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("{} axis worker panicked", self.axis);
            }
        }
    }
}

fn axis_loop(
    axis: Axis,
    mut motor: StepperMotor,
    jobs: mpsc::Receiver<AxisJob>,
    status: Arc<AxisStatus>,
) {
    debug!("{} axis worker started", axis);

    // Queued jobs still run after shutdown is requested; recv fails once the
    // sender is gone and the queue is drained.
    while let Ok(job) = jobs.recv() {
        let result = motor.run(job.steps, job.direction).map_err(|e| {
            error!("{} axis move failed: {}", axis, e);
            StageError::Actuator {
                actuator: axis.actuator(),
                message: e.to_string(),
            }
        });

        match &result {
            Ok(run) => {
                debug!(
                    "{} axis moved {} steps {:?} in {:?}",
                    axis,
                    run.steps,
                    run.direction,
                    run.finished - run.started
                );
                status.set_fault(None);
            }
            Err(e) => status.set_fault(Some(e.to_string())),
        }

        status.queued.fetch_sub(1, Ordering::SeqCst);
        // Receiver dropped means nobody is waiting for this move
        let _ = job.done.send(result);
    }

    debug!("{} axis worker exiting", axis);
}

/// Completion handles for the axis jobs created by one move request.
#[derive(Debug)]
pub struct MoveReceipt {
    pending: Vec<(Axis, oneshot::Receiver<MoveResult>)>,
}

impl MoveReceipt {
    /// Axes that received a job, in X, Y, Z order.
    pub fn axes(&self) -> Vec<Axis> {
        self.pending.iter().map(|(axis, _)| *axis).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Wait for every axis job to finish.
    ///
    /// Returns the first failure, after all jobs have completed.
    pub async fn wait(self) -> Result<Vec<(Axis, StepRun)>, StageError> {
        let mut runs = Vec::with_capacity(self.pending.len());
        let mut first_error = None;

        for (axis, receiver) in self.pending {
            match receiver.await {
                Ok(Ok(run)) => runs.push((axis, run)),
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(_) => {
                    first_error.get_or_insert(StageError::ShuttingDown);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(runs),
        }
    }

    /// Blocking variant of [`wait`](Self::wait) for non-async callers.
    pub fn wait_blocking(self) -> Result<Vec<(Axis, StepRun)>, StageError> {
        let mut runs = Vec::with_capacity(self.pending.len());
        let mut first_error = None;

        for (axis, receiver) in self.pending {
            match receiver.blocking_recv() {
                Ok(Ok(run)) => runs.push((axis, run)),
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(_) => {
                    first_error.get_or_insert(StageError::ShuttingDown);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(runs),
        }
    }
}

/// Dispatches step requests to the axis workers and owns the illumination output.
pub struct MotionController {
    axes: [AxisWorker; 3],
    illumination: Mutex<Box<dyn IlluminationOutput>>,
    duty: Mutex<u8>,
}

impl MotionController {
    /// Spawn one worker per axis. The LED is left untouched until the first
    /// [`set_illumination`](Self::set_illumination).
    pub fn new(
        x: StepperMotor,
        y: StepperMotor,
        z: StepperMotor,
        illumination: Box<dyn IlluminationOutput>,
    ) -> Result<Self, StageError> {
        let axes = [
            AxisWorker::spawn(Axis::X, x)?,
            AxisWorker::spawn(Axis::Y, y)?,
            AxisWorker::spawn(Axis::Z, z)?,
        ];

        Ok(Self {
            axes,
            illumination: Mutex::new(illumination),
            duty: Mutex::new(0),
        })
    }

    fn worker(&self, axis: Axis) -> &AxisWorker {
        &self.axes[axis.index()]
    }

    /// Queue a relative move on every axis with a nonzero count.
    ///
    /// Negative counts run counter-clockwise. Zero axes are skipped entirely, so an
    /// all-zero request queues nothing. Returns once the jobs are queued.
    ///
    /// A request is accepted on all of its axes or on none: every queue is locked
    /// before the first job is sent, so a concurrent shutdown cannot split it.
    pub fn move_relative(&self, x: i64, y: i64, z: i64) -> Result<MoveReceipt, StageError> {
        let moves: Vec<_> = Axis::ALL
            .into_iter()
            .zip([x, y, z])
            .filter_map(|(axis, steps)| {
                Direction::from_signed(steps).map(|(direction, steps)| (axis, direction, steps))
            })
            .collect();

        // Always X, Y, Z order; shutdown takes one queue lock at a time
        let queues: Vec<_> = self.axes.iter().map(AxisWorker::lock_jobs).collect();
        if moves.iter().any(|(axis, _, _)| queues[axis.index()].is_none()) {
            return Err(StageError::ShuttingDown);
        }

        let mut pending = Vec::with_capacity(moves.len());
        for (axis, direction, magnitude) in moves {
            let Some(sender) = queues[axis.index()].as_ref() else {
                return Err(StageError::ShuttingDown);
            };
            let receiver = self.worker(axis).submit(sender, magnitude, direction)?;
            pending.push((axis, receiver));
        }
        drop(queues);

        if pending.is_empty() {
            debug!("Move request with no steps");
        } else {
            info!("Queued move x={} y={} z={}", x, y, z);
        }

        Ok(MoveReceipt { pending })
    }

    /// Queue a relative move on a single axis.
    pub fn move_axis(&self, axis: Axis, steps: i64) -> Result<MoveReceipt, StageError> {
        let mut counts = [0i64; 3];
        counts[axis.index()] = steps;
        self.move_relative(counts[0], counts[1], counts[2])
    }

    /// Set the LED duty, clamping `level` into `0..=255`.
    ///
    /// Returns the duty actually applied.
    pub fn set_illumination(&self, level: i64) -> Result<u8, StageError> {
        let duty = level.clamp(0, MAX_DUTY as i64) as u8;
        if duty as i64 != level {
            warn!("Illumination level {} clamped to {}", level, duty);
        }

        let mut output = self
            .illumination
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        output.set_duty(duty).map_err(|e| StageError::Actuator {
            actuator: "illumination".to_string(),
            message: e.to_string(),
        })?;

        *self.duty.lock().unwrap_or_else(PoisonError::into_inner) = duty;
        info!("Illumination set to {}", duty);
        Ok(duty)
    }

    /// Last duty successfully applied.
    pub fn illumination(&self) -> u8 {
        *self.duty.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Jobs submitted to `axis` that have not finished yet.
    pub fn queued(&self, axis: Axis) -> usize {
        self.worker(axis).status.queued.load(Ordering::SeqCst)
    }

    /// Error from the most recent move on `axis`, cleared by the next success.
    pub fn last_fault(&self, axis: Axis) -> Option<String> {
        self.worker(axis).status.fault()
    }

    /// Stop accepting moves, let queued moves finish, and join the workers.
    pub fn shutdown(&self) {
        for worker in &self.axes {
            worker.shutdown();
        }
    }
}

impl Drop for MotionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
