//! GPIO character-device outputs for the stage (Linux only).
//!
//! Stepper coils are requested as one four-line output group so a phase change is
//! a single write. The LED has no hardware PWM channel on its pin, so
//! [`SoftPwm`] toggles the line from a dedicated thread.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use gpiod::{Chip, Lines, Options, Output};
use tracing::{info, warn};

use crate::actuator::{ActuatorError, ActuatorResult, CoilOutput, IlluminationOutput, MAX_DUTY};

const CONSUMER: &str = "stage-server";

/// Four stepper coil lines on a GPIO chip.
pub struct GpioCoils {
    lines: Lines<Output>,
}

impl GpioCoils {
    /// Request `pins` (IN1..IN4) on `chip` as outputs, all low.
    pub fn request(chip: &str, pins: [u32; 4]) -> ActuatorResult<Self> {
        let chip = Chip::new(chip)?;
        let options = Options::output(pins).values([false; 4]).consumer(CONSUMER);
        let lines = chip.request_lines(options)?;
        info!("Requested coil lines {:?}", pins);
        Ok(Self { lines })
    }
}

impl CoilOutput for GpioCoils {
    fn set_coils(&mut self, levels: [bool; 4]) -> ActuatorResult<()> {
        self.lines.set_values(levels)?;
        Ok(())
    }
}

/// Software PWM on a single GPIO line.
///
/// Spawns a toggling thread on creation. The thread is stopped and the line driven
/// low on drop.
pub struct SoftPwm {
    duty: Arc<AtomicU8>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SoftPwm {
    /// Request `pin` on `chip` and start toggling at `frequency_hz` with `duty`.
    pub fn start(chip: &str, pin: u32, frequency_hz: u32, duty: u8) -> ActuatorResult<Self> {
        let chip = Chip::new(chip)?;
        let options = Options::output([pin]).values([false]).consumer(CONSUMER);
        let line = chip.request_lines(options)?;

        let period = Duration::from_secs(1) / frequency_hz.max(1);
        let duty = Arc::new(AtomicU8::new(duty));
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let duty = duty.clone();
            let running = running.clone();
            std::thread::Builder::new()
                .name(format!("pwm-gpio{pin}"))
                .spawn(move || pwm_loop(line, period, duty, running))?
        };

        info!("Software PWM on GPIO {} at {} Hz", pin, frequency_hz);

        Ok(Self {
            duty,
            running,
            handle: Some(handle),
        })
    }
}

fn pwm_loop(line: Lines<Output>, period: Duration, duty: Arc<AtomicU8>, running: Arc<AtomicBool>) {
    while running.load(Ordering::Relaxed) {
        let level = duty.load(Ordering::Relaxed);
        let on = period * level as u32 / MAX_DUTY as u32;
        let off = period - on;

        let result = match level {
            0 => line.set_values([false]).map(|_| std::thread::sleep(period)),
            MAX_DUTY => line.set_values([true]).map(|_| std::thread::sleep(period)),
            _ => line
                .set_values([true])
                .map(|_| std::thread::sleep(on))
                .and_then(|_| line.set_values([false]))
                .map(|_| std::thread::sleep(off)),
        };

        if let Err(e) = result {
            warn!("PWM line write failed, stopping: {}", e);
            running.store(false, Ordering::Relaxed);
        }
    }

    if let Err(e) = line.set_values([false]) {
        warn!("Failed to drive PWM line low: {}", e);
    }
}

impl IlluminationOutput for SoftPwm {
    fn set_duty(&mut self, duty: u8) -> ActuatorResult<()> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(ActuatorError::Disconnected(
                "PWM thread stopped".to_string(),
            ));
        }
        self.duty.store(duty, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for SoftPwm {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("PWM thread panicked");
            }
        }
    }
}
