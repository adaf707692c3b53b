//! Stage server on the stage computer: V4L2 camera, GPIO steppers and LED.

use anyhow::Context;
use clap::Parser;
use hardware::camera::v4l2::V4l2Camera;
use hardware::gpio::{GpioCoils, SoftPwm};
use hardware::StepperMotor;
use stage_server::{run_server, ServerArgs, StageHardware};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Stage HTTP server for the camera stage hardware")]
struct Args {
    #[command(flatten)]
    server: ServerArgs,

    /// Override the camera device from the config
    #[arg(short = 'd', long)]
    device_path: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut config = args.server.load_config()?;
    if let Some(path) = args.device_path {
        config.camera.device_path = path;
    }

    info!("Opening camera {}", config.camera.device_path);
    let camera = V4l2Camera::open(&config.camera.device_path)
        .with_context(|| format!("Failed to open camera {}", config.camera.device_path))?;

    let motors = &config.motors;
    let step_delay = motors.step_delay();
    let axis = |name: &str, pins: [u32; 4]| -> anyhow::Result<StepperMotor> {
        let coils = GpioCoils::request(&motors.gpio_chip, pins)
            .with_context(|| format!("Failed to request {name} axis pins {pins:?}"))?;
        Ok(StepperMotor::new(name, Box::new(coils), step_delay))
    };
    let x = axis("x", motors.x_pins)?;
    let y = axis("y", motors.y_pins)?;
    let z = axis("z", motors.z_pins)?;

    let light = &config.illumination;
    let illumination = SoftPwm::start(
        &motors.gpio_chip,
        light.pin,
        light.pwm_frequency_hz,
        light.initial_duty,
    )
    .with_context(|| format!("Failed to start PWM on pin {}", light.pin))?;

    let hardware = StageHardware {
        camera: Box::new(camera),
        x,
        y,
        z,
        illumination: Box::new(illumination),
    };

    run_server(hardware, config, args.server).await
}
