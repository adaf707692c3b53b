//! Stage server with a synthetic camera and recording actuators.
//!
//! Runs on any machine. Motor and LED writes are only logged.

use std::time::Duration;

use clap::Parser;
use hardware::camera::mock::MockCamera;
use hardware::mock::{RecordingCoils, RecordingIllumination};
use hardware::StepperMotor;
use stage_server::{run_server, ServerArgs, StageHardware};
use tracing::info;

/// Coil writes kept per axis; older ones are discarded.
const COIL_LOG_LIMIT: usize = 1024;

#[derive(Parser, Debug)]
#[command(author, version, about = "Stage HTTP server with a mock camera and motors")]
struct Args {
    #[command(flatten)]
    server: ServerArgs,

    /// Skip the per-step delay so moves finish instantly
    #[arg(long)]
    fast_motors: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = args.server.load_config()?;

    let step_delay = if args.fast_motors {
        Duration::ZERO
    } else {
        config.motors.step_delay()
    };

    info!(
        "Mock camera: video {}, still {}, frame interval {}ms",
        config.camera.video, config.camera.still, config.camera.mock_frame_interval_ms
    );
    let camera = MockCamera::new(Duration::from_millis(config.camera.mock_frame_interval_ms));

    let hardware = StageHardware {
        camera: Box::new(camera),
        x: StepperMotor::new("x", Box::new(RecordingCoils::bounded(COIL_LOG_LIMIT)), step_delay),
        y: StepperMotor::new("y", Box::new(RecordingCoils::bounded(COIL_LOG_LIMIT)), step_delay),
        z: StepperMotor::new("z", Box::new(RecordingCoils::bounded(COIL_LOG_LIMIT)), step_delay),
        illumination: Box::new(RecordingIllumination::new()),
    };

    run_server(hardware, config, args.server).await
}
