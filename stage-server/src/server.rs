//! HTTP surface of the stage.
//!
//! Handlers are stateless: every request goes to the shared [`CameraSource`],
//! [`FrameBuffer`] or [`MotionController`] held in [`AppState`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use hardware::{CameraDevice, Direction, IlluminationOutput, StepperMotor};
use serde::{Deserialize, Serialize};
use shared::{FrameBuffer, StageConfig};
use tokio::sync::watch;
use tracing::info;

use crate::args::ServerArgs;
use crate::camera_source::{CameraSource, CameraState};
use crate::error::StageError;
use crate::mjpeg::live_feed_response;
use crate::motion::{Axis, MotionController};

/// Shared handles injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub frames: Arc<FrameBuffer>,
    pub camera: Arc<CameraSource>,
    pub motion: Arc<MotionController>,
    pub shutdown: watch::Receiver<bool>,
    pub keepalive: Duration,
}

/// Drivers the server takes ownership of at startup.
pub struct StageHardware {
    pub camera: Box<dyn CameraDevice>,
    pub x: StepperMotor,
    pub y: StepperMotor,
    pub z: StepperMotor,
    pub illumination: Box<dyn IlluminationOutput>,
}

#[derive(Debug, Deserialize)]
struct StepParams {
    #[serde(default)]
    x: i64,
    #[serde(default)]
    y: i64,
    #[serde(default)]
    z: i64,
    /// Hold the response until every axis finished
    #[serde(default)]
    wait: bool,
}

#[derive(Debug, Deserialize)]
struct LightParams {
    brightness: i64,
}

#[derive(Debug, Serialize)]
struct QueuedResponse {
    queued: Vec<Axis>,
}

#[derive(Debug, Serialize)]
struct AxisRunReport {
    axis: Axis,
    steps: u64,
    direction: &'static str,
    duration_ms: f64,
}

#[derive(Debug, Serialize)]
struct MovedResponse {
    moved: Vec<AxisRunReport>,
}

#[derive(Debug, Serialize)]
struct LightResponse {
    brightness: u8,
}

#[derive(Debug, Serialize)]
struct CameraResetResponse {
    state: CameraState,
}

#[derive(Debug, Serialize)]
struct CameraStatus {
    name: String,
    state: CameraState,
    frame_version: u64,
    live_clients: usize,
}

#[derive(Debug, Serialize)]
struct AxisReport {
    axis: Axis,
    queued: usize,
    last_fault: Option<String>,
}

/// Snapshot served by `GET /status`.
#[derive(Debug, Serialize)]
struct StatusReport {
    camera: CameraStatus,
    axes: Vec<AxisReport>,
    illumination: u8,
}

fn invalid_query(rejection: QueryRejection) -> StageError {
    StageError::InvalidParameter(rejection.body_text())
}

fn direction_name(direction: Direction) -> &'static str {
    match direction {
        Direction::Clockwise => "clockwise",
        Direction::CounterClockwise => "counter_clockwise",
    }
}

async fn live_feed_handler(State(state): State<AppState>) -> Response {
    live_feed_response(state.frames.clone(), state.shutdown.clone(), state.keepalive)
}

async fn still_handler(State(state): State<AppState>) -> Result<Response, StageError> {
    let camera = state.camera.clone();
    let frame = tokio::task::spawn_blocking(move || camera.capture_still())
        .await
        .map_err(|e| StageError::CameraFault(format!("still capture task failed: {e}")))??;

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        frame.jpeg_data,
    )
        .into_response())
}

async fn step_handler(
    State(state): State<AppState>,
    params: Result<Query<StepParams>, QueryRejection>,
) -> Result<Response, StageError> {
    let Query(params) = params.map_err(invalid_query)?;
    let receipt = state.motion.move_relative(params.x, params.y, params.z)?;

    if !params.wait {
        let queued = receipt.axes();
        return Ok((StatusCode::ACCEPTED, Json(QueuedResponse { queued })).into_response());
    }

    let moved = receipt
        .wait()
        .await?
        .into_iter()
        .map(|(axis, run)| AxisRunReport {
            axis,
            steps: run.steps,
            direction: direction_name(run.direction),
            duration_ms: (run.finished - run.started).as_secs_f64() * 1000.0,
        })
        .collect();

    Ok(Json(MovedResponse { moved }).into_response())
}

async fn set_light_handler(
    State(state): State<AppState>,
    params: Result<Query<LightParams>, QueryRejection>,
) -> Result<Json<LightResponse>, StageError> {
    let Query(params) = params.map_err(invalid_query)?;
    let motion = state.motion.clone();

    // Drivers may block briefly on the output line
    let brightness = tokio::task::spawn_blocking(move || motion.set_illumination(params.brightness))
        .await
        .map_err(|e| StageError::Actuator {
            actuator: "illumination".to_string(),
            message: format!("task failed: {e}"),
        })??;

    Ok(Json(LightResponse { brightness }))
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusReport> {
    let axes = Axis::ALL
        .into_iter()
        .map(|axis| AxisReport {
            axis,
            queued: state.motion.queued(axis),
            last_fault: state.motion.last_fault(axis),
        })
        .collect();

    Json(StatusReport {
        camera: CameraStatus {
            name: state.camera.name().to_string(),
            state: state.camera.state(),
            frame_version: state.frames.version(),
            live_clients: state.frames.waiter_count(),
        },
        axes,
        illumination: state.motion.illumination(),
    })
}

async fn camera_reset_handler(
    State(state): State<AppState>,
) -> Result<Json<CameraResetResponse>, StageError> {
    let camera = state.camera.clone();
    let state = tokio::task::spawn_blocking(move || camera.reinitialize())
        .await
        .map_err(|e| StageError::CameraFault(format!("reinitialize task failed: {e}")))??;

    Ok(Json(CameraResetResponse { state }))
}

/// Build the router over `state`.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(live_feed_handler))
        .route("/still", get(still_handler))
        .route("/step", post(step_handler))
        .route("/set_light", post(set_light_handler))
        .route("/status", get(status_handler))
        .route("/camera/reset", post(camera_reset_handler))
        .with_state(state)
}

/// The running services behind the router.
///
/// Owns the camera producer thread and the axis workers. Call
/// [`shutdown`](Self::shutdown) to end live feeds and stop the hardware threads.
pub struct StageServer {
    state: AppState,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl StageServer {
    /// Start the camera and motion services and apply the startup illumination.
    pub fn start(
        hardware: StageHardware,
        config: &StageConfig,
        keepalive: Duration,
    ) -> Result<Self, StageError> {
        let frames = Arc::new(FrameBuffer::new());
        let camera = CameraSource::start(
            hardware.camera,
            (&config.camera).into(),
            frames.clone(),
        )?;
        let motion = MotionController::new(
            hardware.x,
            hardware.y,
            hardware.z,
            hardware.illumination,
        )?;
        motion.set_illumination(config.illumination.initial_duty as i64)?;

        let (shutdown_tx, shutdown) = watch::channel(false);

        Ok(Self {
            state: AppState {
                frames,
                camera: Arc::new(camera),
                motion: Arc::new(motion),
                shutdown,
                keepalive,
            },
            shutdown_tx: Arc::new(shutdown_tx),
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// A future that resolves once [`shutdown`](Self::shutdown) has been called.
    pub fn shutdown_signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.state.shutdown.clone();
        async move {
            // An error means the server was dropped, which is also a shutdown
            let _ = rx.wait_for(|stopping| *stopping).await;
        }
    }

    /// End every live feed, stop the camera producer and drain the axis queues.
    ///
    /// Blocks while hardware threads are joined.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        self.state.camera.stop();
        self.state.motion.shutdown();
    }
}

/// Serve the stage over HTTP until Ctrl-C.
pub async fn run_server(
    hardware: StageHardware,
    config: StageConfig,
    args: ServerArgs,
) -> anyhow::Result<()> {
    let server = StageServer::start(hardware, &config, args.keepalive())
        .context("Failed to start stage services")?;

    let addr: SocketAddr = format!("{}:{}", args.bind_address, args.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address: {e}"))?;

    info!("Starting server on http://{}", addr);
    info!("Live feed: http://{}/", addr);
    info!("Still capture: http://{}/still", addr);
    info!("Move: POST http://{}/step?x=&y=&z=", addr);
    info!("Illumination: POST http://{}/set_light?brightness=", addr);
    info!("Status: http://{}/status", addr);
    info!("Camera reset: POST http://{}/camera/reset", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let shutdown_tx = server.shutdown_tx.clone();
    let result = axum::serve(listener, server.router())
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
            shutdown_tx.send_replace(true);
        })
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {e}"));

    tokio::task::spawn_blocking(move || server.shutdown())
        .await
        .context("Failed to stop hardware threads")?;
    info!("Server stopped");

    result
}
