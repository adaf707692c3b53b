//! End-to-end tests of the HTTP surface against the mock camera and recording
//! actuators, over real TCP connections.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hardware::camera::mock::{MockCamera, MockFaults};
use hardware::mock::{CoilLog, DutyLog, RecordingCoils, RecordingIllumination};
use hardware::StepperMotor;
use serde_json::Value;
use shared::jpeg::looks_like_jpeg;
use shared::{Resolution, StageConfig};
use stage_server::{CameraState, StageHardware, StageServer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

struct TestStage {
    addr: SocketAddr,
    server: Arc<StageServer>,
    faults: Arc<MockFaults>,
    x_coils: Arc<CoilLog>,
    led: Arc<DutyLog>,
}

struct HttpResponse {
    status: u16,
    headers: String,
    body: Vec<u8>,
}

impl HttpResponse {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }

    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("response body is JSON")
    }
}

fn test_config() -> StageConfig {
    let mut config = StageConfig::default();
    config.camera.video = Resolution::new(64, 48);
    config.camera.still = Resolution::new(160, 120);
    config.camera.mock_frame_interval_ms = 10;
    config.illumination.initial_duty = 200;
    config
}

async fn start_stage(keepalive: Duration) -> TestStage {
    let config = test_config();

    let camera = MockCamera::new(Duration::from_millis(config.camera.mock_frame_interval_ms));
    let faults = camera.faults();
    let x_coils = RecordingCoils::new();
    let x_log = x_coils.log();
    let led = RecordingIllumination::new();
    let led_log = led.log();

    let hardware = StageHardware {
        camera: Box::new(camera),
        x: StepperMotor::new("x", Box::new(x_coils), Duration::ZERO),
        y: StepperMotor::new("y", Box::new(RecordingCoils::new()), Duration::ZERO),
        z: StepperMotor::new("z", Box::new(RecordingCoils::new()), Duration::ZERO),
        illumination: Box::new(led),
    };

    let server = Arc::new(StageServer::start(hardware, &config, keepalive).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = server.router();
    let shutdown = server.shutdown_signal();
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .unwrap();
    });

    TestStage {
        addr,
        server,
        faults,
        x_coils: x_log,
        led: led_log,
    }
}

fn split_response(raw: &[u8]) -> HttpResponse {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("complete response head");
    let head = String::from_utf8_lossy(&raw[..split]).to_string();
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status code");

    HttpResponse {
        status,
        headers: head,
        body: raw[split + 4..].to_vec(),
    }
}

async fn send_request(addr: SocketAddr, method: &str, path: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    stream
}

async fn request(addr: SocketAddr, method: &str, path: &str) -> HttpResponse {
    let mut stream = send_request(addr, method, path).await;
    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut raw))
        .await
        .expect("response within timeout")
        .unwrap();
    split_response(&raw)
}

fn count_parts(raw: &[u8]) -> usize {
    raw.windows(7).filter(|w| *w == b"--FRAME").count()
}

/// Read from a live feed until at least `parts` multipart sections arrived.
async fn read_parts(stream: &mut TcpStream, raw: &mut Vec<u8>, parts: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut chunk = [0u8; 8192];
    while count_parts(raw) < parts {
        assert!(Instant::now() < deadline, "live feed stalled");
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut chunk))
            .await
            .expect("live feed data")
            .unwrap();
        assert!(n > 0, "live feed closed early");
        raw.extend_from_slice(&chunk[..n]);
    }
}

async fn wait_for_waiters(stage: &TestStage, expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while stage.server.state().frames.waiter_count() != expected {
        assert!(
            Instant::now() < deadline,
            "waiter count stuck at {}",
            stage.server.state().frames.waiter_count()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_live_feed_streams_multipart_jpeg() {
    let stage = start_stage(Duration::from_secs(1)).await;

    let mut stream = send_request(stage.addr, "GET", "/").await;
    let mut raw = Vec::new();
    read_parts(&mut stream, &mut raw, 3).await;

    let response = split_response(&raw);
    assert_eq!(response.status, 200);
    assert_eq!(
        response.header("content-type"),
        Some("multipart/x-mixed-replace; boundary=FRAME")
    );
    assert_eq!(
        response.header("cache-control"),
        Some("no-cache, no-store, must-revalidate")
    );

    let text = String::from_utf8_lossy(&response.body);
    assert!(text.contains("Content-Type: image/jpeg\r\nContent-Length: "));

    drop(stream);
    wait_for_waiters(&stage, 0).await;
    stage.server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_live_clients_then_disconnect() {
    let stage = start_stage(Duration::from_secs(1)).await;

    let mut clients = Vec::new();
    for _ in 0..4 {
        let mut stream = send_request(stage.addr, "GET", "/").await;
        let mut raw = Vec::new();
        read_parts(&mut stream, &mut raw, 2).await;
        clients.push(stream);
    }

    drop(clients);
    wait_for_waiters(&stage, 0).await;
    stage.server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disconnect_while_camera_faulted_releases_feed() {
    let stage = start_stage(Duration::from_millis(100)).await;

    // Fault the camera so the producer stops publishing
    stage.faults.fail_next_configures(2);
    assert_eq!(request(stage.addr, "GET", "/still").await.status, 500);
    assert_eq!(stage.server.state().camera.state(), CameraState::Faulted);
    let version = stage.server.state().frames.version();

    let mut stream = send_request(stage.addr, "GET", "/").await;
    let mut raw = Vec::new();
    read_parts(&mut stream, &mut raw, 1).await;
    wait_for_waiters(&stage, 1).await;

    // No new frame will arrive; the dead connection shows up on a keepalive write
    drop(stream);
    wait_for_waiters(&stage, 0).await;
    assert_eq!(stage.server.state().frames.version(), version);
    assert_eq!(stage.server.state().camera.state(), CameraState::Faulted);

    stage.server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_ends_live_feed() {
    let stage = start_stage(Duration::from_secs(1)).await;

    let mut stream = send_request(stage.addr, "GET", "/").await;
    let mut raw = Vec::new();
    read_parts(&mut stream, &mut raw, 1).await;

    let server = stage.server.clone();
    tokio::task::spawn_blocking(move || server.shutdown())
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut raw))
        .await
        .expect("feed should end after shutdown")
        .unwrap();
    assert_eq!(stage.server.state().camera.state(), CameraState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_still_capture() {
    let stage = start_stage(Duration::from_secs(1)).await;

    let response = request(stage.addr, "GET", "/still").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-type"), Some("image/jpeg"));
    assert!(looks_like_jpeg(&response.body));
    assert_eq!(stage.faults.still_captures(), 1);

    let status = request(stage.addr, "GET", "/status").await.json();
    assert_eq!(status["camera"]["state"], "streaming");

    stage.server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stills_one_busy() {
    let stage = start_stage(Duration::from_secs(1)).await;
    stage.faults.set_still_delay(Duration::from_millis(300));

    let addr = stage.addr;
    let first = tokio::spawn(async move { request(addr, "GET", "/still").await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = request(addr, "GET", "/still").await;
    let first = first.await.unwrap();

    assert_eq!(first.status, 200);
    assert_eq!(second.status, 503);
    assert_eq!(second.header("retry-after"), Some("1"));

    // Streaming resumes after the still
    let version = stage.server.state().frames.version();
    let deadline = Instant::now() + Duration::from_secs(3);
    while stage.server.state().frames.version() <= version {
        assert!(Instant::now() < deadline, "streaming did not resume");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    stage.server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_live_feed_keepalive_during_still() {
    let stage = start_stage(Duration::from_millis(50)).await;
    stage.faults.set_still_delay(Duration::from_millis(400));

    let mut stream = send_request(stage.addr, "GET", "/").await;
    let mut raw = Vec::new();
    read_parts(&mut stream, &mut raw, 1).await;

    let addr = stage.addr;
    let still = tokio::spawn(async move { request(addr, "GET", "/still").await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The producer is paused, but keepalive parts keep arriving
    let version = stage.server.state().frames.version();
    let before = count_parts(&raw);
    read_parts(&mut stream, &mut raw, before + 2).await;
    assert_eq!(stage.server.state().camera.state(), CameraState::StillCapturing);
    assert_eq!(stage.server.state().frames.version(), version);

    assert_eq!(still.await.unwrap().status, 200);
    drop(stream);
    stage.server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_camera_fault_and_reset() {
    let stage = start_stage(Duration::from_secs(1)).await;
    stage.faults.fail_next_configures(2);

    let response = request(stage.addr, "GET", "/still").await;
    assert_eq!(response.status, 500);

    let status = request(stage.addr, "GET", "/status").await.json();
    assert_eq!(status["camera"]["state"], "faulted");

    // Fails fast until reset
    assert_eq!(request(stage.addr, "GET", "/still").await.status, 500);

    let reset = request(stage.addr, "POST", "/camera/reset").await;
    assert_eq!(reset.status, 200);
    assert_eq!(reset.json()["state"], "streaming");

    assert_eq!(request(stage.addr, "GET", "/still").await.status, 200);
    stage.server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_step_fire_and_forget() {
    let stage = start_stage(Duration::from_secs(1)).await;

    let response = request(stage.addr, "POST", "/step?x=10&z=-5").await;
    assert_eq!(response.status, 202);
    assert_eq!(response.json()["queued"], serde_json::json!(["x", "z"]));

    let deadline = Instant::now() + Duration::from_secs(3);
    while stage.x_coils.pulse_count() < 10 {
        assert!(Instant::now() < deadline, "x axis never moved");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // No parameters is a no-op, not an error
    let response = request(stage.addr, "POST", "/step").await;
    assert_eq!(response.status, 202);
    assert_eq!(response.json()["queued"], serde_json::json!([]));

    stage.server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_step_wait_reports_runs() {
    let stage = start_stage(Duration::from_secs(1)).await;

    let response = request(stage.addr, "POST", "/step?y=-100&wait=true").await;
    assert_eq!(response.status, 200);

    let moved = response.json()["moved"].clone();
    assert_eq!(moved[0]["axis"], "y");
    assert_eq!(moved[0]["steps"], 100);
    assert_eq!(moved[0]["direction"], "counter_clockwise");

    stage.server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_step_actuator_failure() {
    let stage = start_stage(Duration::from_secs(1)).await;
    stage.x_coils.fail_after(0);

    let response = request(stage.addr, "POST", "/step?x=5&wait=true").await;
    assert_eq!(response.status, 500);

    let status = request(stage.addr, "GET", "/status").await.json();
    assert!(status["axes"][0]["last_fault"].is_string());
    assert!(status["axes"][1]["last_fault"].is_null());

    stage.server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_step_rejects_malformed_numbers() {
    let stage = start_stage(Duration::from_secs(1)).await;

    let response = request(stage.addr, "POST", "/step?x=abc").await;
    assert_eq!(response.status, 400);
    assert!(String::from_utf8_lossy(&response.body).starts_with("Invalid parameter"));
    assert!(stage.x_coils.events().is_empty());

    stage.server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_set_light_clamps() {
    let stage = start_stage(Duration::from_secs(1)).await;
    assert_eq!(stage.led.history(), vec![200]);

    let response = request(stage.addr, "POST", "/set_light?brightness=300").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.json()["brightness"], 255);

    let response = request(stage.addr, "POST", "/set_light?brightness=-10").await;
    assert_eq!(response.json()["brightness"], 0);

    assert_eq!(stage.led.history(), vec![200, 255, 0]);
    let status = request(stage.addr, "GET", "/status").await.json();
    assert_eq!(status["illumination"], 0);

    stage.server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_set_light_requires_brightness() {
    let stage = start_stage(Duration::from_secs(1)).await;

    assert_eq!(request(stage.addr, "POST", "/set_light").await.status, 400);
    assert_eq!(
        request(stage.addr, "POST", "/set_light?brightness=bright")
            .await
            .status,
        400
    );
    assert_eq!(stage.led.history(), vec![200]);

    stage.server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wrong_method() {
    let stage = start_stage(Duration::from_secs(1)).await;

    assert_eq!(request(stage.addr, "GET", "/step?x=1").await.status, 405);
    assert!(stage.x_coils.events().is_empty());

    stage.server.shutdown();
}
