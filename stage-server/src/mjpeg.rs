//! MJPEG live feed over `multipart/x-mixed-replace`.
//!
//! Each connected client is an independent consumer of the [`FrameBuffer`]. It
//! remembers the last version it sent and waits for anything newer, so a slow
//! client skips frames instead of queueing them and never slows the camera down.
//!
//! Point an `<img src="/">` at the endpoint and the browser replaces the image as
//! each part arrives.

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::{BufMut, Bytes, BytesMut};
use shared::{Frame, FrameBuffer};
use tokio::sync::watch;
use tokio_stream::Stream;
use tracing::{debug, info};

/// Multipart boundary between JPEG parts.
pub const MJPEG_BOUNDARY: &str = "FRAME";

/// Content type announced for the live feed.
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=FRAME";

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Wrap one frame as a multipart section.
pub fn encode_part(frame: &Frame) -> Bytes {
    let header = format!(
        "--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        frame.jpeg_data.len()
    );

    let mut part = BytesMut::with_capacity(header.len() + frame.jpeg_data.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(&frame.jpeg_data);
    part.put_slice(b"\r\n");
    part.freeze()
}

enum FeedEvent {
    Frame(Frame),
    Idle,
    Shutdown,
}

/// Logs the client's lifetime; dropped when the response body is dropped.
struct FeedGuard {
    id: u64,
    connected: Instant,
    parts: u64,
}

impl FeedGuard {
    fn new() -> Self {
        let id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
        info!("Live feed client {} connected", id);
        Self {
            id,
            connected: Instant::now(),
            parts: 0,
        }
    }
}

impl Drop for FeedGuard {
    fn drop(&mut self) {
        info!(
            "Live feed client {} disconnected after {} parts in {:.1}s",
            self.id,
            self.parts,
            self.connected.elapsed().as_secs_f64()
        );
    }
}

/// Stream of multipart sections for one client.
///
/// The first part is the current frame, if any. When no new frame arrives within
/// `keepalive` the previous part is sent again so idle connections stay open
/// through proxies; a zero `keepalive` disables this. The stream ends once
/// `shutdown` turns true or its sender is dropped.
pub fn live_feed_stream(
    frames: Arc<FrameBuffer>,
    mut shutdown: watch::Receiver<bool>,
    keepalive: Duration,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    async_stream::stream! {
        let mut guard = FeedGuard::new();
        let mut seen = 0u64;
        let mut last_part: Option<Bytes> = None;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle_enabled = !keepalive.is_zero() && last_part.is_some();
            let event = tokio::select! {
                frame = frames.wait_newer(seen) => FeedEvent::Frame(frame),
                _ = shutdown.changed() => FeedEvent::Shutdown,
                _ = tokio::time::sleep(keepalive), if idle_enabled => FeedEvent::Idle,
            };

            let part = match event {
                FeedEvent::Frame(frame) => {
                    if frame.seq > seen + 1 && seen > 0 {
                        debug!(
                            "Live feed client {} skipped {} frames",
                            guard.id,
                            frame.seq - seen - 1
                        );
                    }
                    seen = frame.seq;
                    let part = encode_part(&frame);
                    last_part = Some(part.clone());
                    part
                }
                FeedEvent::Idle => match &last_part {
                    Some(part) => part.clone(),
                    None => continue,
                },
                // Loop back to re-read the flag; a dropped sender also ends the feed
                FeedEvent::Shutdown => {
                    if shutdown.has_changed().is_err() {
                        break;
                    }
                    continue;
                }
            };

            guard.parts += 1;
            yield Ok(part);
        }
    }
}

/// Build the streaming HTTP response for one client.
pub fn live_feed_response(
    frames: Arc<FrameBuffer>,
    shutdown: watch::Receiver<bool>,
    keepalive: Duration,
) -> Response {
    let body = Body::from_stream(live_feed_stream(frames, shutdown, keepalive));

    (
        [
            (header::CONTENT_TYPE, MJPEG_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        body,
    )
        .into_response()
}
