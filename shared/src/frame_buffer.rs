//! Latest-frame-wins broadcast buffer.
//!
//! A [`FrameBuffer`] holds exactly one frame: the most recent one published by the
//! camera producer. Every publish bumps a monotonic version counter and wakes all
//! waiting consumers. Consumers remember the version they last saw and ask for
//! anything newer, so a slow consumer silently skips intermediate frames instead of
//! building a backlog.
//!
//! # Waiting without lost wake-ups
//!
//! The version is compared under the same mutex the blocking waiters sleep on, and
//! async waiters register their [`Notify`] interest before checking the version. A
//! publish that lands between a consumer's check and its wait is therefore always
//! observed.
//!
//! ```
//! use bytes::Bytes;
//! use shared::frame_buffer::FrameBuffer;
//!
//! let buffer = FrameBuffer::new();
//! assert!(buffer.latest().is_none());
//!
//! let version = buffer.publish(Bytes::from_static(b"jpeg"), 4, 4);
//! let frame = buffer.newer_than(0).unwrap();
//! assert_eq!(frame.seq, version);
//! assert!(buffer.newer_than(version).is_none());
//! ```

use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Notify;

/// One encoded camera image as handed to consumers.
///
/// Cheap to clone: the JPEG payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Version assigned by the buffer at publish time (first frame is 1)
    pub seq: u64,
    /// JPEG-encoded image data
    pub jpeg_data: Bytes,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
}

#[derive(Debug, Default)]
struct Slot {
    version: u64,
    frame: Option<Frame>,
}

/// Single-slot broadcast buffer shared between one producer and many consumers.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    slot: Mutex<Slot>,
    published: Condvar,
    notify: Notify,
    waiters: AtomicUsize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the held frame and wake every waiter.
    ///
    /// The previous frame is dropped. Returns the version assigned to the new frame.
    pub fn publish(&self, jpeg_data: Bytes, width: u32, height: u32) -> u64 {
        let version = {
            let mut slot = self.lock();
            slot.version += 1;
            slot.frame = Some(Frame {
                seq: slot.version,
                jpeg_data,
                width,
                height,
            });
            slot.version
        };

        self.published.notify_all();
        self.notify.notify_waiters();
        version
    }

    /// Version of the most recent frame, 0 before the first publish.
    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// The most recent frame, if any has been published.
    pub fn latest(&self) -> Option<Frame> {
        self.lock().frame.clone()
    }

    /// The held frame if its version is greater than `seen`.
    pub fn newer_than(&self, seen: u64) -> Option<Frame> {
        let slot = self.lock();
        if slot.version > seen {
            slot.frame.clone()
        } else {
            None
        }
    }

    /// Number of consumers currently parked in [`wait_newer`](Self::wait_newer) or
    /// [`wait_newer_blocking`](Self::wait_newer_blocking).
    pub fn waiter_count(&self) -> usize {
        self.waiters.load(Ordering::SeqCst)
    }

    /// Block the calling thread until a frame newer than `seen` is published.
    ///
    /// Returns `None` if `timeout` elapses first, which lets callers poll a
    /// cancellation flag between waits.
    pub fn wait_newer_blocking(&self, seen: u64, timeout: Duration) -> Option<Frame> {
        let _waiting = WaiterGuard::register(&self.waiters);

        let slot = self.lock();
        let (slot, _) = self
            .published
            .wait_timeout_while(slot, timeout, |slot| slot.version <= seen)
            .unwrap_or_else(PoisonError::into_inner);

        if slot.version > seen {
            slot.frame.clone()
        } else {
            None
        }
    }

    /// Wait asynchronously until a frame newer than `seen` is published.
    ///
    /// Dropping the returned future deregisters the waiter immediately, so a
    /// cancelled consumer never needs another publish to release its resources.
    pub async fn wait_newer(&self, seen: u64) -> Frame {
        let _waiting = WaiterGuard::register(&self.waiters);

        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            if let Some(frame) = self.newer_than(seen) {
                return frame;
            }

            notified.await;
        }
    }
}

struct WaiterGuard<'a>(&'a AtomicUsize);

impl<'a> WaiterGuard<'a> {
    fn register(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
