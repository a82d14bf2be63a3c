//! Bounded single-producer/single-consumer queue of PCM frames with a
//! byte-capacity limit.
//!
//! Enqueue on a full queue drops the frame instead of blocking the decode
//! path. The consumer blocks until a frame arrives or the queue is shut
//! down; shutdown is distinguishable from "momentarily empty" so a stopped
//! consumer always terminates.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::frames::PcmFrame;

#[derive(Debug)]
struct Inner {
    frames: VecDeque<PcmFrame>,
    queued_bytes: usize,
    dropped: u64,
    shutdown: bool,
}

#[derive(Debug)]
pub struct FrameQueue {
    capacity_bytes: usize,
    inner: Mutex<Inner>,
    available: Condvar,
}

impl FrameQueue {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            capacity_bytes: capacity_bytes.max(1),
            inner: Mutex::new(Inner {
                frames: VecDeque::new(),
                queued_bytes: 0,
                dropped: 0,
                shutdown: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Offers a frame; returns false if the queue was full (or shut down)
    /// and the frame was dropped.
    pub fn push(&self, frame: PcmFrame) -> bool {
        let frame_bytes = frame.len() * std::mem::size_of::<i16>();
        let mut inner = self.inner.lock().expect("frame queue lock poisoned");
        if inner.shutdown || inner.queued_bytes + frame_bytes > self.capacity_bytes {
            inner.dropped = inner.dropped.saturating_add(1);
            return false;
        }
        inner.queued_bytes += frame_bytes;
        inner.frames.push_back(frame);
        debug_assert!(inner.queued_bytes <= self.capacity_bytes);
        drop(inner);
        self.available.notify_one();
        true
    }

    /// Blocks until a frame is available; `None` means the queue was shut
    /// down and fully drained.
    pub fn pop_blocking(&self) -> Option<PcmFrame> {
        let mut inner = self.inner.lock().expect("frame queue lock poisoned");
        loop {
            if let Some(frame) = inner.frames.pop_front() {
                inner.queued_bytes -= frame.len() * std::mem::size_of::<i16>();
                return Some(frame);
            }
            if inner.shutdown {
                return None;
            }
            inner = self
                .available
                .wait(inner)
                .expect("frame queue lock poisoned");
        }
    }

    pub fn try_pop(&self) -> Option<PcmFrame> {
        let mut inner = self.inner.lock().expect("frame queue lock poisoned");
        let frame = inner.frames.pop_front()?;
        inner.queued_bytes -= frame.len() * std::mem::size_of::<i16>();
        Some(frame)
    }

    /// Discards all queued frames. Used on the playing-to-idle transition so
    /// stale audio is never replayed into a fresh buffering cycle.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("frame queue lock poisoned");
        inner.frames.clear();
        inner.queued_bytes = 0;
    }

    /// Unblocks the consumer; subsequent pushes are dropped.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().expect("frame queue lock poisoned");
        inner.shutdown = true;
        drop(inner);
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("frame queue lock poisoned")
            .frames
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn queued_bytes(&self) -> usize {
        self.inner
            .lock()
            .expect("frame queue lock poisoned")
            .queued_bytes
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    pub fn dropped(&self) -> u64 {
        self.inner
            .lock()
            .expect("frame queue lock poisoned")
            .dropped
    }
}
