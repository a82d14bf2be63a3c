//! Playback jitter buffering: smooths decode-to-playback timing and detects
//! true silence so the transmit path can be released.
//!
//! State machine:
//! - Idle: nothing queued, nothing emitted. The first active frame starts a
//!   buffering cycle.
//! - Buffering: frames are staged without reaching the hardware consumer
//!   until the pre-roll depth is met, then the whole backlog is released in
//!   enqueue order.
//! - Playing: frames flow straight through; a run of consecutive silent
//!   frames returns to Idle and resets everything, so stale audio is never
//!   replayed into the next cycle.
//!
//! The play state is single-writer (this buffer) and read by the half-duplex
//! arbiter and the playout consumer through `PlayStateHandle`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::MediaConfig;
use crate::frames::{is_active_frame, PcmFrame};
use crate::queue::FrameQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlayState {
    Idle = 0,
    Buffering = 1,
    Playing = 2,
}

impl PlayState {
    /// True while the remote party is speaking: from the first active frame
    /// until the silence run expires. The transmit path is gated on this,
    /// not just on `Playing`, so echo is suppressed during pre-roll too.
    pub fn remote_active(self) -> bool {
        !matches!(self, PlayState::Idle)
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => PlayState::Buffering,
            2 => PlayState::Playing,
            _ => PlayState::Idle,
        }
    }
}

/// Shared, lock-free view of the play state.
#[derive(Debug, Clone, Default)]
pub struct PlayStateHandle(Arc<AtomicU8>);

impl PlayStateHandle {
    pub fn get(&self) -> PlayState {
        PlayState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: PlayState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct Staging {
    frames: VecDeque<PcmFrame>,
    silence_run: u32,
}

#[derive(Debug)]
pub struct PlaybackBuffer {
    queue: Arc<FrameQueue>,
    state: PlayStateHandle,
    staging: Mutex<Staging>,
    preroll_frames: usize,
    silence_run_frames: u32,
}

impl PlaybackBuffer {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            queue: Arc::new(FrameQueue::new(config.queue_capacity_bytes())),
            state: PlayStateHandle::default(),
            staging: Mutex::new(Staging::default()),
            preroll_frames: config.preroll_frames,
            silence_run_frames: config.silence_run_frames,
        }
    }

    pub fn state_handle(&self) -> PlayStateHandle {
        self.state.clone()
    }

    pub fn state(&self) -> PlayState {
        self.state.get()
    }

    /// Handle used by the hardware-output consumer; `pop_blocking` returns
    /// `None` once the buffer is shut down.
    pub fn queue(&self) -> Arc<FrameQueue> {
        self.queue.clone()
    }

    /// Offers one decoded frame. Called only by the decode stage (single
    /// producer). Returns the state after the frame was absorbed.
    pub fn offer(&self, frame: PcmFrame) -> PlayState {
        let active = is_active_frame(&frame);
        let mut staging = self.staging.lock().expect("playback staging lock poisoned");

        if active {
            staging.silence_run = 0;
        } else {
            staging.silence_run = staging.silence_run.saturating_add(1);
        }

        let state = self.state.get();
        match state {
            PlayState::Idle => {
                if active {
                    self.state.set(PlayState::Buffering);
                    self.stage(&mut staging, frame);
                }
                // Silent frames while idle are classified but not queued.
            }
            PlayState::Buffering | PlayState::Playing => {
                if staging.silence_run >= self.silence_run_frames {
                    self.reset_to_idle(&mut staging);
                } else if state == PlayState::Buffering {
                    self.stage(&mut staging, frame);
                } else if !self.queue.push(frame) {
                    tracing::debug!(
                        dropped_total = self.queue.dropped(),
                        "playback queue full, frame dropped"
                    );
                }
            }
        }

        self.state.get()
    }

    /// Stops playback and unblocks the consumer.
    pub fn shutdown(&self) {
        let mut staging = self.staging.lock().expect("playback staging lock poisoned");
        staging.frames.clear();
        self.queue.shutdown();
    }

    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    fn stage(&self, staging: &mut Staging, frame: PcmFrame) {
        staging.frames.push_back(frame);
        if staging.frames.len() >= self.preroll_frames {
            // Pre-roll met: release the whole backlog in enqueue order.
            while let Some(staged) = staging.frames.pop_front() {
                if !self.queue.push(staged) {
                    tracing::warn!("playback queue full while releasing pre-roll backlog");
                }
            }
            self.state.set(PlayState::Playing);
        }
    }

    fn reset_to_idle(&self, staging: &mut Staging) {
        staging.frames.clear();
        self.queue.clear();
        self.state.set(PlayState::Idle);
        tracing::debug!("playback returned to idle after silence run");
    }
}
