//! Half-duplex capture arbitration.
//!
//! The client never transmits live microphone audio while the remote party
//! is audible locally; doing so would feed the remote speaker's own voice
//! back through the encoder as acoustic echo. Each capture tick the send
//! loop asks the arbiter which input the encoder should see.

use crate::playback::PlayState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    /// Read one frame from the capture hardware.
    Microphone,
    /// Substitute an all-zero frame; the far end is talking.
    Silence,
}

pub fn select_capture_source(play_state: PlayState) -> CaptureSource {
    if play_state.remote_active() {
        CaptureSource::Silence
    } else {
        CaptureSource::Microphone
    }
}
