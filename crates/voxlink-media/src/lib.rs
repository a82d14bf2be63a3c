//! Leaf media primitives for the voxlink voice-agent client: the opus frame
//! codec adapter, the bounded PCM frame queue, the playback jitter-buffer
//! state machine and the half-duplex capture arbiter.
//!
//! Everything here is transport- and hardware-agnostic; `voxlink-client`
//! wires these pieces to a peer connection and audio drivers.

pub mod codec;
pub mod config;
pub mod frames;
pub mod halfduplex;
pub mod playback;
pub mod queue;

pub use codec::{CodecError, OpusCodec, OpusPacket};
pub use config::MediaConfig;
pub use halfduplex::CaptureSource;
pub use playback::{PlayState, PlayStateHandle, PlaybackBuffer};
pub use queue::FrameQueue;
