//! Client core for a voice-agent device: connection lifecycle, duplex
//! audio pipeline and control-channel dispatch over an injected peer
//! transport.
//!
//! The WebRTC/ICE engine, the signaling server and the audio drivers are
//! external collaborators behind the `PeerTransport`, `SignalingExchange`
//! and `AudioHardware` traits; this crate owns everything between them.

pub mod control;
pub mod hardware;
pub mod pipeline;
pub mod session;
pub mod signaling;
pub mod transport;

pub use control::{ControlDispatcher, ControlRegistry};
pub use hardware::{AudioHardware, HardwareError, SyntheticAudio};
pub use pipeline::AudioPipeline;
pub use session::{ClientSession, SessionConfig, SessionEvent, SessionHandle};
pub use signaling::{HttpSignaling, SignalingError, SignalingExchange};
pub use transport::{ConnectionState, PeerTransport, TransportError, TransportEvent};
