//! Peer-transport boundary.
//!
//! The underlying WebRTC/ICE engine is a black box. Outbound operations go
//! through the `PeerTransport` trait; inbound activity arrives either as
//! `TransportEvent`s on the session's event channel (connection state,
//! candidates, data-channel traffic) or, for media packets, as direct calls
//! into the audio pipeline's packet receiver from the transport's own
//! context.

use std::sync::Arc;

use thiserror::Error;

/// Connection states supplied by the external transport. Observed, never
/// driven, by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Closed,
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Closed | ConnectionState::Failed
        )
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("transport send failed: {0}")]
    Send(String),
}

/// Callback invoked from the transport's context for each inbound media
/// packet (push model).
pub type AudioPacketSink = Arc<dyn Fn(&[u8]) + Send + Sync>;

pub trait PeerTransport: Send + Sync {
    /// Kicks off offer creation; the serialized local description arrives
    /// later as `TransportEvent::LocalDescription`.
    fn create_offer(&self) -> Result<(), TransportError>;

    fn set_remote_description(&self, answer_sdp: &str) -> Result<(), TransportError>;

    fn send_audio(&self, packet: &[u8]) -> Result<(), TransportError>;

    fn create_data_channel(&self, label: &str) -> Result<(), TransportError>;

    fn data_channel_send(&self, payload: &[u8]) -> Result<(), TransportError>;

    /// Registers the sink for inbound media packets. Called once when the
    /// pipeline starts; the transport must stop invoking a replaced sink.
    fn set_audio_sink(&self, sink: AudioPacketSink);
}

/// Inbound transport activity, serialized through the session's event
/// channel so lifecycle handling is strictly ordered.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Local candidate gathering finished; the session description is ready
    /// for the signaling exchange.
    LocalDescription { sdp: String },
    StateChange(ConnectionState),
    DataChannelOpen,
    DataChannelMessage(Vec<u8>),
}
