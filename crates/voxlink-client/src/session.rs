//! Connection lifecycle.
//!
//! One session, one thread, one pass through the state machine: offer out,
//! answer in, media up on connect, teardown on the first terminal transport
//! state. There is no in-session reconnect; the owner starts a fresh session
//! instead.

use std::sync::Arc;
use std::thread::JoinHandle;

use voxlink_media::codec::OpusCodec;
use voxlink_media::config::MediaConfig;

use crate::control::{ControlDispatcher, ControlRegistry, CONTROL_CHANNEL_LABEL};
use crate::hardware::AudioHardware;
use crate::pipeline::AudioPipeline;
use crate::signaling::SignalingExchange;
use crate::transport::{ConnectionState, PeerTransport, TransportEvent};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub media: MediaConfig,
    pub control_channel_label: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            media: MediaConfig::default(),
            control_channel_label: CONTROL_CHANNEL_LABEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Media and control paths are up.
    Connected,
    /// The session is over; the transport and media paths have been torn
    /// down. Terminal.
    Terminated { reason: String },
}

/// Owner-facing handle. Feed transport activity in through
/// `transport_events`, observe lifecycle through `events`, and call
/// `shutdown` (or drop) to end the session.
pub struct SessionHandle {
    transport_events: flume::Sender<TransportEvent>,
    shutdown_tx: flume::Sender<()>,
    events: flume::Receiver<SessionEvent>,
    join: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Sender the transport integration uses to deliver events. Clonable;
    /// outstanding clones do not keep the session alive past `shutdown`.
    pub fn transport_events(&self) -> flume::Sender<TransportEvent> {
        self.transport_events.clone()
    }

    pub fn events(&self) -> &flume::Receiver<SessionEvent> {
        &self.events
    }

    pub fn shutdown(mut self) {
        self.join_inner();
    }

    fn join_inner(&mut self) {
        // A send failure means the session thread already exited.
        let _ = self.shutdown_tx.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.join_inner();
    }
}

pub struct ClientSession;

impl ClientSession {
    /// Spawns the session thread and immediately kicks off offer creation.
    pub fn spawn(
        transport: Arc<dyn PeerTransport>,
        signaling: Arc<dyn SignalingExchange>,
        hardware: Arc<dyn AudioHardware>,
        registry: ControlRegistry,
        config: SessionConfig,
    ) -> SessionHandle {
        let (transport_tx, transport_rx) = flume::unbounded::<TransportEvent>();
        let (shutdown_tx, shutdown_rx) = flume::bounded::<()>(1);
        let (event_tx, event_rx) = flume::unbounded::<SessionEvent>();

        let join = std::thread::Builder::new()
            .name("voxlink-session".to_string())
            .spawn(move || {
                let mut runtime = SessionRuntime {
                    transport,
                    signaling,
                    hardware,
                    registry: Some(registry),
                    config,
                    events: event_tx,
                    pipeline: None,
                    dispatcher: None,
                    control_channel_open: false,
                };
                runtime.run(transport_rx, shutdown_rx);
            })
            .ok();
        if join.is_none() {
            tracing::error!("failed to spawn session thread");
        }

        SessionHandle {
            transport_events: transport_tx,
            shutdown_tx,
            events: event_rx,
            join,
        }
    }
}

struct SessionRuntime {
    transport: Arc<dyn PeerTransport>,
    signaling: Arc<dyn SignalingExchange>,
    hardware: Arc<dyn AudioHardware>,
    registry: Option<ControlRegistry>,
    config: SessionConfig,
    events: flume::Sender<SessionEvent>,
    pipeline: Option<AudioPipeline>,
    dispatcher: Option<ControlDispatcher>,
    control_channel_open: bool,
}

impl SessionRuntime {
    fn run(
        &mut self,
        transport_rx: flume::Receiver<TransportEvent>,
        shutdown_rx: flume::Receiver<()>,
    ) {
        if let Err(reason) = self.config.media.validate() {
            self.terminate(format!("invalid media config: {reason}"));
            return;
        }
        if let Err(err) = self.transport.create_offer() {
            self.terminate(format!("offer creation failed: {err}"));
            return;
        }
        tracing::info!("session started, awaiting local description");

        enum Wake {
            Event(TransportEvent),
            TransportGone,
            Shutdown,
        }

        loop {
            // The shutdown channel takes effect even while transport events
            // are still pending; a handle drop counts as shutdown too.
            let wake = flume::Selector::new()
                .recv(&transport_rx, |received| match received {
                    Ok(event) => Wake::Event(event),
                    Err(_) => Wake::TransportGone,
                })
                .recv(&shutdown_rx, |_| Wake::Shutdown)
                .wait();
            match wake {
                Wake::Event(event) => {
                    if !self.handle_event(event) {
                        return;
                    }
                }
                Wake::TransportGone => {
                    self.terminate("transport event channel closed".to_string());
                    return;
                }
                Wake::Shutdown => {
                    self.terminate("session stopped by owner".to_string());
                    return;
                }
            }
        }
    }

    /// Returns false once the session reached a terminal condition.
    fn handle_event(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::LocalDescription { sdp } => {
                if let Err(reason) = self.negotiate(&sdp) {
                    self.terminate(reason);
                    return false;
                }
            }
            TransportEvent::StateChange(state) => {
                tracing::info!(?state, "transport state changed");
                if state == ConnectionState::Connected {
                    if let Err(reason) = self.start_media() {
                        self.terminate(reason);
                        return false;
                    }
                    let _ = self.events.send(SessionEvent::Connected);
                } else if state.is_terminal() {
                    self.terminate(format!("transport reached {state:?}"));
                    return false;
                }
            }
            TransportEvent::DataChannelOpen => {
                match self
                    .transport
                    .create_data_channel(&self.config.control_channel_label)
                {
                    Ok(()) => {
                        self.control_channel_open = true;
                        if let Some(dispatcher) = &self.dispatcher {
                            dispatcher.send_ready();
                        }
                    }
                    Err(err) => {
                        tracing::error!("control channel creation failed: {err}");
                    }
                }
            }
            TransportEvent::DataChannelMessage(payload) => {
                if let Some(dispatcher) = &self.dispatcher {
                    dispatcher.submit(&payload);
                } else {
                    tracing::debug!("control message before media start, dropped");
                }
            }
        }
        true
    }

    fn negotiate(&self, offer_sdp: &str) -> Result<(), String> {
        let answer_sdp = self
            .signaling
            .exchange(offer_sdp)
            .map_err(|err| format!("signaling exchange failed: {err}"))?;
        self.transport
            .set_remote_description(&answer_sdp)
            .map_err(|err| format!("remote description rejected: {err}"))?;
        Ok(())
    }

    fn start_media(&mut self) -> Result<(), String> {
        if self.pipeline.is_some() {
            return Ok(());
        }
        let codec = OpusCodec::new(&self.config.media)
            .map_err(|err| format!("codec init failed: {err}"))?;
        self.pipeline = Some(AudioPipeline::start(
            codec,
            &self.config.media,
            self.hardware.clone(),
            self.transport.clone(),
        ));
        let registry = self.registry.take().unwrap_or_default();
        let dispatcher = ControlDispatcher::start(registry, self.transport.clone());
        if self.control_channel_open {
            dispatcher.send_ready();
        }
        self.dispatcher = Some(dispatcher);
        tracing::info!("media and control paths started");
        Ok(())
    }

    fn stop_media(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.stop();
        }
        if let Some(mut dispatcher) = self.dispatcher.take() {
            dispatcher.stop();
        }
    }

    fn terminate(&mut self, reason: String) {
        self.stop_media();
        tracing::info!(%reason, "session terminated");
        let _ = self.events.send(SessionEvent::Terminated { reason });
    }
}
