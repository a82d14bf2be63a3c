//! End-to-end session lifecycle against fake transport and signaling:
//! negotiate, connect, exchange audio and control traffic, disconnect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use voxlink_client::control::{ControlRegistry, CONTROL_CHANNEL_LABEL};
use voxlink_client::hardware::{AudioHardware, HardwareError};
use voxlink_client::session::{ClientSession, SessionConfig, SessionEvent};
use voxlink_client::signaling::{SignalingError, SignalingExchange};
use voxlink_client::transport::{
    AudioPacketSink, ConnectionState, PeerTransport, TransportError, TransportEvent,
};
use voxlink_media::codec::OpusCodec;
use voxlink_media::config::MediaConfig;

#[derive(Default)]
struct FakeTransport {
    offers_created: AtomicU64,
    remote_descriptions: Mutex<Vec<String>>,
    sent_audio: Mutex<Vec<Vec<u8>>>,
    data_channels: Mutex<Vec<String>>,
    data_channel_sent: Mutex<Vec<Vec<u8>>>,
    sink: Mutex<Option<AudioPacketSink>>,
}

impl FakeTransport {
    fn push_inbound_audio(&self, payload: &[u8]) {
        let sink = self.sink.lock().expect("sink lock").clone();
        if let Some(sink) = sink {
            sink(payload);
        }
    }

    fn sent_audio_count(&self) -> usize {
        self.sent_audio.lock().expect("audio lock").len()
    }
}

impl PeerTransport for FakeTransport {
    fn create_offer(&self) -> Result<(), TransportError> {
        self.offers_created.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
    fn set_remote_description(&self, answer_sdp: &str) -> Result<(), TransportError> {
        self.remote_descriptions
            .lock()
            .expect("remote lock")
            .push(answer_sdp.to_string());
        Ok(())
    }
    fn send_audio(&self, packet: &[u8]) -> Result<(), TransportError> {
        self.sent_audio
            .lock()
            .expect("audio lock")
            .push(packet.to_vec());
        Ok(())
    }
    fn create_data_channel(&self, label: &str) -> Result<(), TransportError> {
        self.data_channels
            .lock()
            .expect("channels lock")
            .push(label.to_string());
        Ok(())
    }
    fn data_channel_send(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.data_channel_sent
            .lock()
            .expect("dc lock")
            .push(payload.to_vec());
        Ok(())
    }
    fn set_audio_sink(&self, sink: AudioPacketSink) {
        *self.sink.lock().expect("sink lock") = Some(sink);
    }
}

struct FakeSignaling {
    offers_seen: Mutex<Vec<String>>,
}

impl SignalingExchange for FakeSignaling {
    fn exchange(&self, offer_sdp: &str) -> Result<String, SignalingError> {
        self.offers_seen
            .lock()
            .expect("offers lock")
            .push(offer_sdp.to_string());
        Ok("v=0\r\no=answer 0 0 IN IP4 0.0.0.0\r\n".to_string())
    }
}

struct ToneHardware {
    captures: AtomicU64,
    plays: AtomicU64,
}

impl ToneHardware {
    fn new() -> Self {
        Self {
            captures: AtomicU64::new(0),
            plays: AtomicU64::new(0),
        }
    }
}

impl AudioHardware for ToneHardware {
    fn capture_frame(&self, frame: &mut [i16]) -> Result<(), HardwareError> {
        self.captures.fetch_add(1, Ordering::Relaxed);
        frame.fill(2_000);
        Ok(())
    }
    fn play_frame(&self, _frame: &[i16]) -> Result<(), HardwareError> {
        self.plays.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

#[test]
fn full_session_lifecycle() {
    init_tracing();

    let transport = Arc::new(FakeTransport::default());
    let signaling = Arc::new(FakeSignaling {
        offers_seen: Mutex::new(Vec::new()),
    });
    let hardware = Arc::new(ToneHardware::new());

    let tts_lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let tts_lines_for_handler = tts_lines.clone();
    let mut registry = ControlRegistry::new();
    registry.register_text("bot-tts-text", move |text| {
        tts_lines_for_handler
            .lock()
            .expect("tts lock")
            .push(text.to_string());
    });

    let config = SessionConfig {
        media: MediaConfig {
            preroll_frames: 5,
            ..MediaConfig::default()
        },
        ..SessionConfig::default()
    };
    let media_config = config.media.clone();

    let handle = ClientSession::spawn(
        transport.clone(),
        signaling.clone(),
        hardware.clone(),
        registry,
        config,
    );
    let events_in = handle.transport_events();

    assert!(wait_until(Duration::from_secs(2), || {
        transport.offers_created.load(Ordering::Relaxed) == 1
    }));

    // Negotiation: local description goes to signaling, the answer comes
    // back to the transport.
    events_in
        .send(TransportEvent::LocalDescription {
            sdp: "v=0\r\no=offer 0 0 IN IP4 0.0.0.0\r\n".to_string(),
        })
        .expect("send local description");
    assert!(wait_until(Duration::from_secs(2), || {
        !transport
            .remote_descriptions
            .lock()
            .expect("remote lock")
            .is_empty()
    }));
    assert_eq!(signaling.offers_seen.lock().expect("offers lock").len(), 1);
    assert!(transport.remote_descriptions.lock().expect("remote lock")[0].contains("o=answer"));

    // Connect: media comes up and audio starts flowing out.
    events_in
        .send(TransportEvent::StateChange(ConnectionState::Connecting))
        .expect("send connecting");
    events_in
        .send(TransportEvent::StateChange(ConnectionState::Connected))
        .expect("send connected");
    let event = handle
        .events()
        .recv_timeout(Duration::from_secs(2))
        .expect("session event");
    assert_eq!(event, SessionEvent::Connected);
    assert!(
        wait_until(Duration::from_secs(2), || transport.sent_audio_count() >= 3),
        "expected outbound audio packets after connect"
    );

    // Control channel: open triggers channel creation plus client-ready.
    events_in
        .send(TransportEvent::DataChannelOpen)
        .expect("send channel open");
    assert!(wait_until(Duration::from_secs(2), || {
        !transport
            .data_channel_sent
            .lock()
            .expect("dc lock")
            .is_empty()
    }));
    assert_eq!(
        *transport.data_channels.lock().expect("channels lock"),
        vec![CONTROL_CHANNEL_LABEL.to_string()]
    );
    {
        let sent = transport.data_channel_sent.lock().expect("dc lock");
        let ready: serde_json::Value = serde_json::from_slice(&sent[0]).expect("ready json");
        assert_eq!(ready["type"], "client-ready");
        assert_eq!(ready["label"], CONTROL_CHANNEL_LABEL);
    }

    // Inbound control traffic reaches the registered handler.
    events_in
        .send(TransportEvent::DataChannelMessage(
            br#"{"type":"bot-tts-text","data":{"text":"hello there"}}"#.to_vec(),
        ))
        .expect("send control message");
    assert!(wait_until(Duration::from_secs(2), || {
        !tts_lines.lock().expect("tts lock").is_empty()
    }));
    assert_eq!(
        *tts_lines.lock().expect("tts lock"),
        vec!["hello there".to_string()]
    );

    // Remote audio: after the pre-roll backlog, decoded frames reach the
    // speaker.
    let remote_codec = OpusCodec::new(&media_config).expect("remote codec");
    let tone: Vec<i16> = (0..media_config.frame_samples)
        .map(|idx| {
            let t = idx as f32 / media_config.sample_rate as f32;
            ((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 10_000.0) as i16
        })
        .collect();
    for _ in 0..media_config.preroll_frames + 2 {
        let packet = remote_codec.encode(&tone).expect("encode remote frame");
        transport.push_inbound_audio(&packet.0);
    }
    assert!(
        wait_until(Duration::from_secs(2), || {
            hardware.plays.load(Ordering::Relaxed) >= media_config.preroll_frames as u64
        }),
        "pre-roll backlog should reach the speaker"
    );

    // Disconnect: clean teardown, terminal event, no further sends.
    events_in
        .send(TransportEvent::StateChange(ConnectionState::Disconnected))
        .expect("send disconnect");
    let event = handle
        .events()
        .recv_timeout(Duration::from_secs(2))
        .expect("termination event");
    assert!(matches!(event, SessionEvent::Terminated { .. }));
    handle.shutdown();

    let sent_after_shutdown = transport.sent_audio_count();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(transport.sent_audio_count(), sent_after_shutdown);
}
