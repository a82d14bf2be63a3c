//! Control-message dispatch over the peer data channel.
//!
//! Inbound payloads are parsed, queued and dispatched strictly in arrival
//! order by a single consumer thread. Message types map to handlers through
//! an explicit registry table; unrecognized types are discarded without
//! error, and a malformed payload never takes the session down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use serde_json::{json, Value};

use crate::transport::PeerTransport;

pub const CONTROL_CHANNEL_LABEL: &str = "rtvi-ai";

const CONTROL_QUEUE_DEPTH: usize = 32;

static MESSAGE_ID: AtomicU64 = AtomicU64::new(0);

/// Process-wide monotonically increasing message identity. Uniqueness only;
/// ordering semantics come from channel delivery order.
fn next_message_id() -> u64 {
    MESSAGE_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug)]
struct ControlMessage {
    id: u64,
    body: Value,
}

pub type Handler = Box<dyn Fn(&Value) + Send>;

/// Explicit type-string to handler table. An ordinary lookup replaces any
/// cleverness here; a mis-dispatch on a control channel is worse than a map
/// probe.
#[derive(Default)]
pub struct ControlRegistry {
    handlers: HashMap<String, Handler>,
}

impl ControlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, message_type: impl Into<String>, handler: Handler) {
        self.handlers.insert(message_type.into(), handler);
    }

    /// Convenience for "bot-tts-text"-style messages that carry their
    /// payload at `data.text`.
    pub fn register_text(
        &mut self,
        message_type: impl Into<String>,
        handler: impl Fn(&str) + Send + 'static,
    ) {
        self.register(
            message_type,
            Box::new(move |body| {
                if let Some(text) = body
                    .get("data")
                    .and_then(|data| data.get("text"))
                    .and_then(Value::as_str)
                {
                    handler(text);
                }
            }),
        );
    }

    fn dispatch(&self, message: &ControlMessage) {
        let Some(message_type) = message.body.get("type").and_then(Value::as_str) else {
            tracing::warn!(id = message.id, "control message without type field");
            return;
        };
        match self.handlers.get(message_type) {
            Some(handler) => handler(&message.body),
            None => {
                tracing::debug!(id = message.id, message_type, "unhandled control message");
            }
        }
    }
}

impl std::fmt::Debug for ControlRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlRegistry")
            .field("types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub struct ControlDispatcher {
    tx: Option<flume::Sender<ControlMessage>>,
    channel: Arc<dyn PeerTransport>,
    ready_sent: AtomicBool,
    join: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ControlDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlDispatcher").finish_non_exhaustive()
    }
}

impl ControlDispatcher {
    /// Spawns the consumer thread that dispatches queued messages in FIFO
    /// order until `stop` (or drop) closes the queue.
    pub fn start(registry: ControlRegistry, channel: Arc<dyn PeerTransport>) -> Self {
        let (tx, rx) = flume::bounded::<ControlMessage>(CONTROL_QUEUE_DEPTH);
        let join = std::thread::Builder::new()
            .name("voxlink-control".to_string())
            .spawn(move || {
                for message in rx.iter() {
                    registry.dispatch(&message);
                }
            })
            .ok();
        if join.is_none() {
            tracing::error!("failed to spawn control dispatcher thread");
        }
        Self {
            tx: Some(tx),
            channel,
            ready_sent: AtomicBool::new(false),
            join,
        }
    }

    /// Parses and enqueues one inbound payload. Malformed payloads and
    /// queue overflow are logged and dropped; neither stalls the caller.
    pub fn submit(&self, raw: &[u8]) {
        let body: Value = match serde_json::from_slice(raw) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("dropping malformed control message: {err}");
                return;
            }
        };
        let message = ControlMessage {
            id: next_message_id(),
            body,
        };
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(flume::TrySendError::Full(message)) = tx.try_send(message) {
            tracing::warn!(id = message.id, "control queue full, message dropped");
        }
    }

    /// Sends the one-shot client-ready message announcing that this client
    /// can receive media and control traffic.
    pub fn send_ready(&self) {
        if self.ready_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        let message = json!({
            "label": CONTROL_CHANNEL_LABEL,
            "type": "client-ready",
            "id": next_message_id().to_string(),
        });
        let payload = message.to_string();
        if let Err(err) = self.channel.data_channel_send(payload.as_bytes()) {
            tracing::error!("failed to send client-ready: {err}");
        }
    }

    /// Closes the queue and joins the consumer once pending messages have
    /// been dispatched.
    pub fn stop(&mut self) {
        self.tx.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ControlDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::transport::{AudioPacketSink, TransportError};

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl PeerTransport for RecordingChannel {
        fn create_offer(&self) -> Result<(), TransportError> {
            Ok(())
        }
        fn set_remote_description(&self, _answer_sdp: &str) -> Result<(), TransportError> {
            Ok(())
        }
        fn send_audio(&self, _packet: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }
        fn create_data_channel(&self, _label: &str) -> Result<(), TransportError> {
            Ok(())
        }
        fn data_channel_send(&self, payload: &[u8]) -> Result<(), TransportError> {
            self.sent
                .lock()
                .expect("sent lock")
                .push(payload.to_vec());
            Ok(())
        }
        fn set_audio_sink(&self, _sink: AudioPacketSink) {}
    }

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) {
        let start = std::time::Instant::now();
        while !done() {
            assert!(start.elapsed() < deadline, "condition not met in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn dispatches_tts_text_exactly_once() {
        let received = Arc::new(Mutex::new(Vec::<String>::new()));
        let received_for_handler = received.clone();
        let mut registry = ControlRegistry::new();
        registry.register_text("bot-tts-text", move |text| {
            received_for_handler
                .lock()
                .expect("received lock")
                .push(text.to_string());
        });

        let mut dispatcher =
            ControlDispatcher::start(registry, Arc::new(RecordingChannel::default()));
        dispatcher.submit(br#"{"type":"bot-tts-text","data":{"text":"hello"}}"#);
        dispatcher.stop();

        assert_eq!(*received.lock().expect("received lock"), vec!["hello"]);
    }

    #[test]
    fn unknown_type_is_dropped_without_callback() {
        let called = Arc::new(Mutex::new(0u32));
        let called_for_handler = called.clone();
        let mut registry = ControlRegistry::new();
        registry.register(
            "bot-started-speaking",
            Box::new(move |_| {
                *called_for_handler.lock().expect("called lock") += 1;
            }),
        );

        let mut dispatcher =
            ControlDispatcher::start(registry, Arc::new(RecordingChannel::default()));
        dispatcher.submit(br#"{"type":"unknown-event"}"#);
        dispatcher.submit(br#"{"type":"bot-started-speaking"}"#);
        dispatcher.stop();

        assert_eq!(*called.lock().expect("called lock"), 1);
    }

    #[test]
    fn malformed_payload_is_dropped_quietly() {
        let mut dispatcher = ControlDispatcher::start(
            ControlRegistry::new(),
            Arc::new(RecordingChannel::default()),
        );
        dispatcher.submit(b"{not json");
        dispatcher.submit(b"");
        dispatcher.stop();
    }

    #[test]
    fn messages_dispatch_in_submission_order() {
        let order = Arc::new(Mutex::new(Vec::<i64>::new()));
        let order_for_handler = order.clone();
        let mut registry = ControlRegistry::new();
        registry.register(
            "bot-tts-text",
            Box::new(move |body| {
                let seq = body
                    .get("data")
                    .and_then(|data| data.get("seq"))
                    .and_then(Value::as_i64)
                    .unwrap_or(-1);
                order_for_handler.lock().expect("order lock").push(seq);
            }),
        );

        let mut dispatcher =
            ControlDispatcher::start(registry, Arc::new(RecordingChannel::default()));
        for seq in 0..20i64 {
            let raw = format!(r#"{{"type":"bot-tts-text","data":{{"seq":{seq}}}}}"#);
            dispatcher.submit(raw.as_bytes());
            // Leave room in the bounded queue for the burst.
            if seq % 8 == 7 {
                wait_until(Duration::from_secs(2), || {
                    order.lock().expect("order lock").len() as i64 > seq - 8
                });
            }
        }
        dispatcher.stop();

        assert_eq!(
            *order.lock().expect("order lock"),
            (0..20i64).collect::<Vec<_>>()
        );
    }

    #[test]
    fn client_ready_is_sent_once_with_label_and_id() {
        let channel = Arc::new(RecordingChannel::default());
        let dispatcher = ControlDispatcher::start(ControlRegistry::new(), channel.clone());
        dispatcher.send_ready();
        dispatcher.send_ready();

        let sent = channel.sent.lock().expect("sent lock");
        assert_eq!(sent.len(), 1);
        let body: Value = serde_json::from_slice(&sent[0]).expect("valid json");
        assert_eq!(body["label"], CONTROL_CHANNEL_LABEL);
        assert_eq!(body["type"], "client-ready");
        assert!(body["id"].as_str().expect("id string").parse::<u64>().is_ok());
    }

    #[test]
    fn message_ids_are_monotonic() {
        let first = next_message_id();
        let second = next_message_id();
        assert!(second > first);
    }
}
