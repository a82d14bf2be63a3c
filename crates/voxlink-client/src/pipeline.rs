//! The duplex audio pipeline: capture-encode-send on a fixed tick, and
//! receive-decode-enqueue pushed from the transport, with a dedicated
//! playout consumer feeding the speaker.
//!
//! The three contexts share no mutable state beyond the play state (written
//! only by the playback buffer) and the playback frame queue (one producer,
//! one consumer). Stopping the pipeline unblocks everything
//! deterministically.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use voxlink_media::codec::{OpusCodec, OpusPacket};
use voxlink_media::config::MediaConfig;
use voxlink_media::frames::{apply_gain, silence_frame};
use voxlink_media::halfduplex::{select_capture_source, CaptureSource};
use voxlink_media::playback::{PlayState, PlaybackBuffer};

use crate::hardware::AudioHardware;
use crate::transport::PeerTransport;

/// Send-loop cadence. A missed deadline is not caught up; the loop simply
/// resumes at the next tick.
pub const TICK_INTERVAL: Duration = Duration::from_millis(15);

const STATS_EMIT_INTERVAL_TICKS: u64 = 400;

/// Push-model receive path. The transport invokes `handle_packet` from its
/// own context for every inbound media packet.
pub struct PacketReceiver {
    codec: OpusCodec,
    playback: Arc<PlaybackBuffer>,
    rx_frames: AtomicU64,
    decode_errors: AtomicU64,
}

impl PacketReceiver {
    pub fn handle_packet(&self, payload: &[u8]) {
        match self.codec.decode(&OpusPacket(payload.to_vec())) {
            Ok(frame) => {
                self.rx_frames.fetch_add(1, Ordering::Relaxed);
                self.playback.offer(frame);
            }
            Err(err) => {
                self.decode_errors.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("dropping undecodable media packet: {err}");
            }
        }
    }

    pub fn rx_frames(&self) -> u64 {
        self.rx_frames.load(Ordering::Relaxed)
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }
}

pub struct AudioPipeline {
    stop: Arc<AtomicBool>,
    playback: Arc<PlaybackBuffer>,
    receiver: Arc<PacketReceiver>,
    transport: Arc<dyn PeerTransport>,
    tx_frames: Arc<AtomicU64>,
    send_join: Option<JoinHandle<()>>,
    playout_join: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for AudioPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioPipeline")
            .field("play_state", &self.playback.state())
            .finish_non_exhaustive()
    }
}

impl AudioPipeline {
    /// Starts the send loop and the playout consumer, and registers the
    /// receive path with the transport.
    pub fn start(
        codec: OpusCodec,
        config: &MediaConfig,
        hardware: Arc<dyn AudioHardware>,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        let playback = Arc::new(PlaybackBuffer::new(config));
        let receiver = Arc::new(PacketReceiver {
            codec: codec.clone(),
            playback: playback.clone(),
            rx_frames: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
        });

        let sink_receiver = receiver.clone();
        transport.set_audio_sink(Arc::new(move |payload| {
            sink_receiver.handle_packet(payload);
        }));

        let stop = Arc::new(AtomicBool::new(false));
        let tx_frames = Arc::new(AtomicU64::new(0));

        let send_join = spawn_send_loop(SendLoop {
            stop: stop.clone(),
            codec,
            config: config.clone(),
            hardware: hardware.clone(),
            transport: transport.clone(),
            playback: playback.clone(),
            receiver: receiver.clone(),
            tx_frames: tx_frames.clone(),
        });

        let playout_join = spawn_playout_loop(
            playback.clone(),
            hardware,
            config.playback_gain,
        );

        Self {
            stop,
            playback,
            receiver,
            transport,
            tx_frames,
            send_join,
            playout_join,
        }
    }

    pub fn play_state(&self) -> PlayState {
        self.playback.state()
    }

    pub fn tx_frames(&self) -> u64 {
        self.tx_frames.load(Ordering::Relaxed)
    }

    pub fn receiver(&self) -> Arc<PacketReceiver> {
        self.receiver.clone()
    }

    /// Stops both loops and detaches the receive path. Blocks until the
    /// threads have exited.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.transport.set_audio_sink(Arc::new(|_| {}));
        self.playback.shutdown();
        if let Some(join) = self.send_join.take() {
            let _ = join.join();
        }
        if let Some(join) = self.playout_join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

struct SendLoop {
    stop: Arc<AtomicBool>,
    codec: OpusCodec,
    config: MediaConfig,
    hardware: Arc<dyn AudioHardware>,
    transport: Arc<dyn PeerTransport>,
    playback: Arc<PlaybackBuffer>,
    receiver: Arc<PacketReceiver>,
    tx_frames: Arc<AtomicU64>,
}

fn spawn_send_loop(ctx: SendLoop) -> Option<JoinHandle<()>> {
    thread::Builder::new()
        .name("voxlink-send".to_string())
        .spawn(move || run_send_loop(ctx))
        .map_err(|err| tracing::error!("failed to spawn send loop: {err}"))
        .ok()
}

fn run_send_loop(ctx: SendLoop) {
    let frame_samples = ctx.config.frame_samples;
    let mut capture_buf = silence_frame(frame_samples);
    let mut tick = 0u64;
    let mut capture_errors = 0u64;
    let mut encode_errors = 0u64;
    let mut send_errors = 0u64;
    let mut next_tick = Instant::now();

    while !ctx.stop.load(Ordering::Relaxed) {
        match select_capture_source(ctx.playback.state()) {
            CaptureSource::Silence => {
                capture_buf.fill(0);
            }
            CaptureSource::Microphone => {
                if let Err(err) = ctx.hardware.capture_frame(&mut capture_buf) {
                    capture_errors = capture_errors.saturating_add(1);
                    tracing::warn!("microphone read failed, sending silence: {err}");
                    capture_buf.fill(0);
                } else {
                    apply_gain(&mut capture_buf, ctx.config.capture_gain);
                }
            }
        }

        let packet = match ctx.codec.encode(&capture_buf) {
            Ok(packet) => Some(packet),
            Err(err) => {
                encode_errors = encode_errors.saturating_add(1);
                tracing::warn!("encode failed, substituting silence: {err}");
                capture_buf.fill(0);
                ctx.codec.encode(&capture_buf).ok()
            }
        };
        if let Some(packet) = packet {
            match ctx.transport.send_audio(&packet.0) {
                Ok(()) => {
                    ctx.tx_frames.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    // A failing transport will surface a state change; per
                    // frame this is only worth a log line.
                    send_errors = send_errors.saturating_add(1);
                    tracing::warn!("audio send failed: {err}");
                }
            }
        }

        tick = tick.saturating_add(1);
        if tick % STATS_EMIT_INTERVAL_TICKS == 0 {
            tracing::debug!(
                tick,
                tx_frames = ctx.tx_frames.load(Ordering::Relaxed),
                rx_frames = ctx.receiver.rx_frames(),
                decode_errors = ctx.receiver.decode_errors(),
                playback_dropped = ctx.playback.dropped(),
                capture_errors,
                encode_errors,
                send_errors,
                play_state = ?ctx.playback.state(),
                "pipeline stats"
            );
        }

        next_tick += TICK_INTERVAL;
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick.saturating_duration_since(now));
        } else {
            next_tick = now;
        }
    }
}

fn spawn_playout_loop(
    playback: Arc<PlaybackBuffer>,
    hardware: Arc<dyn AudioHardware>,
    playback_gain: f32,
) -> Option<JoinHandle<()>> {
    thread::Builder::new()
        .name("voxlink-playout".to_string())
        .spawn(move || {
            let queue = playback.queue();
            while let Some(mut frame) = queue.pop_blocking() {
                apply_gain(&mut frame, playback_gain);
                if let Err(err) = hardware.play_frame(&frame) {
                    tracing::warn!("speaker write failed, frame skipped: {err}");
                }
            }
            tracing::debug!("playout consumer stopped");
        })
        .map_err(|err| tracing::error!("failed to spawn playout loop: {err}"))
        .ok()
}
