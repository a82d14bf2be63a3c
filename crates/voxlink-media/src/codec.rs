//! Frame codec adapter around the opus encoder/decoder.
//!
//! Sample rate and channel count are fixed at construction; changing them
//! means building a new codec. Encode/decode errors are non-fatal per frame:
//! the caller substitutes silence (encode) or skips the frame (decode) and
//! keeps the pipeline moving.

use std::sync::{Arc, Mutex};

use opus_rs::{Application, OpusDecoder, OpusEncoder};
use thiserror::Error;

use crate::config::{MediaConfig, OPUS_MAX_PACKET_BYTES};
use crate::frames::PcmFrame;

/// Variable-length compressed payload, bounded by `OPUS_MAX_PACKET_BYTES`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpusPacket(pub Vec<u8>);

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unsupported codec configuration: {0}")]
    InvalidConfig(String),
    #[error("create opus encoder failed: {0}")]
    EncoderInit(String),
    #[error("create opus decoder failed: {0}")]
    DecoderInit(String),
    #[error("opus encode failed")]
    Encode,
    #[error("opus decode failed")]
    Decode,
}

struct CodecState {
    encoder: OpusEncoder,
    decoder: OpusDecoder,
    frame_samples: usize,
    channels: usize,
    encode_input: Vec<f32>,
    decode_output: Vec<f32>,
    packet_buffer: Vec<u8>,
}

impl CodecState {
    fn new(config: &MediaConfig) -> Result<Self, CodecError> {
        config.validate().map_err(CodecError::InvalidConfig)?;
        let channels = config.channels as usize;
        let frame_total = config.frame_samples * channels;

        let mut encoder =
            OpusEncoder::new(config.sample_rate as i32, channels, Application::Voip)
                .map_err(|err| CodecError::EncoderInit(format!("{err}")))?;
        encoder.bitrate_bps = config.bitrate_bps as i32;
        encoder.complexity = config.complexity as i32;
        encoder.use_cbr = false;

        let decoder = OpusDecoder::new(config.sample_rate as i32, channels)
            .map_err(|err| CodecError::DecoderInit(format!("{err}")))?;

        Ok(Self {
            encoder,
            decoder,
            frame_samples: config.frame_samples,
            channels,
            encode_input: vec![0.0; frame_total],
            decode_output: vec![0.0; frame_total],
            packet_buffer: vec![0; OPUS_MAX_PACKET_BYTES],
        })
    }

    fn frame_total(&self) -> usize {
        self.frame_samples * self.channels
    }

    fn encode(&mut self, pcm: &[i16]) -> Result<OpusPacket, CodecError> {
        let expected = self.frame_total();
        for (dst, src) in self.encode_input.iter_mut().zip(pcm.iter().copied()) {
            *dst = src as f32 / 32_768.0;
        }
        if pcm.len() < expected {
            self.encode_input[pcm.len()..].fill(0.0);
        }

        let frame_size = self.frame_samples;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.encoder
                .encode(&self.encode_input, frame_size, &mut self.packet_buffer)
        }));

        match result {
            Ok(Ok(packet_len)) if packet_len > 0 => {
                Ok(OpusPacket(self.packet_buffer[..packet_len].to_vec()))
            }
            _ => Err(CodecError::Encode),
        }
    }

    fn decode(&mut self, packet: &OpusPacket) -> Result<PcmFrame, CodecError> {
        if packet.0.is_empty() {
            return Err(CodecError::Decode);
        }

        let frame_size = self.frame_samples;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.decoder
                .decode(&packet.0, frame_size, &mut self.decode_output)
        }));
        let decoded_samples = match result {
            Ok(Ok(samples_per_channel)) => samples_per_channel.saturating_mul(self.channels),
            _ => 0,
        };
        if decoded_samples == 0 {
            return Err(CodecError::Decode);
        }

        let expected = self.frame_total();
        let mut out = self.decode_output[..decoded_samples.min(expected)]
            .iter()
            .map(|sample| (*sample * 32_767.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
            .collect::<Vec<i16>>();
        out.resize(expected, 0);
        Ok(out)
    }
}

/// Clonable handle over the shared encoder/decoder state.
#[derive(Clone)]
pub struct OpusCodec {
    state: Arc<Mutex<CodecState>>,
    frame_samples: usize,
}

impl std::fmt::Debug for OpusCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpusCodec")
            .field("frame_samples", &self.frame_samples)
            .finish_non_exhaustive()
    }
}

impl OpusCodec {
    pub fn new(config: &MediaConfig) -> Result<Self, CodecError> {
        let state = CodecState::new(config)?;
        let frame_samples = state.frame_samples;
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            frame_samples,
        })
    }

    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    pub fn encode(&self, pcm: &[i16]) -> Result<OpusPacket, CodecError> {
        let mut state = self.state.lock().expect("opus codec lock poisoned");
        state.encode(pcm)
    }

    pub fn decode(&self, packet: &OpusPacket) -> Result<PcmFrame, CodecError> {
        let mut state = self.state.lock().expect("opus codec lock poisoned");
        state.decode(packet)
    }
}
