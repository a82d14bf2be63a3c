//! Board-tunable media configuration.
//!
//! The silence-detection thresholds and gain constants vary between hardware
//! variants, so they are configuration with the most common board values as
//! defaults rather than hard-coded constants.

/// 1276 bytes is the packet bound recommended by opus_encode.
pub const OPUS_MAX_PACKET_BYTES: usize = 1_276;

#[derive(Debug, Clone, PartialEq)]
pub struct MediaConfig {
    pub sample_rate: u32,
    pub channels: u8,
    /// Samples per PCM frame (320 = 20ms @ 16kHz mono).
    pub frame_samples: usize,
    pub bitrate_bps: u32,
    pub complexity: u8,
    /// Frames buffered before playback starts emitting to hardware.
    pub preroll_frames: usize,
    /// Consecutive silent frames before playback returns to idle.
    pub silence_run_frames: u32,
    /// Software gain applied to captured microphone frames.
    pub capture_gain: f32,
    /// Software gain applied to decoded frames before the speaker.
    pub playback_gain: f32,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            frame_samples: 320,
            bitrate_bps: 30_000,
            complexity: 0,
            preroll_frames: 50,
            silence_run_frames: 20,
            capture_gain: 1.0,
            playback_gain: 1.0,
        }
    }
}

impl MediaConfig {
    pub fn validate(&self) -> Result<(), String> {
        if ![8_000, 12_000, 16_000, 24_000, 48_000].contains(&self.sample_rate) {
            return Err(format!("unsupported sample rate {}", self.sample_rate));
        }
        if self.channels == 0 || self.channels > 2 {
            return Err(format!("unsupported channel count {}", self.channels));
        }
        if self.frame_samples == 0 {
            return Err("frame_samples must be non-zero".to_string());
        }
        if self.preroll_frames == 0 {
            return Err("preroll_frames must be non-zero".to_string());
        }
        if self.silence_run_frames == 0 {
            return Err("silence_run_frames must be non-zero".to_string());
        }
        if self.capture_gain <= 0.0 || self.playback_gain <= 0.0 {
            return Err("gains must be positive".to_string());
        }
        Ok(())
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_samples * std::mem::size_of::<i16>()
    }

    /// Byte capacity of the playback frame queue: the pre-roll backlog plus
    /// a little slack for frames decoded while the backlog drains.
    pub fn queue_capacity_bytes(&self) -> usize {
        self.frame_bytes() * (self.preroll_frames + 2)
    }

    pub fn frame_duration_ms(&self) -> u32 {
        ((self.frame_samples as u64) * 1_000 / (self.sample_rate as u64).max(1)) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = MediaConfig::default();
        cfg.validate().expect("default config");
        assert_eq!(cfg.frame_bytes(), 640);
        assert_eq!(cfg.frame_duration_ms(), 20);
    }

    #[test]
    fn rejects_bad_sample_rate_and_zero_thresholds() {
        let mut cfg = MediaConfig {
            sample_rate: 44_100,
            ..MediaConfig::default()
        };
        assert!(cfg.validate().is_err());

        cfg.sample_rate = 16_000;
        cfg.silence_run_frames = 0;
        assert!(cfg.validate().is_err());

        cfg.silence_run_frames = 20;
        cfg.preroll_frames = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn queue_capacity_covers_preroll_backlog() {
        let cfg = MediaConfig::default();
        assert!(cfg.queue_capacity_bytes() >= cfg.frame_bytes() * cfg.preroll_frames);
    }
}
