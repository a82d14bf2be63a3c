//! Hardware boundary.
//!
//! Real capture/playback drivers (I2S, codec chips) live outside this crate;
//! board support packages implement `AudioHardware` and inject it. Driver
//! timeout behavior is opaque to the pipeline: both calls simply block until
//! the driver returns.

use std::sync::Mutex;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("audio device error: {0}")]
    Device(String),
}

pub trait AudioHardware: Send + Sync {
    /// Fills `frame` with one frame of microphone samples. Blocking.
    fn capture_frame(&self, frame: &mut [i16]) -> Result<(), HardwareError>;

    /// Writes one frame to the speaker. Blocking, paced by the driver.
    fn play_frame(&self, frame: &[i16]) -> Result<(), HardwareError>;
}

#[derive(Debug)]
struct ToneState {
    phase: f32,
    sample_counter: u64,
}

/// Test/bring-up backend: alternates one second of 440 Hz tone with one
/// second of silence so downstream speech segmentation sees boundaries,
/// and discards playback.
#[derive(Debug)]
pub struct SyntheticAudio {
    sample_rate: u32,
    state: Mutex<ToneState>,
}

impl SyntheticAudio {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            state: Mutex::new(ToneState {
                phase: 0.0,
                sample_counter: 0,
            }),
        }
    }
}

impl AudioHardware for SyntheticAudio {
    fn capture_frame(&self, frame: &mut [i16]) -> Result<(), HardwareError> {
        let mut state = self.state.lock().expect("synthetic audio lock poisoned");
        let step = (2.0 * std::f32::consts::PI * 440.0) / self.sample_rate as f32;
        for sample in frame.iter_mut() {
            let second = state.sample_counter / self.sample_rate as u64;
            *sample = if second % 2 == 0 {
                let value = (state.phase.sin() * (i16::MAX as f32 * 0.3)) as i16;
                state.phase += step;
                if state.phase > 2.0 * std::f32::consts::PI {
                    state.phase -= 2.0 * std::f32::consts::PI;
                }
                value
            } else {
                0
            };
            state.sample_counter += 1;
        }
        Ok(())
    }

    fn play_frame(&self, _frame: &[i16]) -> Result<(), HardwareError> {
        Ok(())
    }
}
