//! Small PCM frame helpers shared by the playback buffer and the capture
//! path.

/// Decoded or captured audio: fixed-length mono 16-bit samples.
pub type PcmFrame = Vec<i16>;

/// A frame is active if any sample falls outside the near-zero tolerance
/// band {-1, 0, 1}; opus tends to decode digital silence to +/-1 dither.
pub fn is_active_frame(frame: &[i16]) -> bool {
    frame.iter().any(|sample| !(-1..=1).contains(sample))
}

pub fn silence_frame(samples: usize) -> PcmFrame {
    vec![0i16; samples]
}

/// In-place software gain with clamping to the i16 range.
pub fn apply_gain(frame: &mut [i16], gain: f32) {
    if (gain - 1.0).abs() < f32::EPSILON {
        return;
    }
    for sample in frame.iter_mut() {
        let scaled = *sample as f32 * gain;
        *sample = scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }
}
