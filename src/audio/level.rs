// Loudness metric and threshold mapping

/// Value of an 8-bit unsigned time-domain sample at silence.
pub const SILENCE_MIDPOINT: f32 = 128.0;

/// Root-mean-square loudness of an 8-bit unsigned window, scaled to [0, 1].
///
/// Samples are centred on 128, squared, averaged and rooted, then divided by
/// 128 and capped at 1. The mean makes the metric independent of window
/// length. An empty window is silent.
pub fn rms_u8(samples: &[u8]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_of_squares: f64 = samples
        .iter()
        .map(|&s| {
            let centred = s as f64 - SILENCE_MIDPOINT as f64;
            centred * centred
        })
        .sum();
    let rms = (sum_of_squares / samples.len() as f64).sqrt();
    ((rms / SILENCE_MIDPOINT as f64) as f32).min(1.0)
}

/// Convert a float sample in [-1, 1] to the 8-bit analyser scale.
#[inline]
pub fn f32_to_u8(sample: f32) -> u8 {
    let scaled = (sample.clamp(-1.0, 1.0) + 1.0) * SILENCE_MIDPOINT;
    scaled.round().clamp(0.0, 255.0) as u8
}

/// Convert a signed 16-bit PCM sample to the 8-bit analyser scale.
#[inline]
pub fn i16_to_u8(sample: i16) -> u8 {
    f32_to_u8(sample as f32 / i16::MAX as f32)
}

/// Detection threshold for a sensitivity setting: `1 - sensitivity`.
///
/// Higher sensitivity lowers the threshold. Input is clamped to [0, 1].
pub fn threshold_for(sensitivity: f32) -> f32 {
    1.0 - sensitivity.clamp(0.0, 1.0)
}
