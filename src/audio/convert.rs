//! # Format Conversion
//!
//! Input devices may run at their native rate and channel count. These helpers
//! bring callback data to the pipeline format (mono, configured sample rate)
//! before frames are assembled.

/// Average interleaved channels down to mono.
pub fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels as usize)
        .map(|ch| ch.iter().sum::<f32>() / ch.len() as f32)
        .collect()
}

/// Linear-interpolation resampler.
///
/// Works per callback block; good enough for speech detection, not for
/// playback quality.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (samples.len() as f64 / ratio) as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let src = i as f64 * ratio;
            let idx = src as usize;
            let frac = (src - idx as f64) as f32;
            let a = samples[idx.min(last)];
            let b = samples[(idx + 1).min(last)];
            a + (b - a) * frac
        })
        .collect()
}

/// Native device layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl DeviceFormat {
    /// Convert one callback block from this format to mono at `target_rate`.
    pub fn normalize(&self, samples: &[f32], target_rate: u32) -> Vec<f32> {
        let mono = to_mono(samples, self.channels);
        resample(&mono, self.sample_rate, target_rate)
    }
}
