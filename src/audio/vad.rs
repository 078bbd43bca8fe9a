//! # Voice Activity Gate
//!
//! Decides per frame whether audio is worth transmitting. The metric is the
//! mean absolute amplitude, compared against a tunable threshold. Stricter
//! thresholds save bandwidth but clip soft speech onsets.

use crate::audio::frame::AudioFrame;
use crate::config::VadConfig;

/// Stateless energy gate.
#[derive(Debug, Clone, Copy)]
pub struct VoiceActivityGate {
    threshold: f32,
    enabled: bool,
}

impl VoiceActivityGate {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            enabled: true,
        }
    }

    /// A gate that lets every frame through.
    pub fn disabled() -> Self {
        Self {
            threshold: 0.0,
            enabled: false,
        }
    }

    /// A disabled gate passes every frame.
    pub fn from_config(config: &VadConfig) -> Self {
        if config.enabled {
            Self::new(config.threshold)
        } else {
            Self::disabled()
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// `true` when the frame's average energy exceeds the threshold.
    pub fn should_transmit(&self, frame: &AudioFrame) -> bool {
        if !self.enabled {
            return true;
        }
        average_energy(frame.samples()) > self.threshold
    }
}

impl Default for VoiceActivityGate {
    fn default() -> Self {
        Self::new(0.005)
    }
}

/// Mean of `|sample|` over the slice; 0 for an empty slice.
pub fn average_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|s| s.abs() as f64).sum();
    (sum / samples.len() as f64) as f32
}
