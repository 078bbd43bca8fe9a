//! # Audio Frames
//!
//! Devices deliver samples in whatever block size their driver prefers. The
//! pipeline works on fixed-size frames, so a [`FrameAssembler`] sits between
//! the device callback and the frame queue.

use std::time::Duration;

/// A fixed-length block of normalized mono samples.
///
/// Immutable once produced. `sequence` increases by one per frame in capture
/// order, which makes ordering observable in logs and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
    sample_rate: u32,
    sequence: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, sequence: u64) -> Self {
        Self {
            samples,
            sample_rate,
            sequence,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Playback duration of this frame.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Cuts an arbitrary stream of sample slices into fixed-size frames.
///
/// ## Example:
/// With `frame_size = 4096`, three callbacks of 1500 samples produce one
/// frame and leave 404 samples pending for the next callback.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    next_sequence: u64,
}

impl FrameAssembler {
    /// A `frame_size` of 0 is treated as 1.
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            sample_rate,
            pending: Vec::with_capacity(frame_size),
            next_sequence: 0,
        }
    }

    /// Append samples, handing every completed frame to `emit` in order.
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(AudioFrame)) {
        let mut rest = samples;
        while !rest.is_empty() {
            let room = self.frame_size - self.pending.len();
            let take = room.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.frame_size {
                let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                emit(self.make_frame(full));
            }
        }
    }

    /// Emit the partial tail padded with silence, if any samples are pending.
    pub fn finish_padded(&mut self) -> Option<AudioFrame> {
        if self.pending.is_empty() {
            return None;
        }
        let mut tail = std::mem::take(&mut self.pending);
        tail.resize(self.frame_size, 0.0);
        Some(self.make_frame(tail))
    }

    /// Samples waiting for the current frame to fill.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn make_frame(&mut self, samples: Vec<f32>) -> AudioFrame {
        let frame = AudioFrame::new(samples, self.sample_rate, self.next_sequence);
        self.next_sequence += 1;
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembler_cuts_fixed_frames() {
        let mut assembler = FrameAssembler::new(4, 16000);
        let mut frames = Vec::new();

        assembler.push(&[0.1, 0.2, 0.3], |f| frames.push(f));
        assert!(frames.is_empty());
        assert_eq!(assembler.pending_len(), 3);

        assembler.push(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9], |f| frames.push(f));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].samples(), &[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(frames[1].samples(), &[0.5, 0.6, 0.7, 0.8]);
        assert_eq!(frames[0].sequence(), 0);
        assert_eq!(frames[1].sequence(), 1);
        assert_eq!(assembler.pending_len(), 1);
    }

    #[test]
    fn test_finish_pads_with_silence() {
        let mut assembler = FrameAssembler::new(4, 16000);
        assembler.push(&[0.5], |_| panic!("no full frame expected"));

        let tail = assembler.finish_padded().unwrap();
        assert_eq!(tail.samples(), &[0.5, 0.0, 0.0, 0.0]);
        assert!(assembler.finish_padded().is_none());
    }

    #[test]
    fn test_zero_frame_size_still_makes_progress() {
        let mut assembler = FrameAssembler::new(0, 16000);
        let mut frames = Vec::new();

        assembler.push(&[0.1, 0.2, 0.3], |f| frames.push(f));
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].samples(), &[0.3]);
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(vec![0.0; 4096], 16000, 0);
        assert_eq!(frame.duration(), Duration::from_millis(256));
    }
}
