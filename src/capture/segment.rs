//! # Segment Capture Backend
//!
//! Records into a segment buffer instead of queueing frames from the callback.
//! Recorded audio only becomes frames when the segment is flushed: on the
//! periodic segment timer, on an explicit [`CaptureHandle::flush`], and once
//! more on stop (with the tail padded to a whole frame).

use super::device::{DeviceStream, ErrorCallback, InputDevice, SampleCallback};
use super::{AudioCaptureSource, CaptureBackend, CaptureDriver, CaptureHandle};
use crate::audio::buffer::FrameQueue;
use crate::audio::frame::FrameAssembler;
use crate::config::AudioConfig;
use crate::error::CaptureError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Segment-recording backend.
pub struct SegmentCapture {
    device: Arc<dyn InputDevice>,
}

impl SegmentCapture {
    pub fn new(device: Arc<dyn InputDevice>) -> Self {
        Self { device }
    }
}

struct SegmentRecorder {
    recorded: Vec<f32>,
    assembler: FrameAssembler,
}

impl SegmentRecorder {
    /// Move recorded samples into whole frames; a partial tail stays pending.
    fn flush(&mut self, queue: &FrameQueue) -> usize {
        let recorded = std::mem::take(&mut self.recorded);
        let mut emitted = 0;
        self.assembler.push(&recorded, |frame| {
            queue.push(frame);
            emitted += 1;
        });
        emitted
    }
}

type SharedRecorder = Arc<Mutex<SegmentRecorder>>;

fn lock(recorder: &SharedRecorder) -> MutexGuard<'_, SegmentRecorder> {
    recorder.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AudioCaptureSource for SegmentCapture {
    fn backend(&self) -> CaptureBackend {
        CaptureBackend::Segment
    }

    fn start(&self, config: &AudioConfig) -> Result<CaptureHandle, CaptureError> {
        let format = self.device.format(config)?;
        let (queue, frames) = FrameQueue::new(segment_queue_capacity(config));

        let target_rate = config.sample_rate;
        let recorder: SharedRecorder = Arc::new(Mutex::new(SegmentRecorder {
            recorded: Vec::new(),
            assembler: FrameAssembler::new(config.frame_size, target_rate),
        }));

        let sink = Arc::clone(&recorder);
        let on_samples: SampleCallback = Box::new(move |samples: &[f32]| {
            let mono = format.normalize(samples, target_rate);
            lock(&sink).recorded.extend_from_slice(&mono);
        });

        let failer = queue.clone();
        let on_error: ErrorCallback = Box::new(move |err: CaptureError| {
            error!("Audio device error during segment recording: {}", err);
            failer.fail(err);
        });

        let stream = self.device.open(config, on_samples, on_error)?;
        let flusher = spawn_flusher(
            Arc::clone(&recorder),
            queue.clone(),
            Duration::from_millis(config.segment_duration_ms),
        );

        Ok(CaptureHandle::new(
            CaptureBackend::Segment,
            queue.clone(),
            frames,
            Box::new(SegmentDriver {
                stream,
                recorder,
                queue,
                flusher,
            }),
        ))
    }
}

/// Room for one whole segment plus a partial frame carried over, so a flush
/// never evicts frames of its own segment.
fn segment_queue_capacity(config: &AudioConfig) -> usize {
    let samples = config.segment_duration_ms.saturating_mul(config.sample_rate as u64) / 1000;
    let frames = samples.div_ceil(config.frame_size.max(1) as u64) as usize;
    config.queue_capacity.max(frames.saturating_add(1))
}

fn spawn_flusher(recorder: SharedRecorder, queue: FrameQueue, period: Duration) -> Option<JoinHandle<()>> {
    if period.is_zero() {
        return None;
    }
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!("No async runtime, segments flush only on demand");
        return None;
    };

    Some(runtime.spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            ticker.tick().await;
            let emitted = lock(&recorder).flush(&queue);
            debug!("Segment flushed: {} frames", emitted);
        }
    }))
}

struct SegmentDriver {
    stream: Box<dyn DeviceStream>,
    recorder: SharedRecorder,
    queue: FrameQueue,
    flusher: Option<JoinHandle<()>>,
}

impl CaptureDriver for SegmentDriver {
    fn flush(&mut self) {
        lock(&self.recorder).flush(&self.queue);
    }

    fn shutdown(&mut self) {
        self.stream.close();
        if let Some(flusher) = self.flusher.take() {
            flusher.abort();
        }

        // Final flush: the segment's last bytes are only available now
        let mut recorder = lock(&self.recorder);
        recorder.flush(&self.queue);
        if let Some(tail) = recorder.assembler.finish_padded() {
            self.queue.push(tail);
        }
    }
}
