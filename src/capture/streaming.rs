//! # Streaming Capture Backend
//!
//! Frames are cut inside the device callback and queued right away, so the
//! only latency is one frame of audio.

use super::device::{DeviceStream, ErrorCallback, InputDevice, SampleCallback};
use super::{AudioCaptureSource, CaptureBackend, CaptureDriver, CaptureHandle};
use crate::audio::buffer::FrameQueue;
use crate::audio::frame::FrameAssembler;
use crate::config::AudioConfig;
use crate::error::CaptureError;
use std::sync::Arc;
use tracing::error;

/// Low-latency backend driven by the device's processing callback.
pub struct StreamingCapture {
    device: Arc<dyn InputDevice>,
}

impl StreamingCapture {
    pub fn new(device: Arc<dyn InputDevice>) -> Self {
        Self { device }
    }
}

impl AudioCaptureSource for StreamingCapture {
    fn backend(&self) -> CaptureBackend {
        CaptureBackend::Streaming
    }

    fn start(&self, config: &AudioConfig) -> Result<CaptureHandle, CaptureError> {
        let format = self.device.format(config)?;
        let (queue, frames) = FrameQueue::new(config.queue_capacity);

        let target_rate = config.sample_rate;
        let mut assembler = FrameAssembler::new(config.frame_size, target_rate);
        let producer = queue.clone();
        let on_samples: SampleCallback = Box::new(move |samples: &[f32]| {
            let mono = format.normalize(samples, target_rate);
            assembler.push(&mono, |frame| {
                producer.push(frame);
            });
        });

        let failer = queue.clone();
        let on_error: ErrorCallback = Box::new(move |err: CaptureError| {
            error!("Audio device error: {}", err);
            failer.fail(err);
        });

        let stream = self.device.open(config, on_samples, on_error)?;
        Ok(CaptureHandle::new(
            CaptureBackend::Streaming,
            queue,
            frames,
            Box::new(StreamingDriver { stream }),
        ))
    }
}

struct StreamingDriver {
    stream: Box<dyn DeviceStream>,
}

impl CaptureDriver for StreamingDriver {
    fn shutdown(&mut self) {
        self.stream.close();
    }
}
