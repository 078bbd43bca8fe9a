//! # Audio Capture
//!
//! Owns the microphone and turns device callbacks into a stream of
//! fixed-size [`AudioFrame`](crate::audio::frame::AudioFrame)s.
//!
//! ## Backends:
//! - **Streaming**: Frames are assembled inside the device callback and queued
//!   immediately. No segment boundary, lowest latency. Preferred.
//! - **Segment**: Samples are recorded into a segment buffer that is flushed
//!   periodically and on stop. Used when the device has no low-latency callback.
//!
//! Both honour the same contract: `start` yields a fresh [`CaptureHandle`],
//! `CaptureHandle::stop` is idempotent, and no frame is queued after it returns.

pub mod device;      // InputDevice seam and the host-fed PushInput
pub mod permission;  // Microphone permission seam
pub mod segment;     // Segment-recording backend
pub mod streaming;   // Low-latency callback backend

#[cfg(feature = "cpal")]
pub mod cpal_input;  // System microphone through cpal

use crate::audio::buffer::{FrameQueue, FrameReceiver};
use crate::config::AudioConfig;
use crate::error::CaptureError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use device::{DeviceCapabilities, DeviceStream, InputDevice, PushInput, PushInputFeeder};
pub use permission::{MicrophonePermission, PermissionStatus, StaticPermission};
pub use segment::SegmentCapture;
pub use streaming::StreamingCapture;

/// Which backend a capture source uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureBackend {
    Streaming,
    Segment,
}

impl CaptureBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureBackend::Streaming => "streaming",
            CaptureBackend::Segment => "segment",
        }
    }
}

/// Backend preference from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackendPreference {
    /// Streaming when the device supports a low-latency callback, else Segment
    #[default]
    Auto,
    Streaming,
    Segment,
}

impl std::str::FromStr for CaptureBackendPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" | "automatic" => Ok(CaptureBackendPreference::Auto),
            "streaming" | "stream" => Ok(CaptureBackendPreference::Streaming),
            "segment" | "recording" => Ok(CaptureBackendPreference::Segment),
            _ => Err(format!("Unknown capture backend: {}", s)),
        }
    }
}

/// Contract shared by both backends.
pub trait AudioCaptureSource: Send + Sync {
    fn backend(&self) -> CaptureBackend;

    /// Acquire the device and begin producing frames.
    fn start(&self, config: &AudioConfig) -> Result<CaptureHandle, CaptureError>;
}

/// Backend-specific teardown behind a [`CaptureHandle`].
pub trait CaptureDriver: Send {
    /// Push recorded-but-unqueued audio into the frame queue.
    fn flush(&mut self) {}

    /// Release the device. No frame may be queued after this returns.
    fn shutdown(&mut self);
}

/// One live capture. Not restartable: a new `start` yields a new handle.
pub struct CaptureHandle {
    id: Uuid,
    backend: CaptureBackend,
    queue: FrameQueue,
    frames: Option<FrameReceiver>,
    driver: Option<Box<dyn CaptureDriver>>,
}

impl CaptureHandle {
    /// Wrap a started backend. Called by capture sources from `start`.
    pub fn new(
        backend: CaptureBackend,
        queue: FrameQueue,
        frames: FrameReceiver,
        driver: Box<dyn CaptureDriver>,
    ) -> Self {
        let id = Uuid::new_v4();
        info!(capture_id = %id, backend = backend.as_str(), "Audio capture started");
        Self {
            id,
            backend,
            queue,
            frames: Some(frames),
            driver: Some(driver),
        }
    }

    /// Unique id of this capture, attached to its log lines.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Backend that produced this capture.
    pub fn backend(&self) -> CaptureBackend {
        self.backend
    }

    /// Hand the frame receiver to the consumer. Returns `None` after the first call.
    pub fn take_frames(&mut self) -> Option<FrameReceiver> {
        self.frames.take()
    }

    /// Emit any recorded audio that has not been queued yet (segment backend).
    pub fn flush(&mut self) {
        if let Some(driver) = self.driver.as_mut() {
            driver.flush();
        }
    }

    /// `false` once `stop` has run.
    pub fn is_active(&self) -> bool {
        self.driver.is_some()
    }

    /// Frames lost because the consumer fell behind.
    pub fn overflow_drops(&self) -> u64 {
        self.queue.overflow_drops()
    }

    /// Release the device and close the frame queue. Idempotent.
    pub fn stop(&mut self) {
        let Some(mut driver) = self.driver.take() else {
            debug!(capture_id = %self.id, "Capture already stopped");
            return;
        };
        driver.shutdown();
        self.queue.close();
        info!(capture_id = %self.id, "Audio capture stopped");
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pick a backend for `device` once, at construction time.
pub fn select_capture_source(
    device: Arc<dyn InputDevice>,
    preference: CaptureBackendPreference,
) -> Arc<dyn AudioCaptureSource> {
    let low_latency = device.capabilities().low_latency_callback;
    let backend = match preference {
        CaptureBackendPreference::Auto if low_latency => CaptureBackend::Streaming,
        CaptureBackendPreference::Auto => CaptureBackend::Segment,
        CaptureBackendPreference::Streaming => {
            if !low_latency {
                warn!("Device {} has no low-latency callback, streaming anyway", device.name());
            }
            CaptureBackend::Streaming
        }
        CaptureBackendPreference::Segment => CaptureBackend::Segment,
    };

    info!("Selected {} capture backend for device {}", backend.as_str(), device.name());
    match backend {
        CaptureBackend::Streaming => Arc::new(StreamingCapture::new(device)),
        CaptureBackend::Segment => Arc::new(SegmentCapture::new(device)),
    }
}
