//! # Input Devices
//!
//! The hardware seam under the capture backends. A device knows its native
//! format, whether it can deliver a low-latency callback, and how to open a
//! stream that calls back with raw samples.
//!
//! [`PushInput`] is a device fed by the embedding host: a mobile platform
//! bridge (or a test) pushes samples through a [`PushInputFeeder`].

use crate::audio::convert::DeviceFormat;
use crate::config::AudioConfig;
use crate::error::CaptureError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Receives raw device samples (interleaved, native format).
pub type SampleCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Receives asynchronous device failures.
pub type ErrorCallback = Box<dyn FnMut(CaptureError) + Send + 'static>;

/// What a device can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Delivers small blocks from a live processing callback
    pub low_latency_callback: bool,
}

/// Hardware seam.
pub trait InputDevice: Send + Sync {
    fn name(&self) -> String;

    fn capabilities(&self) -> DeviceCapabilities;

    /// Native format the callbacks will deliver.
    fn format(&self, config: &AudioConfig) -> Result<DeviceFormat, CaptureError>;

    /// Open a stream. Fails with `DeviceUnavailable` when busy or missing.
    fn open(
        &self,
        config: &AudioConfig,
        on_samples: SampleCallback,
        on_error: ErrorCallback,
    ) -> Result<Box<dyn DeviceStream>, CaptureError>;
}

/// An open device stream.
pub trait DeviceStream: Send {
    /// Stop delivery. Once this returns no callback runs again. Idempotent.
    fn close(&mut self);
}

/// Processing the capture requested from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingRequest {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

struct PushSlot {
    callbacks: Option<(SampleCallback, ErrorCallback)>,
    stream_id: u64,
    unavailable: Option<String>,
    requested: Option<ProcessingRequest>,
}

struct PushShared {
    slot: Mutex<PushSlot>,
}

impl PushShared {
    fn lock(&self) -> MutexGuard<'_, PushSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Host-fed input device. Only one stream may be open at a time.
pub struct PushInput {
    name: String,
    format: DeviceFormat,
    capabilities: DeviceCapabilities,
    shared: Arc<PushShared>,
}

/// The host's end of a [`PushInput`].
#[derive(Clone)]
pub struct PushInputFeeder {
    shared: Arc<PushShared>,
}

impl PushInput {
    /// Create the device and the feeder the host pushes samples through.
    pub fn new(name: impl Into<String>, format: DeviceFormat) -> (PushInput, PushInputFeeder) {
        let shared = Arc::new(PushShared {
            slot: Mutex::new(PushSlot {
                callbacks: None,
                stream_id: 0,
                unavailable: None,
                requested: None,
            }),
        });

        let input = PushInput {
            name: name.into(),
            format,
            capabilities: DeviceCapabilities {
                low_latency_callback: true,
            },
            shared: Arc::clone(&shared),
        };
        (input, PushInputFeeder { shared })
    }

    /// Declare whether the host delivers from a low-latency callback.
    pub fn with_low_latency(mut self, low_latency: bool) -> Self {
        self.capabilities.low_latency_callback = low_latency;
        self
    }
}

impl InputDevice for PushInput {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn format(&self, _config: &AudioConfig) -> Result<DeviceFormat, CaptureError> {
        Ok(self.format)
    }

    fn open(
        &self,
        config: &AudioConfig,
        on_samples: SampleCallback,
        on_error: ErrorCallback,
    ) -> Result<Box<dyn DeviceStream>, CaptureError> {
        let mut slot = self.shared.lock();

        if let Some(reason) = &slot.unavailable {
            return Err(CaptureError::DeviceUnavailable(reason.clone()));
        }
        if slot.callbacks.is_some() {
            return Err(CaptureError::DeviceUnavailable(format!("{} is busy", self.name)));
        }

        slot.stream_id += 1;
        slot.callbacks = Some((on_samples, on_error));
        slot.requested = Some(ProcessingRequest {
            echo_cancellation: config.echo_cancellation,
            noise_suppression: config.noise_suppression,
        });
        debug!("Opened push input {} (stream {})", self.name, slot.stream_id);

        Ok(Box::new(PushStream {
            shared: Arc::clone(&self.shared),
            stream_id: slot.stream_id,
            closed: false,
        }))
    }
}

struct PushStream {
    shared: Arc<PushShared>,
    stream_id: u64,
    closed: bool,
}

impl DeviceStream for PushStream {
    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let mut slot = self.shared.lock();
        if slot.stream_id == self.stream_id {
            slot.callbacks = None;
        }
    }
}

impl Drop for PushStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl PushInputFeeder {
    /// Deliver samples to the open stream. Returns `false` when nothing is listening.
    pub fn push(&self, samples: &[f32]) -> bool {
        let mut slot = self.shared.lock();
        match slot.callbacks.as_mut() {
            Some((on_samples, _)) => {
                on_samples(samples);
                true
            }
            None => false,
        }
    }

    /// Report a mid-stream failure (permission revoked, device lost).
    /// The stream is detached afterwards.
    pub fn fail(&self, error: CaptureError) {
        let mut slot = self.shared.lock();
        match slot.callbacks.take() {
            Some((_, mut on_error)) => on_error(error),
            None => warn!("Push input failure with no open stream: {}", error),
        }
    }

    /// Whether a capture currently holds the device.
    pub fn is_open(&self) -> bool {
        self.shared.lock().callbacks.is_some()
    }

    /// Make future `open` calls fail (e.g. another app grabbed the microphone).
    pub fn set_unavailable(&self, reason: Option<String>) {
        self.shared.lock().unavailable = reason;
    }

    /// Processing flags passed by the most recent `open`.
    pub fn requested_processing(&self) -> Option<ProcessingRequest> {
        self.shared.lock().requested
    }
}
