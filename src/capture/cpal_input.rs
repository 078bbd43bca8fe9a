//! # System Microphone (cpal)
//!
//! `cpal::Stream` is not `Send` on every host, so the stream is built, played
//! and dropped on a dedicated thread. The [`DeviceStream`] handed back only
//! holds a stop channel and the thread handle.

use super::device::{DeviceCapabilities, DeviceStream, ErrorCallback, InputDevice, SampleCallback};
use crate::audio::convert::DeviceFormat;
use crate::config::AudioConfig;
use crate::error::CaptureError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc;
use std::thread::JoinHandle;
use tracing::{error, info, warn};

/// Default (or named) input device of the default cpal host.
pub struct CpalInput {
    device_name: Option<String>,
}

impl CpalInput {
    pub fn default_device() -> Self {
        Self { device_name: None }
    }

    pub fn named(device_name: impl Into<String>) -> Self {
        Self {
            device_name: Some(device_name.into()),
        }
    }

    /// Names of every input device on the default host.
    pub fn list_devices() -> Result<Vec<String>, CaptureError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }
}

fn find_device(device_name: Option<&str>) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .input_devices()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .or_else(|| {
                warn!("Microphone '{}' not found, using default", name);
                host.default_input_device()
            }),
        None => host.default_input_device(),
    };
    device.ok_or_else(|| CaptureError::DeviceUnavailable("no input device found".to_string()))
}

fn unavailable(err: impl std::fmt::Display) -> CaptureError {
    CaptureError::DeviceUnavailable(err.to_string())
}

impl InputDevice for CpalInput {
    fn name(&self) -> String {
        self.device_name.clone().unwrap_or_else(|| "default".to_string())
    }

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            low_latency_callback: true,
        }
    }

    fn format(&self, _config: &AudioConfig) -> Result<DeviceFormat, CaptureError> {
        let device = find_device(self.device_name.as_deref())?;
        let supported = device.default_input_config().map_err(unavailable)?;
        Ok(DeviceFormat {
            sample_rate: supported.sample_rate().0,
            channels: supported.channels(),
        })
    }

    fn open(
        &self,
        config: &AudioConfig,
        on_samples: SampleCallback,
        on_error: ErrorCallback,
    ) -> Result<Box<dyn DeviceStream>, CaptureError> {
        if config.echo_cancellation || config.noise_suppression {
            info!("cpal input has no echo cancellation or noise suppression, capturing raw audio");
        }

        let device_name = self.device_name.clone();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CaptureError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("cpal-input".to_string())
            .spawn(move || {
                let stream = match build_stream(device_name.as_deref(), on_samples, on_error) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(unavailable(e)));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Either an explicit stop or the handle being dropped ends the stream
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(unavailable)?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalStream {
                stop: Some(stop_tx),
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(CaptureError::DeviceUnavailable("capture thread exited".to_string()))
            }
        }
    }
}

fn build_stream(
    device_name: Option<&str>,
    mut on_samples: SampleCallback,
    mut on_error: ErrorCallback,
) -> Result<cpal::Stream, CaptureError> {
    let device = find_device(device_name)?;
    let supported = device.default_input_config().map_err(unavailable)?;
    info!(
        "Using input device {} ({}Hz, {} ch, {:?})",
        device.name().unwrap_or_default(),
        supported.sample_rate().0,
        supported.channels(),
        supported.sample_format()
    );

    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.into();
    let error_callback = move |err: cpal::StreamError| {
        error!("Audio stream error: {}", err);
        on_error(CaptureError::Disconnected(err.to_string()));
    };

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| on_samples(data),
            error_callback,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let converted: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                on_samples(&converted);
            },
            error_callback,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_input_stream(
            &stream_config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                let converted: Vec<f32> = data.iter().map(|&s| (s as f32 - 32768.0) / 32768.0).collect();
                on_samples(&converted);
            },
            error_callback,
            None,
        ),
        other => {
            return Err(CaptureError::DeviceUnavailable(format!(
                "unsupported sample format {:?}",
                other
            )))
        }
    };
    stream.map_err(unavailable)
}

struct CpalStream {
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceStream for CpalStream {
    fn close(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("cpal capture thread panicked");
            }
            info!("Microphone stream released");
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.close();
    }
}
