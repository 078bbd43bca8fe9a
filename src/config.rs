//! # Configuration Management
//!
//! Loads streaming client configuration from multiple sources:
//! - Default values (built into the code)
//! - An optional `audio-stream.toml` in the working directory
//! - Environment variables (with `STREAM_` prefix, `__` between section and field)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment shortcuts (`WS_URL`, `USER_ID`)
//! 2. Environment variables (`STREAM_SERVER__URL`, `STREAM_VAD__THRESHOLD`, ...)
//! 3. Configuration file (`audio-stream.toml`)
//! 4. Default values (defined in the Default impl)

use crate::audio::encoder::TransportFormat;
use crate::capture::CaptureBackendPreference;
use crate::error::{StreamError, StreamResult};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Complete client configuration.
///
/// Grouped by concern so each component only receives the section it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub server: ServerConfig,
    pub connection: ConnectionConfig,
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub session: SessionConfig,
}

/// Detection server endpoint.
///
/// ## Fields:
/// - `url`: WebSocket endpoint without the query, e.g. `ws://localhost:8000/ws`
/// - `user_id`: Stable opaque client identifier supplied by the embedding application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub url: String,
    pub user_id: String,
}

/// Socket lifecycle timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Time allowed for the socket to open
    pub connect_timeout_ms: u64,
    /// Delay between open and the first keep-alive
    pub keep_alive_delay_ms: u64,
    /// Period of further keep-alives, 0 disables them
    pub keep_alive_interval_ms: u64,
    /// Single-shot delay before a reconnect attempt
    pub reconnect_delay_ms: u64,
    /// Outbound messages buffered before sends start dropping
    pub send_queue_capacity: usize,
}

/// Microphone capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per frame (4096 at 16kHz is 256ms)
    pub frame_size: usize,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    /// Frames held between the audio thread and the pump (oldest dropped on overflow)
    pub queue_capacity: usize,
    pub backend: CaptureBackendPreference,
    /// Segment backend flush period, 0 flushes only on demand and on stop
    pub segment_duration_ms: u64,
}

/// Voice activity gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    pub enabled: bool,
    /// Mean absolute amplitude a frame must exceed to be transmitted
    pub threshold: f32,
}

/// Session orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long `start()` waits for the socket to reach `Connected`
    pub connect_wait_ms: u64,
    pub transport_format: TransportFormat,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                url: "ws://localhost:8000/ws".to_string(),
                user_id: String::new(), // Must come from the embedding application
            },
            connection: ConnectionConfig {
                connect_timeout_ms: 10_000,
                keep_alive_delay_ms: 1_000,
                keep_alive_interval_ms: 0,
                reconnect_delay_ms: 3_000,
                send_queue_capacity: 64,
            },
            audio: AudioConfig {
                sample_rate: 16_000,
                channels: 1,
                frame_size: 4096,
                echo_cancellation: true,
                noise_suppression: true,
                queue_capacity: 8,
                backend: CaptureBackendPreference::Auto,
                segment_duration_ms: 1_000,
            },
            vad: VadConfig {
                enabled: true,
                threshold: 0.005,
            },
            session: SessionConfig {
                connect_wait_ms: 5_000,
                transport_format: TransportFormat::Pcm16,
            },
        }
    }
}

impl StreamConfig {
    /// Load configuration from `.env`, `audio-stream.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `STREAM_SERVER__URL=wss://detector.example.com/ws`
    /// - `STREAM_VAD__THRESHOLD=0.01`
    /// - `STREAM_AUDIO__BACKEND=segment`
    /// - `WS_URL=...` / `USER_ID=...`: shortcuts for deployment platforms
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::build(config::File::with_name("audio-stream").required(false))
    }

    /// Layer a TOML document over the defaults (environment still applies).
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Self::build(config::File::from_str(toml, config::FileFormat::Toml))
    }

    fn build<S>(file: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&StreamConfig::default())?)
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("STREAM")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(url) = env::var("WS_URL") {
            settings = settings.set_override("server.url", url)?;
        }

        if let Ok(user_id) = env::var("USER_ID") {
            settings = settings.set_override("server.user_id", user_id)?;
        }

        let config: StreamConfig = settings
            .build()
            .context("failed to assemble configuration sources")?
            .try_deserialize()
            .context("configuration has invalid values")?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// An empty server URL is allowed here; it is reported as
    /// [`StreamError::ConfigError`] when a connection is attempted.
    pub fn validate(&self) -> Result<()> {
        let url = self.server.url.trim();
        if !url.is_empty() && !has_websocket_scheme(url) {
            return Err(anyhow::anyhow!("Server url must use ws:// or wss://, got {}", url));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rate cannot be 0"));
        }

        if self.audio.channels != 1 {
            return Err(anyhow::anyhow!("Only mono capture is supported, got {} channels", self.audio.channels));
        }

        if self.audio.frame_size == 0 {
            return Err(anyhow::anyhow!("Frame size must be greater than 0"));
        }

        if self.audio.queue_capacity == 0 || self.connection.send_queue_capacity == 0 {
            return Err(anyhow::anyhow!("Queue capacities must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.vad.threshold) {
            return Err(anyhow::anyhow!("VAD threshold must be within [0, 1], got {}", self.vad.threshold));
        }

        if self.connection.connect_timeout_ms == 0 || self.session.connect_wait_ms == 0 {
            return Err(anyhow::anyhow!("Connection timeouts must be greater than 0"));
        }

        if !(1_000..=30_000).contains(&self.connection.reconnect_delay_ms) {
            return Err(anyhow::anyhow!(
                "Reconnect delay must be between 1s and 30s, got {}ms",
                self.connection.reconnect_delay_ms
            ));
        }

        Ok(())
    }
}

impl ServerConfig {
    /// Build the full endpoint `<url>?user_id=<id>`.
    ///
    /// Fails with `ConfigError` when the URL or the user id is unset.
    pub fn endpoint(&self) -> StreamResult<String> {
        let base = self.url.trim();
        if base.is_empty() {
            return Err(StreamError::ConfigError("server url is not set".to_string()));
        }
        if !has_websocket_scheme(base) {
            return Err(StreamError::ConfigError(format!("unsupported url scheme: {}", base)));
        }

        let user_id = self.user_id.trim();
        if user_id.is_empty() {
            return Err(StreamError::ConfigError("user_id is not set".to_string()));
        }

        let separator = if base.contains('?') { '&' } else { '?' };
        Ok(format!("{}{}user_id={}", base, separator, encode_query_value(user_id)))
    }
}

impl ConnectionConfig {
    /// Bound on a single connection attempt.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn keep_alive_delay(&self) -> Duration {
        Duration::from_millis(self.keep_alive_delay_ms)
    }

    /// `None` when periodic keep-alives are disabled.
    pub fn keep_alive_interval(&self) -> Option<Duration> {
        (self.keep_alive_interval_ms > 0).then(|| Duration::from_millis(self.keep_alive_interval_ms))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl SessionConfig {
    pub fn connect_wait(&self) -> Duration {
        Duration::from_millis(self.connect_wait_ms)
    }
}

fn has_websocket_scheme(url: &str) -> bool {
    url.starts_with("ws://") || url.starts_with("wss://")
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn encode_query_value(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}
