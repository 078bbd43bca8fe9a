//! # Audio Stream Client
//!
//! Client-side realtime audio streaming for a remote speech/profanity
//! detection service. Captures microphone audio, drops silence, encodes
//! 16-bit PCM and streams it over a persistent WebSocket, while detection
//! events pushed by the server flow back to the embedding application.
//!
//! ## Data Flow:
//! ```text
//! microphone → capture (frames) → voice gate → encoder → connection → server
//! server → connection (JSON) → StreamEvent → application
//! ```
//!
//! ## Architecture:
//! - **audio**: Frames, the voice activity gate, PCM encoding, format conversion
//! - **capture**: Microphone backends (streaming and segment) behind one contract
//! - **connection**: Socket lifecycle, keep-alive, close codes, reconnects
//! - **session**: `StreamingSession`, the start/stop unit the application drives
//! - **config**: Layered configuration (defaults, TOML file, environment)
//! - **error** / **events**: What failures and notifications look like

pub mod audio;       // Frames, gate, encoder (audio/ directory)
pub mod capture;     // Microphone capture (capture/ directory)
pub mod config;      // Configuration management (config.rs)
pub mod connection;  // Socket lifecycle (connection/ directory)
pub mod error;       // Error types (error.rs)
pub mod events;      // Application events (events.rs)
pub mod session;     // StreamingSession (session/ directory)

pub use audio::encoder::{EncodedFrame, SampleEncoder, TransportFormat};
pub use audio::frame::AudioFrame;
pub use audio::vad::VoiceActivityGate;
pub use capture::{
    AudioCaptureSource, CaptureBackend, CaptureBackendPreference, CaptureHandle, InputDevice,
    MicrophonePermission, PermissionStatus, PushInput, PushInputFeeder, StaticPermission,
};
pub use config::StreamConfig;
pub use connection::{
    ConnectionManager, ConnectionState, Connector, Detection, LoopbackConnector, ServerEvent,
    SessionIntent, WebSocketConnector,
};
pub use error::{CaptureError, StreamError, StreamResult, TransportError};
pub use events::{EventReceiver, StreamEvent};
pub use session::{SessionState, SessionStats, StreamingSession};

#[cfg(feature = "cpal")]
pub use capture::cpal_input::CpalInput;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a console `tracing` subscriber for hosts that have none.
///
/// Reads `RUST_LOG`, defaulting to `audio_stream_client=debug`. Calling it
/// again (or after the host installed its own subscriber) is harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audio_stream_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
