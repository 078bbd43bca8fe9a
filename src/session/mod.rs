//! # Streaming Session
//!
//! Binds capture, gating, encoding and the connection into one start/stop
//! unit for the embedding application.
//!
//! ## Session Lifecycle:
//! 1. **Idle**: Nothing held
//! 2. **AwaitingPermission**: Microphone permission requested
//! 3. **AwaitingConnection**: Waiting (bounded) for the socket
//! 4. **Streaming**: Frames flow microphone → gate → encoder → socket
//! 5. **Stopping**: Capture released, pump draining
//!
//! Any setup failure returns to Idle with a typed error. Mid-stream
//! failures (device lost, socket dropped) also return to Idle, reported as
//! events instead of errors.

mod pump;       // Frame pump task
mod resources;  // SessionResources and teardown
mod streaming;  // StreamingSession

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

pub use streaming::StreamingSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    AwaitingPermission,
    AwaitingConnection,
    Streaming,
    Stopping,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingPermission => "awaiting_permission",
            SessionState::AwaitingConnection => "awaiting_connection",
            SessionState::Streaming => "streaming",
            SessionState::Stopping => "stopping",
        }
    }
}

/// Snapshot of session counters, accumulated across start/stop cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Frames that reached the pump
    pub frames_captured: u64,
    /// Frames below the voice threshold
    pub frames_gated: u64,
    /// Frames dropped because the socket was not connected
    pub frames_dropped_disconnected: u64,
    pub frames_sent: u64,
    pub bytes_sent: u64,
    /// Frames the connection refused (full send queue)
    pub send_failures: u64,
    /// Frames evicted from the capture queue because the pump fell behind
    pub queue_overflow_drops: u64,
}

#[derive(Default)]
pub(crate) struct SessionCounters {
    frames_captured: AtomicU64,
    frames_gated: AtomicU64,
    frames_dropped_disconnected: AtomicU64,
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_failures: AtomicU64,
    queue_overflow_drops: AtomicU64,
}

impl SessionCounters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    /// `live_overflow` is the overflow count of the capture still running.
    fn snapshot(&self, live_overflow: u64) -> SessionStats {
        SessionStats {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_gated: self.frames_gated.load(Ordering::Relaxed),
            frames_dropped_disconnected: self.frames_dropped_disconnected.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            queue_overflow_drops: self.queue_overflow_drops.load(Ordering::Relaxed) + live_overflow,
        }
    }
}
