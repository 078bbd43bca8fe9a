//! # Connection Lifecycle
//!
//! Everything between the session and the detection server's socket:
//! connecting with a timeout, keep-alive, message dispatch, close-code
//! interpretation and reconnect scheduling.
//!
//! ## State Machine:
//! ```text
//! Disconnected --connect--> Connecting --open--> Connected
//!      ^                        |                    |
//!      +------timeout/fail------+                    |
//!      +-----------------close/error-----------------+
//! ```

pub mod close;      // Close code table
pub mod loopback;   // In-process connector
pub mod manager;    // ConnectionManager
pub mod messages;   // JSON wire shapes
pub mod transport;  // Connector seam and WebSocket implementation

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use close::CloseDisposition;
pub use loopback::{LoopbackConnector, LoopbackMode, LoopbackServer};
pub use manager::{ConnectionManager, ConnectionStats};
pub use messages::{ClientMessage, Detection, ServerEvent};
pub use transport::{Connector, SocketChannels, SocketEvent, WebSocketConnector, WireMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Error => "error",
        }
    }
}

/// Whether the application still wants to be streaming.
///
/// Owned by the application; the manager only reads it when deciding whether
/// a dropped socket should be re-armed. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct SessionIntent(Arc<AtomicBool>);

impl SessionIntent {
    pub fn new(active: bool) -> Self {
        Self(Arc::new(AtomicBool::new(active)))
    }

    /// Set by `start()`, cleared by `stop()` and `dispose()`.
    pub fn set_active(&self, active: bool) {
        self.0.store(active, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
