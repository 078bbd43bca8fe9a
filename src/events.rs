//! # Application Events
//!
//! Everything the session reports asynchronously travels as a [`StreamEvent`]
//! on one unbounded channel, in the order it happened.

use crate::connection::messages::ServerEvent;
use crate::connection::ConnectionState;
use crate::error::StreamError;
use crate::session::SessionState;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// Receiver handed to the embedding application.
pub type EventReceiver = mpsc::UnboundedReceiver<StreamEvent>;

pub(crate) type EventSender = mpsc::UnboundedSender<StreamEvent>;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Session state machine moved
    SessionState(SessionState),

    /// Socket state moved
    ConnectionState(ConnectionState),

    /// One parsed inbound text message
    Server {
        event: ServerEvent,
        received_at: DateTime<Utc>,
    },

    /// Socket closed, with the reconnect decision that was taken
    ConnectionClosed {
        code: u16,
        reason: String,
        will_reconnect: bool,
    },

    /// The microphone failed mid-stream; capture has been released
    CaptureFailed(StreamError),

    /// Streaming ended without `stop()` being called
    Interrupted(StreamError),
}

impl StreamEvent {
    pub(crate) fn server(event: ServerEvent) -> Self {
        StreamEvent::Server {
            event,
            received_at: Utc::now(),
        }
    }
}

pub(crate) fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
