//! # Wire Messages
//!
//! JSON text frames exchanged with the detection server. Audio never travels
//! here: it goes out as raw binary frames.
//!
//! ## Inbound Parsing:
//! Parsing never fails. Text that is not JSON becomes a `Status` line, and
//! JSON with an unknown `type` (or fields of the wrong shape) becomes `Unknown`
//! with the raw text preserved.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Liveness probe
    #[serde(rename = "keep_alive")]
    KeepAlive {
        /// Client clock, epoch milliseconds
        timestamp: i64,
        user_id: String,
    },

    /// Sent just before a user-initiated close
    #[serde(rename = "close")]
    Close {
        user_id: String,
        /// Client clock, epoch milliseconds
        timestamp: i64,
    },
}

impl ClientMessage {
    /// Keep-alive stamped with the current time.
    pub fn keep_alive(user_id: &str) -> Self {
        ClientMessage::KeepAlive {
            timestamp: chrono::Utc::now().timestamp_millis(),
            user_id: user_id.to_string(),
        }
    }

    /// Sent just before a client-initiated close.
    pub fn close_notice(user_id: &str) -> Self {
        ClientMessage::Close {
            user_id: user_id.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn to_json(&self) -> String {
        // Only strings and integers, cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A flagged utterance reported by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub text: String,
    /// Primary matched pattern
    pub pattern: Option<String>,
    /// Every matched pattern (contains `pattern` when the server sent only that)
    pub patterns: Vec<String>,
    /// Clamped to [0, 1]
    pub confidence: f64,
    /// Server timestamp, passed through untouched
    pub timestamp: Option<f64>,
}

/// Parsed inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Pong,
    Detection(Detection),
    Transcription { text: String },
    Status { message: String },
    ServerError { message: String },
    Unknown { raw: String },
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Pong => "pong",
            ServerEvent::Detection(_) => "detection",
            ServerEvent::Transcription { .. } => "transcription",
            ServerEvent::Status { .. } => "status",
            ServerEvent::ServerError { .. } => "error",
            ServerEvent::Unknown { .. } => "unknown",
        }
    }

    /// Parse one inbound text frame.
    pub fn parse(raw: &str) -> ServerEvent {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(_) => {
                return ServerEvent::Status {
                    message: raw.to_string(),
                }
            }
        };

        let unknown = || ServerEvent::Unknown { raw: raw.to_string() };
        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            return unknown();
        };

        match kind {
            "pong" | "keep_alive_response" => ServerEvent::Pong,
            "detection" => serde_json::from_value::<DetectionWire>(value)
                .map(|wire| ServerEvent::Detection(wire.into()))
                .unwrap_or_else(|_| unknown()),
            "transcription" => serde_json::from_value::<TextWire>(value)
                .map(|wire| ServerEvent::Transcription { text: wire.text })
                .unwrap_or_else(|_| unknown()),
            "status" => serde_json::from_value::<MessageWire>(value)
                .map(|wire| ServerEvent::Status { message: wire.message })
                .unwrap_or_else(|_| unknown()),
            "error" => serde_json::from_value::<MessageWire>(value)
                .map(|wire| ServerEvent::ServerError { message: wire.message })
                .unwrap_or_else(|_| unknown()),
            _ => unknown(),
        }
    }
}

#[derive(Deserialize)]
struct DetectionWire {
    #[serde(default)]
    text: String,
    pattern: Option<String>,
    #[serde(default)]
    patterns: Vec<String>,
    #[serde(default)]
    confidence: f64,
    timestamp: Option<f64>,
}

impl From<DetectionWire> for Detection {
    fn from(wire: DetectionWire) -> Self {
        let mut patterns = wire.patterns;
        if let Some(pattern) = &wire.pattern {
            if !patterns.contains(pattern) {
                patterns.insert(0, pattern.clone());
            }
        }
        let pattern = wire.pattern.or_else(|| patterns.first().cloned());

        let confidence = if wire.confidence.is_finite() {
            wire.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        Detection {
            text: wire.text,
            pattern,
            patterns,
            confidence,
            timestamp: wire.timestamp,
        }
    }
}

#[derive(Deserialize)]
struct TextWire {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct MessageWire {
    #[serde(default)]
    message: String,
}
