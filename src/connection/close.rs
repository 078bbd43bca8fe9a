//! # Close Codes
//!
//! Maps a socket close code to a readable reason and the reconnect decision.
//! Only a normal closure (1000) suppresses reconnecting.

pub const NORMAL_CLOSURE: u16 = 1000;
pub const GOING_AWAY: u16 = 1001;
pub const PROTOCOL_ERROR: u16 = 1002;
pub const ABNORMAL_CLOSURE: u16 = 1006;
pub const SERVER_ERROR: u16 = 1011;

/// What a close code means for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseDisposition {
    pub code: u16,
    pub description: &'static str,
    pub should_reconnect: bool,
}

impl CloseDisposition {
    pub fn for_code(code: u16) -> Self {
        let description = match code {
            NORMAL_CLOSURE => "normal closure",
            GOING_AWAY => "endpoint going away",
            PROTOCOL_ERROR => "protocol error",
            ABNORMAL_CLOSURE => "abnormal closure (no close frame)",
            SERVER_ERROR => "server error",
            _ => "unknown",
        };

        Self {
            code,
            description,
            should_reconnect: code != NORMAL_CLOSURE,
        }
    }
}
