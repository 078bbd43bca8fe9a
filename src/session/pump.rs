//! Moves frames from the capture queue to the socket, in capture order.

use super::streaming::SessionInner;
use super::SessionCounters;
use crate::audio::buffer::{FrameEvent, FrameReceiver};
use crate::audio::frame::AudioFrame;
use crate::connection::ConnectionState;
use crate::error::CaptureError;
use tokio::sync::watch;
use tracing::{debug, error};

/// Why the pump stopped.
#[derive(Debug)]
pub(super) enum PumpExit {
    /// Capture closed its queue and every frame was handled
    Drained,
    CaptureFailed(CaptureError),
    ConnectionLost(ConnectionState),
}

pub(super) async fn run(
    inner: &SessionInner,
    frames: &mut FrameReceiver,
    connection: &mut watch::Receiver<ConnectionState>,
) -> PumpExit {
    let initial = *connection.borrow_and_update();
    if initial != ConnectionState::Connected {
        return PumpExit::ConnectionLost(initial);
    }

    loop {
        tokio::select! {
            biased;

            event = frames.recv() => match event {
                Some(FrameEvent::Frame(frame)) => forward(inner, &frame),
                Some(FrameEvent::Failed(err)) => return PumpExit::CaptureFailed(err),
                None => return PumpExit::Drained,
            },

            changed = connection.changed() => {
                let state = match changed {
                    Ok(()) => *connection.borrow_and_update(),
                    Err(_) => ConnectionState::Disconnected,
                };
                if state != ConnectionState::Connected {
                    return PumpExit::ConnectionLost(state);
                }
            }
        }
    }
}

/// Gate, encode and send one frame.
fn forward(inner: &SessionInner, frame: &AudioFrame) {
    let counters = &inner.counters;
    SessionCounters::bump(&counters.frames_captured, 1);

    if !inner.connection.is_connected() {
        SessionCounters::bump(&counters.frames_dropped_disconnected, 1);
        debug!(sequence = frame.sequence(), "Not connected, frame dropped");
        return;
    }

    if !inner.gate.should_transmit(frame) {
        SessionCounters::bump(&counters.frames_gated, 1);
        debug!(sequence = frame.sequence(), "Frame below voice threshold");
        return;
    }

    let payload = match inner.encoder.payload(frame) {
        Ok(payload) => payload,
        Err(e) => {
            error!(sequence = frame.sequence(), "Failed to frame audio payload: {}", e);
            return;
        }
    };

    let bytes = payload.len() as u64;
    if inner.connection.send_binary(payload) {
        SessionCounters::bump(&counters.frames_sent, 1);
        SessionCounters::bump(&counters.bytes_sent, bytes);
        debug!(sequence = frame.sequence(), bytes, "Frame sent");
    } else {
        SessionCounters::bump(&counters.send_failures, 1);
    }
}
