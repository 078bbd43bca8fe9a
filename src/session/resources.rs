//! Everything a streaming session holds while it runs, owned in one place.

use super::SessionCounters;
use crate::capture::CaptureHandle;
use tokio::task::JoinHandle;
use tracing::debug;

/// The live capture and the pump feeding its frames to the socket.
///
/// Taken out of the session exactly once per run, by whichever path ends
/// the run first: `stop()`, the pump itself, or the session being dropped.
pub(super) struct SessionResources {
    pub(super) capture: CaptureHandle,
    pub(super) pump: JoinHandle<()>,
}

impl SessionResources {
    /// Release the microphone. Returns the pump so the caller can wait for
    /// it to drain (or abort it).
    pub(super) fn release(mut self, counters: &SessionCounters) -> JoinHandle<()> {
        self.capture.stop();
        SessionCounters::bump(&counters.queue_overflow_drops, self.capture.overflow_drops());
        debug!(capture_id = %self.capture.id(), "Session resources released");
        self.pump
    }

    pub(super) fn overflow_drops(&self) -> u64 {
        self.capture.overflow_drops()
    }
}
