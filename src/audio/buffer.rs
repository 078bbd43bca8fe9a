//! # Frame Queue
//!
//! Bounded hand-off between the audio callback thread (producer) and the
//! session pump (async consumer).
//!
//! ## Key Features:
//! - **Drop oldest**: When full, the oldest frame is discarded
//! - **Never blocks the producer**: Audio callbacks only take a short mutex.
//! - **Terminal failure**: A device error is queued behind the pending frames and
//!   delivered once they are drained.

use crate::audio::frame::AudioFrame;
use crate::error::CaptureError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// What the consumer receives.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    Frame(AudioFrame),
    /// Device failed mid-stream; no frames follow
    Failed(CaptureError),
}

struct QueueState {
    frames: VecDeque<AudioFrame>,
    closed: bool,
    failure: Option<CaptureError>,
    overflow_drops: u64,
}

struct QueueInner {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Producer side. Cheap to clone into device callbacks.
#[derive(Clone)]
pub struct FrameQueue {
    inner: Arc<QueueInner>,
}

/// Consumer side. Exactly one per queue.
pub struct FrameReceiver {
    inner: Arc<QueueInner>,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames (minimum 1).
    pub fn new(capacity: usize) -> (FrameQueue, FrameReceiver) {
        let capacity = capacity.max(1);
        let inner = Arc::new(QueueInner {
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
                failure: None,
                overflow_drops: 0,
            }),
            notify: Notify::new(),
            capacity,
        });

        (
            FrameQueue {
                inner: Arc::clone(&inner),
            },
            FrameReceiver { inner },
        )
    }

    /// Enqueue a frame, evicting the oldest one if the queue is full.
    ///
    /// Returns `false` (and drops the frame) once the queue is closed.
    pub fn push(&self, frame: AudioFrame) -> bool {
        {
            let mut state = self.inner.lock();
            if state.closed {
                return false;
            }

            if state.frames.len() >= self.inner.capacity {
                state.frames.pop_front();
                state.overflow_drops += 1;
            }
            state.frames.push_back(frame);
        }

        self.inner.notify.notify_one();
        true
    }

    /// Record a device failure and close the queue.
    pub fn fail(&self, error: CaptureError) {
        {
            let mut state = self.inner.lock();
            if state.closed {
                return;
            }
            state.failure = Some(error);
            state.closed = true;
        }
        self.inner.notify.notify_one();
    }

    /// Close the queue. Frames already queued are still delivered.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.inner.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Frames evicted because the consumer fell behind.
    pub fn overflow_drops(&self) -> u64 {
        self.inner.lock().overflow_drops
    }
}

impl FrameReceiver {
    /// Wait for the next event. `None` once the queue is closed and drained.
    pub async fn recv(&mut self) -> Option<FrameEvent> {
        loop {
            if let Some(event) = self.try_recv() {
                return Some(event);
            }
            if self.inner.lock().closed {
                return None;
            }
            self.inner.notify.notified().await;
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<FrameEvent> {
        let mut state = self.inner.lock();
        if let Some(frame) = state.frames.pop_front() {
            return Some(FrameEvent::Frame(frame));
        }
        state.failure.take().map(FrameEvent::Failed)
    }

    /// Frames currently waiting.
    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sequence: u64) -> AudioFrame {
        AudioFrame::new(vec![0.0; 4], 16000, sequence)
    }

    fn sequence_of(event: Option<FrameEvent>) -> u64 {
        match event {
            Some(FrameEvent::Frame(f)) => f.sequence(),
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let (queue, mut rx) = FrameQueue::new(2);
        for seq in 0..4 {
            assert!(queue.push(frame(seq)));
        }

        assert_eq!(queue.overflow_drops(), 2);
        assert_eq!(sequence_of(rx.try_recv()), 2);
        assert_eq!(sequence_of(rx.try_recv()), 3);
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_push_after_close_is_rejected() {
        let (queue, mut rx) = FrameQueue::new(4);
        queue.push(frame(0));
        queue.close();

        assert!(!queue.push(frame(1)));
        assert_eq!(sequence_of(rx.try_recv()), 0);
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_failure_delivered_after_pending_frames() {
        let (queue, mut rx) = FrameQueue::new(4);
        queue.push(frame(7));
        queue.fail(CaptureError::Disconnected("revoked".to_string()));

        assert_eq!(sequence_of(rx.recv().await), 7);
        assert_eq!(
            rx.recv().await,
            Some(FrameEvent::Failed(CaptureError::Disconnected("revoked".to_string())))
        );
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push_from_other_thread() {
        let (queue, mut rx) = FrameQueue::new(4);
        let producer = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            queue.push(frame(1));
            queue.close();
        });

        assert_eq!(sequence_of(rx.recv().await), 1);
        assert_eq!(rx.recv().await, None);
        producer.join().unwrap();
    }
}
