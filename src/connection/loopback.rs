//! # Loopback Connector
//!
//! In-process [`Connector`] whose server ends are handed to the caller. Hosts
//! that own the real socket (a mobile bridge) and tests both use it: every
//! successful `connect` produces a [`LoopbackServer`] retrievable through
//! [`LoopbackConnector::accept`].

use super::transport::{Connector, SocketChannels, SocketEvent, WireMessage};
use crate::error::TransportError;
use futures_util::future::{self, BoxFuture, FutureExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// How the loopback answers connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopbackMode {
    Accept,
    Refuse,
    /// Never completes; exercises the connect timeout
    Hang,
}

struct LoopbackShared {
    mode: Mutex<LoopbackMode>,
    attempts: AtomicU64,
    send_queue_capacity: usize,
    accepted_tx: mpsc::UnboundedSender<LoopbackServer>,
    accepted_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<LoopbackServer>>,
}

#[derive(Clone)]
pub struct LoopbackConnector {
    shared: Arc<LoopbackShared>,
}

impl LoopbackConnector {
    pub fn new(send_queue_capacity: usize) -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(LoopbackShared {
                mode: Mutex::new(LoopbackMode::Accept),
                attempts: AtomicU64::new(0),
                send_queue_capacity: send_queue_capacity.max(1),
                accepted_tx,
                accepted_rx: tokio::sync::Mutex::new(accepted_rx),
            }),
        }
    }

    /// How the next connection attempts are answered.
    pub fn set_mode(&self, mode: LoopbackMode) {
        *self.shared.mode.lock().unwrap_or_else(PoisonError::into_inner) = mode;
    }

    /// Connection attempts so far, whatever their outcome.
    pub fn attempts(&self) -> u64 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the next accepted connection.
    pub async fn accept(&self) -> Option<LoopbackServer> {
        self.shared.accepted_rx.lock().await.recv().await
    }

    /// Next accepted connection, if one is already waiting.
    pub fn try_accept(&self) -> Option<LoopbackServer> {
        self.shared.accepted_rx.try_lock().ok()?.try_recv().ok()
    }
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Connector for LoopbackConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<SocketChannels, TransportError>> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        let mode = *self.shared.mode.lock().unwrap_or_else(PoisonError::into_inner);

        match mode {
            LoopbackMode::Refuse => future::ready(Err(TransportError::Connect(format!(
                "connection refused: {}",
                url
            ))))
            .boxed(),
            LoopbackMode::Hang => future::pending().boxed(),
            LoopbackMode::Accept => {
                let (outbound, received) = mpsc::channel(self.shared.send_queue_capacity);
                let (events, inbound) = mpsc::channel(64);
                let server = LoopbackServer {
                    url: url.to_string(),
                    received,
                    events,
                };
                let result = if self.shared.accepted_tx.send(server).is_ok() {
                    Ok(SocketChannels { outbound, inbound })
                } else {
                    Err(TransportError::Connect("loopback listener dropped".to_string()))
                };
                future::ready(result).boxed()
            }
        }
    }
}

/// The server end of one loopback socket.
///
/// Dropping it without calling [`close`](Self::close) looks like a socket that
/// died without a close frame.
pub struct LoopbackServer {
    url: String,
    received: mpsc::Receiver<WireMessage>,
    events: mpsc::Sender<SocketEvent>,
}

impl LoopbackServer {
    /// URL the client connected to, including the query string.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Next message the client wrote.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.received.recv().await
    }

    pub fn try_recv(&mut self) -> Option<WireMessage> {
        self.received.try_recv().ok()
    }

    /// Everything the client has written so far.
    pub fn drain(&mut self) -> Vec<WireMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.received.try_recv() {
            messages.push(message);
        }
        messages
    }

    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.events.send(SocketEvent::Text(text.into())).await.is_ok()
    }

    pub async fn send_binary(&self, bytes: Vec<u8>) -> bool {
        self.events.send(SocketEvent::Binary(bytes)).await.is_ok()
    }

    /// Report a socket error to the client without closing.
    pub async fn fail(&self, message: impl Into<String>) -> bool {
        let error = TransportError::Socket(message.into());
        self.events.send(SocketEvent::Error(error)).await.is_ok()
    }

    /// Close with a code, as the server would.
    pub async fn close(self, code: u16, reason: impl Into<String>) {
        let _ = self
            .events
            .send(SocketEvent::Closed {
                code,
                reason: reason.into(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accept_pairs_channels() {
        let connector = LoopbackConnector::default();
        let mut channels = connector.connect("ws://loopback/ws?user_id=a").await.unwrap();
        let mut server = connector.accept().await.unwrap();
        assert_eq!(server.url(), "ws://loopback/ws?user_id=a");

        channels.outbound.send(WireMessage::Text("hi".to_string())).await.unwrap();
        assert_eq!(server.recv().await, Some(WireMessage::Text("hi".to_string())));

        assert!(server.send_text("{\"type\":\"pong\"}").await);
        assert_eq!(
            channels.inbound.recv().await,
            Some(SocketEvent::Text("{\"type\":\"pong\"}".to_string()))
        );

        drop(server);
        assert_eq!(channels.inbound.recv().await, None);
    }

    #[tokio::test]
    async fn test_refuse_counts_attempts() {
        let connector = LoopbackConnector::default();
        connector.set_mode(LoopbackMode::Refuse);

        assert!(connector.connect("ws://loopback/ws").await.is_err());
        assert!(connector.connect("ws://loopback/ws").await.is_err());
        assert_eq!(connector.attempts(), 2);
        assert!(connector.try_accept().is_none());
    }
}
