//! # Socket Transport
//!
//! The seam between [`ConnectionManager`](super::ConnectionManager) and an
//! actual socket. A connector opens a socket and hands back a pair of
//! channels; the manager never touches the socket itself.
//!
//! ## Channel Semantics:
//! - **outbound**: bounded. The manager uses `try_send` so a full queue drops
//!   the message instead of blocking the audio pump.
//! - **inbound**: events in arrival order. Exactly one `Closed` ends the
//!   stream; a socket that vanishes without a close frame reports 1006.

use super::close::ABNORMAL_CLOSURE;
use crate::error::TransportError;
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Inbound events buffered per socket before the reader waits.
const INBOUND_CAPACITY: usize = 64;

/// Close code reported when the peer closed without a status.
const NO_STATUS_RECEIVED: u16 = 1005;

/// Something to write to the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Binary(Vec<u8>),
    Text(String),
    Close { code: u16, reason: String },
}

/// Something the socket reported.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Text(String),
    Binary(Vec<u8>),
    Closed { code: u16, reason: String },
    Error(TransportError),
}

/// Both ends of one open socket, as seen by the manager.
pub struct SocketChannels {
    pub outbound: mpsc::Sender<WireMessage>,
    pub inbound: mpsc::Receiver<SocketEvent>,
}

/// Opens sockets.
pub trait Connector: Send + Sync {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<SocketChannels, TransportError>>;
}

/// WebSocket connector built on tokio-tungstenite.
///
/// `wss://` URLs need the `tls` cargo feature.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    send_queue_capacity: usize,
}

impl WebSocketConnector {
    /// Outbound messages beyond `send_queue_capacity` are rejected, not buffered.
    pub fn new(send_queue_capacity: usize) -> Self {
        Self {
            send_queue_capacity: send_queue_capacity.max(1),
        }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(64)
    }
}

impl From<WireMessage> for Message {
    fn from(message: WireMessage) -> Self {
        match message {
            WireMessage::Binary(bytes) => Message::Binary(bytes),
            WireMessage::Text(text) => Message::Text(text),
            WireMessage::Close { code, reason } => Message::Close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: reason.into(),
            })),
        }
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<SocketChannels, TransportError>> {
        let url = url.to_string();
        let capacity = self.send_queue_capacity;

        async move {
            let (socket, response) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            info!("WebSocket handshake complete (HTTP {})", response.status());

            let (mut sink, mut stream) = socket.split();
            let (outbound, mut outbound_rx) = mpsc::channel::<WireMessage>(capacity);
            let (inbound_tx, inbound) = mpsc::channel::<SocketEvent>(INBOUND_CAPACITY);

            // Writer: drains the outbound queue until a Close goes out or the manager lets go
            tokio::spawn(async move {
                while let Some(message) = outbound_rx.recv().await {
                    let is_close = matches!(message, WireMessage::Close { .. });
                    if let Err(e) = sink.send(message.into()).await {
                        warn!("WebSocket write failed: {}", e);
                        return;
                    }
                    if is_close {
                        return;
                    }
                }
                let _ = sink.close().await;
            });

            // Reader: forwards frames until the socket ends
            tokio::spawn(async move {
                while let Some(item) = stream.next().await {
                    let event = match item {
                        Ok(Message::Text(text)) => SocketEvent::Text(text),
                        Ok(Message::Binary(bytes)) => SocketEvent::Binary(bytes),
                        Ok(Message::Close(frame)) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.into_owned()))
                                .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                            let _ = inbound_tx.send(SocketEvent::Closed { code, reason }).await;
                            return;
                        }
                        Ok(_) => continue,
                        Err(e) => {
                            let reason = e.to_string();
                            let _ = inbound_tx
                                .send(SocketEvent::Error(TransportError::Socket(reason.clone())))
                                .await;
                            let _ = inbound_tx
                                .send(SocketEvent::Closed {
                                    code: ABNORMAL_CLOSURE,
                                    reason,
                                })
                                .await;
                            return;
                        }
                    };
                    if inbound_tx.send(event).await.is_err() {
                        debug!("Inbound receiver dropped, stopping reader");
                        return;
                    }
                }
                let _ = inbound_tx
                    .send(SocketEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: "connection dropped".to_string(),
                    })
                    .await;
            });

            Ok(SocketChannels { outbound, inbound })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_message_conversion() {
        let message: Message = WireMessage::Close {
            code: 1000,
            reason: "bye".to_string(),
        }
        .into();
        match message {
            Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 1000);
                assert_eq!(frame.reason, "bye");
            }
            other => panic!("expected close frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connect_error() {
        // Nothing listens on port 9 of localhost in the test environment
        let result = WebSocketConnector::default().connect("ws://127.0.0.1:9/ws").await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
