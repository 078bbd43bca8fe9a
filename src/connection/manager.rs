//! # Connection Manager
//!
//! Owns one logical connection to the detection server and every timer that
//! belongs to it.
//!
//! ## Key Features:
//! - **Bounded connect**: An attempt that does not open within the connect
//!   timeout is abandoned and treated as an abnormal closure (1006)
//! - **Keep-alive**: One keep-alive shortly after open, optionally repeated
//! - **Fail-silent sends**: `send_*` never errors; anything sent while not
//!   `Connected` (or with a full send queue) is dropped and counted
//! - **Single reconnect timer**: A close that warrants reconnecting arms at
//!   most one timer; `connect()`, `close()` and `cancel_pending()` clear it
//!
//! ## Epochs:
//! Every connect attempt and every close bumps an epoch. Socket events and
//! timers carry the epoch they were started under and are ignored once it is
//! stale, so a superseded socket can never resurrect a closed connection.

use super::close::{CloseDisposition, ABNORMAL_CLOSURE};
use super::messages::{ClientMessage, ServerEvent};
use super::transport::{Connector, SocketChannels, SocketEvent, WireMessage};
use super::{ConnectionState, SessionIntent};
use crate::config::{ConnectionConfig, ServerConfig};
use crate::error::{StreamResult, TransportError};
use crate::events::{self, EventReceiver, EventSender, StreamEvent};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, warn};

/// Snapshot of connection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub connect_attempts: u64,
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub sends_dropped: u64,
    pub messages_received: u64,
    pub reconnects_scheduled: u64,
}

#[derive(Default)]
struct Counters {
    connect_attempts: AtomicU64,
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
    sends_dropped: AtomicU64,
    messages_received: AtomicU64,
    reconnects_scheduled: AtomicU64,
}

/// Handles owned by the connection. Only touched under the slot lock.
#[derive(Default)]
struct Slot {
    epoch: u64,
    outbound: Option<mpsc::Sender<WireMessage>>,
    connect_task: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
    keep_alive_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
}

impl Slot {
    fn abort_socket_tasks(&mut self) {
        let tasks = [
            self.connect_task.take(),
            self.reader_task.take(),
            self.keep_alive_task.take(),
        ];
        for task in tasks.into_iter().flatten() {
            task.abort();
        }
    }

    fn cancel_reconnect(&mut self) -> bool {
        match self.reconnect_task.take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

struct Inner {
    server: ServerConfig,
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    intent: SessionIntent,
    events: EventSender,
    state: watch::Sender<ConnectionState>,
    slot: Mutex<Slot>,
    counters: Counters,
}

/// Socket lifecycle owner. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager and the receiver for its events.
    pub fn new(
        server: ServerConfig,
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
        intent: SessionIntent,
    ) -> (ConnectionManager, EventReceiver) {
        let (events, receiver) = events::channel();
        (Self::with_events(server, config, connector, intent, events), receiver)
    }

    pub(crate) fn with_events(
        server: ServerConfig,
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
        intent: SessionIntent,
        events: EventSender,
    ) -> ConnectionManager {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        ConnectionManager {
            inner: Arc::new(Inner {
                server,
                config,
                connector,
                intent,
                events,
                state,
                slot: Mutex::new(Slot::default()),
                counters: Counters::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Whether sends currently reach the socket.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The shared flag consulted before re-arming a reconnect.
    pub fn intent(&self) -> &SessionIntent {
        &self.inner.intent
    }

    /// Watch connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// State changes as a `Stream`, starting with the current state.
    pub fn state_stream(&self) -> WatchStream<ConnectionState> {
        WatchStream::new(self.subscribe())
    }

    /// Snapshot of the connection counters.
    pub fn stats(&self) -> ConnectionStats {
        let c = &self.inner.counters;
        ConnectionStats {
            connect_attempts: c.connect_attempts.load(Ordering::Relaxed),
            messages_sent: c.messages_sent.load(Ordering::Relaxed),
            bytes_sent: c.bytes_sent.load(Ordering::Relaxed),
            sends_dropped: c.sends_dropped.load(Ordering::Relaxed),
            messages_received: c.messages_received.load(Ordering::Relaxed),
            reconnects_scheduled: c.reconnects_scheduled.load(Ordering::Relaxed),
        }
    }

    /// Caller must hold the slot lock so transitions are emitted in order.
    fn set_state(&self, state: ConnectionState) {
        let previous = self.inner.state.send_replace(state);
        if previous != state {
            debug!("Connection state {} -> {}", previous.as_str(), state.as_str());
            let _ = self.inner.events.send(StreamEvent::ConnectionState(state));
        }
    }

    /// Start connecting to the configured endpoint.
    ///
    /// Returns once the attempt is under way; watch the state (or use
    /// [`wait_until_connected`](Self::wait_until_connected)) for the outcome.
    /// A no-op while already connected or connecting. Must be called from
    /// within a tokio runtime.
    pub fn connect(&self) -> StreamResult<()> {
        let url = self.inner.server.endpoint().map_err(|e| {
            error!("Cannot connect: {}", e);
            e
        })?;

        let mut slot = self.lock();
        if slot.cancel_reconnect() {
            debug!("Pending reconnect superseded by connect()");
        }

        match self.state() {
            ConnectionState::Connected => {
                debug!("Already connected, connect() ignored");
                return Ok(());
            }
            ConnectionState::Connecting => {
                debug!("Connection attempt already in flight");
                return Ok(());
            }
            _ => {}
        }

        slot.abort_socket_tasks();
        slot.outbound = None;
        slot.epoch += 1;
        let epoch = slot.epoch;

        self.inner.counters.connect_attempts.fetch_add(1, Ordering::Relaxed);
        self.set_state(ConnectionState::Connecting);
        info!(epoch, "Connecting to {}", url);

        let manager = self.clone();
        let timeout = self.inner.config.connect_timeout();
        let attempt = self.inner.connector.connect(&url);
        slot.connect_task = Some(tokio::spawn(async move {
            match tokio::time::timeout(timeout, attempt).await {
                Ok(Ok(channels)) => manager.on_open(epoch, channels),
                Ok(Err(e)) => {
                    warn!("Connection attempt failed: {}", e);
                    manager.close_event(epoch, ABNORMAL_CLOSURE, e.to_string());
                }
                Err(_) => {
                    warn!("Connection timed out after {}ms", timeout.as_millis());
                    let reason = format!("connection timed out after {}ms", timeout.as_millis());
                    manager.close_event(epoch, ABNORMAL_CLOSURE, reason);
                }
            }
        }));
        Ok(())
    }

    fn on_open(&self, epoch: u64, channels: SocketChannels) {
        let SocketChannels { outbound, inbound } = channels;

        let mut slot = self.lock();
        if slot.epoch != epoch {
            debug!(epoch, "Discarding socket from a superseded attempt");
            return;
        }

        // Running inside the connect task: detach, don't abort
        slot.connect_task = None;
        slot.outbound = Some(outbound);
        self.set_state(ConnectionState::Connected);
        info!(epoch, "Connected");

        slot.reader_task = Some(self.spawn_reader(epoch, inbound));
        slot.keep_alive_task = Some(self.spawn_keep_alive(epoch));
    }

    fn spawn_reader(&self, epoch: u64, mut inbound: mpsc::Receiver<SocketEvent>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                match event {
                    SocketEvent::Text(text) => manager.message_event(epoch, &text),
                    SocketEvent::Binary(bytes) => manager.binary_event(epoch, &bytes),
                    SocketEvent::Error(err) => manager.error_event(epoch, err),
                    SocketEvent::Closed { code, reason } => {
                        manager.close_event(epoch, code, reason);
                        return;
                    }
                }
            }
            manager.close_event(epoch, ABNORMAL_CLOSURE, "socket dropped without close frame".to_string());
        })
    }

    fn spawn_keep_alive(&self, epoch: u64) -> JoinHandle<()> {
        let manager = self.clone();
        let delay = self.inner.config.keep_alive_delay();
        let interval = self.inner.config.keep_alive_interval();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !manager.send_keep_alive(epoch) {
                return;
            }

            let Some(period) = interval else { return };
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if !manager.send_keep_alive(epoch) {
                    return;
                }
            }
        })
    }

    /// Returns `false` once the epoch is stale.
    fn send_keep_alive(&self, epoch: u64) -> bool {
        if self.lock().epoch != epoch {
            return false;
        }
        debug!("Sending keep-alive");
        let message = ClientMessage::keep_alive(&self.inner.server.user_id);
        self.send_text(message.to_json());
        true
    }

    fn spawn_reconnect(&self) -> JoinHandle<()> {
        let manager = self.clone();
        let delay = self.inner.config.reconnect_delay();
        info!("Reconnecting in {}ms", delay.as_millis());

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // An empty slot means the timer was cancelled after it fired
            if manager.lock().reconnect_task.take().is_none() {
                return;
            }
            if !manager.inner.intent.is_active() {
                info!("Session no longer active, reconnect skipped");
                return;
            }
            if let Err(e) = manager.connect() {
                error!("Reconnect failed: {}", e);
            }
        })
    }

    /// Send one binary message. Dropped (and counted) unless `Connected`.
    pub fn send_binary(&self, bytes: Vec<u8>) -> bool {
        self.send(WireMessage::Binary(bytes))
    }

    /// Send one text message. Dropped (and counted) unless `Connected`.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(WireMessage::Text(text.into()))
    }

    fn send(&self, message: WireMessage) -> bool {
        let len = match &message {
            WireMessage::Binary(bytes) => bytes.len(),
            WireMessage::Text(text) => text.len(),
            WireMessage::Close { .. } => 0,
        };
        let counters = &self.inner.counters;

        let slot = self.lock();
        let state = self.state();
        let outbound = match (state, slot.outbound.as_ref()) {
            (ConnectionState::Connected, Some(outbound)) => outbound,
            _ => {
                counters.sends_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(state = state.as_str(), bytes = len, "Not connected, message dropped");
                return false;
            }
        };

        match outbound.try_send(message) {
            Ok(()) => {
                counters.messages_sent.fetch_add(1, Ordering::Relaxed);
                counters.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                counters.sends_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(bytes = len, "Send queue full, message dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                counters.sends_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(bytes = len, "Socket writer gone, message dropped");
                false
            }
        }
    }

    /// User-initiated close. Never schedules a reconnect.
    ///
    /// Sends a close notice and a close frame if the socket is open, then
    /// moves to `Disconnected` and clears every timer.
    pub fn close(&self, code: u16, reason: &str) {
        let mut slot = self.lock();
        slot.cancel_reconnect();
        slot.abort_socket_tasks();
        slot.epoch += 1;

        if let Some(outbound) = slot.outbound.take() {
            if self.state() == ConnectionState::Connected {
                self.set_state(ConnectionState::Closing);
                let notice = ClientMessage::close_notice(&self.inner.server.user_id);
                if outbound.try_send(WireMessage::Text(notice.to_json())).is_err() {
                    warn!("Send queue full, close notice dropped");
                }
                let _ = outbound.try_send(WireMessage::Close {
                    code,
                    reason: reason.to_string(),
                });
            }
        }

        if self.state() != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnected);
            info!(code, "Connection closed by client: {}", reason);
        }
    }

    /// Inbound text message from the socket.
    pub fn handle_message(&self, raw: &str) {
        self.inner.counters.messages_received.fetch_add(1, Ordering::Relaxed);
        let event = ServerEvent::parse(raw);
        match &event {
            ServerEvent::Pong => debug!("Pong received, connection alive"),
            ServerEvent::Detection(d) => info!(
                confidence = d.confidence,
                "Detection: \"{}\" (pattern {:?})",
                d.text,
                d.pattern
            ),
            ServerEvent::Transcription { text } => debug!("Transcription: {}", text),
            ServerEvent::Status { message } => info!("Server status: {}", message),
            ServerEvent::ServerError { message } => error!("Server error: {}", message),
            ServerEvent::Unknown { raw } => warn!("Unknown server message: {}", raw),
        }
        let _ = self.inner.events.send(StreamEvent::server(event));
    }

    /// Inbound binary message. Acknowledged, not decoded.
    pub fn handle_binary(&self, bytes: &[u8]) {
        self.inner.counters.messages_received.fetch_add(1, Ordering::Relaxed);
        debug!(bytes = bytes.len(), "Binary message received, ignored");
    }

    /// Socket closed with `code`.
    pub fn handle_close(&self, code: u16, reason: &str) {
        let mut slot = self.lock();
        self.apply_close(&mut slot, code, reason.to_string());
    }

    /// Socket error. Moves to `Error` but leaves closing to the socket.
    pub fn handle_error(&self, err: TransportError) {
        let _slot = self.lock();
        self.apply_error(err);
    }

    /// Cancel a scheduled reconnect.
    pub fn cancel_pending(&self) {
        if self.lock().cancel_reconnect() {
            info!("Pending reconnect cancelled");
        }
    }

    /// Whether a reconnect timer is armed.
    pub fn has_pending_reconnect(&self) -> bool {
        self.lock().reconnect_task.is_some()
    }

    /// Wait up to `timeout` for `Connected`. `true` if it got there.
    pub async fn wait_until_connected(&self, timeout: Duration) -> bool {
        let mut state = self.subscribe();
        let connected = state.wait_for(|s| *s == ConnectionState::Connected);
        let reached = matches!(tokio::time::timeout(timeout, connected).await, Ok(Ok(_)));
        reached
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.lock().epoch == epoch
    }

    fn message_event(&self, epoch: u64, raw: &str) {
        if self.is_current(epoch) {
            self.handle_message(raw);
        }
    }

    fn binary_event(&self, epoch: u64, bytes: &[u8]) {
        if self.is_current(epoch) {
            self.handle_binary(bytes);
        }
    }

    fn error_event(&self, epoch: u64, err: TransportError) {
        let slot = self.lock();
        if slot.epoch == epoch {
            self.apply_error(err);
        }
    }

    fn close_event(&self, epoch: u64, code: u16, reason: String) {
        let mut slot = self.lock();
        if slot.epoch != epoch {
            debug!(code, "Ignoring close from a superseded socket");
            return;
        }
        self.apply_close(&mut slot, code, reason);
    }

    fn apply_error(&self, err: TransportError) {
        error!("Socket error: {}", err);
        if self.state() != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Error);
        }
    }

    fn apply_close(&self, slot: &mut Slot, code: u16, reason: String) {
        let disposition = CloseDisposition::for_code(code);
        let live = slot.outbound.is_some() || self.state() != ConnectionState::Disconnected;

        if !live {
            if !disposition.should_reconnect && slot.cancel_reconnect() {
                info!(code, "Normal closure cancelled the pending reconnect");
            } else {
                debug!(code, "Close reported with no live socket, ignored");
            }
            return;
        }

        slot.epoch += 1;
        slot.outbound = None;
        slot.abort_socket_tasks();
        self.set_state(ConnectionState::Disconnected);

        let will_reconnect = disposition.should_reconnect && self.inner.intent.is_active();
        if will_reconnect {
            if slot.reconnect_task.is_none() {
                slot.reconnect_task = Some(self.spawn_reconnect());
                self.inner.counters.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            slot.cancel_reconnect();
        }

        info!(
            code,
            will_reconnect,
            "Connection closed: {} ({})",
            disposition.description,
            reason
        );
        let _ = self.inner.events.send(StreamEvent::ConnectionClosed {
            code,
            reason,
            will_reconnect,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use crate::connection::loopback::{LoopbackConnector, LoopbackMode};
    use crate::connection::messages::Detection;
    use crate::error::StreamError;
    use serde_json::Value;

    fn setup(user_id: &str, active: bool) -> (ConnectionManager, EventReceiver, LoopbackConnector) {
        let connector = LoopbackConnector::default();
        let server = ServerConfig {
            url: "ws://loopback/ws".to_string(),
            user_id: user_id.to_string(),
        };
        let (manager, events) = ConnectionManager::new(
            server,
            StreamConfig::default().connection,
            Arc::new(connector.clone()),
            SessionIntent::new(active),
        );
        (manager, events, connector)
    }

    async fn next_closed(events: &mut EventReceiver) -> StreamEvent {
        loop {
            match events.recv().await {
                Some(event @ StreamEvent::ConnectionClosed { .. }) => return event,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    }

    #[tokio::test]
    async fn test_connect_without_url_is_config_error() {
        let connector = LoopbackConnector::default();
        let server = ServerConfig {
            url: String::new(),
            user_id: "u".to_string(),
        };
        let (manager, _events) = ConnectionManager::new(
            server,
            StreamConfig::default().connection,
            Arc::new(connector.clone()),
            SessionIntent::new(true),
        );

        assert!(matches!(manager.connect(), Err(StreamError::ConfigError(_))));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_after_open() {
        let (manager, _events, connector) = setup("user-7", true);
        manager.connect().unwrap();

        let mut server = connector.accept().await.unwrap();
        assert_eq!(server.url(), "ws://loopback/ws?user_id=user-7");
        assert!(manager.wait_until_connected(Duration::from_secs(1)).await);

        match server.recv().await {
            Some(WireMessage::Text(json)) => {
                let value: Value = serde_json::from_str(&json).unwrap();
                assert_eq!(value["type"], "keep_alive");
                assert_eq!(value["user_id"], "user-7");
            }
            other => panic!("expected keep-alive, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sends_dropped_while_disconnected() {
        let (manager, _events, _connector) = setup("u", true);

        assert!(!manager.send_binary(vec![0u8; 8192]));
        assert!(!manager.send_text("hello"));

        let stats = manager.stats();
        assert_eq!(stats.sends_dropped, 2);
        assert_eq!(stats.messages_sent, 0);
        assert_eq!(stats.bytes_sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_sends_notice_then_close_frame() {
        let (manager, mut events, connector) = setup("u-1", true);
        manager.connect().unwrap();
        let mut server = connector.accept().await.unwrap();
        assert!(manager.wait_until_connected(Duration::from_secs(1)).await);

        manager.close(1000, "user stopped");
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.has_pending_reconnect());

        match server.recv().await {
            Some(WireMessage::Text(json)) => {
                let value: Value = serde_json::from_str(&json).unwrap();
                assert_eq!(value["type"], "close");
                assert_eq!(value["user_id"], "u-1");
            }
            other => panic!("expected close notice, got {:?}", other),
        }
        assert_eq!(
            server.recv().await,
            Some(WireMessage::Close {
                code: 1000,
                reason: "user stopped".to_string()
            })
        );
        assert_eq!(server.recv().await, None);

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let StreamEvent::ConnectionState(state) = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Closing,
                ConnectionState::Disconnected
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_abnormal_close_schedules_one_reconnect() {
        let (manager, mut events, connector) = setup("u", true);
        manager.connect().unwrap();
        let server = connector.accept().await.unwrap();
        assert!(manager.wait_until_connected(Duration::from_secs(1)).await);

        server.close(1006, "gone").await;
        assert_eq!(
            next_closed(&mut events).await,
            StreamEvent::ConnectionClosed {
                code: 1006,
                reason: "gone".to_string(),
                will_reconnect: true
            }
        );
        assert!(manager.has_pending_reconnect());

        // A second close before the timer fires must not stack another timer
        manager.handle_close(1006, "duplicate");
        assert_eq!(manager.stats().reconnects_scheduled, 1);

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert_eq!(connector.attempts(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let _server = connector.accept().await.unwrap();
        assert_eq!(connector.attempts(), 2);
        assert!(!manager.has_pending_reconnect());
        assert!(manager.wait_until_connected(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_normal_close_never_reconnects() {
        let (manager, mut events, connector) = setup("u", true);
        manager.connect().unwrap();
        let server = connector.accept().await.unwrap();
        assert!(manager.wait_until_connected(Duration::from_secs(1)).await);

        server.close(1000, "server done").await;
        assert!(matches!(
            next_closed(&mut events).await,
            StreamEvent::ConnectionClosed { code: 1000, will_reconnect: false, .. }
        ));
        assert!(!manager.has_pending_reconnect());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactive_intent_suppresses_reconnect() {
        let (manager, mut events, connector) = setup("u", false);
        manager.connect().unwrap();
        let server = connector.accept().await.unwrap();
        assert!(manager.wait_until_connected(Duration::from_secs(1)).await);

        drop(server);
        assert!(matches!(
            next_closed(&mut events).await,
            StreamEvent::ConnectionClosed { code: 1006, will_reconnect: false, .. }
        ));
        assert!(!manager.has_pending_reconnect());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_falls_back_to_disconnected() {
        let (manager, mut events, connector) = setup("u", false);
        connector.set_mode(LoopbackMode::Hang);

        manager.connect().unwrap();
        manager.connect().unwrap();
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(connector.attempts(), 1);
        assert!(!manager.wait_until_connected(Duration::from_secs(1)).await);

        let closed = next_closed(&mut events).await;
        assert!(matches!(closed, StreamEvent::ConnectionClosed { code: 1006, .. }));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_without_close_is_tolerated() {
        let (manager, mut events, connector) = setup("u", true);
        manager.connect().unwrap();
        let server = connector.accept().await.unwrap();
        assert!(manager.wait_until_connected(Duration::from_secs(1)).await);

        server.fail("connection reset").await;
        loop {
            if let Some(StreamEvent::ConnectionState(ConnectionState::Error)) = events.recv().await {
                break;
            }
        }
        assert!(!manager.send_binary(vec![1, 2]));

        // The close arriving later still drives the reconnect decision
        server.close(1011, "internal").await;
        assert!(matches!(
            next_closed(&mut events).await,
            StreamEvent::ConnectionClosed { code: 1011, will_reconnect: true, .. }
        ));
        manager.close(1000, "test done");
        assert!(!manager.has_pending_reconnect());
    }

    #[tokio::test]
    async fn test_detection_dispatched_in_order() {
        let (manager, mut events, connector) = setup("u", true);
        manager.connect().unwrap();
        let server = connector.accept().await.unwrap();
        assert!(manager.wait_until_connected(Duration::from_secs(1)).await);

        server
            .send_text(r#"{"type":"detection","text":"x","pattern":"y","confidence":0.9,"timestamp":123}"#)
            .await;
        server.send_text("not json").await;

        let mut received = Vec::new();
        while received.len() < 2 {
            if let Some(StreamEvent::Server { event, .. }) = events.recv().await {
                received.push(event);
            }
        }
        assert_eq!(
            received[0],
            ServerEvent::Detection(Detection {
                text: "x".to_string(),
                pattern: Some("y".to_string()),
                patterns: vec!["y".to_string()],
                confidence: 0.9,
                timestamp: Some(123.0),
            })
        );
        assert_eq!(received[1], ServerEvent::Status { message: "not json".to_string() });
        manager.close(1000, "test done");
    }
}
