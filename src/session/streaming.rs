use super::pump::{self, PumpExit};
use super::resources::SessionResources;
use super::{SessionCounters, SessionState, SessionStats};
use crate::audio::encoder::SampleEncoder;
use crate::audio::vad::VoiceActivityGate;
use crate::capture::{
    select_capture_source, AudioCaptureSource, InputDevice, MicrophonePermission, PermissionStatus,
};
use crate::config::StreamConfig;
use crate::connection::close::NORMAL_CLOSURE;
use crate::connection::{ConnectionManager, ConnectionState, Connector, SessionIntent};
use crate::error::{StreamError, StreamResult};
use crate::events::{self, EventReceiver, EventSender, StreamEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub(super) struct SessionInner {
    id: Uuid,
    config: StreamConfig,
    pub(super) connection: ConnectionManager,
    capture: Arc<dyn AudioCaptureSource>,
    permission: Arc<dyn MicrophonePermission>,
    pub(super) gate: VoiceActivityGate,
    pub(super) encoder: SampleEncoder,
    events: EventSender,
    state: watch::Sender<SessionState>,
    resources: Mutex<Option<SessionResources>>,
    pub(super) counters: SessionCounters,
    /// Serializes start/stop/dispose
    lifecycle: tokio::sync::Mutex<()>,
    disposed: AtomicBool,
}

impl SessionInner {
    fn resources(&self) -> MutexGuard<'_, Option<SessionResources>> {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(session_id = %self.id, "Session {} -> {}", previous.as_str(), state.as_str());
            let _ = self.events.send(StreamEvent::SessionState(state));
        }
    }

    /// Ends a run the pump noticed first (device failure, lost socket).
    fn finish_from_pump(&self, exit: PumpExit) {
        let mut slot = self.resources();
        let Some(resources) = slot.take() else {
            // stop() or drop already owns the teardown
            return;
        };

        let event = match exit {
            PumpExit::Drained => {
                warn!(session_id = %self.id, "Capture ended on its own");
                StreamEvent::Interrupted(StreamError::DeviceUnavailable("capture ended".to_string()))
            }
            PumpExit::CaptureFailed(err) => {
                error!(session_id = %self.id, "Capture failed mid-stream: {}", err);
                self.connection.intent().set_active(false);
                StreamEvent::CaptureFailed(err.into())
            }
            PumpExit::ConnectionLost(state) => {
                warn!(session_id = %self.id, "Connection {} while streaming, capture released", state.as_str());
                StreamEvent::Interrupted(StreamError::ConnectionLost(format!(
                    "connection {}",
                    state.as_str()
                )))
            }
        };

        self.set_state(SessionState::Stopping);
        // Our own handle: dropping it detaches
        drop(resources.release(&self.counters));
        self.set_state(SessionState::Idle);
        let _ = self.events.send(event);
    }
}

/// The realtime audio streaming session.
///
/// ## Ownership:
/// The session exclusively owns its capture handle, frame pump and
/// connection. Dropping it releases all three, even mid-stream.
///
/// ## Example:
/// ```no_run
/// # use audio_stream_client::*;
/// # use std::sync::Arc;
/// # async fn run(device: Arc<dyn InputDevice>) -> StreamResult<()> {
/// let config = StreamConfig::default();
/// let connector = Arc::new(WebSocketConnector::new(config.connection.send_queue_capacity));
/// let (session, mut events) =
///     StreamingSession::new(config, connector, device, Arc::new(StaticPermission::granted()));
///
/// session.start().await?;
/// while let Some(event) = events.recv().await {
///     if let StreamEvent::Server { event: ServerEvent::Detection(d), .. } = event {
///         println!("flagged: {}", d.text);
///     }
/// }
/// session.dispose().await;
/// # Ok(())
/// # }
/// ```
pub struct StreamingSession {
    inner: Arc<SessionInner>,
}

impl StreamingSession {
    /// Build a session, picking the capture backend from `config.audio.backend`
    /// and the device's capabilities.
    pub fn new(
        config: StreamConfig,
        connector: Arc<dyn Connector>,
        device: Arc<dyn InputDevice>,
        permission: Arc<dyn MicrophonePermission>,
    ) -> (StreamingSession, EventReceiver) {
        let capture = select_capture_source(device, config.audio.backend);
        Self::with_capture_source(config, connector, capture, permission)
    }

    /// Build a session around an already chosen capture source.
    pub fn with_capture_source(
        config: StreamConfig,
        connector: Arc<dyn Connector>,
        capture: Arc<dyn AudioCaptureSource>,
        permission: Arc<dyn MicrophonePermission>,
    ) -> (StreamingSession, EventReceiver) {
        let (events, receiver) = events::channel();
        let connection = ConnectionManager::with_events(
            config.server.clone(),
            config.connection.clone(),
            connector,
            SessionIntent::default(),
            events.clone(),
        );
        let (state, _) = watch::channel(SessionState::Idle);
        let id = Uuid::new_v4();
        info!(session_id = %id, backend = capture.backend().as_str(), "Streaming session created");

        let inner = SessionInner {
            id,
            gate: VoiceActivityGate::from_config(&config.vad),
            encoder: SampleEncoder::new(config.session.transport_format),
            config,
            connection,
            capture,
            permission,
            events,
            state,
            resources: Mutex::new(None),
            counters: SessionCounters::default(),
            lifecycle: tokio::sync::Mutex::new(()),
            disposed: AtomicBool::new(false),
        };
        (StreamingSession { inner: Arc::new(inner) }, receiver)
    }

    /// Unique id of this session, attached to every log line.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Watch session state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Session states as a `Stream`, starting with the current one.
    pub fn state_stream(&self) -> WatchStream<SessionState> {
        WatchStream::new(self.subscribe())
    }

    /// The connection, e.g. to connect ahead of `start()`.
    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    /// Current state of the underlying connection.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Frame counters, including overflow drops of the live capture.
    pub fn stats(&self) -> SessionStats {
        let live = self.inner.resources().as_ref().map_or(0, SessionResources::overflow_drops);
        self.inner.counters.snapshot(live)
    }

    /// Start streaming: permission, then connection, then capture.
    ///
    /// A no-op if already streaming. An invalid configuration fails with
    /// `ConfigError` before anything is requested. Every failure leaves the
    /// session Idle with nothing acquired.
    pub async fn start(&self) -> StreamResult<()> {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;
        if inner.resources().is_some() {
            info!(session_id = %inner.id, "Capture already active, start() ignored");
            return Ok(());
        }

        if let Err(e) = inner.config.validate() {
            error!(session_id = %inner.id, "Invalid configuration: {:#}", e);
            return self.abort_start(StreamError::ConfigError(format!("{:#}", e)), false);
        }

        inner.connection.intent().set_active(true);
        inner.set_state(SessionState::AwaitingPermission);
        if inner.permission.request().await == PermissionStatus::Denied {
            warn!(session_id = %inner.id, "Microphone permission denied");
            return self.abort_start(StreamError::PermissionDenied, false);
        }

        inner.set_state(SessionState::AwaitingConnection);
        let opened_here = !inner.connection.is_connected();
        if opened_here {
            if let Err(e) = inner.connection.connect() {
                return self.abort_start(e, false);
            }
            let wait = inner.config.session.connect_wait();
            if !inner.connection.wait_until_connected(wait).await {
                error!(session_id = %inner.id, "No connection after {}ms", wait.as_millis());
                return self.abort_start(StreamError::ConnectionTimeout(wait), true);
            }
        }

        let mut capture = match inner.capture.start(&inner.config.audio) {
            Ok(capture) => capture,
            Err(e) => {
                error!(session_id = %inner.id, "Failed to start capture: {}", e);
                return self.abort_start(e.into(), opened_here);
            }
        };
        let Some(mut frames) = capture.take_frames() else {
            let err = StreamError::DeviceUnavailable("capture produced no frame stream".to_string());
            return self.abort_start(err, opened_here);
        };

        let mut slot = inner.resources();
        let pump_inner = Arc::clone(inner);
        let mut connection_state = inner.connection.subscribe();
        let pump = tokio::spawn(async move {
            let exit = pump::run(&pump_inner, &mut frames, &mut connection_state).await;
            debug!(session_id = %pump_inner.id, "Frame pump exited: {:?}", exit);
            pump_inner.finish_from_pump(exit);
        });

        *slot = Some(SessionResources { capture, pump });
        inner.set_state(SessionState::Streaming);
        Ok(())
    }

    fn abort_start(&self, err: StreamError, close_connection: bool) -> StreamResult<()> {
        let inner = &self.inner;
        inner.connection.intent().set_active(false);
        if close_connection {
            inner.connection.close(NORMAL_CLOSURE, "session start failed");
        }
        inner.set_state(SessionState::Idle);
        Err(err)
    }

    /// Stop capture and wait for in-flight frames to drain.
    ///
    /// The socket stays connected for the next `start()`. Safe to call when
    /// not streaming.
    pub async fn stop(&self) {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;
        inner.connection.intent().set_active(false);

        let Some(resources) = inner.resources().take() else {
            debug!(session_id = %inner.id, "stop() while not streaming");
            return;
        };

        inner.set_state(SessionState::Stopping);
        let pump = resources.release(&inner.counters);
        if let Err(e) = pump.await {
            if !e.is_cancelled() {
                error!(session_id = %inner.id, "Frame pump panicked: {}", e);
            }
        }
        inner.set_state(SessionState::Idle);
        info!(session_id = %inner.id, "Streaming stopped");
    }

    /// Stop and close the connection for good.
    pub async fn dispose(&self) {
        self.stop().await;
        let inner = &self.inner;
        inner.connection.intent().set_active(false);
        inner.connection.close(NORMAL_CLOSURE, "session disposed");
        inner.disposed.store(true, Ordering::SeqCst);
        info!(session_id = %inner.id, "Session disposed");
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        let inner = &self.inner;
        let resources = inner.resources().take();
        if let Some(resources) = resources {
            warn!(session_id = %inner.id, "Session dropped while streaming");
            resources.release(&inner.counters).abort();
            inner.set_state(SessionState::Idle);
        }
        if !inner.disposed.swap(true, Ordering::SeqCst) {
            inner.connection.intent().set_active(false);
            inner.connection.close(NORMAL_CLOSURE, "session dropped");
        }
    }
}
