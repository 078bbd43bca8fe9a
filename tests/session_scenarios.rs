//! End-to-end session scenarios over the loopback connector and a host-fed
//! microphone.

use audio_stream_client::audio::convert::DeviceFormat;
use audio_stream_client::connection::{LoopbackMode, LoopbackServer, WireMessage};
use audio_stream_client::*;
use std::sync::Arc;
use std::time::Duration;

const FRAME_SIZE: usize = 4096;

struct Harness {
    session: StreamingSession,
    events: EventReceiver,
    connector: LoopbackConnector,
    feeder: PushInputFeeder,
}

fn harness(permission: StaticPermission) -> Harness {
    harness_with(permission, |_| {})
}

fn harness_with(permission: StaticPermission, adjust: impl FnOnce(&mut StreamConfig)) -> Harness {
    let mut config = StreamConfig::default();
    config.server.url = "ws://loopback/ws".to_string();
    config.server.user_id = "tester".to_string();
    adjust(&mut config);

    let connector = LoopbackConnector::default();
    let (device, feeder) = PushInput::new(
        "test-mic",
        DeviceFormat {
            sample_rate: 16000,
            channels: 1,
        },
    );
    let (session, events) = StreamingSession::new(
        config,
        Arc::new(connector.clone()),
        Arc::new(device),
        Arc::new(permission),
    );

    Harness {
        session,
        events,
        connector,
        feeder,
    }
}

/// Let the pump catch up with frames pushed by the test.
async fn settle(session: &StreamingSession, captured: u64) {
    for _ in 0..100 {
        if session.stats().frames_captured >= captured {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("pump did not process {} frames", captured);
}

fn binaries(server: &mut LoopbackServer) -> Vec<Vec<u8>> {
    server
        .drain()
        .into_iter()
        .filter_map(|message| match message {
            WireMessage::Binary(bytes) => Some(bytes),
            _ => None,
        })
        .collect()
}

async fn next_event(events: &mut EventReceiver, matches: impl Fn(&StreamEvent) -> bool) -> StreamEvent {
    loop {
        let event = events.recv().await.expect("event channel closed");
        if matches(&event) {
            return event;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn happy_path_sends_one_frame() {
    let h = harness(StaticPermission::granted());
    h.session.start().await.unwrap();
    assert_eq!(h.session.state(), SessionState::Streaming);
    assert_eq!(h.session.connection_state(), ConnectionState::Connected);

    let mut server = h.connector.accept().await.unwrap();
    assert_eq!(server.url(), "ws://loopback/ws?user_id=tester");

    assert!(h.feeder.push(&vec![0.5; FRAME_SIZE]));
    settle(&h.session, 1).await;

    let sent = binaries(&mut server);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].len(), 2 * FRAME_SIZE);
    // 0.5 * 32767 rounds to 16384 = 0x4000, little-endian
    assert_eq!(&sent[0][..2], &[0x00, 0x40]);

    let stats = h.session.stats();
    assert_eq!(stats.frames_sent, 1);
    assert_eq!(stats.bytes_sent, 2 * FRAME_SIZE as u64);
}

#[tokio::test(start_paused = true)]
async fn silent_frame_is_not_sent() {
    let h = harness(StaticPermission::granted());
    h.session.start().await.unwrap();
    let mut server = h.connector.accept().await.unwrap();

    assert!(h.feeder.push(&vec![0.0; FRAME_SIZE]));
    settle(&h.session, 1).await;

    assert!(binaries(&mut server).is_empty());
    let stats = h.session.stats();
    assert_eq!(stats.frames_gated, 1);
    assert_eq!(stats.frames_sent, 0);
}

#[tokio::test(start_paused = true)]
async fn frames_are_sent_in_capture_order() {
    let h = harness(StaticPermission::granted());
    h.session.start().await.unwrap();
    let mut server = h.connector.accept().await.unwrap();

    h.feeder.push(&vec![0.25; FRAME_SIZE]);
    h.feeder.push(&vec![0.0; FRAME_SIZE]);
    h.feeder.push(&vec![-0.5; FRAME_SIZE]);
    settle(&h.session, 3).await;

    let sent = binaries(&mut server);
    assert_eq!(sent.len(), 2);
    assert_eq!(&sent[0][..2], &8192i16.to_le_bytes());
    assert_eq!(&sent[1][..2], &(-16384i16).to_le_bytes());
}

#[tokio::test(start_paused = true)]
async fn permission_denied_makes_no_connection_attempt() {
    let h = harness(StaticPermission::denied());

    assert_eq!(h.session.start().await, Err(StreamError::PermissionDenied));
    assert_eq!(h.connector.attempts(), 0);
    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(!h.feeder.is_open());
}

#[tokio::test(start_paused = true)]
async fn invalid_audio_config_fails_before_connecting() {
    let h = harness_with(StaticPermission::granted(), |config| config.audio.frame_size = 0);

    let result = h.session.start().await;
    assert!(matches!(result, Err(StreamError::ConfigError(_))), "got {:?}", result);
    assert_eq!(h.connector.attempts(), 0);
    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(!h.feeder.is_open());
    assert!(!h.feeder.push(&[0.1; 16]));
}

#[tokio::test(start_paused = true)]
async fn detection_is_dispatched_once_with_exact_fields() {
    let mut h = harness(StaticPermission::granted());
    h.session.start().await.unwrap();
    let server = h.connector.accept().await.unwrap();

    server
        .send_text(r#"{"type":"detection","text":"x","pattern":"y","confidence":0.9,"timestamp":123}"#)
        .await;

    let event = next_event(&mut h.events, |e| matches!(e, StreamEvent::Server { .. })).await;
    match event {
        StreamEvent::Server {
            event: ServerEvent::Detection(detection),
            ..
        } => {
            assert_eq!(detection.text, "x");
            assert_eq!(detection.pattern.as_deref(), Some("y"));
            assert_eq!(detection.confidence, 0.9);
            assert_eq!(detection.timestamp, Some(123.0));
        }
        other => panic!("expected detection, got {:?}", other),
    }

    tokio::task::yield_now().await;
    while let Ok(event) = h.events.try_recv() {
        assert!(!matches!(event, StreamEvent::Server { .. }), "unexpected {:?}", event);
    }
}

#[tokio::test(start_paused = true)]
async fn connection_timeout_rolls_back() {
    let h = harness(StaticPermission::granted());
    h.connector.set_mode(LoopbackMode::Hang);

    let result = h.session.start().await;
    assert_eq!(result, Err(StreamError::ConnectionTimeout(Duration::from_secs(5))));
    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.session.connection_state(), ConnectionState::Disconnected);
    assert!(!h.session.connection().has_pending_reconnect());
    assert!(!h.feeder.is_open());
}

#[tokio::test(start_paused = true)]
async fn busy_device_releases_connection() {
    let h = harness(StaticPermission::granted());
    h.feeder.set_unavailable(Some("in use by another app".to_string()));

    let result = h.session.start().await;
    assert_eq!(
        result,
        Err(StreamError::DeviceUnavailable("in use by another app".to_string()))
    );
    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.session.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent_and_keeps_socket() {
    let h = harness(StaticPermission::granted());
    h.session.stop().await;
    assert_eq!(h.session.state(), SessionState::Idle);

    h.session.start().await.unwrap();
    assert!(h.feeder.is_open());

    h.session.stop().await;
    h.session.stop().await;
    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(!h.feeder.is_open());
    assert!(!h.feeder.push(&vec![0.5; FRAME_SIZE]));
    assert_eq!(h.session.connection_state(), ConnectionState::Connected);

    // Restart reuses the open socket
    h.session.start().await.unwrap();
    assert!(h.feeder.is_open());
    assert_eq!(h.connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn second_start_is_a_no_op() {
    let h = harness(StaticPermission::granted());
    h.session.start().await.unwrap();
    let first = h.session.stats();

    h.session.start().await.unwrap();
    assert_eq!(h.session.state(), SessionState::Streaming);
    assert_eq!(h.connector.attempts(), 1);
    assert_eq!(h.session.stats(), first);
}

#[tokio::test(start_paused = true)]
async fn connection_loss_releases_microphone() {
    let mut h = harness(StaticPermission::granted());
    h.session.start().await.unwrap();
    let server = h.connector.accept().await.unwrap();

    server.close(1006, "network gone").await;
    let event = next_event(&mut h.events, |e| matches!(e, StreamEvent::Interrupted(_))).await;
    assert!(matches!(event, StreamEvent::Interrupted(StreamError::ConnectionLost(_))));
    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(!h.feeder.is_open());

    // Reconnect keeps running, capture does not come back by itself
    assert!(h.session.connection().has_pending_reconnect());
    tokio::time::sleep(Duration::from_millis(3_100)).await;
    let _server = h.connector.accept().await.unwrap();
    assert_eq!(h.connector.attempts(), 2);
    assert_eq!(h.session.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn capture_failure_stops_session() {
    let mut h = harness(StaticPermission::granted());
    h.session.start().await.unwrap();

    h.feeder
        .fail(CaptureError::Disconnected("permission revoked".to_string()));
    let event = next_event(&mut h.events, |e| matches!(e, StreamEvent::CaptureFailed(_))).await;
    assert_eq!(
        event,
        StreamEvent::CaptureFailed(StreamError::DeviceUnavailable("permission revoked".to_string()))
    );
    assert_eq!(h.session.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn dispose_closes_socket_with_notice() {
    let h = harness(StaticPermission::granted());
    h.session.start().await.unwrap();
    let mut server = h.connector.accept().await.unwrap();

    h.session.dispose().await;
    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.session.connection_state(), ConnectionState::Disconnected);
    assert!(!h.feeder.is_open());

    let messages = server.drain();
    assert!(matches!(messages.last(), Some(WireMessage::Close { code: 1000, .. })));
    assert!(messages
        .iter()
        .any(|m| matches!(m, WireMessage::Text(t) if t.contains("\"type\":\"close\""))));
}

#[tokio::test(start_paused = true)]
async fn dropping_session_releases_everything() {
    let h = harness(StaticPermission::granted());
    h.session.start().await.unwrap();
    let mut server = h.connector.accept().await.unwrap();

    let Harness { session, feeder, .. } = h;
    drop(session);

    assert!(!feeder.is_open());
    let messages = server.drain();
    assert!(matches!(messages.last(), Some(WireMessage::Close { .. })));
}
