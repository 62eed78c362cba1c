//! End-to-end behaviour of the session engine over an in-memory connection.

use livetrans::audio::player::{MockAudioPlayer, MockPlayerProbe};
use livetrans::audio::recorder::{MockAudioSource, MockSourceProbe};
use livetrans::codec::AudioEncoding;
use livetrans::playback::{PlaybackConfig, PlaybackEvent, PlaybackQueue};
use livetrans::protocol::{ControlCommand, WireMessage};
use livetrans::session::{
    CaptureTiming, CollectorListener, EngineConfig, EngineHandle, Mode, SessionEngine,
    SessionState, StatusUpdate,
};
use livetrans::transport::{MockConnector, PeerConnection};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

const WAIT: Duration = Duration::from_secs(5);
const TICK: Duration = Duration::from_millis(10);

struct Harness {
    handle: EngineHandle,
    peers: mpsc::UnboundedReceiver<PeerConnection>,
    connector: Arc<MockConnector>,
    listener: Arc<CollectorListener>,
    source: MockSourceProbe,
    player: MockPlayerProbe,
    playback_events: crossbeam_channel::Receiver<PlaybackEvent>,
}

struct Setup {
    config: EngineConfig,
    source: MockAudioSource,
    player: MockAudioPlayer,
    gate: Option<Arc<Notify>>,
    connect_failure: Option<&'static str>,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            config: EngineConfig {
                chunk_interval: TICK,
                audio_encoding: AudioEncoding::Hex,
                ..EngineConfig::default()
            },
            source: MockAudioSource::new()
                .with_batches(vec![vec![1, 2], vec![3, 4], vec![5, 6]])
                .with_fallback(Vec::new()),
            player: MockAudioPlayer::new(),
            gate: None,
            connect_failure: None,
        }
    }
}

impl Setup {
    fn spawn(self) -> Harness {
        let (connector, peers) = MockConnector::new();
        let connector = match self.gate {
            Some(gate) => connector.with_gate(gate),
            None => connector,
        };
        let connector = match self.connect_failure {
            Some(message) => connector.with_failure(message),
            None => connector,
        };
        let connector = Arc::new(connector);

        let listener = Arc::new(CollectorListener::new());
        let source = self.source.probe();
        let player = self.player.probe();
        let (events_tx, playback_events) = crossbeam_channel::unbounded();
        let queue = PlaybackQueue::spawn(
            Box::new(self.player),
            PlaybackConfig::default(),
            Some(events_tx),
        )
        .unwrap();

        let handle = SessionEngine::new(self.config, connector.clone(), Box::new(self.source))
            .with_listener(listener.clone())
            .with_playback(queue)
            .spawn();

        Harness {
            handle,
            peers,
            connector,
            listener,
            source,
            player,
            playback_events,
        }
    }
}

impl Harness {
    /// Start a session and return the remote end once it is active.
    async fn start_active(&mut self, mode: Mode, input_language: Option<&str>) -> PeerConnection {
        self.handle
            .start_session(mode, input_language.map(String::from))
            .await
            .unwrap();
        let peer = tokio::time::timeout(WAIT, self.peers.recv())
            .await
            .expect("connect attempted")
            .expect("peer handed out");
        assert!(self.handle.wait_for_state(SessionState::Active, WAIT).await);
        peer
    }

    fn status_labels(&self) -> Vec<String> {
        self.listener.statuses().into_iter().map(|s| s.label).collect()
    }
}

async fn next_frame(peer: &mut PeerConnection) -> Option<WireMessage> {
    tokio::time::timeout(WAIT, peer.recv())
        .await
        .expect("frame within timeout")
}

async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

fn start_command(frame: Option<WireMessage>) -> ControlCommand {
    match frame {
        Some(WireMessage::Text(json)) => ControlCommand::from_json(&json).unwrap(),
        other => panic!("Expected a control frame, got {:?}", other),
    }
}

#[tokio::test]
async fn start_connects_then_sends_start_translation_before_any_audio() {
    let mut harness = Setup::default().spawn();
    harness
        .handle
        .start_session(Mode::Live, Some("en".into()))
        .await
        .unwrap();

    let mut peer = harness.peers.recv().await.unwrap();
    assert!(harness.handle.wait_for_state(SessionState::Active, WAIT).await);

    assert_eq!(
        start_command(next_frame(&mut peer).await),
        ControlCommand::StartTranslation {
            lang: "es".into(),
            input_lang: Some("en".into()),
        }
    );
    assert_eq!(next_frame(&mut peer).await, Some(WireMessage::Binary(vec![1, 0, 2, 0])));
    assert_eq!(next_frame(&mut peer).await, Some(WireMessage::Binary(vec![3, 0, 4, 0])));
    assert_eq!(next_frame(&mut peer).await, Some(WireMessage::Binary(vec![5, 0, 6, 0])));

    assert_eq!(harness.connector.attempts(), 1);
    assert_eq!(
        harness.connector.urls()[0].as_str(),
        "ws://localhost:8000/ws/live"
    );
    assert_eq!(
        harness.listener.states(),
        vec![SessionState::Connecting, SessionState::Active]
    );
    harness.handle.shutdown().await;
}

#[tokio::test]
async fn start_translation_carries_configured_target_and_omits_missing_input() {
    let mut setup = Setup::default();
    setup.config.target_language = "fr".into();
    setup.config.secure = true;
    let mut harness = setup.spawn();

    let mut peer = harness.start_active(Mode::Speech, None).await;
    assert_eq!(
        start_command(next_frame(&mut peer).await),
        ControlCommand::StartTranslation {
            lang: "fr".into(),
            input_lang: None,
        }
    );
    assert_eq!(
        harness.connector.urls()[0].as_str(),
        "wss://localhost:8000/ws/speech"
    );
    harness.handle.shutdown().await;
}

#[tokio::test]
async fn start_while_active_does_not_open_a_second_connection() {
    let mut harness = Setup::default().spawn();
    let _peer = harness.start_active(Mode::Speaker, Some("en")).await;

    harness
        .handle
        .start_session(Mode::Live, Some("de".into()))
        .await
        .unwrap();
    harness.handle.stop_session().await.unwrap();
    assert!(harness.handle.wait_for_state(SessionState::Idle, WAIT).await);

    assert_eq!(harness.connector.attempts(), 1);
    harness.handle.shutdown().await;
}

#[tokio::test]
async fn start_while_connecting_does_not_open_a_second_connection() {
    let gate = Arc::new(Notify::new());
    let harness = Setup {
        gate: Some(gate.clone()),
        ..Setup::default()
    }
    .spawn();

    harness.handle.start_session(Mode::Live, None).await.unwrap();
    harness.handle.start_session(Mode::Live, None).await.unwrap();
    assert!(
        harness
            .handle
            .wait_for_state(SessionState::Connecting, WAIT)
            .await
    );
    assert!(eventually(|| harness.connector.attempts() == 1).await);

    gate.notify_one();
    assert!(harness.handle.wait_for_state(SessionState::Active, WAIT).await);
    assert_eq!(harness.connector.attempts(), 1);
    harness.handle.shutdown().await;
}

#[tokio::test]
async fn translated_clips_play_in_arrival_order_one_at_a_time() {
    let mut harness = Setup {
        player: MockAudioPlayer::new().with_clip_duration(Duration::from_millis(30)),
        ..Setup::default()
    }
    .spawn();
    let mut peer = harness.start_active(Mode::Live, Some("en")).await;

    for payload in ["AA", "BB", "CC"] {
        peer.send_text(format!(r#"{{"text":"t-{}","audio":"{}"}}"#, payload, payload))
            .await
            .unwrap();
    }
    assert!(eventually(|| harness.listener.audio().len() == 3).await);

    let queue = harness.handle.shutdown().await.expect("playback queue");
    assert!(queue.wait_idle(WAIT));
    assert_eq!(
        harness.player.played_bytes(),
        vec![vec![0xAA], vec![0xBB], vec![0xCC]]
    );
    assert_eq!(harness.player.max_concurrent(), 1);
    assert_eq!(harness.listener.texts(), vec!["t-AA", "t-BB", "t-CC"]);
    queue.finish();
}

#[tokio::test]
async fn undecodable_audio_is_skipped_and_later_clips_still_play() {
    let mut harness = Setup::default().spawn();
    let mut peer = harness.start_active(Mode::Live, Some("en")).await;

    peer.send_text(r#"{"audio":"Z"}"#).await.unwrap();
    peer.send_text("this is not json").await.unwrap();
    peer.send_text(r#"{"audio":"DD"}"#).await.unwrap();
    assert!(eventually(|| harness.listener.audio().len() == 1).await);

    let queue = harness.handle.shutdown().await.expect("playback queue");
    assert!(queue.wait_idle(WAIT));
    assert_eq!(harness.player.played_bytes(), vec![vec![0xDD]]);
    assert_eq!(
        harness.listener.states(),
        vec![
            SessionState::Connecting,
            SessionState::Active,
            SessionState::Stopping,
            SessionState::Idle
        ]
    );
    queue.finish();
}

#[tokio::test]
async fn failing_clip_does_not_stall_the_queue() {
    let mut harness = Setup {
        player: MockAudioPlayer::new().failing_on(&[0xBB]),
        ..Setup::default()
    }
    .spawn();
    let mut peer = harness.start_active(Mode::Live, None).await;

    for payload in ["AA", "BB", "CC"] {
        peer.send_text(format!(r#"{{"audio":"{}"}}"#, payload))
            .await
            .unwrap();
    }
    assert!(eventually(|| harness.listener.audio().len() == 3).await);

    let queue = harness.handle.shutdown().await.expect("playback queue");
    queue.finish();
    assert_eq!(harness.player.played_bytes(), vec![vec![0xAA], vec![0xCC]]);
    assert_eq!(harness.player.attempts(), 3);

    let failed: Vec<_> = harness
        .playback_events
        .try_iter()
        .filter(|e| matches!(e, PlaybackEvent::Failed { .. }))
        .collect();
    assert_eq!(failed.len(), 1);
}

#[tokio::test]
async fn stop_sends_stop_translation_closes_and_releases_microphone() {
    let mut harness = Setup::default().spawn();
    let mut peer = harness.start_active(Mode::Live, Some("en")).await;
    assert!(harness.source.is_started());

    start_command(next_frame(&mut peer).await);
    harness.handle.stop_session().await.unwrap();
    assert!(harness.handle.wait_for_state(SessionState::Idle, WAIT).await);

    // Whatever audio was already sent, nothing follows stop_translation
    let mut after_stop = Vec::new();
    let mut saw_stop = false;
    while let Some(frame) = next_frame(&mut peer).await {
        if saw_stop {
            after_stop.push(frame);
        } else if frame == WireMessage::Text(r#"{"command":"stop_translation"}"#.into()) {
            saw_stop = true;
        }
    }
    assert!(saw_stop);
    assert_eq!(after_stop, vec![WireMessage::Close(None)]);

    assert!(!harness.source.is_started());
    assert_eq!(harness.source.stop_count(), 1);
    assert_eq!(
        harness.listener.states(),
        vec![
            SessionState::Connecting,
            SessionState::Active,
            SessionState::Stopping,
            SessionState::Idle
        ]
    );
    assert_eq!(harness.status_labels().last().map(String::as_str), Some("stopped"));
    harness.handle.shutdown().await;
}

#[tokio::test]
async fn queued_playback_survives_stop() {
    let mut harness = Setup {
        player: MockAudioPlayer::new().with_clip_duration(Duration::from_millis(50)),
        ..Setup::default()
    }
    .spawn();
    let mut peer = harness.start_active(Mode::Speaker, Some("en")).await;

    for payload in ["01", "02", "03", "04"] {
        peer.send_text(format!(r#"{{"audio":"{}"}}"#, payload))
            .await
            .unwrap();
    }
    assert!(eventually(|| harness.listener.audio().len() == 4).await);

    harness.handle.stop_session().await.unwrap();
    assert!(harness.handle.wait_for_state(SessionState::Idle, WAIT).await);
    assert!(harness.player.played_bytes().len() < 4);

    let queue = harness.handle.shutdown().await.expect("playback queue");
    queue.finish();
    assert_eq!(
        harness.player.played_bytes(),
        vec![vec![0x01], vec![0x02], vec![0x03], vec![0x04]]
    );
}

#[tokio::test]
async fn remote_close_stops_the_session() {
    let mut harness = Setup::default().spawn();
    let peer = harness.start_active(Mode::Live, Some("en")).await;

    peer.hang_up();
    assert!(harness.handle.wait_for_state(SessionState::Idle, WAIT).await);

    assert!(harness.status_labels().contains(&"connection closed".to_string()));
    assert!(!harness.source.is_started());
    assert_eq!(harness.connector.attempts(), 1);
    harness.handle.shutdown().await;
}

#[tokio::test]
async fn session_can_be_restarted_after_stop() {
    let mut harness = Setup::default().spawn();
    let _first = harness.start_active(Mode::Live, Some("en")).await;
    harness.handle.stop_session().await.unwrap();
    assert!(harness.handle.wait_for_state(SessionState::Idle, WAIT).await);

    let mut second = harness.start_active(Mode::Speech, Some("es")).await;
    assert_eq!(
        start_command(next_frame(&mut second).await),
        ControlCommand::StartTranslation {
            lang: "es".into(),
            input_lang: Some("es".into()),
        }
    );
    assert_eq!(harness.connector.attempts(), 2);
    assert_eq!(harness.source.start_count(), 2);
    harness.handle.shutdown().await;
}

#[tokio::test]
async fn status_levels_are_clamped_and_text_is_forwarded() {
    let mut harness = Setup::default().spawn();
    let mut peer = harness.start_active(Mode::Live, Some("en")).await;

    // Binary frames from the service carry nothing for the client
    peer.sender.send(WireMessage::Binary(vec![1, 2])).await.unwrap();
    peer.send_text(r#"{"status":"Traduciendo","level":150}"#).await.unwrap();
    peer.send_text(r#"{"status":"Enviando","level":-5}"#).await.unwrap();
    peer.send_text(r#"{"translated_text":"hola"}"#).await.unwrap();
    assert!(eventually(|| harness.listener.texts().len() == 1).await);

    let remote: Vec<_> = harness
        .listener
        .statuses()
        .into_iter()
        .filter(|s| s.label == "Traduciendo" || s.label == "Enviando")
        .collect();
    assert_eq!(
        remote,
        vec![
            StatusUpdate::remote("Traduciendo", Some(100)),
            StatusUpdate::remote("Enviando", Some(0)),
        ]
    );
    assert_eq!(harness.listener.texts(), vec!["hola"]);
    assert_eq!(harness.handle.state(), SessionState::Active);

    start_command(next_frame(&mut peer).await);
    harness.handle.shutdown().await;
}

#[tokio::test]
async fn per_message_encoding_overrides_configured_one() {
    let mut harness = Setup::default().spawn();
    let mut peer = harness.start_active(Mode::Live, None).await;

    // "qg==" is base64 for 0xAA; the engine is configured for hex
    peer.send_text(r#"{"audio":"qg==","encoding":"base64"}"#).await.unwrap();
    assert!(eventually(|| harness.listener.audio().len() == 1).await);
    assert_eq!(harness.listener.audio()[0].bytes(), &[0xAA]);

    start_command(next_frame(&mut peer).await);
    harness.handle.shutdown().await;
}

#[tokio::test]
async fn denied_microphone_ends_the_session_with_an_error_status() {
    let mut harness = Setup {
        source: MockAudioSource::new().with_access_denied(),
        ..Setup::default()
    }
    .spawn();
    harness
        .handle
        .start_session(Mode::Live, Some("en".into()))
        .await
        .unwrap();
    let mut peer = harness.peers.recv().await.unwrap();
    assert!(
        eventually(|| harness.listener.states().last() == Some(&SessionState::Idle)).await
    );
    assert!(harness.listener.states().contains(&SessionState::Active));

    start_command(next_frame(&mut peer).await);
    assert_eq!(
        next_frame(&mut peer).await,
        Some(WireMessage::Text(r#"{"command":"stop_translation"}"#.into()))
    );
    assert!(harness.listener.statuses().iter().any(|s| s.is_error()
        && s.label.starts_with("error: Microphone unavailable")));
    harness.handle.shutdown().await;
}

#[tokio::test]
async fn denied_microphone_with_capture_on_start_never_connects() {
    let mut setup = Setup {
        source: MockAudioSource::new().with_access_denied(),
        ..Setup::default()
    };
    setup.config.capture_timing = CaptureTiming::OnStart;
    let harness = setup.spawn();

    harness.handle.start_session(Mode::Live, None).await.unwrap();
    assert!(
        eventually(|| harness.listener.states().last() == Some(&SessionState::Idle)).await
    );
    tokio::time::sleep(TICK * 3).await;
    assert_eq!(harness.connector.attempts(), 0);
    assert!(harness.listener.statuses().iter().any(|s| s.is_error()));
    harness.handle.shutdown().await;
}

#[tokio::test]
async fn audio_captured_before_open_is_dropped_and_reported_once() {
    let gate = Arc::new(Notify::new());
    let mut setup = Setup {
        gate: Some(gate.clone()),
        source: MockAudioSource::new()
            .with_batches(vec![vec![1]; 5])
            .with_fallback(Vec::new()),
        ..Setup::default()
    };
    setup.config.capture_timing = CaptureTiming::OnStart;
    let mut harness = setup.spawn();

    harness.handle.start_session(Mode::Live, None).await.unwrap();
    assert!(eventually(|| harness.source.read_count() >= 5).await);
    tokio::time::sleep(TICK * 5).await;

    gate.notify_one();
    let mut peer = harness.peers.recv().await.unwrap();
    assert!(harness.handle.wait_for_state(SessionState::Active, WAIT).await);

    // Nothing captured while connecting reaches the service
    start_command(next_frame(&mut peer).await);
    harness.handle.stop_session().await.unwrap();
    assert_eq!(
        next_frame(&mut peer).await,
        Some(WireMessage::Text(r#"{"command":"stop_translation"}"#.into()))
    );

    let not_connected = harness
        .status_labels()
        .iter()
        .filter(|label| label.as_str() == "not connected")
        .count();
    assert_eq!(not_connected, 1);
    harness.handle.shutdown().await;
}

#[tokio::test]
async fn connect_failure_returns_to_idle_with_error_status() {
    let harness = Setup {
        connect_failure: Some("connection refused"),
        ..Setup::default()
    }
    .spawn();

    harness.handle.start_session(Mode::Live, None).await.unwrap();
    assert!(
        eventually(|| harness.listener.states().last() == Some(&SessionState::Idle)).await
    );
    assert!(
        harness
            .status_labels()
            .contains(&"error: Connection failed: connection refused".to_string())
    );
    assert_eq!(harness.source.start_count(), 0);
    harness.handle.shutdown().await;
}

#[tokio::test]
async fn failed_connect_still_signals_the_end_of_the_session() {
    let harness = Setup {
        connect_failure: Some("connection refused"),
        ..Setup::default()
    }
    .spawn();

    let mut ended = harness.handle.subscribe_session_end();
    harness.handle.start_session(Mode::Live, None).await.unwrap();
    tokio::time::timeout(WAIT, ended.changed())
        .await
        .expect("session end within timeout")
        .unwrap();
    assert_eq!(harness.handle.state(), SessionState::Idle);
    harness.handle.shutdown().await;
}

#[tokio::test]
async fn every_stopped_session_signals_its_end_once() {
    let mut harness = Setup::default().spawn();
    let mut ended = harness.handle.subscribe_session_end();

    let _first = harness.start_active(Mode::Live, None).await;
    assert!(!ended.has_changed().unwrap());
    harness.handle.stop_session().await.unwrap();
    tokio::time::timeout(WAIT, ended.changed()).await.unwrap().unwrap();
    assert_eq!(*ended.borrow_and_update(), 1);

    let peer = harness.start_active(Mode::Live, None).await;
    peer.hang_up();
    tokio::time::timeout(WAIT, ended.changed()).await.unwrap().unwrap();
    assert_eq!(*ended.borrow_and_update(), 2);

    // A fresh subscription does not see sessions that already ended
    assert!(!harness.handle.subscribe_session_end().has_changed().unwrap());
    harness.handle.shutdown().await;
}
