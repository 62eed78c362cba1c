//! The session engine: a single dispatch loop that owns the connection, the
//! capture source and the playback queue.
//!
//! Every input (caller commands, connection establishment, inbound frames,
//! capture ticks) arrives on a channel and is handled to completion before the
//! next one is looked at, so handlers never race each other.

use crate::codec::{self, AudioEncoding};
use crate::config::Config;
use crate::error::{LivetransError, Result};
use crate::playback::{EnqueueOutcome, PlaybackQueue};
use crate::protocol::{self, ControlCommand, InboundEvent, OutboundFrame, WireMessage};
use crate::session::capture::{CaptureItem, CaptureSource};
use crate::session::listener::SessionListener;
use crate::session::status::{self, StatusUpdate};
use crate::session::{CaptureTiming, Mode, Session, SessionState};
use crate::transport::{self, Connection, Connector, SessionTransport};
use crate::audio::recorder::AudioSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Engine settings that do not change between sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub host: String,
    pub secure: bool,
    /// None waits for the connection indefinitely.
    pub connect_timeout: Option<Duration>,
    /// `lang` of the start command.
    pub target_language: String,
    pub capture_timing: CaptureTiming,
    pub chunk_interval: Duration,
    /// Used when an inbound message does not name its encoding.
    pub audio_encoding: AudioEncoding,
    /// Pass status levels through; when false they are dropped.
    pub level_metering: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl EngineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.server.host.clone(),
            secure: config.server.secure,
            connect_timeout: config.server.connect_timeout(),
            target_language: config.session.target_language.clone(),
            capture_timing: config.session.capture,
            chunk_interval: config.session.chunk_interval(),
            audio_encoding: config.protocol.audio_encoding,
            level_metering: config.protocol.level_metering,
        }
    }
}

enum EngineCommand {
    Start {
        mode: Mode,
        input_language: Option<String>,
    },
    Stop,
    Shutdown {
        done: oneshot::Sender<Option<PlaybackQueue>>,
    },
}

/// What woke the dispatch loop.
enum Wake {
    Command(Option<EngineCommand>),
    Connected(Result<Connection>),
    Inbound(Option<WireMessage>),
    Captured(Option<CaptureItem>),
}

/// Orchestrates one session at a time.
///
/// Built with [`SessionEngine::new`], configured with the `with_*` builders and
/// driven through the [`EngineHandle`] returned by [`SessionEngine::spawn`].
pub struct SessionEngine {
    config: EngineConfig,
    connector: Arc<dyn Connector>,
    capture: CaptureSource,
    playback: Option<PlaybackQueue>,
    listeners: Vec<Arc<dyn SessionListener>>,
    transport: SessionTransport,
    session: Option<Session>,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    /// Bumped every time a start request has fully run its course.
    ended_tx: watch::Sender<u64>,
    pending_connect: Option<JoinHandle<Result<Connection>>>,
    chunks: Option<mpsc::Receiver<CaptureItem>>,
    /// Set once a NotConnected drop was reported for the current session.
    not_connected_reported: bool,
}

impl SessionEngine {
    pub fn new(
        config: EngineConfig,
        connector: Arc<dyn Connector>,
        source: Box<dyn AudioSource>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (ended_tx, _) = watch::channel(0);
        Self {
            config,
            connector,
            capture: CaptureSource::new(source),
            playback: None,
            listeners: Vec::new(),
            transport: SessionTransport::new(),
            session: None,
            state: SessionState::Idle,
            state_tx,
            ended_tx,
            pending_connect: None,
            chunks: None,
            not_connected_reported: false,
        }
    }

    /// Queue decoded clips for playback. Without a queue clips are only
    /// reported to listeners.
    pub fn with_playback(mut self, queue: PlaybackQueue) -> Self {
        self.playback = Some(queue);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Run the engine on the current tokio runtime.
    pub fn spawn(self) -> EngineHandle {
        let (command_tx, command_rx) = mpsc::channel(16);
        let state_rx = self.state_tx.subscribe();
        let ended_rx = self.ended_tx.subscribe();
        let task = tokio::spawn(self.run(command_rx));
        EngineHandle {
            commands: command_tx,
            state: state_rx,
            ended: ended_rx,
            task,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<EngineCommand>) {
        loop {
            let wake = tokio::select! {
                biased;
                command = commands.recv() => Wake::Command(command),
                connected = wait_connect(&mut self.pending_connect), if self.pending_connect.is_some() => {
                    Wake::Connected(connected)
                }
                inbound = self.transport.recv(), if self.transport.has_connection() => {
                    Wake::Inbound(inbound)
                }
                captured = recv_chunk(&mut self.chunks), if self.chunks.is_some() => {
                    Wake::Captured(captured)
                }
            };

            match wake {
                Wake::Command(Some(EngineCommand::Start {
                    mode,
                    input_language,
                })) => self.start_session(mode, input_language).await,
                Wake::Command(Some(EngineCommand::Stop)) => self.stop_session().await,
                Wake::Command(Some(EngineCommand::Shutdown { done })) => {
                    self.stop_session().await;
                    if done.send(self.playback.take()).is_err() {
                        debug!("Shutdown requester went away");
                    }
                    break;
                }
                Wake::Command(None) => {
                    self.stop_session().await;
                    break;
                }
                Wake::Connected(result) => {
                    self.pending_connect = None;
                    self.on_connected(result).await;
                }
                Wake::Inbound(Some(message)) => self.on_inbound(message).await,
                Wake::Inbound(None) => self.on_remote_close(None).await,
                Wake::Captured(Some(Ok(chunk))) => {
                    if chunk.epoch != self.capture.epoch() {
                        trace!(epoch = chunk.epoch, "Dropping chunk from a stopped capture run");
                        continue;
                    }
                    self.send(OutboundFrame::Audio(chunk.bytes)).await;
                }
                Wake::Captured(Some(Err(e))) => {
                    self.chunks = None;
                    self.fail_session(e).await;
                }
                Wake::Captured(None) => {
                    self.chunks = None;
                }
            }
        }
        debug!("Session engine stopped");
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        debug!(from = %self.state, to = %state, "Session state changed");
        self.state = state;
        self.state_tx.send_replace(state);
        for listener in &self.listeners {
            listener.on_state_changed(state);
        }
    }

    fn mark_session_ended(&self) {
        self.ended_tx.send_modify(|count| *count += 1);
    }

    fn publish_status(&self, update: StatusUpdate) {
        for listener in &self.listeners {
            listener.on_status_changed(&update);
        }
    }

    async fn start_session(&mut self, mode: Mode, input_language: Option<String>) {
        if self.state != SessionState::Idle {
            debug!(state = %self.state, "Start ignored; a session already exists");
            return;
        }

        let url = match transport::resolve(&self.config.host, self.config.secure, mode) {
            Ok(url) => url,
            Err(e) => {
                warn!("Cannot start session: {}", e);
                self.publish_status(StatusUpdate::error(&e));
                self.mark_session_ended();
                return;
            }
        };

        info!(%mode, %url, "Starting session");
        self.session = Some(Session {
            mode,
            input_language,
            url: url.clone(),
        });
        self.not_connected_reported = false;
        self.set_state(SessionState::Connecting);
        self.publish_status(StatusUpdate::engine(status::CONNECTING));

        if self.config.capture_timing == CaptureTiming::OnStart
            && let Err(e) = self.begin_capture()
        {
            self.fail_session(e).await;
            return;
        }

        let connector = Arc::clone(&self.connector);
        let timeout = self.config.connect_timeout;
        self.pending_connect = Some(tokio::spawn(async move {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, connector.connect(&url))
                    .await
                    .unwrap_or(Err(LivetransError::ConnectTimeout {
                        timeout_ms: limit.as_millis() as u64,
                    })),
                None => connector.connect(&url).await,
            }
        }));
    }

    fn begin_capture(&mut self) -> Result<()> {
        let chunks = self.capture.start(self.config.chunk_interval)?;
        self.chunks = Some(chunks);
        Ok(())
    }

    async fn on_connected(&mut self, result: Result<Connection>) {
        let connection = match result {
            Ok(connection) => connection,
            Err(e) => {
                self.fail_session(e).await;
                return;
            }
        };
        if self.state != SessionState::Connecting {
            debug!("Connection opened after the session ended; discarding it");
            return;
        }

        self.transport.attach(connection).await;
        self.set_state(SessionState::Active);
        self.publish_status(StatusUpdate::engine(status::CONNECTED));

        let input_lang = self
            .session
            .as_ref()
            .and_then(|session| session.input_language.clone());
        let start = ControlCommand::StartTranslation {
            lang: self.config.target_language.clone(),
            input_lang,
        };
        if !self.send(OutboundFrame::Control(start)).await {
            return;
        }

        if self.config.capture_timing == CaptureTiming::OnOpen
            && let Err(e) = self.begin_capture()
        {
            self.fail_session(e).await;
        }
    }

    /// Send one frame. Returns false if the session ended because of it.
    async fn send(&mut self, frame: OutboundFrame) -> bool {
        let kind = frame.kind();
        match self.transport.send(frame).await {
            Ok(()) => {
                trace!(kind, "Frame sent");
                true
            }
            Err(LivetransError::NotConnected) => {
                trace!(kind, state = %self.state, "Frame dropped; not connected");
                if !self.not_connected_reported {
                    self.not_connected_reported = true;
                    self.publish_status(StatusUpdate::engine(status::NOT_CONNECTED));
                }
                true
            }
            Err(LivetransError::TransportClosed { reason }) => {
                self.on_remote_close(Some(reason)).await;
                false
            }
            Err(e) => {
                warn!(kind, "Frame not sent: {}", e);
                true
            }
        }
    }

    async fn on_inbound(&mut self, message: WireMessage) {
        let text = match message {
            WireMessage::Text(text) => text,
            WireMessage::Binary(bytes) => {
                trace!(len = bytes.len(), "Ignoring binary frame from service");
                return;
            }
            WireMessage::Close(reason) => {
                self.on_remote_close(reason).await;
                return;
            }
        };

        let events = match protocol::parse_inbound(&text) {
            Ok(events) => events,
            Err(e) => {
                warn!("Skipping inbound message: {}", e);
                return;
            }
        };

        for event in events {
            match event {
                InboundEvent::Status { label, level } => {
                    let level = level.filter(|_| self.config.level_metering);
                    self.publish_status(StatusUpdate::remote(label, level));
                }
                InboundEvent::Translation {
                    text,
                    audio,
                    encoding,
                } => {
                    if let Some(text) = text {
                        for listener in &self.listeners {
                            listener.on_translation_text(&text);
                        }
                    }
                    if let Some(payload) = audio {
                        self.on_audio_payload(&payload, encoding.unwrap_or(self.config.audio_encoding));
                    }
                }
            }
        }
    }

    fn on_audio_payload(&self, payload: &str, encoding: AudioEncoding) {
        let audio = match codec::decode(payload, encoding) {
            Ok(audio) => audio,
            Err(e) => {
                warn!(%encoding, "Skipping translated clip: {}", e);
                return;
            }
        };
        for listener in &self.listeners {
            listener.on_audio_ready(&audio);
        }
        if let Some(queue) = &self.playback {
            match queue.enqueue(audio) {
                EnqueueOutcome::Queued { seq } => trace!(seq, "Clip queued for playback"),
                EnqueueOutcome::QueuedDroppingOldest { seq, dropped } => {
                    debug!(seq, dropped, "Clip queued; oldest waiting clip dropped")
                }
                EnqueueOutcome::Rejected { seq } => debug!(seq, "Clip dropped; playback queue full"),
                EnqueueOutcome::Closed => warn!("Playback queue closed; clip dropped"),
            }
        }
    }

    async fn on_remote_close(&mut self, reason: Option<String>) {
        if !self.state.is_busy() {
            return;
        }
        let reason = reason.unwrap_or_else(|| "connection lost".to_string());
        info!(%reason, "Connection closed by the service");
        self.transport.mark_closed();
        self.publish_status(StatusUpdate::engine(status::CONNECTION_CLOSED));
        self.stop_session().await;
    }

    /// Report a session-ending error and clean up.
    async fn fail_session(&mut self, error: LivetransError) {
        warn!("Session failed: {}", error);
        self.publish_status(StatusUpdate::error(&error));
        self.stop_session().await;
    }

    /// Stop the current session. Cleanup runs on every exit path; queued
    /// playback is left to finish.
    async fn stop_session(&mut self) {
        if matches!(self.state, SessionState::Idle | SessionState::Stopping) {
            return;
        }
        self.set_state(SessionState::Stopping);

        if self.transport.is_open()
            && let Err(e) = self
                .transport
                .send(OutboundFrame::Control(ControlCommand::StopTranslation))
                .await
        {
            debug!("stop_translation not sent: {}", e);
        }

        self.capture.stop().await;
        self.chunks = None;
        self.transport.close().await;
        if let Some(pending) = self.pending_connect.take() {
            pending.abort();
        }

        if let Some(session) = self.session.take() {
            info!(mode = %session.mode, "Session stopped");
        }
        self.set_state(SessionState::Idle);
        self.publish_status(StatusUpdate::engine(status::STOPPED));
        self.mark_session_ended();
    }
}

async fn wait_connect(pending: &mut Option<JoinHandle<Result<Connection>>>) -> Result<Connection> {
    match pending.as_mut() {
        Some(handle) => handle.await.unwrap_or_else(|e| {
            Err(LivetransError::Connection {
                message: format!("connect task failed: {}", e),
            })
        }),
        None => std::future::pending().await,
    }
}

async fn recv_chunk(chunks: &mut Option<mpsc::Receiver<CaptureItem>>) -> Option<CaptureItem> {
    match chunks.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn engine_gone() -> LivetransError {
    LivetransError::Other("session engine has shut down".to_string())
}

/// Caller-side handle to a running [`SessionEngine`].
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    state: watch::Receiver<SessionState>,
    ended: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Start a session. A no-op while one is connecting or active.
    ///
    /// # Errors
    /// Only if the engine has shut down; session failures are reported
    /// through the listeners.
    pub async fn start_session(&self, mode: Mode, input_language: Option<String>) -> Result<()> {
        self.commands
            .send(EngineCommand::Start {
                mode,
                input_language,
            })
            .await
            .map_err(|_| engine_gone())
    }

    /// Stop the current session, if any.
    pub async fn stop_session(&self) -> Result<()> {
        self.commands
            .send(EngineCommand::Stop)
            .await
            .map_err(|_| engine_gone())
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Receiver that changes each time a session ends, whether it stopped,
    /// failed to connect or was refused before connecting.
    ///
    /// Sessions that ended before this call are already marked seen, so
    /// subscribe before [`EngineHandle::start_session`] and await
    /// `changed()` to learn when that session is over.
    pub fn subscribe_session_end(&self) -> watch::Receiver<u64> {
        let mut ended = self.ended.clone();
        ended.borrow_and_update();
        ended
    }

    /// Wait until the engine reaches `target`. Returns false on timeout.
    pub async fn wait_for_state(&self, target: SessionState, timeout: Duration) -> bool {
        let mut state = self.state.clone();
        tokio::time::timeout(timeout, state.wait_for(|s| *s == target))
            .await
            .is_ok_and(|result| result.is_ok())
    }

    /// Stop any session, end the engine and hand back its playback queue so
    /// the caller can let queued clips finish.
    pub async fn shutdown(self) -> Option<PlaybackQueue> {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .commands
            .send(EngineCommand::Shutdown { done: done_tx })
            .await
            .is_err()
        {
            return None;
        }
        let queue = done_rx.await.ok().flatten();
        if let Err(e) = self.task.await {
            warn!("Session engine task failed: {}", e);
        }
        queue
    }
}
