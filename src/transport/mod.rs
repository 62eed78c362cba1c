//! Connection to the translation service.
//!
//! A [`Connector`] opens a [`Connection`]: a pair of frame channels backed by
//! whatever pump tasks the transport needs. [`SessionTransport`] owns at most
//! one connection at a time and enforces the readiness rules the session
//! engine relies on.

pub mod endpoint;
pub mod websocket;

use crate::defaults::{CLOSE_GRACE_MS, FRAME_CHANNEL_CAPACITY};
use crate::error::{LivetransError, Result};
use crate::protocol::{OutboundFrame, WireMessage};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

pub use endpoint::resolve;
pub use websocket::WebSocketConnector;

/// Opens connections to the remote service.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a connection. Resolves once the connection is open.
    async fn connect(&self, url: &Url) -> Result<Connection>;
}

/// One open duplex connection, seen from the client.
pub struct Connection {
    outbound: mpsc::Sender<WireMessage>,
    inbound: mpsc::Receiver<WireMessage>,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    pub fn new(outbound: mpsc::Sender<WireMessage>, inbound: mpsc::Receiver<WireMessage>) -> Self {
        Self {
            outbound,
            inbound,
            tasks: Vec::new(),
        }
    }

    /// Attach a pump task that must finish (or be aborted) when the connection closes.
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.tasks.push(task);
        self
    }

    /// In-memory connection with the remote end handed back to the caller.
    pub fn pair() -> (Connection, PeerConnection) {
        let (out_tx, out_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        (
            Connection::new(out_tx, in_rx),
            PeerConnection {
                received: out_rx,
                sender: in_tx,
            },
        )
    }
}

/// Remote end of an in-memory [`Connection`].
pub struct PeerConnection {
    /// Frames the client sent, in send order.
    pub received: mpsc::Receiver<WireMessage>,
    /// Frames delivered to the client, in arrival order.
    pub sender: mpsc::Sender<WireMessage>,
}

impl PeerConnection {
    /// Deliver a text frame to the client.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.sender
            .send(WireMessage::Text(text.into()))
            .await
            .map_err(|_| LivetransError::TransportClosed {
                reason: "client side of the connection is gone".to_string(),
            })
    }

    /// Next frame the client sent, or None once the client closed.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.received.recv().await
    }

    /// Close from the remote side.
    pub fn hang_up(self) {
        drop(self.sender);
    }
}

/// Readiness of the session's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Closed,
    Open,
    /// The peer closed; frames may still be drained but nothing can be sent.
    Closing,
}

/// Owns the session's single connection.
pub struct SessionTransport {
    connection: Option<Connection>,
    readiness: Readiness,
}

impl SessionTransport {
    pub fn new() -> Self {
        Self {
            connection: None,
            readiness: Readiness::Closed,
        }
    }

    /// Take ownership of a freshly opened connection.
    ///
    /// A session has exactly one connection; a previous one is torn down first.
    pub async fn attach(&mut self, connection: Connection) {
        if self.connection.is_some() {
            warn!("Replacing a live connection; closing the previous one");
            self.close().await;
        }
        self.connection = Some(connection);
        self.readiness = Readiness::Open;
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    pub fn is_open(&self) -> bool {
        self.readiness == Readiness::Open
    }

    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    /// Send one frame.
    ///
    /// # Errors
    /// `NotConnected` when the connection is not open; the frame is not
    /// queued anywhere and the caller decides what to do with it.
    /// `TransportClosed` when the connection went away during the send.
    pub async fn send(&mut self, frame: OutboundFrame) -> Result<()> {
        if !self.is_open() {
            return Err(LivetransError::NotConnected);
        }
        let Some(connection) = self.connection.as_ref() else {
            return Err(LivetransError::NotConnected);
        };

        let kind = frame.kind();
        let wire = frame.into_wire()?;
        if connection.outbound.send(wire).await.is_err() {
            self.readiness = Readiness::Closing;
            return Err(LivetransError::TransportClosed {
                reason: format!("connection dropped while sending {}", kind),
            });
        }
        Ok(())
    }

    /// Next inbound frame. Pending forever when no connection is attached;
    /// None once the peer is gone.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        match self.connection.as_mut() {
            Some(connection) => connection.inbound.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Record that the peer closed; nothing more can be sent.
    pub fn mark_closed(&mut self) {
        if self.connection.is_some() {
            self.readiness = Readiness::Closing;
        }
    }

    /// Close the connection and wait briefly for its pump tasks. Idempotent.
    pub async fn close(&mut self) {
        let Some(connection) = self.connection.take() else {
            self.readiness = Readiness::Closed;
            return;
        };
        let writable = self.readiness == Readiness::Open;
        self.readiness = Readiness::Closed;

        let Connection {
            outbound,
            inbound,
            tasks,
        } = connection;

        if writable && outbound.try_send(WireMessage::Close(None)).is_err() {
            debug!("Close frame not queued; connection already gone");
        }
        drop(outbound);
        drop(inbound);

        let grace = Duration::from_millis(CLOSE_GRACE_MS);
        for mut task in tasks {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                debug!("Connection task did not finish within {:?}; aborting", grace);
                task.abort();
            }
        }
    }
}

impl Default for SessionTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory connector for tests and embedding.
///
/// Every successful connect hands the remote end of the new connection to the
/// receiver returned by [`MockConnector::new`].
pub struct MockConnector {
    peers: mpsc::UnboundedSender<PeerConnection>,
    gate: Option<Arc<Notify>>,
    failure: Option<String>,
    attempts: AtomicUsize,
    urls: Mutex<Vec<Url>>,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PeerConnection>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers: tx,
                gate: None,
                failure: None,
                attempts: AtomicUsize::new(0),
                urls: Mutex::new(Vec::new()),
            },
            rx,
        )
    }

    /// Hold every connect until `gate` is notified.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Fail every connect with the given message.
    pub fn with_failure(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    /// Number of connect attempts so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// URLs passed to connect, in order.
    pub fn urls(&self) -> Vec<Url> {
        self.urls.lock().map(|urls| urls.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &Url) -> Result<Connection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut urls) = self.urls.lock() {
            urls.push(url.clone());
        }

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(message) = &self.failure {
            return Err(LivetransError::Connection {
                message: message.clone(),
            });
        }

        let (connection, peer) = Connection::pair();
        self.peers
            .send(peer)
            .map_err(|_| LivetransError::Connection {
                message: "no remote end is listening".to_string(),
            })?;
        Ok(connection)
    }
}
