//! WebSocket connector built on tokio-tungstenite.

use crate::defaults::FRAME_CHANNEL_CAPACITY;
use crate::error::{LivetransError, Result};
use crate::protocol::WireMessage;
use crate::transport::{Connection, Connector};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};
use url::Url;

/// Opens `ws://` / `wss://` connections.
///
/// Each connection gets a writer task draining the outbound channel into the
/// socket and a reader task forwarding socket messages into the inbound
/// channel. Control frames (ping/pong) are answered by tungstenite and never
/// reach the session.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

fn to_message(message: WireMessage) -> Message {
    match message {
        WireMessage::Text(text) => Message::Text(text),
        WireMessage::Binary(bytes) => Message::Binary(bytes),
        WireMessage::Close(_) => Message::Close(None),
    }
}

/// Map a socket message to a wire message; None for control frames.
fn from_message(message: Message) -> Option<WireMessage> {
    match message {
        Message::Text(text) => Some(WireMessage::Text(text)),
        Message::Binary(bytes) => Some(WireMessage::Binary(bytes)),
        Message::Close(frame) => Some(WireMessage::Close(
            frame
                .map(|f| f.reason.to_string())
                .filter(|reason| !reason.is_empty()),
        )),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<Connection> {
        let (socket, response) =
            connect_async(url.as_str())
                .await
                .map_err(|e| LivetransError::Connection {
                    message: format!("Failed to connect to {}: {}", url, e),
                })?;
        info!(%url, status = %response.status(), "WebSocket connected");

        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::channel::<WireMessage>(FRAME_CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<WireMessage>(FRAME_CHANNEL_CAPACITY);

        let writer = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let closing = matches!(message, WireMessage::Close(_));
                if let Err(e) = sink.send(to_message(message)).await {
                    warn!("WebSocket send failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            if let Err(e) = sink.close().await {
                debug!("WebSocket close: {}", e);
            }
        });

        let reader = tokio::spawn(async move {
            while let Some(next) = stream.next().await {
                let message = match next {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("WebSocket receive failed: {}", e);
                        break;
                    }
                };
                let Some(wire) = from_message(message) else {
                    trace!("Ignoring WebSocket control frame");
                    continue;
                };
                let closing = matches!(wire, WireMessage::Close(_));
                if in_tx.send(wire).await.is_err() || closing {
                    break;
                }
            }
            debug!("WebSocket reader finished");
        });

        Ok(Connection::new(out_tx, in_rx)
            .with_task(writer)
            .with_task(reader))
    }
}
