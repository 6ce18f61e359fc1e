//! Streaming transport seam.
//!
//! The supervisor only sees [`Connector`] and [`Connection`]; the WebSocket
//! implementation lives here so tests can substitute scripted connections.

use async_trait::async_trait;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Failures of the underlying channel. All of them lead to a reconnect.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("read failed: {0}")]
    Read(String),
}

/// Opens connections to a push channel.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError>;

    /// Human-readable endpoint, for logs.
    fn description(&self) -> &str;
}

/// One open subscription.
#[async_trait]
pub trait Connection: Send {
    /// Next text message. `Ok(None)` means the peer closed cleanly.
    async fn next_message(&mut self) -> Result<Option<String>, TransportError>;

    /// Close the channel. Errors while closing are ignored.
    async fn close(&mut self);
}

/// WebSocket push channel (e.g. `ws://localhost:8000/metrics/ws`).
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        let (stream, response) = connect_async(self.url.as_str()).await.map_err(|e| {
            TransportError::Connect {
                url: self.url.clone(),
                reason: e.to_string(),
            }
        })?;
        debug!(url = %self.url, status = %response.status(), "WebSocket handshake complete");
        Ok(Box::new(WebSocketConnection { stream }))
    }

    fn description(&self) -> &str {
        &self.url
    }
}

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn next_message(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(String::from_utf8_lossy(&data).into_owned()))
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // ping/pong are answered by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::Read(e.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
