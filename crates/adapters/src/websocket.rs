use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use nlsql_core::connection_manager::{FrameSocket, SocketConnector, TransportError};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens `ws://` and `wss://` endpoints with tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl WebSocketConnector {
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

pub fn validate_endpoint(endpoint: &str) -> Result<(), TransportError> {
    let endpoint = endpoint.trim();
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        return Ok(());
    }
    Err(TransportError::new(format!(
        "endpoint `{endpoint}` must use the ws:// or wss:// scheme"
    )))
}

#[async_trait]
impl SocketConnector for WebSocketConnector {
    type Socket = WebSocketSocket;

    async fn open(&self, endpoint: &str) -> Result<Self::Socket, TransportError> {
        validate_endpoint(endpoint)?;

        let connecting = connect_async(endpoint.trim());
        let (stream, response) = tokio::time::timeout(self.connect_timeout, connecting)
            .await
            .map_err(|_| {
                TransportError::new(format!(
                    "timed out after {}ms opening {endpoint}",
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(to_transport_error)?;

        debug!(endpoint, status = %response.status(), "websocket handshake complete");
        Ok(WebSocketSocket { stream })
    }
}

pub struct WebSocketSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingFrame {
    Text(String),
    Closed,
    /// Ping, pong and undecodable binary frames; tungstenite answers pings.
    Skip,
}

/// Maps a websocket message onto what the connection manager consumes.
/// Binary frames are accepted when they hold UTF-8 text.
#[must_use]
pub fn message_to_frame(message: Message) -> IncomingFrame {
    match message {
        Message::Text(text) => IncomingFrame::Text(text),
        Message::Binary(bytes) => match String::from_utf8(bytes) {
            Ok(text) => IncomingFrame::Text(text),
            Err(_) => IncomingFrame::Skip,
        },
        Message::Close(_) => IncomingFrame::Closed,
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => IncomingFrame::Skip,
    }
}

fn to_transport_error(error: tungstenite::Error) -> TransportError {
    TransportError::new(format!("websocket error: {error}"))
}

fn is_closed_error(error: &tungstenite::Error) -> bool {
    matches!(
        error,
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed
    )
}

#[async_trait]
impl FrameSocket for WebSocketSocket {
    async fn send_text(&mut self, frame: &str) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(frame.to_owned()))
            .await
            .map_err(to_transport_error)
    }

    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(error) if is_closed_error(&error) => return None,
                Err(error) => return Some(Err(to_transport_error(error))),
            };

            match message_to_frame(message) {
                IncomingFrame::Text(text) => return Some(Ok(text)),
                IncomingFrame::Closed => {
                    debug!("websocket close frame received");
                    return None;
                }
                IncomingFrame::Skip => trace!("skipping control frame"),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.stream.close(None).await {
            Err(error) if !is_closed_error(&error) => Err(to_transport_error(error)),
            _ => Ok(()),
        }
    }
}
