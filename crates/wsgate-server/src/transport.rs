//! Frame transport seam between the connection task and the wire.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use tracing::debug;

/// One application data frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
}

impl Frame {
    /// Raw payload bytes regardless of frame kind.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => &bytes[..],
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
        }
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Bytes> for Frame {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

/// Transport failure.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport was already closed.
    #[error("transport closed")]
    Closed,
    /// Read or write failed.
    #[error("transport I/O: {0}")]
    Io(String),
}

/// Bidirectional frame transport owned by exactly one connection task.
///
/// `recv` must be cancel-safe: the connection task races it against the
/// outbound queue and cancellation.
#[async_trait]
pub trait Transport: Send {
    /// Next data frame. `None` once the peer has closed.
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>>;

    /// Write one frame.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Close the transport. Calling it again is a no-op.
    async fn close(&mut self);
}

/// [`Transport`] over an upgraded axum WebSocket.
///
/// Ping and pong frames are answered by the protocol layer and never
/// surface from `recv`.
pub struct WebSocketTransport {
    socket: WebSocket,
    closed: bool,
}

impl WebSocketTransport {
    /// Wrap an upgraded socket.
    pub fn new(socket: WebSocket) -> Self {
        Self {
            socket,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        if self.closed {
            return None;
        }
        loop {
            let msg = match self.socket.recv().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(TransportError::Io(e.to_string()))),
            };
            match msg {
                Message::Text(text) => return Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Message::Binary(data) => return Some(Ok(Frame::Binary(data))),
                Message::Close(frame) => {
                    debug!(?frame, "peer sent close frame");
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let msg = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data),
        };
        self.socket
            .send(msg)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.socket.send(Message::Close(None)).await {
            debug!(error = %e, "close frame not sent");
        }
    }
}
