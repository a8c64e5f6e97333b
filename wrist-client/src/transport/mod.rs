//! Frame transports.
//!
//! The session exchanges JSON text frames with the server and does not care
//! how they travel. [`WebSocketTransport`] carries them over a real socket;
//! [`MockTransport`] plays the server side in tests.
//!
//! A transport is opened with `connect()`, stays open until `close()` or
//! until the peer goes away, and can be opened again afterwards for the
//! next reconnect attempt.
//!
//! `recv()` must be cancel-safe: the session loop races it against caller
//! requests and drops it when a request wins.
//!
//! ```ignore
//! let transport = MockTransport::accepting();
//! transport.connect("ws://homeassistant.local:8123/api/websocket").await?;
//! let hello = transport.recv().await?; // {"type":"auth_required",...}
//! ```

mod mock;
mod websocket;

pub use mock::MockTransport;
pub use websocket::{websocket_url, WebSocketTransport};

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket could not be opened.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Send or receive without an open socket.
    #[error("not connected")]
    NotConnected,

    /// The peer closed the socket.
    #[error("connection closed")]
    ConnectionClosed,

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Reading a frame failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Server URL could not be turned into a WebSocket URL.
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
}

/// A reconnectable, bidirectional channel of text frames.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the socket to `url`, replacing any previous connection.
    async fn connect(&self, url: &str) -> Result<(), TransportError>;

    /// Write one text frame.
    async fn send(&self, text: &str) -> Result<(), TransportError>;

    /// Wait for the next text frame.
    ///
    /// Control frames are handled internally. Returns
    /// [`TransportError::ConnectionClosed`] once the peer has closed.
    async fn recv(&self) -> Result<String, TransportError>;

    /// Whether the socket is currently open.
    fn is_connected(&self) -> bool;

    /// Close the socket. Closing an unopened transport is a no-op.
    async fn close(&self) -> Result<(), TransportError>;
}
