//! WebSocket transport over tokio-tungstenite.

use super::{Transport, TransportError};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, protocol::Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Derive the WebSocket endpoint from a server URL.
///
/// `http://host:8123/` becomes `ws://host:8123/api/websocket`; `https`
/// maps to `wss`. A URL that already points at `/api/websocket` is kept.
pub fn websocket_url(server: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(server)
        .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", server, e)))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme {:?} in {}",
                other, server
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::InvalidUrl(server.to_string()))?;

    let path = url.path().trim_end_matches('/').to_string();
    if !path.ends_with("/api/websocket") {
        url.set_path(&format!("{}/api/websocket", path));
    }
    Ok(url)
}

/// Transport over a real WebSocket connection.
///
/// The stream is split so a pending `recv()` never blocks `send()`.
pub struct WebSocketTransport {
    writer: Mutex<Option<SplitSink<WsStream, Message>>>,
    reader: Mutex<Option<SplitStream<WsStream>>>,
    connected: AtomicBool,
}

impl WebSocketTransport {
    /// Create an unconnected transport.
    pub fn new() -> Self {
        Self {
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    async fn reply_pong(&self, payload: Vec<u8>) {
        if let Some(writer) = self.writer.lock().await.as_mut() {
            if let Err(e) = writer.send(Message::Pong(payload)).await {
                warn!(error = %e, "failed to answer websocket ping");
            }
        }
    }

    fn mark_closed(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        debug!(status = %response.status(), "websocket upgrade complete");

        let (writer, reader) = stream.split();
        *self.writer.lock().await = Some(writer);
        *self.reader.lock().await = Some(reader);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, text: &str) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;
        writer
            .send(Message::Text(text.to_string().into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&self) -> Result<String, TransportError> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(TransportError::NotConnected)?;
        loop {
            match reader.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
                Some(Ok(Message::Binary(data))) => {
                    debug!(len = data.len(), "ignoring binary websocket frame");
                }
                Some(Ok(Message::Ping(payload))) => self.reply_pong(payload).await,
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "server closed websocket");
                    self.mark_closed();
                    return Err(TransportError::ConnectionClosed);
                }
                Some(Err(tungstenite::Error::ConnectionClosed))
                | Some(Err(tungstenite::Error::AlreadyClosed))
                | None => {
                    self.mark_closed();
                    return Err(TransportError::ConnectionClosed);
                }
                Some(Err(e)) => {
                    self.mark_closed();
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.mark_closed();
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.send(Message::Close(None)).await {
                debug!(error = %e, "close frame not sent");
            }
            let _ = writer.close().await;
        }
        self.reader.lock().await.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_url_maps_to_ws_endpoint() {
        let url = websocket_url("http://homeassistant.local:8123/").unwrap();
        assert_eq!(url.as_str(), "ws://homeassistant.local:8123/api/websocket");
    }

    #[test]
    fn https_url_maps_to_wss_endpoint() {
        let url = websocket_url("https://ha.example.com").unwrap();
        assert_eq!(url.as_str(), "wss://ha.example.com/api/websocket");
    }

    #[test]
    fn websocket_url_is_kept() {
        let url = websocket_url("ws://10.0.0.2:8123/api/websocket").unwrap();
        assert_eq!(url.as_str(), "ws://10.0.0.2:8123/api/websocket");
    }

    #[test]
    fn path_prefix_is_preserved() {
        let url = websocket_url("https://example.com/ha//").unwrap();
        assert_eq!(url.as_str(), "wss://example.com/ha/api/websocket");
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        assert!(matches!(
            websocket_url("ftp://example.com"),
            Err(TransportError::InvalidUrl(_))
        ));
        assert!(matches!(
            websocket_url("not a url"),
            Err(TransportError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn unconnected_transport_reports_not_connected() {
        let transport = WebSocketTransport::new();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.send("{}").await,
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            transport.recv().await,
            Err(TransportError::NotConnected)
        ));
        transport.close().await.unwrap();
    }
}
