//! Mock transport for testing.
//!
//! Frames can be pushed from the test at any time, `recv()` waits for them
//! the way a socket would, and everything the client sends is captured.

use super::{Transport, TransportError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// How the mock answers the auth handshake on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthScript {
    Accept,
    Reject,
}

/// Mock transport for testing.
///
/// Clones share state, so a test keeps one clone and hands the other to
/// the client.
#[derive(Debug, Default)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<MockTransportInner>,
    incoming: Notify,
    outgoing: Notify,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    peer_closed: bool,
    connect_count: u32,
    connected_url: Option<String>,
    sent_frames: Vec<String>,
    receive_queue: VecDeque<String>,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
    fail_next_recv: Option<String>,
    auth: Option<AuthScript>,
    ha_version: String,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock that plays the server side of a successful handshake on
    /// every connect: `auth_required` on open, `auth_ok` when the client
    /// authenticates, and a success result for `supported_features`.
    pub fn accepting() -> Self {
        let transport = Self::new();
        {
            let mut inner = transport.state();
            inner.auth = Some(AuthScript::Accept);
            inner.ha_version = "2024.6.0".to_string();
        }
        transport
    }

    /// A mock that answers every auth attempt with `auth_invalid`.
    pub fn rejecting() -> Self {
        let transport = Self::new();
        transport.state().auth = Some(AuthScript::Reject);
        transport
    }

    fn state(&self) -> MutexGuard<'_, MockTransportInner> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a frame to be returned by `recv()`, waking a waiting receiver.
    pub fn push_frame(&self, text: &str) {
        self.state().receive_queue.push_back(text.to_string());
        self.shared.incoming.notify_waiters();
    }

    /// Queue a JSON frame.
    pub fn push_json(&self, value: Value) {
        self.push_frame(&value.to_string());
    }

    /// Simulate the peer dropping the connection.
    ///
    /// Frames already queued are still delivered, then `recv()` reports
    /// [`TransportError::ConnectionClosed`].
    pub fn drop_connection(&self) {
        {
            let mut inner = self.state();
            inner.connected = false;
            inner.peer_closed = true;
        }
        self.shared.incoming.notify_waiters();
    }

    /// All frames that were sent.
    pub fn sent_frames(&self) -> Vec<String> {
        self.state().sent_frames.clone()
    }

    /// The last frame that was sent.
    pub fn last_sent(&self) -> Option<String> {
        self.state().sent_frames.last().cloned()
    }

    /// Sent frames of the given `type`, decoded.
    pub fn sent_of_type(&self, kind: &str) -> Vec<Value> {
        self.state()
            .sent_frames
            .iter()
            .filter_map(|frame| serde_json::from_str::<Value>(frame).ok())
            .filter(|value| value.get("type").and_then(Value::as_str) == Some(kind))
            .collect()
    }

    /// Wait until at least `count` frames of the given `type` were sent,
    /// returning all of them.
    pub async fn wait_sent(&self, kind: &str, count: usize) -> Vec<Value> {
        loop {
            let notified = self.shared.outgoing.notified();
            let frames = self.sent_of_type(kind);
            if frames.len() >= count {
                return frames;
            }
            notified.await;
        }
    }

    /// Wait for the first frame of the given `type` and return its id.
    pub async fn wait_sent_id(&self, kind: &str) -> u64 {
        self.wait_sent(kind, 1).await[0]
            .get("id")
            .and_then(Value::as_u64)
            .unwrap_or_default()
    }

    /// Number of successful `connect()` calls.
    pub fn connect_count(&self) -> u32 {
        self.state().connect_count
    }

    /// The URL that was connected to.
    pub fn connected_url(&self) -> Option<String> {
        self.state().connected_url.clone()
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.state().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.state().fail_next_send = Some(error.to_string());
    }

    /// Cause the next recv() to fail with the given error.
    pub fn fail_next_recv(&self, error: &str) {
        self.state().fail_next_recv = Some(error.to_string());
        self.shared.incoming.notify_waiters();
    }

    /// Clear all state (frames, queue, connection, scripts).
    pub fn reset(&self) {
        *self.state() = MockTransportInner::default();
        self.shared.incoming.notify_waiters();
    }

    fn scripted_reply(inner: &MockTransportInner, sent: &str) -> Option<String> {
        let script = inner.auth?;
        let value: Value = serde_json::from_str(sent).ok()?;
        match (value.get("type").and_then(Value::as_str)?, script) {
            ("auth", AuthScript::Accept) => Some(
                serde_json::json!({"type": "auth_ok", "ha_version": inner.ha_version}).to_string(),
            ),
            ("auth", AuthScript::Reject) => Some(
                serde_json::json!({
                    "type": "auth_invalid",
                    "message": "Invalid access token or password"
                })
                .to_string(),
            ),
            ("supported_features", AuthScript::Accept) => {
                let id = value.get("id")?.as_u64()?;
                Some(
                    serde_json::json!({"id": id, "type": "result", "success": true, "result": null})
                        .to_string(),
                )
            }
            _ => None,
        }
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        {
            let mut inner = self.state();

            // Check for forced failure
            if let Some(error) = inner.fail_next_connect.take() {
                return Err(TransportError::ConnectionFailed(error));
            }

            inner.connected = true;
            inner.peer_closed = false;
            inner.connect_count += 1;
            inner.connected_url = Some(url.to_string());
            if inner.auth.is_some() {
                let hello =
                    serde_json::json!({"type": "auth_required", "ha_version": inner.ha_version});
                inner.receive_queue.push_back(hello.to_string());
            }
        }
        self.shared.incoming.notify_waiters();
        Ok(())
    }

    async fn send(&self, text: &str) -> Result<(), TransportError> {
        let replied = {
            let mut inner = self.state();

            if !inner.connected {
                return Err(TransportError::NotConnected);
            }

            // Check for forced failure
            if let Some(error) = inner.fail_next_send.take() {
                return Err(TransportError::SendFailed(error));
            }

            inner.sent_frames.push(text.to_string());
            match Self::scripted_reply(&inner, text) {
                Some(reply) => {
                    inner.receive_queue.push_back(reply);
                    true
                }
                None => false,
            }
        };
        self.shared.outgoing.notify_waiters();
        if replied {
            self.shared.incoming.notify_waiters();
        }
        Ok(())
    }

    async fn recv(&self) -> Result<String, TransportError> {
        loop {
            let notified = self.shared.incoming.notified();
            {
                let mut inner = self.state();

                // Check for forced failure
                if let Some(error) = inner.fail_next_recv.take() {
                    return Err(TransportError::ReceiveFailed(error));
                }
                if let Some(frame) = inner.receive_queue.pop_front() {
                    return Ok(frame);
                }
                if inner.peer_closed {
                    inner.peer_closed = false;
                    return Err(TransportError::ConnectionClosed);
                }
                if !inner.connected {
                    return Err(TransportError::NotConnected);
                }
            }
            notified.await;
        }
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        {
            let mut inner = self.state();
            inner.connected = false;
            inner.receive_queue.clear();
        }
        self.shared.incoming.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const URL: &str = "ws://ha.test:8123/api/websocket";

    // ===========================================
    // MockTransport Basic Tests
    // ===========================================

    #[tokio::test]
    async fn mock_transport_connects() {
        let transport = MockTransport::new();
        assert!(!transport.is_connected());

        transport.connect(URL).await.unwrap();

        assert!(transport.is_connected());
        assert_eq!(transport.connected_url(), Some(URL.to_string()));
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn mock_transport_sends_frames() {
        let transport = MockTransport::new();
        transport.connect(URL).await.unwrap();

        transport.send(r#"{"id":1,"type":"ping"}"#).await.unwrap();
        transport.send(r#"{"id":2,"type":"get_states"}"#).await.unwrap();

        assert_eq!(transport.sent_frames().len(), 2);
        assert_eq!(transport.sent_of_type("ping").len(), 1);
        assert_eq!(
            transport.last_sent().as_deref(),
            Some(r#"{"id":2,"type":"get_states"}"#)
        );
    }

    #[tokio::test]
    async fn mock_transport_receives_queued_frames_in_order() {
        let transport = MockTransport::new();
        transport.connect(URL).await.unwrap();

        transport.push_frame("one");
        transport.push_frame("two");

        assert_eq!(transport.recv().await.unwrap(), "one");
        assert_eq!(transport.recv().await.unwrap(), "two");
    }

    #[tokio::test]
    async fn recv_waits_for_a_later_frame() {
        let transport = MockTransport::new();
        transport.connect(URL).await.unwrap();

        let pusher = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            pusher.push_frame("late");
        });

        assert_eq!(transport.recv().await.unwrap(), "late");
    }

    #[tokio::test]
    async fn drop_connection_delivers_queue_then_closes() {
        let transport = MockTransport::new();
        transport.connect(URL).await.unwrap();
        transport.push_frame("last words");
        transport.drop_connection();

        assert_eq!(transport.recv().await.unwrap(), "last words");
        assert!(matches!(
            transport.recv().await,
            Err(TransportError::ConnectionClosed)
        ));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn mock_transport_closes() {
        let transport = MockTransport::new();
        transport.connect(URL).await.unwrap();
        transport.close().await.unwrap();

        assert!(!transport.is_connected());
        assert!(matches!(
            transport.recv().await,
            Err(TransportError::NotConnected)
        ));
    }

    // ===========================================
    // Scripted Handshake Tests
    // ===========================================

    #[tokio::test]
    async fn accepting_mock_plays_handshake() {
        let transport = MockTransport::accepting();
        transport.connect(URL).await.unwrap();

        let hello: Value = serde_json::from_str(&transport.recv().await.unwrap()).unwrap();
        assert_eq!(hello["type"], "auth_required");

        transport
            .send(r#"{"type":"auth","access_token":"t"}"#)
            .await
            .unwrap();
        let reply: Value = serde_json::from_str(&transport.recv().await.unwrap()).unwrap();
        assert_eq!(reply["type"], "auth_ok");
    }

    #[tokio::test]
    async fn rejecting_mock_answers_auth_invalid() {
        let transport = MockTransport::rejecting();
        transport.connect(URL).await.unwrap();
        transport.recv().await.unwrap();

        transport
            .send(r#"{"type":"auth","access_token":"t"}"#)
            .await
            .unwrap();
        let reply: Value = serde_json::from_str(&transport.recv().await.unwrap()).unwrap();
        assert_eq!(reply["type"], "auth_invalid");
    }

    #[tokio::test]
    async fn wait_sent_id_returns_command_id() {
        let transport = MockTransport::new();
        transport.connect(URL).await.unwrap();

        let sender = transport.clone();
        tokio::spawn(async move {
            sender.send(r#"{"id":7,"type":"call_service"}"#).await.unwrap();
        });

        assert_eq!(transport.wait_sent_id("call_service").await, 7);
    }

    // ===========================================
    // Error Condition Tests
    // ===========================================

    #[tokio::test]
    async fn send_without_connect_fails() {
        let transport = MockTransport::new();

        let result = transport.send("{}").await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn forced_connect_failure() {
        let transport = MockTransport::new();
        transport.fail_next_connect("connection refused");

        let result = transport.connect(URL).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
        assert!(!transport.is_connected());

        // Next connect should work
        transport.connect(URL).await.unwrap();
    }

    #[tokio::test]
    async fn forced_send_failure() {
        let transport = MockTransport::new();
        transport.connect(URL).await.unwrap();
        transport.fail_next_send("broken pipe");

        let result = transport.send("{}").await;
        assert!(matches!(result, Err(TransportError::SendFailed(_))));
        assert!(transport.sent_frames().is_empty());
    }

    #[tokio::test]
    async fn forced_recv_failure() {
        let transport = MockTransport::new();
        transport.connect(URL).await.unwrap();
        transport.push_frame("data");
        transport.fail_next_recv("reset");

        let result = transport.recv().await;
        assert!(matches!(result, Err(TransportError::ReceiveFailed(_))));

        // Next recv should work (and get the queued data)
        assert_eq!(transport.recv().await.unwrap(), "data");
    }

    // ===========================================
    // Clone and Shared State Tests
    // ===========================================

    #[tokio::test]
    async fn mock_transport_clone_shares_state() {
        let transport1 = MockTransport::new();
        let transport2 = transport1.clone();

        transport1.connect(URL).await.unwrap();
        assert!(transport2.is_connected());

        transport1.send("a").await.unwrap();
        transport2.send("b").await.unwrap();
        assert_eq!(transport1.sent_frames().len(), 2);
    }

    #[tokio::test]
    async fn mock_transport_reset_clears_all() {
        let transport = MockTransport::accepting();
        transport.connect(URL).await.unwrap();
        transport.send("data").await.unwrap();

        transport.reset();

        assert!(!transport.is_connected());
        assert!(transport.sent_frames().is_empty());
        assert!(transport.connected_url().is_none());
        assert_eq!(transport.connect_count(), 0);
    }
}
