//! HaClient - the main interface for hawrist.
//!
//! This module provides [`HaClient`], the primary API for applications
//! talking to a Home Assistant server over its WebSocket API.
//!
//! # Architecture
//!
//! HaClient is a cheap, cloneable handle. The connection itself lives on a
//! session task that drives the pure state machine from hawrist-core and
//! performs the actual I/O via the Transport trait.
//!
//! ```text
//! Application → HaClient → session task → Transport → Network
//!                              ↓
//!                 hawrist-core (state machine, correlation, cache)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use hawrist_client::{ClientConfig, HaClient};
//!
//! let config = ClientConfig::new("http://homeassistant.local:8123", "token");
//! let client = HaClient::websocket(config)?;
//!
//! client.connect()?;
//! client.wait_until_ready().await?;
//! client.refresh_states().await?;
//! let kitchen = client.entity("light.kitchen").await;
//! ```

use hawrist_core::{ConnectionState, EntityStateCache, SessionEvent, SubscriptionKind};
use hawrist_types::{
    CodecError, CommandId, DiffPatch, EntityId, EntityRecord, ErrorInfo, PipelineEvent,
    PipelineFailure, PipelineList, PipelineRun, Request, StateChange, Target, TodoItem,
    TodoItemStatus,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};

use crate::config::ClientConfig;
use crate::session::{Session, SessionChannels, SessionRequest};
use crate::subscription::{Lifecycle, Sink, Subscription, Tx};
use crate::transport::{websocket_url, Transport, TransportError, WebSocketTransport};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Request issued before the handshake completed.
    #[error("not ready: the session is not authenticated")]
    NotReady,

    /// The connection dropped before the request resolved.
    #[error("connection lost")]
    ConnectionLost,

    /// The caller disconnected before the request resolved.
    #[error("disconnected")]
    Disconnected,

    /// The server answered with an error result.
    #[error("command failed: {0}")]
    Command(ErrorInfo),

    /// A pipeline run ended with an `error` event.
    #[error("pipeline failed: {0}")]
    Pipeline(PipelineFailure),

    /// Encoding or decoding error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Every correlation id is in use.
    #[error("no free command id")]
    IdsExhausted,

    /// The session task has stopped.
    #[error("session closed")]
    SessionClosed,

    /// A result payload did not have the expected shape.
    #[error("unexpected result: {0}")]
    Decode(String),
}

/// Handle to one Home Assistant session.
///
/// Clones share the session. The session task stops on
/// [`shutdown`](Self::shutdown) or when the last handle is dropped.
#[derive(Debug, Clone)]
pub struct HaClient {
    requests: mpsc::UnboundedSender<SessionRequest>,
    events: broadcast::Sender<SessionEvent>,
    state: watch::Receiver<ConnectionState>,
    cache: Arc<RwLock<EntityStateCache>>,
}

impl HaClient {
    /// Start a session over `transport`.
    ///
    /// Must be called from within a tokio runtime. The session starts
    /// disconnected; call [`connect`](Self::connect).
    ///
    /// # Errors
    ///
    /// Returns an error if the server URL cannot be turned into a
    /// WebSocket endpoint.
    pub fn new<T: Transport + 'static>(
        config: ClientConfig,
        transport: T,
    ) -> Result<Self, ClientError> {
        let url = websocket_url(&config.server.url)?;
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.session.event_buffer.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::new());
        let cache = Arc::new(RwLock::new(EntityStateCache::new()));

        let session = Session::new(
            transport,
            url.to_string(),
            config.server.access_token.clone(),
            &config.session,
            SessionChannels {
                requests: requests_rx,
                events: events.clone(),
                state: state_tx,
                cache: Arc::clone(&cache),
            },
        );
        tokio::spawn(session.run());

        Ok(Self {
            requests: requests_tx,
            events,
            state: state_rx,
            cache,
        })
    }

    /// Start a session over a real WebSocket connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the server URL is invalid.
    pub fn websocket(config: ClientConfig) -> Result<Self, ClientError> {
        Self::new(config, WebSocketTransport::new())
    }

    fn submit(&self, request: SessionRequest) -> Result<(), ClientError> {
        self.requests
            .send(request)
            .map_err(|_| ClientError::SessionClosed)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open the connection. Progress is reported through
    /// [`events`](Self::events) and [`state`](Self::state).
    pub fn connect(&self) -> Result<(), ClientError> {
        self.submit(SessionRequest::Connect)
    }

    /// Close the connection without reconnecting.
    ///
    /// Pending commands fail with [`ClientError::Disconnected`].
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let (done, finished) = oneshot::channel();
        self.submit(SessionRequest::Disconnect { done })?;
        finished.await.map_err(|_| ClientError::SessionClosed)
    }

    /// Disconnect and stop the session task.
    pub fn shutdown(&self) {
        let _ = self.requests.send(SessionRequest::Shutdown);
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Check if requests may be sent.
    pub fn is_ready(&self) -> bool {
        self.state.borrow().is_ready()
    }

    /// Wait until the session is authenticated.
    ///
    /// Keeps waiting across reconnect attempts; wrap it in a timeout to
    /// bound it.
    pub async fn wait_until_ready(&self) -> Result<(), ClientError> {
        let mut state = self.state.clone();
        loop {
            if state.borrow_and_update().is_ready() {
                return Ok(());
            }
            state
                .changed()
                .await
                .map_err(|_| ClientError::SessionClosed)?;
        }
    }

    /// Lifecycle notifications from now on.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Send any command and wait for its result payload.
    pub async fn send(&self, request: Request) -> Result<Value, ClientError> {
        self.command(request, false).await
    }

    async fn command(&self, request: Request, apply_snapshot: bool) -> Result<Value, ClientError> {
        let (reply, result) = oneshot::channel();
        self.submit(SessionRequest::Command {
            request,
            apply_snapshot,
            reply,
        })?;
        result.await.map_err(|_| ClientError::SessionClosed)?
    }

    async fn command_as<R: DeserializeOwned>(&self, request: Request) -> Result<R, ClientError> {
        let kind = request.kind();
        let value = self.send(request).await?;
        serde_json::from_value(value).map_err(|e| ClientError::Decode(format!("{}: {}", kind, e)))
    }

    /// Fetch every entity state without touching the cache.
    pub async fn get_states(&self) -> Result<Vec<EntityRecord>, ClientError> {
        self.command_as(Request::GetStates).await
    }

    /// Fetch every entity state and replace the cache with it.
    ///
    /// Returns the number of entities received.
    pub async fn refresh_states(&self) -> Result<usize, ClientError> {
        let value = self.command(Request::GetStates, true).await?;
        Ok(value.as_array().map_or(0, Vec::len))
    }

    /// Server configuration.
    pub async fn get_config(&self) -> Result<Value, ClientError> {
        self.send(Request::GetConfig).await
    }

    /// Services per domain.
    pub async fn get_services(&self) -> Result<Value, ClientError> {
        self.send(Request::GetServices).await
    }

    /// Registered frontend panels.
    pub async fn get_panels(&self) -> Result<Value, ClientError> {
        self.send(Request::GetPanels).await
    }

    /// Area registry entries.
    pub async fn area_registry(&self) -> Result<Vec<Value>, ClientError> {
        self.command_as(Request::AreaRegistryList).await
    }

    /// Device registry entries.
    pub async fn device_registry(&self) -> Result<Vec<Value>, ClientError> {
        self.command_as(Request::DeviceRegistryList).await
    }

    /// Entity registry entries.
    pub async fn entity_registry(&self) -> Result<Vec<Value>, ClientError> {
        self.command_as(Request::EntityRegistryList).await
    }

    /// Label registry entries.
    pub async fn label_registry(&self) -> Result<Vec<Value>, ClientError> {
        self.command_as(Request::LabelRegistryList).await
    }

    /// Floor registry entries.
    pub async fn floor_registry(&self) -> Result<Vec<Value>, ClientError> {
        self.command_as(Request::FloorRegistryList).await
    }

    /// Invoke a service.
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        service_data: Option<Value>,
        target: Option<Target>,
    ) -> Result<Value, ClientError> {
        self.send(Request::CallService {
            domain: domain.to_string(),
            service: service.to_string(),
            service_data,
            target,
        })
        .await
    }

    /// Turn entities on, whatever their domain.
    pub async fn turn_on(&self, entity_ids: &[EntityId]) -> Result<Value, ClientError> {
        self.generic_service("turn_on", entity_ids).await
    }

    /// Turn entities off, whatever their domain.
    pub async fn turn_off(&self, entity_ids: &[EntityId]) -> Result<Value, ClientError> {
        self.generic_service("turn_off", entity_ids).await
    }

    /// Toggle entities, whatever their domain.
    pub async fn toggle(&self, entity_ids: &[EntityId]) -> Result<Value, ClientError> {
        self.generic_service("toggle", entity_ids).await
    }

    async fn generic_service(
        &self,
        service: &str,
        entity_ids: &[EntityId],
    ) -> Result<Value, ClientError> {
        let target = Target::entities(entity_ids.iter().cloned());
        self.call_service("homeassistant", service, None, Some(target))
            .await
    }

    /// Add an item to a to-do list.
    pub async fn todo_add_item(
        &self,
        list: &EntityId,
        summary: &str,
    ) -> Result<Value, ClientError> {
        let data = json!({ "item": summary });
        self.call_service("todo", "add_item", Some(data), Some(Target::entity(list.clone())))
            .await
    }

    /// Rename an item and/or change its status.
    pub async fn todo_update_item(
        &self,
        list: &EntityId,
        item: &str,
        rename: Option<&str>,
        status: Option<TodoItemStatus>,
    ) -> Result<Value, ClientError> {
        let mut data = Map::new();
        data.insert("item".into(), Value::String(item.to_string()));
        if let Some(rename) = rename {
            data.insert("rename".into(), Value::String(rename.to_string()));
        }
        if let Some(status) = status {
            let status = serde_json::to_value(status)
                .map_err(|e| ClientError::Codec(CodecError::Serialization(e)))?;
            data.insert("status".into(), status);
        }
        self.call_service(
            "todo",
            "update_item",
            Some(Value::Object(data)),
            Some(Target::entity(list.clone())),
        )
        .await
    }

    /// Remove an item from a to-do list.
    pub async fn todo_remove_item(
        &self,
        list: &EntityId,
        item: &str,
    ) -> Result<Value, ClientError> {
        let data = json!({ "item": item });
        self.call_service("todo", "remove_item", Some(data), Some(Target::entity(list.clone())))
            .await
    }

    /// Assist pipelines and the preferred one.
    pub async fn list_pipelines(&self) -> Result<PipelineList, ClientError> {
        self.command_as(Request::PipelineList).await
    }

    /// One conversation turn without the pipeline event stream.
    pub async fn conversation_process(
        &self,
        text: &str,
        conversation_id: Option<&str>,
    ) -> Result<Value, ClientError> {
        self.send(Request::ConversationProcess {
            text: text.to_string(),
            conversation_id: conversation_id.map(str::to_string),
            language: None,
            agent_id: None,
        })
        .await
    }

    /// Round-trip a ping.
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.send(Request::Ping).await.map(|_| ())
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    async fn open<T>(
        &self,
        request: Request,
        kind: SubscriptionKind,
        sink: fn(Tx<T>) -> Sink,
    ) -> Result<Subscription<T>, ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (reply, ack) = oneshot::channel();
        let lifecycle = Arc::new(Lifecycle::default());
        self.submit(SessionRequest::Subscribe {
            request,
            kind,
            sink: sink(tx),
            lifecycle: lifecycle.clone(),
            reply,
        })?;
        let id = ack.await.map_err(|_| ClientError::SessionClosed)??;
        Ok(Subscription::new(id, rx, self.requests.clone(), lifecycle))
    }

    /// Subscribe with any request, receiving raw event payloads.
    ///
    /// Resolves once the server accepted the subscription.
    pub async fn subscribe(&self, request: Request) -> Result<Subscription<Value>, ClientError> {
        self.open(request, SubscriptionKind::Raw, Sink::Raw).await
    }

    /// Bus events, optionally of one type only.
    pub async fn subscribe_events(
        &self,
        event_type: Option<&str>,
    ) -> Result<Subscription<Value>, ClientError> {
        self.subscribe(Request::SubscribeEvents {
            event_type: event_type.map(str::to_string),
        })
        .await
    }

    /// State changes of the given entities.
    pub async fn subscribe_trigger(
        &self,
        entity_ids: &[EntityId],
    ) -> Result<Subscription<StateChange>, ClientError> {
        self.open(
            Request::state_trigger(entity_ids),
            SubscriptionKind::Trigger,
            Sink::Trigger,
        )
        .await
    }

    /// The compressed entity feed, keeping the cache in sync.
    ///
    /// Without a filter the first event replaces the cache; with one it is
    /// merged in. Every event is applied to the cache before it is delivered.
    pub async fn subscribe_entities(
        &self,
        entity_ids: Option<Vec<EntityId>>,
    ) -> Result<Subscription<DiffPatch>, ClientError> {
        let kind = SubscriptionKind::entity_feed(entity_ids.is_some());
        self.open(
            Request::SubscribeEntities { entity_ids },
            kind,
            Sink::Entities,
        )
        .await
    }

    /// Item sets of a to-do list, starting with the current one.
    pub async fn subscribe_todo_items(
        &self,
        list: &EntityId,
    ) -> Result<Subscription<Vec<TodoItem>>, ClientError> {
        self.open(
            Request::TodoItemSubscribe {
                entity_id: list.clone(),
            },
            SubscriptionKind::TodoItems,
            Sink::TodoItems,
        )
        .await
    }

    /// Run an assist pipeline.
    ///
    /// The subscription yields the run's events and ends by itself after
    /// `run-end`. An `error` event arrives as [`ClientError::Pipeline`] and
    /// also ends it.
    pub async fn run_pipeline(
        &self,
        run: PipelineRun,
    ) -> Result<Subscription<PipelineEvent>, ClientError> {
        self.open(Request::PipelineRun(run), SubscriptionKind::Pipeline, Sink::Pipeline)
            .await
    }

    /// Cancel a subscription by id.
    ///
    /// Prefer [`Subscription::cancel`]; this is for callers that only kept
    /// the id. Unknown ids are ignored.
    pub async fn unsubscribe(&self, id: CommandId) -> Result<(), ClientError> {
        let (done, finished) = oneshot::channel();
        self.submit(SessionRequest::Unsubscribe {
            id,
            owner: None,
            done: Some(done),
        })?;
        finished.await.map_err(|_| ClientError::SessionClosed)
    }

    // =========================================================================
    // Entity cache
    // =========================================================================

    /// Cached state of one entity.
    pub async fn entity(&self, entity_id: &str) -> Option<EntityRecord> {
        self.cache.read().await.get(entity_id)
    }

    /// Every cached entity, sorted by id.
    pub async fn entities(&self) -> Vec<EntityRecord> {
        self.cache.read().await.all()
    }

    /// Cached entities of one domain, sorted by id.
    pub async fn entities_in_domain(&self, domain: &str) -> Vec<EntityRecord> {
        self.cache.read().await.by_domain(domain)
    }

    /// Number of cached entities.
    pub async fn entity_count(&self) -> usize {
        self.cache.read().await.len()
    }
}
