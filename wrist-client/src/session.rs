//! The session task.
//!
//! One task owns the transport and every piece of correlation state. It
//! feeds lifecycle events into the [`SessionMachine`] and performs the
//! actions it returns, routes inbound frames to pending commands and
//! subscriptions, and serves caller requests arriving over a channel.
//!
//! ```text
//! HaClient ──requests──► Session ──frames──► Transport
//!                           │
//!            SessionMachine · CommandMultiplexer · SubscriptionRegistry
//!                           │
//!                   Arc<RwLock<EntityStateCache>>
//! ```

use hawrist_core::{
    Acknowledgement, Action, CommandMultiplexer, ConnectionState, EntityStateCache, Event,
    IdAllocator, InvalidationCause, SessionEvent, SessionMachine, SubscriptionKind,
    SubscriptionRegistry,
};
use hawrist_types::{
    decode_entity_diff, decode_frames, encode_auth, encode_request, AuthMessage, CommandId,
    EntityRecord, ErrorInfo, EventFrame, InboundFrame, PipelineEvent, Request, ResultFrame,
    StateChange, TodoItem,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::client::ClientError;
use crate::config::{AccessToken, SessionConfig};
use crate::subscription::{Lifecycle, Sink, SinkSlot};
use crate::transport::{Transport, TransportError};

/// Requests from client handles to the session task.
#[derive(Debug)]
pub(crate) enum SessionRequest {
    Connect,
    Disconnect {
        done: oneshot::Sender<()>,
    },
    Command {
        request: Request,
        /// Replace the cache with the `get_states` rows of the result.
        apply_snapshot: bool,
        reply: oneshot::Sender<Result<Value, ClientError>>,
    },
    Subscribe {
        request: Request,
        kind: SubscriptionKind,
        sink: Sink,
        lifecycle: Arc<Lifecycle>,
        reply: oneshot::Sender<Result<CommandId, ClientError>>,
    },
    Unsubscribe {
        id: CommandId,
        /// The handle asking. `None` cancels whatever holds the id.
        owner: Option<Arc<Lifecycle>>,
        done: Option<oneshot::Sender<()>>,
    },
    Shutdown,
}

/// Who is waiting for a command's result.
#[derive(Debug)]
pub(crate) enum Responder {
    Caller {
        reply: oneshot::Sender<Result<Value, ClientError>>,
        apply_snapshot: bool,
    },
    /// Sent by the session itself; the outcome is only logged.
    Internal,
}

/// Channels shared between the session task and client handles.
pub(crate) struct SessionChannels {
    pub(crate) requests: mpsc::UnboundedReceiver<SessionRequest>,
    pub(crate) events: broadcast::Sender<SessionEvent>,
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) cache: Arc<RwLock<EntityStateCache>>,
}

pub(crate) struct Session<T: Transport> {
    transport: T,
    url: String,
    token: AccessToken,
    coalesce_messages: bool,
    machine: SessionMachine,
    ids: IdAllocator,
    commands: CommandMultiplexer<Responder>,
    subscriptions: SubscriptionRegistry<SinkSlot>,
    channels: SessionChannels,
    reconnect_at: Option<Instant>,
}

impl<T: Transport> Session<T> {
    pub(crate) fn new(
        transport: T,
        url: String,
        token: AccessToken,
        config: &SessionConfig,
        channels: SessionChannels,
    ) -> Self {
        Self {
            transport,
            url,
            token,
            coalesce_messages: config.coalesce_messages,
            machine: SessionMachine::new(config.reconnect_interval()),
            ids: IdAllocator::new(config.max_command_id),
            commands: CommandMultiplexer::new(),
            subscriptions: SubscriptionRegistry::new(),
            channels,
            reconnect_at: None,
        }
    }

    /// Run until shutdown or until every client handle is gone.
    pub(crate) async fn run(mut self) {
        loop {
            let reading = self.transport_open();
            let deadline = self.reconnect_at;
            tokio::select! {
                biased;
                request = self.channels.requests.recv() => match request {
                    Some(SessionRequest::Shutdown) | None => break,
                    Some(request) => self.handle_request(request).await,
                },
                received = self.transport.recv(), if reading => {
                    self.handle_received(received).await
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.reconnect_at = None;
                    self.step(Event::ReconnectTimer).await;
                }
            }
        }
        self.step(Event::DisconnectRequested).await;
        debug!("session task stopped");
    }

    fn transport_open(&self) -> bool {
        matches!(
            self.machine.state(),
            ConnectionState::AwaitingAuth | ConnectionState::Ready
        )
    }

    // =========================================================================
    // State machine driving
    // =========================================================================

    /// Feed one event and perform the resulting actions, including any
    /// follow-up events those actions produce.
    async fn step(&mut self, event: Event) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let before = self.machine.state().name();
            let actions = self.machine.handle(event);
            let after = self.machine.state().name();
            if before != after {
                debug!(from = before, to = after, "session state changed");
                self.channels
                    .state
                    .send_replace(self.machine.state().clone());
            }
            for action in actions {
                if let Some(next) = self.perform(action).await {
                    queue.push_back(next);
                }
            }
        }
    }

    async fn perform(&mut self, action: Action) -> Option<Event> {
        match action {
            Action::OpenTransport => {
                self.ids.reset();
                info!(url = %self.url, "connecting");
                match self.transport.connect(&self.url).await {
                    Ok(()) => Some(Event::TransportOpened),
                    Err(e) => {
                        warn!(error = %e, "connect failed");
                        Some(Event::TransportFailed {
                            error: e.to_string(),
                        })
                    }
                }
            }
            Action::SendAuth => {
                let auth = match encode_auth(&AuthMessage::new(self.token.expose())) {
                    Ok(auth) => auth,
                    Err(e) => {
                        return Some(Event::TransportFailed {
                            error: e.to_string(),
                        })
                    }
                };
                debug!("sending auth");
                match self.transport.send(&auth).await {
                    Ok(()) => None,
                    Err(e) => Some(Event::TransportFailed {
                        error: e.to_string(),
                    }),
                }
            }
            Action::CloseTransport => {
                if let Err(e) = self.transport.close().await {
                    debug!(error = %e, "error while closing transport");
                }
                Some(Event::TransportClosed {
                    reason: "closed locally".into(),
                })
            }
            Action::Invalidate(cause) => {
                self.invalidate(cause);
                None
            }
            Action::ClearCache => {
                self.channels.cache.write().await.clear();
                None
            }
            Action::ScheduleReconnect { delay } => {
                info!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
                self.reconnect_at = Some(Instant::now() + delay);
                None
            }
            Action::CancelReconnect => {
                self.reconnect_at = None;
                None
            }
            Action::Emit(event) => {
                let follow_up = match &event {
                    SessionEvent::AuthOk { ha_version } => {
                        info!(
                            ha_version = ha_version.as_deref().unwrap_or("unknown"),
                            "authenticated"
                        );
                        self.announce_features().await
                    }
                    SessionEvent::Error { kind, message } => {
                        warn!(kind = ?kind, message = %message, "session error");
                        None
                    }
                    SessionEvent::Close { expected } => {
                        info!(expected = *expected, "connection closed");
                        None
                    }
                    SessionEvent::Open => None,
                };
                // No receivers is fine.
                let _ = self.channels.events.send(event);
                follow_up
            }
        }
    }

    async fn announce_features(&mut self) -> Option<Event> {
        if !self.coalesce_messages {
            return None;
        }
        let request = Request::SupportedFeatures {
            features: json!({ "coalesce_messages": 1 }),
        };
        match self.send_internal(request).await {
            Ok(()) => None,
            Err(e) => Some(Event::TransportFailed {
                error: e.to_string(),
            }),
        }
    }

    /// Fail every pending command and subscription exactly once.
    fn invalidate(&mut self, cause: InvalidationCause) {
        let error = || match cause {
            InvalidationCause::ConnectionLost => ClientError::ConnectionLost,
            InvalidationCause::Disconnected => ClientError::Disconnected,
        };

        let commands = self.commands.drain();
        let subscriptions = self.subscriptions.drain();
        if !commands.is_empty() || !subscriptions.is_empty() {
            info!(
                cause = ?cause,
                commands = commands.len(),
                subscriptions = subscriptions.len(),
                "failing pending work"
            );
        }
        for pending in commands {
            if let Responder::Caller { reply, .. } = pending.responder {
                let _ = reply.send(Err(error()));
            }
        }
        for entry in subscriptions {
            entry.sink.reject(error());
        }
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    fn allocate(&mut self) -> Option<CommandId> {
        let commands = &self.commands;
        let subscriptions = &self.subscriptions;
        self.ids
            .allocate(|id| commands.contains(id) || subscriptions.contains(id))
    }

    /// Send a request whose result nobody waits for.
    async fn send_internal(&mut self, request: Request) -> Result<(), TransportError> {
        let Some(id) = self.allocate() else {
            warn!(kind = %request.kind(), "no free command id, request dropped");
            return Ok(());
        };
        let text = match encode_request(id, &request) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to encode request");
                return Ok(());
            }
        };
        if self
            .commands
            .insert(id, request.kind(), Responder::Internal)
            .is_err()
        {
            return Ok(());
        }
        if let Err(e) = self.transport.send(&text).await {
            self.commands.resolve(id);
            return Err(e);
        }
        Ok(())
    }

    async fn handle_request(&mut self, request: SessionRequest) {
        match request {
            SessionRequest::Connect => self.step(Event::ConnectRequested).await,
            SessionRequest::Disconnect { done } => {
                self.step(Event::DisconnectRequested).await;
                let _ = done.send(());
            }
            SessionRequest::Command {
                request,
                apply_snapshot,
                reply,
            } => self.send_command(request, apply_snapshot, reply).await,
            SessionRequest::Subscribe {
                request,
                kind,
                sink,
                lifecycle,
                reply,
            } => {
                self.send_subscribe(request, kind, sink, lifecycle, reply)
                    .await
            }
            SessionRequest::Unsubscribe { id, owner, done } => {
                self.cancel_subscription(id, owner).await;
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
            // Handled by the run loop.
            SessionRequest::Shutdown => {}
        }
    }

    async fn send_command(
        &mut self,
        request: Request,
        apply_snapshot: bool,
        reply: oneshot::Sender<Result<Value, ClientError>>,
    ) {
        if !self.machine.is_ready() {
            let _ = reply.send(Err(ClientError::NotReady));
            return;
        }
        let Some(id) = self.allocate() else {
            let _ = reply.send(Err(ClientError::IdsExhausted));
            return;
        };
        let text = match encode_request(id, &request) {
            Ok(text) => text,
            Err(e) => {
                let _ = reply.send(Err(e.into()));
                return;
            }
        };
        let responder = Responder::Caller {
            reply,
            apply_snapshot,
        };
        if let Err((e, responder)) = self.commands.insert(id, request.kind(), responder) {
            warn!(error = %e, "command id collision");
            if let Responder::Caller { reply, .. } = responder {
                let _ = reply.send(Err(ClientError::IdsExhausted));
            }
            return;
        }
        debug!(id = id.value(), kind = %request.kind(), "command sent");
        if let Err(e) = self.transport.send(&text).await {
            let error = e.to_string();
            if let Some(pending) = self.commands.resolve(id) {
                if let Responder::Caller { reply, .. } = pending.responder {
                    let _ = reply.send(Err(ClientError::Transport(e)));
                }
            }
            self.step(Event::TransportFailed { error }).await;
        }
    }

    async fn send_subscribe(
        &mut self,
        request: Request,
        kind: SubscriptionKind,
        sink: Sink,
        lifecycle: Arc<Lifecycle>,
        reply: oneshot::Sender<Result<CommandId, ClientError>>,
    ) {
        if !self.machine.is_ready() {
            let _ = reply.send(Err(ClientError::NotReady));
            return;
        }
        let Some(id) = self.allocate() else {
            let _ = reply.send(Err(ClientError::IdsExhausted));
            return;
        };
        let text = match encode_request(id, &request) {
            Ok(text) => text,
            Err(e) => {
                let _ = reply.send(Err(e.into()));
                return;
            }
        };
        let slot = SinkSlot {
            sink,
            ack: Some(reply),
            lifecycle,
        };
        if let Err((e, slot)) = self.subscriptions.register(id, kind, request, slot) {
            warn!(error = %e, "subscription id collision");
            slot.reject(ClientError::IdsExhausted);
            return;
        }
        debug!(id = id.value(), kind = kind.name(), "subscription requested");
        if let Err(e) = self.transport.send(&text).await {
            let error = e.to_string();
            if let Some(entry) = self.subscriptions.cancel(id) {
                entry.sink.reject(ClientError::Transport(e));
            }
            self.step(Event::TransportFailed { error }).await;
        }
    }

    /// Caller-requested cancel. A handle only cancels its own registration,
    /// never a newer one that reuses its id after a reconnect.
    async fn cancel_subscription(&mut self, id: CommandId, owner: Option<Arc<Lifecycle>>) {
        let Some(entry) = self.subscriptions.active(id) else {
            return;
        };
        if let Some(owner) = &owner {
            if !entry.sink.owned_by(owner) {
                debug!(id = id.value(), "ignoring unsubscribe from a stale handle");
                return;
            }
        }
        entry.sink.lifecycle.cancel();
        self.unsubscribe(id).await;
    }

    /// Cancel locally, then tell the server if the connection is up.
    async fn unsubscribe(&mut self, id: CommandId) {
        let Some(entry) = self.subscriptions.cancel(id) else {
            return;
        };
        entry.sink.lifecycle.finish();
        debug!(id = id.value(), "unsubscribed");
        if !self.machine.is_ready() {
            return;
        }
        if let Err(e) = self
            .send_internal(Request::UnsubscribeEvents { subscription: id })
            .await
        {
            self.step(Event::TransportFailed {
                error: e.to_string(),
            })
            .await;
        }
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    async fn handle_received(&mut self, received: Result<String, TransportError>) {
        match received {
            Ok(text) => {
                for frame in decode_frames(&text) {
                    match frame {
                        Ok(frame) => self.route(frame).await,
                        Err(e) => warn!(error = %e, "dropping undecodable frame"),
                    }
                }
            }
            Err(TransportError::ConnectionClosed) | Err(TransportError::NotConnected) => {
                self.step(Event::TransportClosed {
                    reason: "connection closed by peer".into(),
                })
                .await;
            }
            Err(e) => {
                self.step(Event::TransportFailed {
                    error: e.to_string(),
                })
                .await;
            }
        }
    }

    async fn route(&mut self, frame: InboundFrame) {
        match frame {
            InboundFrame::AuthRequired { .. } => self.step(Event::AuthRequired).await,
            InboundFrame::AuthOk { ha_version } => self.step(Event::AuthOk { ha_version }).await,
            InboundFrame::AuthInvalid { message } => {
                self.step(Event::AuthInvalid {
                    message: message.unwrap_or_else(|| "invalid credentials".into()),
                })
                .await
            }
            InboundFrame::Result(result) => self.on_result(result).await,
            InboundFrame::Pong { id } => {
                self.on_result(ResultFrame {
                    id,
                    success: true,
                    result: None,
                    error: None,
                })
                .await
            }
            InboundFrame::Event(event) => self.on_event(event).await,
        }
    }

    async fn on_result(&mut self, result: ResultFrame) {
        let id = result.id;
        let success = result.success;

        if let Some(pending) = self.commands.resolve(id) {
            let outcome = result.into_outcome();
            debug!(
                id = id.value(),
                kind = %pending.kind,
                success,
                elapsed_ms = pending.issued_at.elapsed().as_millis() as u64,
                "command resolved"
            );
            match pending.responder {
                Responder::Caller {
                    reply,
                    apply_snapshot,
                } => {
                    let outcome = match outcome {
                        Ok(value) => {
                            if apply_snapshot {
                                self.apply_states(&value).await;
                            }
                            Ok(value)
                        }
                        Err(info) => Err(ClientError::Command(info)),
                    };
                    let _ = reply.send(outcome);
                }
                Responder::Internal => {
                    if let Err(info) = outcome {
                        debug!(id = id.value(), error = %info, "internal command failed");
                    }
                }
            }
            return;
        }

        match self.subscriptions.acknowledge(id, success) {
            Acknowledgement::Established => {
                let ack = self
                    .subscriptions
                    .active_mut(id)
                    .and_then(|entry| entry.sink.ack.take());
                if let Some(ack) = ack {
                    if ack.send(Ok(id)).is_err() {
                        // The caller stopped waiting, nobody owns this subscription.
                        self.unsubscribe(id).await;
                    }
                }
            }
            Acknowledgement::Failed(entry) => {
                let info = match result.into_outcome() {
                    Err(info) => info,
                    Ok(_) => ErrorInfo::new("unknown_error", "subscription refused"),
                };
                debug!(id = id.value(), error = %info, "subscription refused");
                entry.sink.reject(ClientError::Command(info));
            }
            Acknowledgement::Unknown => {
                debug!(id = id.value(), "dropping result for unknown id");
            }
        }
    }

    /// Replace the cache with the rows of a `get_states` result.
    async fn apply_states(&mut self, value: &Value) {
        let Some(rows) = value.as_array() else {
            warn!("get_states result is not an array");
            return;
        };
        let records: Vec<EntityRecord> = rows
            .iter()
            .filter_map(|row| match EntityRecord::deserialize(row) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "skipping malformed state row");
                    None
                }
            })
            .collect();
        let count = self.channels.cache.write().await.apply_snapshot(records);
        debug!(entities = count, "cache replaced from get_states");
    }

    async fn on_event(&mut self, frame: EventFrame) {
        let id = frame.id;
        let Some(entry) = self.subscriptions.active_mut(id) else {
            debug!(id = id.value(), "dropping event for inactive subscription");
            return;
        };
        entry.delivered += 1;

        let mut terminal = false;
        match &entry.sink.sink {
            Sink::Raw(tx) => {
                let _ = tx.send(Ok(frame.event));
            }
            Sink::Entities(tx) => {
                let decoded = decode_entity_diff(&frame.event);
                for issue in &decoded.issues {
                    warn!(id = id.value(), issue = %issue, "entity diff entry skipped");
                }
                let first = match &mut entry.kind {
                    SubscriptionKind::EntityFeed {
                        filtered,
                        snapshot_received,
                    } => {
                        let first = !*snapshot_received && !*filtered;
                        *snapshot_received = true;
                        first
                    }
                    _ => false,
                };
                let mut cache = self.channels.cache.write().await;
                if first {
                    // The first event of an unfiltered feed is the full set.
                    cache.apply_snapshot(std::iter::empty());
                }
                let report = cache.apply_patch(&decoded.patch);
                drop(cache);
                for entity_id in &report.unknown_changed {
                    warn!(entity_id = %entity_id, "change for entity not in cache");
                }
                let _ = tx.send(Ok(decoded.patch));
            }
            Sink::Trigger(tx) => match StateChange::from_event(&frame.event) {
                Ok(change) => {
                    let _ = tx.send(Ok(change));
                }
                Err(e) => warn!(id = id.value(), error = %e, "dropping malformed trigger event"),
            },
            Sink::TodoItems(tx) => match TodoItem::list_from_event(&frame.event) {
                Ok(items) => {
                    let _ = tx.send(Ok(items));
                }
                Err(e) => warn!(id = id.value(), error = %e, "dropping malformed to-do event"),
            },
            Sink::Pipeline(tx) => match PipelineEvent::from_event(&frame.event) {
                Ok(event) => {
                    terminal = event.is_terminal();
                    match event.failure() {
                        Some(failure) => {
                            debug!(id = id.value(), failure = %failure, "pipeline failed");
                            let _ = tx.send(Err(ClientError::Pipeline(failure)));
                        }
                        None => {
                            let _ = tx.send(Ok(event));
                        }
                    }
                }
                Err(e) => warn!(id = id.value(), error = %e, "dropping malformed pipeline event"),
            },
        }

        if terminal {
            debug!(id = id.value(), "pipeline run finished");
            self.unsubscribe(id).await;
        }
    }
}
