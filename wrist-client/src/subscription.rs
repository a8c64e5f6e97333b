//! Subscription handles.
//!
//! A [`Subscription`] owns the receiving end of one subscription's event
//! channel. Dropping it unsubscribes, so a page that lets its handle go
//! cannot leak the server-side subscription.

use hawrist_types::{CommandId, DiffPatch, PipelineEvent, StateChange, TodoItem};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::client::ClientError;
use crate::session::SessionRequest;

pub(crate) type Tx<T> = mpsc::UnboundedSender<Result<T, ClientError>>;

/// Typed sending end of a subscription, held by the session.
#[derive(Debug)]
pub(crate) enum Sink {
    Raw(Tx<Value>),
    Entities(Tx<DiffPatch>),
    Trigger(Tx<StateChange>),
    TodoItems(Tx<Vec<TodoItem>>),
    Pipeline(Tx<PipelineEvent>),
}

impl Sink {
    /// Deliver the terminal error. Consumes the sink, so the subscriber
    /// sees at most one failure and then end-of-stream.
    pub(crate) fn fail(self, error: ClientError) {
        // A closed receiver means the subscriber is already gone.
        let delivered = match self {
            Sink::Raw(tx) => tx.send(Err(error)).is_ok(),
            Sink::Entities(tx) => tx.send(Err(error)).is_ok(),
            Sink::Trigger(tx) => tx.send(Err(error)).is_ok(),
            Sink::TodoItems(tx) => tx.send(Err(error)).is_ok(),
            Sink::Pipeline(tx) => tx.send(Err(error)).is_ok(),
        };
        if !delivered {
            tracing::trace!("subscriber gone before its terminal error");
        }
    }
}

/// Lifecycle flags shared by a [`Subscription`] and its registry slot.
///
/// Ids are reused across connections, so the `Arc` itself identifies which
/// registration a handle belongs to.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    /// The session no longer tracks the subscription.
    finished: AtomicBool,
    /// Cancelled by the caller. Buffered events are discarded.
    cancelled: AtomicBool,
}

impl Lifecycle {
    pub(crate) fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.finish();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Registry payload: the sink plus the caller waiting for the server's
/// acknowledgement.
#[derive(Debug)]
pub(crate) struct SinkSlot {
    pub(crate) sink: Sink,
    pub(crate) ack: Option<oneshot::Sender<Result<CommandId, ClientError>>>,
    pub(crate) lifecycle: Arc<Lifecycle>,
}

impl SinkSlot {
    /// Whether `lifecycle` belongs to this registration.
    pub(crate) fn owned_by(&self, lifecycle: &Arc<Lifecycle>) -> bool {
        Arc::ptr_eq(&self.lifecycle, lifecycle)
    }

    /// Resolve the subscription with an error, exactly once: the pending
    /// acknowledgement if the caller is still waiting for it, otherwise the
    /// event stream.
    pub(crate) fn reject(self, error: ClientError) {
        self.lifecycle.finish();
        match self.ack {
            Some(ack) => {
                let _ = ack.send(Err(error));
            }
            None => self.sink.fail(error),
        }
    }
}

/// A live subscription delivering `T` values.
///
/// Events arrive in server order. After a terminal error (connection lost,
/// pipeline failure) or an auto-cancel, [`next`](Self::next) returns `None`.
#[derive(Debug)]
pub struct Subscription<T> {
    id: CommandId,
    events: mpsc::UnboundedReceiver<Result<T, ClientError>>,
    session: mpsc::UnboundedSender<SessionRequest>,
    lifecycle: Arc<Lifecycle>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(
        id: CommandId,
        events: mpsc::UnboundedReceiver<Result<T, ClientError>>,
        session: mpsc::UnboundedSender<SessionRequest>,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            id,
            events,
            session,
            lifecycle,
        }
    }

    /// Correlation id of this subscription.
    pub fn id(&self) -> CommandId {
        self.id
    }

    /// Wait for the next event.
    pub async fn next(&mut self) -> Option<Result<T, ClientError>> {
        if self.lifecycle.is_cancelled() {
            return None;
        }
        let event = self.events.recv().await;
        if self.lifecycle.is_cancelled() {
            return None;
        }
        event
    }

    /// Next event if one is already buffered.
    pub fn try_next(&mut self) -> Option<Result<T, ClientError>> {
        if self.lifecycle.is_cancelled() {
            return None;
        }
        self.events.try_recv().ok()
    }

    /// Cancel the subscription.
    ///
    /// Takes effect locally before this returns: no event is delivered
    /// afterwards, even one already buffered. Calling it again is a no-op.
    pub async fn cancel(&mut self) {
        if self.lifecycle.is_cancelled() {
            return;
        }
        let tracked = !self.lifecycle.is_finished();
        self.lifecycle.cancel();
        self.events.close();
        if !tracked {
            return;
        }
        let (done, confirmed) = oneshot::channel();
        if self
            .session
            .send(SessionRequest::Unsubscribe {
                id: self.id,
                owner: Some(self.lifecycle.clone()),
                done: Some(done),
            })
            .is_ok()
        {
            let _ = confirmed.await;
        }
    }

    /// Whether the subscription was cancelled, through this handle or by id.
    pub fn is_cancelled(&self) -> bool {
        self.lifecycle.is_cancelled()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if !self.lifecycle.is_finished() {
            let _ = self.session.send(SessionRequest::Unsubscribe {
                id: self.id,
                owner: Some(self.lifecycle.clone()),
                done: None,
            });
        }
    }
}
