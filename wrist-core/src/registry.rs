//! Long-lived subscriptions keyed by correlation id.
//!
//! A subscribing request is acknowledged by one `result` frame and then
//! delivers zero or more `event` frames under the same id until it is
//! cancelled. Cancellation removes the entry immediately, so a late event
//! for that id finds nothing to dispatch to.

use hawrist_types::{CommandId, Request};
use std::collections::HashMap;

use crate::multiplexer::MultiplexerError;

/// What a subscription delivers, which decides how its events are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    /// `subscribe_entities` diff feed
    EntityFeed {
        /// An explicit entity id list was given
        filtered: bool,
        /// The initial full set has been applied
        snapshot_received: bool,
    },
    /// `subscribe_trigger` state changes
    Trigger,
    /// `todo/item/subscribe` item sets
    TodoItems,
    /// `assist_pipeline/run` event sequence (self-terminating)
    Pipeline,
    /// Anything else, delivered as raw JSON
    Raw,
}

impl SubscriptionKind {
    /// A fresh entity feed.
    pub fn entity_feed(filtered: bool) -> Self {
        Self::EntityFeed {
            filtered,
            snapshot_received: false,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::EntityFeed { .. } => "entity_feed",
            Self::Trigger => "trigger",
            Self::TodoItems => "todo_items",
            Self::Pipeline => "pipeline",
            Self::Raw => "raw",
        }
    }
}

/// One registered subscription.
#[derive(Debug)]
pub struct SubscriptionEntry<S> {
    /// Correlation id (also the id used to unsubscribe)
    pub id: CommandId,
    /// Delivery kind
    pub kind: SubscriptionKind,
    /// The request that created it
    pub request: Request,
    /// Where events go
    pub sink: S,
    /// The server confirmed the subscription
    pub acknowledged: bool,
    /// Events dispatched so far
    pub delivered: u64,
}

/// Outcome of routing a `result` frame to the registry.
#[derive(Debug)]
pub enum Acknowledgement<S> {
    /// Subscription is now established
    Established,
    /// Server refused it; the entry was removed and is handed back
    Failed(SubscriptionEntry<S>),
    /// No subscription with that id
    Unknown,
}

/// Active subscriptions keyed by correlation id.
#[derive(Debug)]
pub struct SubscriptionRegistry<S> {
    entries: HashMap<CommandId, SubscriptionEntry<S>>,
}

impl<S> SubscriptionRegistry<S> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a subscription whose request has been (or is about to be)
    /// sent with `id`.
    pub fn register(
        &mut self,
        id: CommandId,
        kind: SubscriptionKind,
        request: Request,
        sink: S,
    ) -> Result<(), (MultiplexerError, S)> {
        if self.entries.contains_key(&id) {
            return Err((MultiplexerError::DuplicateId { id }, sink));
        }
        self.entries.insert(
            id,
            SubscriptionEntry {
                id,
                kind,
                request,
                sink,
                acknowledged: false,
                delivered: 0,
            },
        );
        Ok(())
    }

    /// Route the `result` frame of a subscribing request.
    pub fn acknowledge(&mut self, id: CommandId, success: bool) -> Acknowledgement<S> {
        if success {
            match self.entries.get_mut(&id) {
                Some(entry) => {
                    entry.acknowledged = true;
                    Acknowledgement::Established
                }
                None => Acknowledgement::Unknown,
            }
        } else {
            match self.entries.remove(&id) {
                Some(entry) => Acknowledgement::Failed(entry),
                None => Acknowledgement::Unknown,
            }
        }
    }

    /// The subscription for `id`, if it has not been cancelled.
    pub fn active(&self, id: CommandId) -> Option<&SubscriptionEntry<S>> {
        self.entries.get(&id)
    }

    /// Mutable access to an active subscription.
    pub fn active_mut(&mut self, id: CommandId) -> Option<&mut SubscriptionEntry<S>> {
        self.entries.get_mut(&id)
    }

    /// Cancel locally.
    ///
    /// Returns the removed entry the first time, `None` afterwards.
    pub fn cancel(&mut self, id: CommandId) -> Option<SubscriptionEntry<S>> {
        self.entries.remove(&id)
    }

    /// Remove every subscription, oldest id first.
    pub fn drain(&mut self) -> Vec<SubscriptionEntry<S>> {
        let mut drained: Vec<_> = self.entries.drain().map(|(_, entry)| entry).collect();
        drained.sort_by_key(|entry| entry.id);
        drained
    }

    /// Check if `id` is registered.
    pub fn contains(&self, id: CommandId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Ids of every registered subscription, ascending.
    pub fn ids(&self) -> Vec<CommandId> {
        let mut ids: Vec<_> = self.entries.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Number of registered subscriptions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S> Default for SubscriptionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hawrist_types::EntityId;

    fn id(raw: u64) -> CommandId {
        CommandId::new(raw)
    }

    fn trigger_request() -> Request {
        Request::state_trigger(&[EntityId::parse("light.kitchen").unwrap()])
    }

    fn registry_with(raw: u64, kind: SubscriptionKind) -> SubscriptionRegistry<&'static str> {
        let mut registry = SubscriptionRegistry::new();
        registry
            .register(id(raw), kind, trigger_request(), "page")
            .unwrap();
        registry
    }

    #[test]
    fn registered_subscription_is_active_before_ack() {
        let registry = registry_with(1, SubscriptionKind::Trigger);
        let entry = registry.active(id(1)).unwrap();
        assert!(!entry.acknowledged);
        assert_eq!(entry.kind, SubscriptionKind::Trigger);
    }

    #[test]
    fn successful_ack_keeps_entry() {
        let mut registry = registry_with(1, SubscriptionKind::Trigger);
        assert!(matches!(
            registry.acknowledge(id(1), true),
            Acknowledgement::Established
        ));
        assert!(registry.active(id(1)).unwrap().acknowledged);
    }

    #[test]
    fn failed_ack_removes_and_returns_entry() {
        let mut registry = registry_with(1, SubscriptionKind::Trigger);
        match registry.acknowledge(id(1), false) {
            Acknowledgement::Failed(entry) => assert_eq!(entry.sink, "page"),
            other => panic!("expected Failed, got {:?}", other),
        }
        assert!(registry.active(id(1)).is_none());
    }

    #[test]
    fn ack_for_unknown_id() {
        let mut registry: SubscriptionRegistry<()> = SubscriptionRegistry::new();
        assert!(matches!(
            registry.acknowledge(id(9), true),
            Acknowledgement::Unknown
        ));
        assert!(matches!(
            registry.acknowledge(id(9), false),
            Acknowledgement::Unknown
        ));
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut registry = registry_with(3, SubscriptionKind::Raw);
        assert!(registry.cancel(id(3)).is_some());
        assert!(registry.cancel(id(3)).is_none());
        assert!(registry.active(id(3)).is_none());
    }

    #[test]
    fn cancelled_subscription_drops_later_ack() {
        let mut registry = registry_with(3, SubscriptionKind::Pipeline);
        registry.cancel(id(3));
        assert!(matches!(
            registry.acknowledge(id(3), true),
            Acknowledgement::Unknown
        ));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = registry_with(1, SubscriptionKind::Trigger);
        let (err, sink) = registry
            .register(id(1), SubscriptionKind::Raw, Request::Ping, "other")
            .unwrap_err();
        assert_eq!(err, MultiplexerError::DuplicateId { id: id(1) });
        assert_eq!(sink, "other");
        assert_eq!(registry.active(id(1)).unwrap().sink, "page");
    }

    #[test]
    fn entity_feed_snapshot_flag_is_mutable() {
        let mut registry = registry_with(2, SubscriptionKind::entity_feed(false));
        if let Some(entry) = registry.active_mut(id(2)) {
            entry.kind = SubscriptionKind::EntityFeed {
                filtered: false,
                snapshot_received: true,
            };
            entry.delivered += 1;
        }
        let entry = registry.active(id(2)).unwrap();
        assert!(matches!(
            entry.kind,
            SubscriptionKind::EntityFeed {
                snapshot_received: true,
                ..
            }
        ));
        assert_eq!(entry.delivered, 1);
    }

    #[test]
    fn drain_empties_in_id_order() {
        let mut registry = SubscriptionRegistry::new();
        for raw in [7, 3, 5] {
            registry
                .register(id(raw), SubscriptionKind::Raw, Request::Ping, raw)
                .unwrap();
        }
        assert_eq!(registry.ids(), vec![id(3), id(5), id(7)]);

        let drained: Vec<u64> = registry.drain().into_iter().map(|e| e.sink).collect();
        assert_eq!(drained, vec![3, 5, 7]);
        assert!(registry.is_empty());
    }

    #[test]
    fn kind_names() {
        assert_eq!(SubscriptionKind::entity_feed(true).name(), "entity_feed");
        assert_eq!(SubscriptionKind::TodoItems.name(), "todo_items");
    }
}
