//! Correlation id allocation and one-shot command tracking.
//!
//! Every outbound request gets a fresh [`CommandId`]. Requests that expect
//! exactly one `result` frame are tracked here until that frame arrives or
//! the session is invalidated:
//! 1. `IdAllocator::allocate()` - pick an id not currently in use
//! 2. `CommandMultiplexer::insert()` - remember who is waiting for it
//! 3. `CommandMultiplexer::resolve()` - remove and hand back on result
//!
//! `drain()` hands back everything still waiting so the caller can fail it.

use hawrist_types::CommandId;
use std::collections::HashMap;
use std::time::Instant;

/// Error type for multiplexer operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultiplexerError {
    /// The id is already waiting for a result.
    DuplicateId {
        /// The id that was reused.
        id: CommandId,
    },
}

impl std::fmt::Display for MultiplexerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MultiplexerError::DuplicateId { id } => {
                write!(f, "command id {} is already pending", id)
            }
        }
    }
}

impl std::error::Error for MultiplexerError {}

/// Wrapping correlation id counter over `1..=max_id`.
///
/// Ids restart at 1 for every new connection, since the server requires
/// them to increase within one connection only.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    last: u64,
    max_id: u64,
}

impl IdAllocator {
    /// Create an allocator issuing ids in `1..=max_id` (`max_id` of 0 is
    /// treated as 1).
    pub fn new(max_id: u64) -> Self {
        Self {
            last: 0,
            max_id: max_id.max(1),
        }
    }

    /// Next id for which `in_use` returns false.
    ///
    /// Returns `None` only if every id in range is in use.
    pub fn allocate(&mut self, in_use: impl Fn(CommandId) -> bool) -> Option<CommandId> {
        let mut candidate = self.last;
        let mut tried: u64 = 0;
        loop {
            candidate = if candidate >= self.max_id {
                1
            } else {
                candidate + 1
            };
            let id = CommandId::new(candidate);
            if !in_use(id) {
                self.last = candidate;
                return Some(id);
            }
            tried += 1;
            if tried >= self.max_id {
                return None;
            }
        }
    }

    /// Restart numbering at 1.
    pub fn reset(&mut self) {
        self.last = 0;
    }

    /// Largest id this allocator issues.
    pub fn max_id(&self) -> u64 {
        self.max_id
    }
}

/// A one-shot request waiting for its result.
#[derive(Debug)]
pub struct PendingCommand<T> {
    /// Correlation id
    pub id: CommandId,
    /// Wire `type` of the request, for logs
    pub kind: String,
    /// When the request was handed to the transport
    pub issued_at: Instant,
    /// Whoever is waiting for the result
    pub responder: T,
}

/// Pending one-shot commands keyed by correlation id.
#[derive(Debug)]
pub struct CommandMultiplexer<T> {
    pending: HashMap<CommandId, PendingCommand<T>>,
}

impl<T> CommandMultiplexer<T> {
    /// Create an empty multiplexer.
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Start tracking a command.
    ///
    /// Fails without replacing anything if `id` is already pending; the
    /// responder is handed back in that case.
    pub fn insert(
        &mut self,
        id: CommandId,
        kind: impl Into<String>,
        responder: T,
    ) -> Result<(), (MultiplexerError, T)> {
        if self.pending.contains_key(&id) {
            return Err((MultiplexerError::DuplicateId { id }, responder));
        }
        self.pending.insert(
            id,
            PendingCommand {
                id,
                kind: kind.into(),
                issued_at: Instant::now(),
                responder,
            },
        );
        Ok(())
    }

    /// Remove and return the command for `id`.
    ///
    /// `None` means the result is stale or duplicated and should be dropped.
    pub fn resolve(&mut self, id: CommandId) -> Option<PendingCommand<T>> {
        self.pending.remove(&id)
    }

    /// Remove every pending command, oldest id first.
    pub fn drain(&mut self) -> Vec<PendingCommand<T>> {
        let mut drained: Vec<_> = self.pending.drain().map(|(_, cmd)| cmd).collect();
        drained.sort_by_key(|cmd| cmd.id);
        drained
    }

    /// Check if `id` is waiting for a result.
    pub fn contains(&self, id: CommandId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Number of pending commands.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<T> Default for CommandMultiplexer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn id(raw: u64) -> CommandId {
        CommandId::new(raw)
    }

    #[test]
    fn allocator_counts_from_one() {
        let mut ids = IdAllocator::new(100);
        assert_eq!(ids.allocate(|_| false), Some(id(1)));
        assert_eq!(ids.allocate(|_| false), Some(id(2)));
        assert_eq!(ids.allocate(|_| false), Some(id(3)));
    }

    #[test]
    fn allocator_wraps_back_to_one() {
        let mut ids = IdAllocator::new(3);
        for _ in 0..3 {
            ids.allocate(|_| false);
        }
        assert_eq!(ids.allocate(|_| false), Some(id(1)));
    }

    #[test]
    fn allocator_skips_ids_still_in_use() {
        let mut ids = IdAllocator::new(4);
        let busy: HashSet<CommandId> = [id(1), id(2)].into_iter().collect();
        for _ in 0..4 {
            ids.allocate(|_| false);
        }
        // Wrapped: 1 and 2 are still pending, so 3 is next
        assert_eq!(ids.allocate(|c| busy.contains(&c)), Some(id(3)));
    }

    #[test]
    fn allocator_exhaustion_returns_none() {
        let mut ids = IdAllocator::new(2);
        assert_eq!(ids.allocate(|_| true), None);
    }

    #[test]
    fn allocator_reset_restarts_numbering() {
        let mut ids = IdAllocator::new(100);
        ids.allocate(|_| false);
        ids.allocate(|_| false);
        ids.reset();
        assert_eq!(ids.allocate(|_| false), Some(id(1)));
    }

    #[test]
    fn zero_max_id_is_clamped() {
        let mut ids = IdAllocator::new(0);
        assert_eq!(ids.max_id(), 1);
        assert_eq!(ids.allocate(|_| false), Some(id(1)));
        assert_eq!(ids.allocate(|_| false), Some(id(1)));
    }

    #[test]
    fn resolve_removes_command() {
        let mut mux = CommandMultiplexer::new();
        mux.insert(id(1), "get_states", "caller-a").unwrap();

        let cmd = mux.resolve(id(1)).unwrap();
        assert_eq!(cmd.responder, "caller-a");
        assert_eq!(cmd.kind, "get_states");
        assert!(mux.resolve(id(1)).is_none(), "second resolve must find nothing");
    }

    #[test]
    fn unknown_result_is_ignored() {
        let mut mux: CommandMultiplexer<()> = CommandMultiplexer::new();
        assert!(mux.resolve(id(42)).is_none());
        assert!(mux.is_empty());
    }

    #[test]
    fn duplicate_insert_hands_responder_back() {
        let mut mux = CommandMultiplexer::new();
        mux.insert(id(1), "ping", 10).unwrap();

        let (err, responder) = mux.insert(id(1), "ping", 20).unwrap_err();
        assert_eq!(err, MultiplexerError::DuplicateId { id: id(1) });
        assert_eq!(responder, 20);
        assert_eq!(mux.resolve(id(1)).unwrap().responder, 10);
    }

    #[test]
    fn results_resolve_in_any_order() {
        let mut mux = CommandMultiplexer::new();
        for raw in 1..=3 {
            mux.insert(id(raw), "call_service", raw).unwrap();
        }

        assert_eq!(mux.resolve(id(3)).unwrap().responder, 3);
        assert_eq!(mux.resolve(id(1)).unwrap().responder, 1);
        assert_eq!(mux.len(), 1);
        assert!(mux.contains(id(2)));
    }

    #[test]
    fn drain_returns_everything_once() {
        let mut mux = CommandMultiplexer::new();
        for raw in [5, 2, 9] {
            mux.insert(id(raw), "get_config", raw).unwrap();
        }

        let drained: Vec<u64> = mux.drain().into_iter().map(|c| c.responder).collect();
        assert_eq!(drained, vec![2, 5, 9]);
        assert!(mux.is_empty());
        assert!(mux.drain().is_empty());
    }
}
