//! # hawrist-core
//!
//! Pure logic for hawrist (no I/O, instant tests).
//!
//! This crate implements the session state machine and the bookkeeping
//! structures that sit behind the single WebSocket connection, without any
//! network I/O or async runtime.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects:
//! - [`SessionMachine`] turns lifecycle events into a list of [`Action`]s
//! - [`CommandMultiplexer`] and [`SubscriptionRegistry`] hold pending work
//!   keyed by correlation id
//! - [`EntityStateCache`] applies snapshots and diff patches and reports
//!   what it could not apply
//!
//! The actual I/O is performed by `hawrist-client`, which interprets the
//! actions and owns one instance of each structure on its session task.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod multiplexer;
pub mod registry;
pub mod state;

pub use cache::{EntityStateCache, PatchReport};
pub use multiplexer::{CommandMultiplexer, IdAllocator, MultiplexerError, PendingCommand};
pub use registry::{Acknowledgement, SubscriptionEntry, SubscriptionKind, SubscriptionRegistry};
pub use state::{
    Action, ConnectionState, Event, InvalidationCause, SessionErrorKind, SessionEvent,
    SessionMachine, DEFAULT_RECONNECT_INTERVAL,
};
