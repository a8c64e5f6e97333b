//! Session state machine for hawrist.
//!
//! This module provides a pure, side-effect-free state machine for the
//! connection lifecycle: connecting, authenticating, ready, closing. The
//! state machine takes events as input and produces a new state plus a list
//! of actions to execute.
//!
//! The actual I/O (opening the socket, sending the auth message, running the
//! reconnect timer) is performed by hawrist-client, not by this module.

use std::time::Duration;

/// Reconnect interval used when none is configured.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(2500);

/// Connection state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport.
    Disconnected {
        /// A reconnect timer is running.
        retry_scheduled: bool,
    },
    /// Transport connection attempt in progress.
    Connecting,
    /// Transport open, waiting for the auth handshake to finish.
    AwaitingAuth,
    /// Authenticated; requests may be sent.
    Ready,
    /// Transport teardown requested, waiting for it to finish.
    Closing {
        /// The close was requested by the caller (no reconnect afterwards).
        expected: bool,
    },
}

impl ConnectionState {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::Disconnected {
            retry_scheduled: false,
        }
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function. `reconnect_interval` is the delay attached
    /// to any [`Action::ScheduleReconnect`] it returns.
    pub fn on_event(self, event: Event, reconnect_interval: Duration) -> (Self, Vec<Action>) {
        match (self, event) {
            // From Disconnected
            (Self::Disconnected { retry_scheduled }, Event::ConnectRequested) => {
                let mut actions = Vec::with_capacity(2);
                if retry_scheduled {
                    actions.push(Action::CancelReconnect);
                }
                actions.push(Action::OpenTransport);
                (Self::Connecting, actions)
            }
            (
                Self::Disconnected {
                    retry_scheduled: true,
                },
                Event::ReconnectTimer,
            ) => (Self::Connecting, vec![Action::OpenTransport]),
            (
                Self::Disconnected {
                    retry_scheduled: true,
                },
                Event::DisconnectRequested,
            ) => (
                Self::Disconnected {
                    retry_scheduled: false,
                },
                vec![Action::CancelReconnect],
            ),

            // From Connecting
            (Self::Connecting, Event::TransportOpened) => {
                (Self::AwaitingAuth, vec![Action::Emit(SessionEvent::Open)])
            }
            (Self::Connecting, Event::TransportFailed { error }) => (
                Self::Disconnected {
                    retry_scheduled: true,
                },
                vec![
                    Action::Emit(SessionEvent::Error {
                        kind: SessionErrorKind::Transport,
                        message: error,
                    }),
                    Action::ScheduleReconnect {
                        delay: reconnect_interval,
                    },
                ],
            ),
            (Self::Connecting, Event::DisconnectRequested) => {
                (Self::Closing { expected: true }, vec![])
            }

            // From AwaitingAuth
            (Self::AwaitingAuth, Event::AuthRequired) => {
                (Self::AwaitingAuth, vec![Action::SendAuth])
            }
            (Self::AwaitingAuth, Event::AuthOk { ha_version }) => (
                Self::Ready,
                vec![Action::Emit(SessionEvent::AuthOk { ha_version })],
            ),
            (Self::AwaitingAuth, Event::AuthInvalid { message }) => (
                Self::Closing { expected: false },
                vec![
                    Action::Emit(SessionEvent::Error {
                        kind: SessionErrorKind::Auth,
                        message,
                    }),
                    Action::CloseTransport,
                ],
            ),

            // From AwaitingAuth or Ready
            (Self::AwaitingAuth | Self::Ready, Event::TransportClosed { .. }) => {
                closed(false, reconnect_interval)
            }
            (Self::AwaitingAuth | Self::Ready, Event::TransportFailed { error }) => {
                let (state, mut actions) = closed(false, reconnect_interval);
                actions.insert(
                    0,
                    Action::Emit(SessionEvent::Error {
                        kind: SessionErrorKind::Transport,
                        message: error,
                    }),
                );
                (state, actions)
            }
            (Self::AwaitingAuth | Self::Ready, Event::DisconnectRequested) => {
                (Self::Closing { expected: true }, vec![Action::CloseTransport])
            }

            // From Closing
            (Self::Closing { expected }, Event::TransportOpened) => {
                (Self::Closing { expected }, vec![Action::CloseTransport])
            }
            (
                Self::Closing { expected },
                Event::TransportClosed { .. } | Event::TransportFailed { .. },
            ) => closed(expected, reconnect_interval),
            (Self::Closing { .. }, Event::DisconnectRequested) => {
                (Self::Closing { expected: true }, vec![])
            }

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if requests may be sent.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if a connection attempt or handshake is in progress.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting | Self::AwaitingAuth)
    }

    /// Short lowercase name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected { .. } => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingAuth => "awaiting_auth",
            Self::Ready => "ready",
            Self::Closing { .. } => "closing",
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport is gone: invalidate pending work, drop the cache, and
/// reconnect unless the caller asked for the close.
fn closed(expected: bool, reconnect_interval: Duration) -> (ConnectionState, Vec<Action>) {
    if expected {
        (
            ConnectionState::Disconnected {
                retry_scheduled: false,
            },
            vec![
                Action::Invalidate(InvalidationCause::Disconnected),
                Action::ClearCache,
                Action::Emit(SessionEvent::Close { expected: true }),
            ],
        )
    } else {
        (
            ConnectionState::Disconnected {
                retry_scheduled: true,
            },
            vec![
                Action::Invalidate(InvalidationCause::ConnectionLost),
                Action::ClearCache,
                Action::Emit(SessionEvent::Close { expected: false }),
                Action::ScheduleReconnect {
                    delay: reconnect_interval,
                },
            ],
        )
    }
}

/// Events that can occur in the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Caller requested a connection.
    ConnectRequested,
    /// Transport connection succeeded.
    TransportOpened,
    /// Transport connection failed or errored mid-session.
    TransportFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Server sent `auth_required`.
    AuthRequired,
    /// Server sent `auth_ok`.
    AuthOk {
        /// Server version, if reported.
        ha_version: Option<String>,
    },
    /// Server sent `auth_invalid`.
    AuthInvalid {
        /// Rejection reason.
        message: String,
    },
    /// Transport closed (by the peer or after a local close).
    TransportClosed {
        /// Reason for the close.
        reason: String,
    },
    /// Caller requested a disconnect.
    DisconnectRequested,
    /// Reconnect timer fired.
    ReconnectTimer,
}

/// Why pending commands and subscriptions are being failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationCause {
    /// The connection dropped or was rejected.
    ConnectionLost,
    /// The caller disconnected.
    Disconnected,
}

/// Actions to be executed by the session runtime.
///
/// These are instructions, not side effects. The runtime performs them in
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open the transport.
    OpenTransport,
    /// Send the auth message.
    SendAuth,
    /// Close the transport.
    CloseTransport,
    /// Fail every pending command and subscription exactly once.
    Invalidate(InvalidationCause),
    /// Empty the entity cache.
    ClearCache,
    /// Start the reconnect timer.
    ScheduleReconnect {
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// Cancel any pending reconnect timer.
    CancelReconnect,
    /// Publish a lifecycle notification.
    Emit(SessionEvent),
}

/// Lifecycle notifications published to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Transport established, auth not yet attempted.
    Open,
    /// Handshake succeeded; safe to issue requests.
    AuthOk {
        /// Server version, if reported.
        ha_version: Option<String>,
    },
    /// Transport or auth failure.
    Error {
        /// Which layer failed.
        kind: SessionErrorKind,
        /// Failure description.
        message: String,
    },
    /// Connection ended, regardless of cause.
    Close {
        /// The caller asked for it.
        expected: bool,
    },
}

/// Layer a [`SessionEvent::Error`] comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorKind {
    /// Connect failed or the socket errored.
    Transport,
    /// Credentials rejected.
    Auth,
}

/// [`ConnectionState`] plus the reconnect policy it is driven with.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: ConnectionState,
    reconnect_interval: Duration,
}

impl SessionMachine {
    /// Create a machine in the Disconnected state.
    pub fn new(reconnect_interval: Duration) -> Self {
        Self {
            state: ConnectionState::new(),
            reconnect_interval,
        }
    }

    /// Feed an event, returning the actions to perform.
    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        let state = std::mem::take(&mut self.state);
        let (next, actions) = state.on_event(event, self.reconnect_interval);
        self.state = next;
        actions
    }

    /// Current state.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Check if requests may be sent.
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// Configured reconnect interval.
    pub fn reconnect_interval(&self) -> Duration {
        self.reconnect_interval
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_INTERVAL)
    }
}
