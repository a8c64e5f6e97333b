//! # hawrist-client
//!
//! Realtime client for the Home Assistant WebSocket API.
//!
//! This is the library applications use to talk to a server.
//!
//! ## Features
//!
//! - **One multiplexed session**: concurrent commands over a single socket,
//!   each resolved exactly once by correlation id
//! - **Live entity cache**: kept in sync from `get_states` and the
//!   compressed `subscribe_entities` diff feed
//! - **Subscriptions**: triggers, to-do lists, raw events and assist
//!   pipeline runs, cancelled on drop
//! - **Automatic reconnect**: pending work fails fast, the cache is
//!   cleared, and the session re-authenticates after a fixed delay
//! - **Transport Abstraction**: Pluggable transport layer (WebSocket, mock)
//!
//! ## Example
//!
//! ```ignore
//! use hawrist_client::{ClientConfig, HaClient};
//!
//! let config = ClientConfig::from_file("hawrist.toml".as_ref())?;
//! let client = HaClient::websocket(config)?;
//! client.connect()?;
//! client.wait_until_ready().await?;
//!
//! let mut feed = client.subscribe_entities(None).await?;
//! while let Some(patch) = feed.next().await {
//!     println!("{} entities changed", patch?.len());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
mod session;
pub mod subscription;
pub mod transport;

pub use client::{ClientError, HaClient};
pub use config::{AccessToken, ClientConfig, ConfigError, ServerConfig, SessionConfig};
pub use subscription::Subscription;
pub use transport::{websocket_url, MockTransport, Transport, TransportError, WebSocketTransport};

pub use hawrist_core::{ConnectionState, SessionErrorKind, SessionEvent};
