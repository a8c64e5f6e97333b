//! CLI command implementations.

pub mod assist;
pub mod call;
pub mod states;
pub mod todo;
pub mod watch;

use anyhow::{Context, Result};
use hawrist_client::{ClientConfig, HaClient};
use hawrist_types::EntityId;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Connect and wait for the handshake.
pub async fn connect(config: ClientConfig) -> Result<HaClient> {
    let url = config.server.url.clone();
    let client = HaClient::websocket(config).context("Invalid server URL")?;
    client.connect()?;
    tokio::time::timeout(CONNECT_TIMEOUT, client.wait_until_ready())
        .await
        .with_context(|| format!("Timed out connecting to {}", url))??;
    Ok(client)
}

/// Parse entity ids given on the command line.
pub fn parse_entities(raw: &[String]) -> Result<Vec<EntityId>> {
    raw.iter()
        .map(|id| EntityId::parse(id).with_context(|| format!("Invalid entity id {:?}", id)))
        .collect()
}
