//! Follow live entity changes.

use anyhow::Result;
use hawrist_client::{ClientConfig, ClientError, HaClient};
use hawrist_types::{DiffPatch, EntityId};
use tracing::{info, warn};

use super::parse_entities;

/// Run the watch command until Ctrl-C.
pub async fn run(config: ClientConfig, entities: &[String]) -> Result<()> {
    let filter = parse_entities(entities)?;
    let filter = if filter.is_empty() { None } else { Some(filter) };
    let client = super::connect(config).await?;

    tokio::select! {
        result = follow(&client, filter) => result?,
        _ = tokio::signal::ctrl_c() => {}
    }

    client.disconnect().await?;
    Ok(())
}

/// Subscriptions do not survive a reconnect, so subscribe again after
/// every lost connection.
async fn follow(client: &HaClient, filter: Option<Vec<EntityId>>) -> Result<()> {
    let mut first = true;
    loop {
        client.wait_until_ready().await?;
        let mut feed = match client.subscribe_entities(filter.clone()).await {
            Ok(feed) => feed,
            Err(ClientError::ConnectionLost) => continue,
            Err(e) => return Err(e.into()),
        };
        if !first {
            info!("resubscribed after reconnect");
        }
        first = false;

        while let Some(patch) = feed.next().await {
            match patch {
                Ok(patch) => print_patch(client, &patch).await,
                Err(ClientError::ConnectionLost) => {
                    warn!("connection lost, waiting for reconnect");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

async fn print_patch(client: &HaClient, patch: &DiffPatch) {
    for record in patch.added() {
        println!("+ {}  {}", record.entity_id, record.state);
    }
    for (entity_id, delta) in patch.changed() {
        if delta.state.is_none()
            && delta.attributes.is_none()
            && delta.removed_attributes.is_empty()
        {
            continue;
        }
        let state = client
            .entity(entity_id.as_str())
            .await
            .map(|record| record.state)
            .unwrap_or_else(|| "?".to_string());
        println!("~ {}  {}", entity_id, state);
    }
    for entity_id in patch.removed() {
        println!("- {}", entity_id);
    }
}
