//! Invoke services.

use anyhow::{Context, Result};
use hawrist_client::ClientConfig;
use hawrist_types::Target;
use serde_json::Value;

use super::parse_entities;

/// Run the call command.
pub async fn run(
    config: ClientConfig,
    domain: &str,
    service: &str,
    entities: &[String],
    data: Option<&str>,
) -> Result<()> {
    let target = match parse_entities(entities)? {
        ids if ids.is_empty() => None,
        ids => Some(Target::entities(ids)),
    };
    let data = data
        .map(|raw| serde_json::from_str::<Value>(raw).context("--data is not valid JSON"))
        .transpose()?;
    if let Some(data) = &data {
        if !data.is_object() {
            anyhow::bail!("--data must be a JSON object");
        }
    }

    let client = super::connect(config).await?;
    let result = client
        .call_service(domain, service, data, target)
        .await
        .with_context(|| format!("{}.{} failed", domain, service))?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    client.disconnect().await?;
    Ok(())
}

/// Run the toggle command.
pub async fn toggle(config: ClientConfig, entities: &[String]) -> Result<()> {
    let ids = parse_entities(entities)?;
    let client = super::connect(config).await?;
    client.toggle(&ids).await.context("Toggle failed")?;
    println!("Toggled {} entities", ids.len());

    client.disconnect().await?;
    Ok(())
}
