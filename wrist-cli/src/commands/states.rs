//! Print entity states.

use anyhow::Result;
use hawrist_client::ClientConfig;

/// Run the states command.
pub async fn run(config: ClientConfig, domain: Option<&str>) -> Result<()> {
    let client = super::connect(config).await?;
    let count = client.refresh_states().await?;

    let entities = match domain {
        Some(domain) => client.entities_in_domain(domain).await,
        None => client.entities().await,
    };

    let width = entities
        .iter()
        .map(|e| e.entity_id.as_str().len())
        .max()
        .unwrap_or(0);
    for entity in &entities {
        println!(
            "{:width$}  {:12}  {}",
            entity.entity_id.as_str(),
            entity.state,
            entity.friendly_name(),
            width = width
        );
    }
    println!();
    println!("{} of {} entities", entities.len(), count);

    client.disconnect().await?;
    Ok(())
}
