//! Talk to an assist pipeline.

use anyhow::{Context, Result};
use hawrist_client::{ClientConfig, ClientError};
use hawrist_types::{PipelineEventKind, PipelineRun};
use tracing::debug;

/// Run one text prompt through a pipeline and print the reply.
pub async fn run(
    config: ClientConfig,
    text: &str,
    pipeline: Option<&str>,
    conversation_id: Option<&str>,
) -> Result<()> {
    let mut run = PipelineRun::text(text);
    if let Some(pipeline) = pipeline {
        run = run.with_pipeline(pipeline);
    }
    if let Some(conversation_id) = conversation_id {
        run = run.with_conversation_id(conversation_id);
    }

    let client = super::connect(config).await?;
    let mut events = client
        .run_pipeline(run)
        .await
        .context("Pipeline run was refused")?;

    let mut answered = false;
    while let Some(event) = events.next().await {
        let event = match event {
            Ok(event) => event,
            Err(ClientError::Pipeline(failure)) => {
                anyhow::bail!("Assistant failed: {}", failure);
            }
            Err(e) => return Err(e.into()),
        };
        debug!(kind = %event.kind, "pipeline event");
        if event.kind == PipelineEventKind::IntentEnd {
            if let Some(output) = event.intent_output() {
                println!("{}", output.speech().unwrap_or("(no spoken reply)"));
                if let Some(id) = output.conversation_id {
                    println!("conversation: {}", id);
                }
                answered = true;
            }
        }
    }
    if !answered {
        println!("(pipeline finished without an intent result)");
    }

    client.disconnect().await?;
    Ok(())
}

/// List configured pipelines.
pub async fn list(config: ClientConfig) -> Result<()> {
    let client = super::connect(config).await?;
    let pipelines = client.list_pipelines().await?;
    let preferred = pipelines.preferred_pipeline.clone();

    for pipeline in &pipelines.pipelines {
        let marker = if preferred.as_deref() == Some(pipeline.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {}  {}  [{}]",
            marker,
            pipeline.id,
            pipeline.name,
            pipeline.language.as_deref().unwrap_or("-")
        );
    }

    client.disconnect().await?;
    Ok(())
}
