//! # hawrist
//!
//! CLI tool for exercising the hawrist Home Assistant client.
//!
//! ## Commands
//!
//! - `states`: Print cached entity states
//! - `call`: Invoke a service
//! - `toggle`: Toggle entities
//! - `watch`: Follow live entity changes
//! - `assist`: Run a text prompt through an assist pipeline
//! - `todo`: Show and edit to-do lists
//!
//! ## Example
//!
//! ```bash
//! export HASS_URL=http://homeassistant.local:8123
//! export HASS_TOKEN=eyJ...
//!
//! hawrist states --domain light
//! hawrist call light turn_on --entity light.kitchen --data '{"brightness": 128}'
//! hawrist watch light.kitchen sensor.outdoor_temp
//! hawrist assist "turn off the kitchen lights"
//! hawrist todo add todo.shopping "oat milk"
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{assist, call, states, todo, watch};

/// CLI tool for exercising the hawrist Home Assistant client.
#[derive(Parser, Debug)]
#[command(name = "hawrist")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: hawrist.toml in the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Server URL, overriding the configuration file
    #[arg(long, global = true, env = "HASS_URL")]
    url: Option<String>,

    /// Long-lived access token, overriding the configuration file
    #[arg(long, global = true, env = "HASS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Log protocol traffic
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print entity states
    States {
        /// Only entities of this domain
        #[arg(long, short)]
        domain: Option<String>,
    },

    /// Invoke a service
    Call {
        /// Service domain
        domain: String,

        /// Service name
        service: String,

        /// Target entity (repeatable)
        #[arg(long, short)]
        entity: Vec<String>,

        /// Service data as a JSON object
        #[arg(long)]
        data: Option<String>,
    },

    /// Toggle entities of any domain
    Toggle {
        /// Entities to toggle
        #[arg(required = true)]
        entities: Vec<String>,
    },

    /// Follow live entity changes until interrupted
    Watch {
        /// Entities to follow (all entities when empty)
        entities: Vec<String>,
    },

    /// Run a text prompt through an assist pipeline
    Assist {
        /// What to say
        #[arg(required_unless_present = "list")]
        text: Option<String>,

        /// Pipeline id (preferred pipeline when absent)
        #[arg(long)]
        pipeline: Option<String>,

        /// Continue an earlier conversation
        #[arg(long)]
        conversation_id: Option<String>,

        /// List pipelines instead
        #[arg(long)]
        list: bool,
    },

    /// Show and edit to-do lists
    Todo {
        #[command(subcommand)]
        action: todo::TodoAction,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = config::resolve(cli.config.as_deref(), cli.url.as_deref(), cli.token.as_deref())?;

    match cli.command {
        Commands::States { domain } => {
            states::run(config, domain.as_deref()).await?;
        }
        Commands::Call {
            domain,
            service,
            entity,
            data,
        } => {
            call::run(config, &domain, &service, &entity, data.as_deref()).await?;
        }
        Commands::Toggle { entities } => {
            call::toggle(config, &entities).await?;
        }
        Commands::Watch { entities } => {
            watch::run(config, &entities).await?;
        }
        Commands::Assist {
            text,
            pipeline,
            conversation_id,
            list,
        } => {
            if list {
                assist::list(config).await?;
            } else if let Some(text) = text {
                assist::run(config, &text, pipeline.as_deref(), conversation_id.as_deref())
                    .await?;
            } else {
                anyhow::bail!("Must specify text or --list");
            }
        }
        Commands::Todo { action } => {
            todo::run(config, action).await?;
        }
    }

    Ok(())
}

/// Logging goes to stderr so command output stays pipeable. `RUST_LOG`
/// wins over `--verbose`.
fn setup_logging(verbose: bool) {
    let default = if verbose {
        "hawrist_client=debug,info"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
