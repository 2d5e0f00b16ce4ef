//! resauth - OAuth resource authorization engine
//!
#![doc = "resauth - OAuth resource authorization engine"]
#![doc = "Main entry point for the resauth server and management CLI."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use resauth::cli::{Cli, Commands, ProfileCommand};
use resauth::commands;
use resauth::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    init_tracing();

    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Serve => {
            tracing::info!("Starting authorization engine server");
            commands::serve::run(config).await?;
            Ok(())
        }
        Commands::List { user, kind } => {
            commands::credentials::list(config, user, kind).await?;
            Ok(())
        }
        Commands::Remove {
            url,
            kind,
            user,
            profile,
        } => {
            commands::credentials::remove(config, url, kind, user, profile).await?;
            Ok(())
        }
        Commands::Profiles { command } => match command {
            ProfileCommand::List { user } => {
                commands::profiles::list(config, user).await?;
                Ok(())
            }
            ProfileCommand::Add { name, user } => {
                commands::profiles::add(config, name, user).await?;
                Ok(())
            }
        },
    }
}

/// Initialize tracing subscriber with environment filter
fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("resauth=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
