mod log;
mod migrate;
mod nodes;
mod run;
mod settings;

pub use log::LogCommand;
pub use migrate::MigrateCommand;
pub use nodes::NodesCommand;
pub use run::RunCommand;
pub use settings::SettingsCommand;

use std::path::Path;

use anyhow::Result;
use clap::{Parser, Subcommand};

use webfarm_core::config::{FarmConfig, LoggingConfig};

/// Web farm node coordination.
#[derive(Parser)]
#[command(name = "webfarm")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run this machine as a web farm node.
    Run(RunCommand),

    /// Show the registered nodes.
    Nodes(NodesCommand),

    /// Show recent farm events.
    Log(LogCommand),

    /// Apply the web farm schema.
    Migrate(MigrateCommand),

    /// Show or save the farm-wide settings.
    Settings(SettingsCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run(cmd) => cmd.execute().await,
            Commands::Nodes(cmd) => cmd.execute().await,
            Commands::Log(cmd) => cmd.execute().await,
            Commands::Migrate(cmd) => cmd.execute().await,
            Commands::Settings(cmd) => cmd.execute().await,
        }
    }
}

/// Load `.env` and the configuration file.
pub(crate) fn load_config(path: &str) -> Result<FarmConfig> {
    dotenvy::dotenv().ok();

    if !Path::new(path).exists() {
        anyhow::bail!(
            "Configuration file not found: {}\nCreate one with a [database] url and a [node] key.",
            path
        );
    }

    Ok(FarmConfig::from_file(path)?)
}

/// Install the tracing subscriber. `RUST_LOG` wins over the configured level.
pub(crate) fn init_logging(config: &LoggingConfig, verbose: bool) {
    let default_level = if verbose { "debug" } else { config.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
