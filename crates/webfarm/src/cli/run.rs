use anyhow::Result;
use clap::Parser;
use console::style;
use tracing::info;

use webfarm::Farm;

use super::{init_logging, load_config};

/// Run this machine as a web farm node.
#[derive(Parser)]
pub struct RunCommand {
    /// Configuration file path.
    #[arg(short, long, default_value = "webfarm.toml")]
    pub config: String,

    /// Node name (overrides config and the machine hostname).
    #[arg(short, long)]
    pub name: Option<String>,

    /// Skip applying the built-in schema on start.
    #[arg(long)]
    pub no_migrate: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    pub verbose: bool,
}

impl RunCommand {
    /// Execute the run command.
    pub async fn execute(self) -> Result<()> {
        let mut config = load_config(&self.config)?;
        init_logging(&config.logging, self.verbose);

        println!();
        println!(
            "  {} v{}",
            style("WEBFARM").bold().cyan(),
            env!("CARGO_PKG_VERSION")
        );
        println!();

        info!("Loaded configuration from {}", self.config);

        if let Some(name) = self.name {
            config.node.name = Some(name);
        }

        if !config.farm.enabled {
            println!(
                "  {} Web farm is disabled in {}, the node will not join the farm",
                style("!").yellow(),
                self.config
            );
        }

        let farm = Farm::builder()
            .config(config)
            .run_migrations(!self.no_migrate)
            .build()
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        farm.run().await.map_err(|e| anyhow::anyhow!("{}", e))?;

        println!("\n  {} Node stopped", style("✓").green());
        Ok(())
    }
}
