use anyhow::Result;
use clap::Parser;
use console::style;

use webfarm_runtime::db::Database;
use webfarm_runtime::migrations::MigrationRunner;

use super::load_config;

/// Apply the web farm schema.
#[derive(Parser)]
pub struct MigrateCommand {
    /// Configuration file path.
    #[arg(short, long, default_value = "webfarm.toml")]
    pub config: String,
}

impl MigrateCommand {
    pub async fn execute(self) -> Result<()> {
        let config = load_config(&self.config)?;

        let db = Database::from_config(&config.database).await?;
        let applied = MigrationRunner::new(db.primary().clone()).run().await?;
        db.close().await;

        println!();
        if applied.is_empty() {
            println!("  {} Schema is up to date", style("ℹ").blue());
        } else {
            for name in &applied {
                println!("  {} Applied {}", style("✓").green(), style(name).cyan());
            }
        }
        println!();

        Ok(())
    }
}
