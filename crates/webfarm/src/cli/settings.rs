use anyhow::Result;
use clap::Parser;
use console::style;

use webfarm_core::config::FarmSettings;
use webfarm_runtime::db::Database;
use webfarm_runtime::store::{load_farm_settings, save_farm_settings};

use super::load_config;

/// Show or save the farm-wide settings.
#[derive(Parser)]
pub struct SettingsCommand {
    /// Configuration file path.
    #[arg(short, long, default_value = "webfarm.toml")]
    pub config: String,

    /// Store the file's [farm] section as the shared settings for every node.
    #[arg(long)]
    pub save: bool,
}

impl SettingsCommand {
    pub async fn execute(self) -> Result<()> {
        let config = load_config(&self.config)?;
        let db = Database::from_config(&config.database).await?;

        let result = if self.save {
            save_farm_settings(db.primary(), &config.farm).await.map(|_| {
                println!();
                println!("  {} Saved farm settings", style("✓").green());
                print_settings(&config.farm, "shared table");
            })
        } else {
            load_farm_settings(db.primary()).await.map(|stored| {
                println!();
                match stored {
                    Some(settings) => print_settings(&settings, "shared table"),
                    None => print_settings(&config.farm, &self.config),
                }
            })
        };

        db.close().await;
        result?;
        Ok(())
    }
}

fn print_settings(settings: &FarmSettings, source: &str) {
    println!("  Source: {}", style(source).cyan());
    println!("  Enabled: {}", settings.enabled);
    println!(
        "  Polling interval: {}s to {}s",
        settings.leadership_polling_interval_lower_limit_secs,
        settings.leadership_polling_interval_upper_limit_secs
    );
    if let Err(e) = settings.validate() {
        println!("  {} {}", style("!").yellow(), e);
    }
    println!();
}
