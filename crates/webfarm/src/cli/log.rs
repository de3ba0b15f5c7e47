use std::collections::HashMap;

use anyhow::Result;
use clap::Parser;
use console::style;

use webfarm_core::cluster::{EventLog, FarmEventType, NodeId, NodeLogEntry, NodeRegistry};
use webfarm_runtime::db::Database;
use webfarm_runtime::store::{PgEventLog, PgNodeRegistry};

use super::load_config;

/// Show recent farm events.
#[derive(Parser)]
pub struct LogCommand {
    /// Configuration file path.
    #[arg(short, long, default_value = "webfarm.toml")]
    pub config: String,

    /// Number of entries to show.
    #[arg(short, long, default_value = "20")]
    pub limit: usize,
}

impl LogCommand {
    pub async fn execute(self) -> Result<()> {
        let config = load_config(&self.config)?;

        let db = Database::from_config(&config.database).await?;
        let pool = db.primary().clone();
        let entries = PgEventLog::new(pool.clone()).recent(self.limit).await?;
        let names: HashMap<NodeId, String> = PgNodeRegistry::new(pool)
            .list_all()
            .await?
            .into_iter()
            .map(|n| (n.id, n.name))
            .collect();
        db.close().await;

        println!();
        if entries.is_empty() {
            println!("  {} No farm events recorded", style("ℹ").blue());
        }
        for entry in &entries {
            println!("  {}", format_entry(entry, &names));
        }
        println!();

        Ok(())
    }
}

fn format_entry(entry: &NodeLogEntry, names: &HashMap<NodeId, String>) -> String {
    let name = |id: NodeId| {
        names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("#{}", id))
    };

    let event = match entry.event_type {
        FarmEventType::Warning => style(entry.event_type.as_str()).yellow(),
        FarmEventType::Shutdown => style(entry.event_type.as_str()).red(),
        _ => style(entry.event_type.as_str()).green(),
    };

    let subject = name(entry.node_id);
    let writer = if entry.writer_node_id == entry.node_id {
        String::new()
    } else {
        format!(" (by {})", name(entry.writer_node_id))
    };

    format!(
        "{} {:<8} {}{} {}",
        entry.created_at.format("%Y-%m-%d %H:%M:%S"),
        event,
        subject,
        writer,
        entry.message
    )
    .trim_end()
    .to_string()
}
