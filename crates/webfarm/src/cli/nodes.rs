use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use console::style;

use webfarm_core::cluster::{FarmSummary, NodeRecord, NodeRegistry};
use webfarm_runtime::db::Database;
use webfarm_runtime::store::PgNodeRegistry;

use super::load_config;

/// Show the registered nodes.
#[derive(Parser)]
pub struct NodesCommand {
    /// Configuration file path.
    #[arg(short, long, default_value = "webfarm.toml")]
    pub config: String,
}

impl NodesCommand {
    pub async fn execute(self) -> Result<()> {
        let config = load_config(&self.config)?;

        let db = Database::from_config(&config.database).await?;
        let nodes = PgNodeRegistry::new(db.primary().clone()).list_all().await?;
        db.close().await;

        let summary = FarmSummary::from_nodes(&nodes);

        println!();
        println!(
            "  {} nodes, {} active, {} inactive",
            summary.total,
            style(summary.active).green(),
            style(summary.inactive).red()
        );
        println!(
            "  Leader: {}",
            summary
                .leader
                .as_deref()
                .map(|l| style(l).cyan().to_string())
                .unwrap_or_else(|| style("none").dim().to_string())
        );
        if !summary.job_runners.is_empty() {
            println!("  Job runners: {}", summary.job_runners.join(", "));
        }
        println!();

        for node in &nodes {
            println!("  {}", format_node(node));
        }
        if !nodes.is_empty() {
            println!();
        }

        Ok(())
    }
}

fn format_node(node: &NodeRecord) -> String {
    let status = if node.is_active {
        style("active  ").green()
    } else {
        style("inactive").red()
    };

    let mut flags = Vec::new();
    if node.is_leader {
        flags.push("leader");
    }
    if node.is_current_job_runner {
        flags.push("jobs");
    }

    let interval = node
        .current_polling_interval
        .map(|i| format!("{}s", i))
        .unwrap_or_else(|| "-".to_string());
    let seen = (Utc::now() - node.last_seen_at).num_seconds().max(0);

    format!(
        "{:<24} {} every {:>6}  seen {:>5}s ago  {}",
        node.name,
        status,
        interval,
        seen,
        flags.join(" ")
    )
}
