//! Source registry commands.

use console::style;

use crate::config::{Config, Settings};
use crate::repository::source::definition_hash;

use crate::cli::helpers::{open, truncate};

/// List registry sources in priority order.
pub async fn cmd_source_list(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    let (ctx, registry) = open(settings, config).await?;
    let repo = ctx.sources();

    println!("\n{}", style("Data Sources").bold());
    println!("{}", "-".repeat(92));
    println!(
        "{:<20} {:<12} {:<20} {:>4} {:>6} {:<16} Stored",
        "Name", "Type", "Dataset", "Prio", "Trust", "Pattern"
    );
    println!("{}", "-".repeat(92));

    for source in registry.ordered() {
        let stored = match repo.get(&source.name).await? {
            None => style("missing").yellow(),
            Some(record) if record.definition_hash == definition_hash(source) => {
                style("in sync").green()
            }
            Some(_) => style("differs").red(),
        };
        println!(
            "{:<20} {:<12} {:<20} {:>4} {:>6.2} {:<16} {}",
            truncate(&source.name, 20),
            source.source_type.as_str(),
            source.dataset.as_str(),
            source.priority,
            source.quality_score,
            truncate(&source.file_pattern, 16),
            stored
        );
    }

    Ok(())
}

/// Persist the registry.
pub async fn cmd_source_sync(settings: &Settings, config: &Config, update: bool) -> anyhow::Result<()> {
    let (ctx, registry) = open(settings, config).await?;
    let report = ctx.sources().sync(&registry, update).await?;

    for name in &report.inserted {
        println!("  {} Added {}", style("+").green(), name);
    }
    for name in &report.updated {
        println!("  {} Updated {}", style("~").yellow(), name);
    }
    println!(
        "{} {} added, {} updated, {} unchanged",
        style("✓").green(),
        report.inserted.len(),
        report.updated.len(),
        report.unchanged.len()
    );
    Ok(())
}
