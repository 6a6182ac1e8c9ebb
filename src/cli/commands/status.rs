//! Status command.

use console::style;

use crate::config::{Config, Settings};
use crate::repository::util::redact_url_password;

use crate::cli::helpers::open;

pub async fn cmd_status(settings: &Settings, config: &Config, json: bool) -> anyhow::Result<()> {
    let (ctx, registry) = open(settings, config).await?;
    let stats = ctx.statistics(&registry).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("\n{}", style("Gazetteer Status").bold());
    println!("{}", "-".repeat(40));
    println!("{:<22} {}", "Database:", redact_url_password(&settings.database_url));
    println!("{:<22} {}", "Sources:", registry.all().len());

    println!("\n{}", style("Batches").bold());
    if stats.batches_by_status.is_empty() {
        println!("  none");
    }
    for (status, count) in &stats.batches_by_status {
        println!("  {:<20} {}", format!("{}:", status), count);
    }

    println!("\n{}", style("Staging rows").bold());
    for (source, rows) in stats.staging_rows.iter().filter(|(_, n)| **n > 0) {
        println!("  {:<20} {}", format!("{}:", source), rows);
    }

    println!("\n{}", style("Master gazetteer").bold());
    println!("  {:<20} {}", "Active:", stats.master_active);
    println!("  {:<20} {}", "Inactive:", stats.master_total - stats.master_active);
    println!("  {:<20} {}", "Duplicate groups:", stats.duplicate_groups);
    match stats.average_score {
        Some(avg) => println!("  {:<20} {:.1}", "Average score:", avg),
        None => println!("  {:<20} -", "Average score:"),
    }

    println!("\n{}", style("Links").bold());
    for (kind, count) in &stats.links {
        println!("  {:<20} {}", format!("{}:", kind), count);
    }

    if !stats.locks.is_empty() {
        println!(
            "\n{} Locks held: {}",
            style("!").yellow(),
            stats.locks.join(", ")
        );
    }
    Ok(())
}
