//! Shared helper functions for CLI commands.

use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::{Config, Settings};
use crate::migrations::MigrationTracker;
use crate::models::RunSummary;
use crate::registry::SourceRegistry;
use crate::repository::DbContext;

/// Open the database and check that its schema is current.
pub async fn open(settings: &Settings, config: &Config) -> anyhow::Result<(DbContext, SourceRegistry)> {
    let registry = config.registry()?;
    let ctx = settings.create_db_context()?;
    MigrationTracker::new(ctx.clone())
        .ensure_current(&registry)
        .await?;
    Ok((ctx, registry))
}

/// Spinner used while a stage runs.
pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn print_summary(stage: &str, summary: &RunSummary) {
    println!("{} {}", style("✓").green(), style(stage).bold());
    println!("  {:<12} {}", "Seen:", summary.seen);
    println!("  {:<12} {}", "Inserted:", summary.inserted);
    println!("  {:<12} {}", "Updated:", summary.updated);
    println!("  {:<12} {}", "Unchanged:", summary.unchanged);
    println!("  {:<12} {}", "Deactivated:", summary.deactivated);
    if summary.skipped > 0 {
        println!("  {:<12} {}", "Skipped:", style(summary.skipped).yellow());
    }
    if summary.errored > 0 {
        println!("  {:<12} {}", "Errored:", style(summary.errored).red());
    }
}

/// Truncate a string to at most `max` characters, marking the cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("os_open_map_local", 8), "os_open…");
        assert_eq!(truncate("ab", 0), "…");
    }
}
