//! Initialize and migrate commands.

use console::style;

use crate::config::{Config, Settings};
use crate::migrations::MigrationTracker;
use crate::repository::util::redact_url_password;

/// Create the data directory, apply migrations and store the registry.
pub async fn cmd_init(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    if !settings.is_postgres() {
        settings.ensure_directories()?;
    }

    let registry = config.registry()?;
    let ctx = settings.create_db_context()?;

    let applied = MigrationTracker::new(ctx.clone()).run(&registry).await?;
    for name in &applied {
        println!("  {} Applied {}", style("✓").green(), name);
    }

    let report = ctx.sources().sync(&registry, false).await?;
    for name in &report.inserted {
        println!("  {} Registered source: {}", style("✓").green(), name);
    }

    println!(
        "{} Initialized gazetteer at {}",
        style("✓").green(),
        redact_url_password(&settings.database_url)
    );
    Ok(())
}

/// Apply pending migrations, or with `check` only report them.
pub async fn cmd_migrate(settings: &Settings, config: &Config, check: bool) -> anyhow::Result<()> {
    let registry = config.registry()?;
    let ctx = settings.create_db_context()?;
    let tracker = MigrationTracker::new(ctx);

    if check {
        let pending = tracker.pending(&registry).await?;
        if pending.is_empty() {
            println!("{} Schema is up to date", style("✓").green());
            return Ok(());
        }
        println!("{} {} pending migration(s):", style("!").yellow(), pending.len());
        for name in &pending {
            println!("  {}", name);
        }
        anyhow::bail!("{} pending migration(s)", pending.len());
    }

    let applied = tracker.run(&registry).await?;
    if applied.is_empty() {
        println!("{} Nothing to migrate", style("✓").green());
    } else {
        for name in &applied {
            println!("  {} Applied {}", style("✓").green(), name);
        }
        println!("{} Applied {} migration(s)", style("✓").green(), applied.len());
    }
    Ok(())
}
