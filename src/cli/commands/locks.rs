//! Run lock commands.

use console::style;

use crate::config::{Config, Settings};

use crate::cli::helpers::open;

pub async fn cmd_lock_list(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    let (ctx, _) = open(settings, config).await?;
    let locks = ctx.locks().list().await?;

    if locks.is_empty() {
        println!("{} No locks held", style("✓").green());
        return Ok(());
    }
    println!("{:<12} {:<32} Since", "Lock", "Holder");
    println!("{}", "-".repeat(72));
    for lock in locks {
        println!("{:<12} {:<32} {}", lock.name, lock.holder, lock.acquired_at);
    }
    Ok(())
}

/// Remove a lock row regardless of who holds it.
pub async fn cmd_lock_release(settings: &Settings, config: &Config, name: &str) -> anyhow::Result<()> {
    let (ctx, _) = open(settings, config).await?;
    if ctx.locks().release(name).await? {
        println!("{} Released lock '{}'", style("✓").green(), name);
    } else {
        println!("{} Lock '{}' was not held", style("!").yellow(), name);
    }
    Ok(())
}
