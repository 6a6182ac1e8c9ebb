//! Staging batch commands.

use chrono::{Duration, Utc};
use console::style;

use crate::config::{Config, Settings};
use crate::models::{Batch, BatchStatus};
use crate::registry::SourceRegistry;
use crate::repository::{BatchFilter, DbContext};

use crate::cli::helpers::{open, truncate};

pub async fn cmd_batch_list(
    settings: &Settings,
    config: &Config,
    source: Option<String>,
    status: Option<&str>,
    limit: i64,
) -> anyhow::Result<()> {
    let status = match status {
        Some(s) => Some(
            BatchStatus::from_str(s).ok_or_else(|| anyhow::anyhow!("Unknown batch status '{}'", s))?,
        ),
        None => None,
    };
    let (ctx, _) = open(settings, config).await?;
    let batches = ctx
        .batches()
        .list(&BatchFilter {
            source_name: source,
            status,
            limit: Some(limit),
        })
        .await?;

    if batches.is_empty() {
        println!("{} No batches found", style("!").yellow());
        return Ok(());
    }

    println!(
        "{:<38} {:<18} {:<9} {:>10} {:<20} File",
        "Batch", "Source", "Status", "Rows", "Created"
    );
    println!("{}", "-".repeat(110));
    for batch in batches {
        println!(
            "{:<38} {:<18} {:<9} {:>10} {:<20} {}",
            truncate(batch.batch_id(), 38),
            truncate(&batch.lineage.source_name, 18),
            status_style(batch.status),
            batch.counts.loaded,
            batch.created_at.format("%Y-%m-%d %H:%M:%S"),
            batch.lineage.source_file
        );
    }
    Ok(())
}

pub async fn cmd_batch_show(settings: &Settings, config: &Config, batch_id: &str) -> anyhow::Result<()> {
    let (ctx, _) = open(settings, config).await?;
    let Some(batch) = ctx.batches().get(batch_id).await? else {
        anyhow::bail!("Batch not found: {}", batch_id);
    };

    let l = &batch.lineage;
    println!("\n{} {}", style("Batch").bold(), style(&l.batch_id).cyan());
    println!("{}", "-".repeat(60));
    println!("{:<18} {}", "Status:", status_style(batch.status));
    println!("{:<18} {}", "Source:", l.source_name);
    println!("{:<18} {}", "File:", l.source_file);
    println!("{:<18} {} bytes", "Size:", l.file_size);
    if let Some(ref modified) = l.file_modified {
        println!("{:<18} {}", "Modified:", modified);
    }
    println!("{:<18} {}", "Client:", l.client_name);
    println!("{:<18} {}", "Uploaded by:", l.upload_user);
    println!("{:<18} {}", "Uploaded at:", l.upload_timestamp);
    println!("{:<18} {}", "Session:", l.session_id);
    println!(
        "{:<18} seen {}, loaded {}, skipped {}, errored {}",
        "Rows:", batch.counts.seen, batch.counts.loaded, batch.counts.skipped, batch.counts.errored
    );
    if let Some(strategy) = batch.load_strategy {
        println!("{:<18} {}", "Strategy:", strategy.as_str());
    }
    if let Some(ref report) = batch.verification {
        println!(
            "{:<18} {} rows, {} null keys, {} duplicate keys",
            "Verification:", report.total_rows, report.null_keys, report.duplicate_keys
        );
        if let Some(bbox) = report.bbox {
            println!(
                "{:<18} ({:.0}, {:.0}) .. ({:.0}, {:.0})",
                "Extent:", bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y
            );
        }
        if let Some(ref failure) = report.failure {
            println!("{:<18} {}", "Failure:", style(failure).red());
        }
    }
    if let Some(ref error) = batch.error {
        println!("{:<18} {}", "Error:", style(error).red());
    }
    Ok(())
}

/// Delete batches and their staging rows.
///
/// Without explicit ids, the purgeable set is failed batches plus
/// received/loaded ones idle for `older_than_hours`. Explicit ids of
/// visible batches need `force`; the next merge then retracts their rows.
pub async fn cmd_batch_purge(
    settings: &Settings,
    config: &Config,
    batch_ids: &[String],
    older_than_hours: i64,
    force: bool,
    dry_run: bool,
) -> anyhow::Result<()> {
    let (ctx, registry) = open(settings, config).await?;
    let repo = ctx.batches();

    let targets: Vec<Batch> = if batch_ids.is_empty() {
        let stale_before = (Utc::now() - Duration::hours(older_than_hours)).to_rfc3339();
        repo.purgeable(&stale_before).await?
    } else {
        let mut found = Vec::new();
        for id in batch_ids {
            let Some(batch) = repo.get(id).await? else {
                anyhow::bail!("Batch not found: {}", id);
            };
            if batch.status.is_visible() && !force {
                anyhow::bail!(
                    "Batch {} is {}; pass --force to purge a visible batch",
                    id,
                    batch.status
                );
            }
            found.push(batch);
        }
        found
    };

    if targets.is_empty() {
        println!("{} Nothing to purge", style("✓").green());
        return Ok(());
    }

    for batch in &targets {
        if dry_run {
            println!(
                "  would purge {} ({}, {})",
                batch.batch_id(),
                batch.lineage.source_name,
                batch.status
            );
            continue;
        }
        let rows = purge_one(&ctx, &registry, batch).await?;
        println!(
            "  {} Purged {} ({} staging rows)",
            style("✓").green(),
            batch.batch_id(),
            rows
        );
    }

    if !dry_run {
        println!("{} Purged {} batch(es)", style("✓").green(), targets.len());
    }
    Ok(())
}

async fn purge_one(ctx: &DbContext, registry: &SourceRegistry, batch: &Batch) -> anyhow::Result<usize> {
    let rows = match registry.get(&batch.lineage.source_name) {
        Some(source) => {
            ctx.staging()
                .delete_batch(&source.staging_table(), batch.batch_id())
                .await?
        }
        None => {
            tracing::warn!(
                "Source '{}' of batch {} is no longer registered; removing the batch record only",
                batch.lineage.source_name,
                batch.batch_id()
            );
            0
        }
    };
    ctx.batches().delete(batch.batch_id()).await?;
    Ok(rows)
}

fn status_style(status: BatchStatus) -> console::StyledObject<&'static str> {
    let s = status.as_str();
    match status {
        BatchStatus::Verified | BatchStatus::Merged => style(s).green(),
        BatchStatus::Failed => style(s).red(),
        BatchStatus::Received | BatchStatus::Loaded => style(s).yellow(),
    }
}
