//! Staging load command.

use std::path::Path;
use std::sync::Arc;

use console::style;

use crate::config::{Config, Settings};
use crate::staging::{LoadOptions, StagingLoader};

use crate::cli::helpers::{open, spinner};

pub async fn cmd_load(
    settings: &Settings,
    config: &Config,
    file: &Path,
    source: Option<&str>,
    options: LoadOptions,
) -> anyhow::Result<()> {
    let (ctx, registry) = open(settings, config).await?;

    let pb = spinner(format!("Loading {}", file.display()));
    let progress_pb = pb.clone();
    let loader = StagingLoader::new(ctx, registry, config.loader).with_progress(Arc::new(
        move |rows: u64| progress_pb.set_message(format!("Parsed {} rows", rows)),
    ));

    let outcome = match loader.load(file, source, options).await {
        Ok(outcome) => outcome,
        Err(e) => {
            pb.finish_and_clear();
            println!("{} Load of {} failed", style("✗").red(), file.display());
            return Err(e.into());
        }
    };
    pb.finish_and_clear();

    let report = &outcome.report;
    println!(
        "{} Batch {} ({}) is {}",
        style("✓").green(),
        style(&outcome.batch_id).cyan(),
        outcome.source_name,
        outcome.status
    );
    println!("  {:<16} {}", "Session:", outcome.session_id);
    println!("  {:<16} {}", "Rows seen:", report.rows_seen);
    println!("  {:<16} {}", "Rows loaded:", report.rows_loaded);
    if let Some(strategy) = report.strategy {
        println!("  {:<16} {}", "Strategy:", strategy.as_str());
    }
    if report.rows_skipped > 0 {
        println!("  {:<16} {}", "Skipped:", style(report.rows_skipped).yellow());
    }
    if report.rows_errored > 0 {
        println!("  {:<16} {}", "Errored:", style(report.rows_errored).red());
    }
    if report.rows_padded + report.rows_truncated > 0 {
        println!(
            "  {:<16} {} padded, {} truncated",
            "Reshaped:", report.rows_padded, report.rows_truncated
        );
    }
    if report.numeric_nulls > 0 {
        println!("  {:<16} {}", "Numeric nulls:", report.numeric_nulls);
    }
    if let Some(ref reason) = report.bulk_error {
        println!(
            "  {} Bulk insert failed, fell back to row-by-row: {}",
            style("!").yellow(),
            reason
        );
    }
    Ok(())
}
