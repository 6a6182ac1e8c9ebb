//! Link, merge, score and dedupe commands.

use console::style;

use crate::config::{Config, Settings};
use crate::dedup::DuplicateResolver;
use crate::error::GazetteerError;
use crate::merge::MergeEngine;
use crate::models::{LinkKind, RunSummary};
use crate::quality::QualityScorer;
use crate::repository::PIPELINE_LOCK;
use crate::spatial::{LinkSummary, SpatialLinker};

use crate::cli::helpers::{open, print_summary, spinner};

fn parse_kinds(kinds: &[String]) -> anyhow::Result<Vec<LinkKind>> {
    kinds
        .iter()
        .map(|k| {
            LinkKind::from_str(k.trim()).ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown link kind '{}' (expected one of: {})",
                    k,
                    LinkKind::ALL.map(|k| k.as_str()).join(", ")
                )
            })
        })
        .collect()
}

fn print_links(summaries: &[LinkSummary]) {
    println!("{} {}", style("✓").green(), style("Linking").bold());
    for s in summaries {
        println!(
            "  {:<12} {:>9} linked, {:>9} unmatched of {}",
            s.kind.as_str(),
            s.linked,
            s.unmatched,
            s.from_rows
        );
    }
}

pub async fn cmd_link(settings: &Settings, config: &Config, kinds: &[String]) -> anyhow::Result<()> {
    let kinds = parse_kinds(kinds)?;
    let (ctx, registry) = open(settings, config).await?;
    let pb = spinner("Linking");
    let result = SpatialLinker::new(ctx, registry, config.links).run(&kinds).await;
    pb.finish_and_clear();
    print_links(&result?);
    Ok(())
}

pub async fn cmd_merge(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    let (ctx, registry) = open(settings, config).await?;
    let pb = spinner("Merging staging into master");
    let result = MergeEngine::new(ctx, registry).run().await;
    pb.finish_and_clear();
    print_summary("Merge", &result?);
    Ok(())
}

pub async fn cmd_score(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    let (ctx, _) = open(settings, config).await?;
    let pb = spinner("Scoring");
    let result = QualityScorer::new(ctx).run().await;
    pb.finish_and_clear();
    print_summary("Scoring", &result?);
    Ok(())
}

pub async fn cmd_dedupe(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    let (ctx, _) = open(settings, config).await?;
    let pb = spinner("Resolving duplicates");
    let result = DuplicateResolver::new(ctx, config.dedup).run().await;
    pb.finish_and_clear();
    print_summary("Deduplication", &result?);
    Ok(())
}

/// Link, then merge, score and dedupe under a single pipeline lock.
pub async fn cmd_run(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    let (ctx, registry) = open(settings, config).await?;

    let pb = spinner("Linking");
    let links = SpatialLinker::new(ctx.clone(), registry.clone(), config.links)
        .run(&[])
        .await;
    pb.finish_and_clear();
    print_links(&links?);

    let merge = MergeEngine::new(ctx.clone(), registry);
    let scorer = QualityScorer::new(ctx.clone());
    let resolver = DuplicateResolver::new(ctx.clone(), config.dedup);

    let pb = spinner("Merging, scoring and resolving duplicates");
    let result = ctx
        .locks()
        .hold(PIPELINE_LOCK, async {
            pb.set_message("Merging staging into master");
            let merged = merge.pass().await?;
            pb.set_message("Scoring");
            let scored = scorer.pass().await?;
            pb.set_message("Resolving duplicates");
            let deduped = resolver.pass().await?;
            Ok::<[RunSummary; 3], GazetteerError>([merged, scored, deduped])
        })
        .await;
    pb.finish_and_clear();

    let [merged, scored, deduped] = result?;
    print_summary("Merge", &merged);
    print_summary("Scoring", &scored);
    print_summary("Deduplication", &deduped);
    Ok(())
}
