//! Merge engine: recomputes the master gazetteer from visible staging rows.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info};

use super::enrich::{enrich, EnrichStats, EnrichmentData};
use super::fields::map_row;
use crate::error::Result;
use crate::models::{DataSource, MasterFields, MasterKey, MergedRecord, RunSummary};
use crate::quality;
use crate::registry::SourceRegistry;
use crate::repository::{
    DbContext, MasterChanges, MasterIndexEntry, MasterInsert, StagedRow, PIPELINE_LOCK,
};
use crate::staging::schema_for;

/// Master state derived from staging, before it is compared with the table.
#[derive(Debug, Clone, Default)]
pub struct MergePlan {
    pub records: BTreeMap<String, MergedRecord>,
    /// Visible batches that were read.
    pub batch_ids: BTreeSet<String>,
    pub summary: RunSummary,
    pub enrichment: EnrichStats,
}

/// Address-registry identifiers learned from rows that carry both a UPRN
/// and a rates or valuation reference.
///
/// Rows that only know their BA reference (or UARN) are keyed onto the UPRN
/// another direct row tied that reference to, so one property yields one
/// master record however its sources identify it.
#[derive(Debug, Clone, Default)]
pub struct KeyAliases {
    ba_reference: HashMap<String, String>,
    uarn: HashMap<String, String>,
}

impl KeyAliases {
    /// Collect aliases from direct sources given most authoritative first.
    ///
    /// The first source that links a reference decides it; within a source
    /// the latest linking row (upload time, then staging id) does.
    pub fn collect<'a, I>(sources: I) -> Self
    where
        I: IntoIterator<Item = (&'a DataSource, &'a [StagedRow])>,
    {
        let mut aliases = Self::default();
        for (source, rows) in sources {
            let mut ba: HashMap<String, ((&str, i64), String)> = HashMap::new();
            let mut uarn: HashMap<String, ((&str, i64), String)> = HashMap::new();
            for row in rows {
                let Some(fields) = map_row(source.dataset, row) else {
                    continue;
                };
                let Some(uprn) = fields.uprn else {
                    continue;
                };
                for (map, reference) in [(&mut ba, fields.ba_reference), (&mut uarn, fields.uarn)] {
                    let Some(reference) = reference else {
                        continue;
                    };
                    let newer = map
                        .get(&reference)
                        .is_none_or(|(seen, _)| row.recency() > *seen);
                    if newer {
                        map.insert(reference, (row.recency(), uprn.clone()));
                    }
                }
            }
            for (reference, (_, uprn)) in ba {
                aliases.ba_reference.entry(reference).or_insert(uprn);
            }
            for (reference, (_, uprn)) in uarn {
                aliases.uarn.entry(reference).or_insert(uprn);
            }
        }
        aliases
    }

    /// Master key for `fields`: its own UPRN, else the UPRN its BA
    /// reference or UARN is tied to, else whatever `MasterKey::for_fields`
    /// picks.
    pub fn key_for(&self, fields: &MasterFields, source: &str, dataset_key: &str) -> MasterKey {
        if fields.uprn.is_none() {
            let linked = fields
                .ba_reference
                .as_ref()
                .and_then(|ba| self.ba_reference.get(ba))
                .or_else(|| fields.uarn.as_ref().and_then(|u| self.uarn.get(u)));
            if let Some(uprn) = linked {
                return MasterKey::Uprn(uprn.clone());
            }
        }
        MasterKey::for_fields(fields, source, dataset_key)
    }
}

/// Fold one direct source into `plan`.
///
/// Sources must be folded most authoritative first: a field is only written
/// while it is still null. When several rows of the source map to the same
/// master key, the latest row (upload time, then staging id) wins whole.
pub fn fold_source(
    plan: &mut MergePlan,
    source: &DataSource,
    rows: Vec<StagedRow>,
    aliases: &KeyAliases,
) {
    let schema = schema_for(source.dataset);
    let mut latest: HashMap<String, (StagedRow, MasterFields)> = HashMap::new();

    for row in rows {
        plan.summary.seen += 1;
        plan.batch_ids.insert(row.batch_id.clone());

        let Some(dataset_key) = row.text(schema.key) else {
            plan.summary.skipped += 1;
            continue;
        };
        let Some(fields) = map_row(source.dataset, &row) else {
            continue;
        };
        let key = aliases.key_for(&fields, &source.name, &dataset_key).to_string();
        let newer = latest
            .get(&key)
            .is_none_or(|(current, _)| row.recency() > current.recency());
        if newer {
            latest.insert(key, (row, fields));
        }
    }

    for (key, (row, fields)) in latest {
        let record = plan.records.entry(key).or_default();
        let sources = &mut record.field_sources;
        record.fields.fill_from(&fields, |field| {
            sources.insert(field.to_string(), source.name.clone());
        });
        if !record.data_source.contains(&source.name) {
            record.data_source.push(source.name.clone());
        }
        record.source_priority = Some(
            record
                .source_priority
                .map_or(source.priority, |p| p.min(source.priority)),
        );
        if record
            .last_source_update
            .as_deref()
            .is_none_or(|seen| row.upload_timestamp.as_str() > seen)
        {
            record.last_source_update = Some(row.upload_timestamp);
        }
    }
}

/// Compare a plan with the stored rows.
pub fn diff(
    plan: MergePlan,
    index: &HashMap<String, MasterIndexEntry>,
) -> (MasterChanges, RunSummary) {
    let mut summary = plan.summary;
    let mut changes = MasterChanges::default();

    let mut gone: Vec<i64> = index
        .iter()
        .filter(|(key, entry)| entry.is_active && !plan.records.contains_key(*key))
        .map(|(_, entry)| entry.id)
        .collect();
    gone.sort_unstable();
    summary.deactivated = gone.len();
    changes.deactivate = gone;

    for (key, merged) in plan.records {
        match index.get(&key) {
            None => {
                summary.inserted += 1;
                changes.inserts.push(MasterInsert {
                    data_quality_score: quality::score(&merged.fields),
                    master_key: key,
                    merged,
                });
            }
            Some(entry) if entry.is_active && entry.record_hash == merged.content_hash() => {
                summary.unchanged += 1;
            }
            Some(entry) => {
                summary.updated += 1;
                changes.updates.push((entry.id, merged));
            }
        }
    }
    (changes, summary)
}

pub struct MergeEngine {
    ctx: DbContext,
    registry: SourceRegistry,
}

impl MergeEngine {
    pub fn new(ctx: DbContext, registry: SourceRegistry) -> Self {
        Self { ctx, registry }
    }

    /// Merge while holding the pipeline lock.
    pub async fn run(&self) -> Result<RunSummary> {
        self.ctx.locks().hold(PIPELINE_LOCK, self.pass()).await
    }

    /// Recompute master state from staging without writing anything.
    pub async fn compute(&self) -> Result<MergePlan> {
        let staging = self.ctx.staging();
        let mut plan = MergePlan::default();

        let mut loaded = Vec::new();
        for source in self.registry.direct_sources() {
            let rows = staging
                .load_visible(&source.staging_table(), schema_for(source.dataset))
                .await?;
            loaded.push((source, rows));
        }

        let aliases = KeyAliases::collect(loaded.iter().map(|(s, rows)| (*s, rows.as_slice())));
        for (source, rows) in loaded {
            debug!("Folding {} rows from {}", rows.len(), source.name);
            fold_source(&mut plan, source, rows, &aliases);
        }

        let data = EnrichmentData::load(&self.ctx, &self.registry).await?;
        plan.enrichment = enrich(&mut plan.records, &data);
        plan.summary.skipped += plan.enrichment.missing_keys;
        plan.batch_ids.extend(data.batch_ids);
        Ok(plan)
    }

    /// One merge pass. The caller is responsible for holding the pipeline
    /// lock.
    pub async fn pass(&self) -> Result<RunSummary> {
        let plan = self.compute().await?;
        let batch_ids: Vec<String> = plan.batch_ids.iter().cloned().collect();
        let enrichment = plan.enrichment;

        let master = self.ctx.master();
        let index = master.index().await?;
        let (changes, summary) = diff(plan, &index);
        master.apply(&changes).await?;

        let merged = self.ctx.batches().mark_merged(&batch_ids).await?;
        info!(
            "Merge: {} ({} enrichment values, {} batches newly merged)",
            summary, enrichment.filled, merged
        );
        Ok(summary)
    }
}
