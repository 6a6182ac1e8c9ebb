//! Data-quality scoring of master records.
//!
//! The score is a fixed-weight completeness measure in `0..=100`. It depends
//! only on the row itself, so rescoring unchanged rows is a no-op.

use tracing::info;

use crate::error::Result;
use crate::models::{MasterFields, RunSummary};
use crate::repository::{DbContext, PIPELINE_LOCK};

pub const UPRN_WEIGHT: i32 = 20;
pub const BA_REFERENCE_WEIGHT: i32 = 20;
pub const POSTCODE_WEIGHT: i32 = 15;
pub const COORDINATES_WEIGHT: i32 = 15;
pub const RATEABLE_VALUE_WEIGHT: i32 = 10;
pub const CATEGORY_WEIGHT: i32 = 10;
pub const RATEPAYER_WEIGHT: i32 = 10;

pub const MAX_SCORE: i32 = UPRN_WEIGHT
    + BA_REFERENCE_WEIGHT
    + POSTCODE_WEIGHT
    + COORDINATES_WEIGHT
    + RATEABLE_VALUE_WEIGHT
    + CATEGORY_WEIGHT
    + RATEPAYER_WEIGHT;

/// Completeness score of one record.
pub fn score(fields: &MasterFields) -> i32 {
    let mut total = 0;
    if fields.uprn.is_some() {
        total += UPRN_WEIGHT;
    }
    if fields.ba_reference.is_some() {
        total += BA_REFERENCE_WEIGHT;
    }
    if fields.postcode.is_some() {
        total += POSTCODE_WEIGHT;
    }
    if fields.has_coordinates() {
        total += COORDINATES_WEIGHT;
    }
    if fields.rateable_value.is_some() {
        total += RATEABLE_VALUE_WEIGHT;
    }
    if fields.category_code.is_some() {
        total += CATEGORY_WEIGHT;
    }
    if fields.ratepayer_name.is_some() {
        total += RATEPAYER_WEIGHT;
    }
    total
}

pub struct QualityScorer {
    ctx: DbContext,
}

impl QualityScorer {
    pub fn new(ctx: DbContext) -> Self {
        Self { ctx }
    }

    /// Score every active row while holding the pipeline lock.
    pub async fn run(&self) -> Result<RunSummary> {
        self.ctx.locks().hold(PIPELINE_LOCK, self.pass()).await
    }

    /// Score every active row, writing only scores that changed. The caller
    /// is responsible for holding the pipeline lock.
    pub async fn pass(&self) -> Result<RunSummary> {
        let master = self.ctx.master();
        let rows = master.list_active().await?;

        let mut summary = RunSummary {
            seen: rows.len(),
            ..Default::default()
        };
        let changed: Vec<(i64, i32)> = rows
            .iter()
            .filter_map(|r| {
                let new = score(r.fields());
                (new != r.data_quality_score).then_some((r.id, new))
            })
            .collect();

        summary.updated = master.update_scores(&changed).await?;
        summary.unchanged = summary.seen - changed.len();
        info!("Scoring: {}", summary);
        Ok(summary)
    }
}
