//! Staging batch repository.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::models::{BatchRecord, NewBatch};
use super::parse_datetime;
use super::pool::{DbError, DbPool};
use super::util::now_rfc3339;
use crate::error::{GazetteerError, Result};
use crate::models::{Batch, BatchStatus, Lineage, LoadStrategy, RowCounts, VerificationReport};
use crate::schema::staging_batches;
use crate::with_conn;

impl From<BatchRecord> for Batch {
    fn from(record: BatchRecord) -> Self {
        Batch {
            status: BatchStatus::from_str(&record.status).unwrap_or(BatchStatus::Failed),
            counts: RowCounts {
                seen: record.rows_seen,
                loaded: record.rows_loaded,
                skipped: record.rows_skipped,
                errored: record.rows_errored,
            },
            load_strategy: record.load_strategy.as_deref().and_then(LoadStrategy::from_str),
            verification: record
                .verification
                .as_deref()
                .and_then(|v| serde_json::from_str(v).ok()),
            error: record.error,
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
            lineage: Lineage {
                batch_id: record.batch_id,
                session_id: record.session_id,
                client_name: record.client_name,
                source_name: record.source_name,
                source_file: record.source_file,
                file_size: record.file_size,
                file_modified: record.file_modified,
                upload_user: record.upload_user,
                upload_timestamp: record.upload_timestamp,
            },
        }
    }
}

/// Filter for listing batches.
#[derive(Debug, Clone, Default)]
pub struct BatchFilter {
    pub source_name: Option<String>,
    pub status: Option<BatchStatus>,
    pub limit: Option<i64>,
}

#[derive(Clone)]
pub struct BatchRepository {
    pool: DbPool,
}

impl BatchRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Record a new batch in state `received`.
    pub async fn create(&self, lineage: &Lineage) -> Result<()> {
        let now = now_rfc3339();
        let new = NewBatch {
            batch_id: &lineage.batch_id,
            session_id: &lineage.session_id,
            source_name: &lineage.source_name,
            client_name: &lineage.client_name,
            source_file: &lineage.source_file,
            file_size: lineage.file_size,
            file_modified: lineage.file_modified.as_deref(),
            upload_user: &lineage.upload_user,
            upload_timestamp: &lineage.upload_timestamp,
            status: BatchStatus::Received.as_str(),
            rows_seen: 0,
            rows_loaded: 0,
            rows_skipped: 0,
            rows_errored: 0,
            created_at: &now,
            updated_at: &now,
        };

        let inserted: std::result::Result<usize, DbError> = with_conn!(self.pool, conn => {
            diesel::insert_into(staging_batches::table)
                .values(&new)
                .execute(&mut conn)
                .await
        });
        match inserted {
            Ok(_) => Ok(()),
            Err(e) if super::util::is_unique_violation(&e) => {
                Err(GazetteerError::DuplicateBatch(lineage.batch_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, batch_id: &str) -> Result<Option<Batch>, DbError> {
        with_conn!(self.pool, conn => {
            staging_batches::table
                .find(batch_id)
                .select(BatchRecord::as_select())
                .first::<BatchRecord>(&mut conn)
                .await
                .optional()
                .map(|opt| opt.map(Batch::from))
        })
    }

    pub async fn exists(&self, batch_id: &str) -> Result<bool, DbError> {
        Ok(self.get(batch_id).await?.is_some())
    }

    /// Batches, newest first.
    pub async fn list(&self, filter: &BatchFilter) -> Result<Vec<Batch>, DbError> {
        with_conn!(self.pool, conn => {
            let mut query = staging_batches::table
                .select(BatchRecord::as_select())
                .order((staging_batches::created_at.desc(), staging_batches::batch_id.desc()))
                .into_boxed();
            if let Some(ref source) = filter.source_name {
                query = query.filter(staging_batches::source_name.eq(source));
            }
            if let Some(status) = filter.status {
                query = query.filter(staging_batches::status.eq(status.as_str()));
            }
            if let Some(limit) = filter.limit {
                query = query.limit(limit);
            }
            query
                .load::<BatchRecord>(&mut conn)
                .await
                .map(|records| records.into_iter().map(Batch::from).collect())
        })
    }

    /// Ids of batches whose rows are visible, optionally for one source.
    pub async fn visible_ids(&self, source_name: Option<&str>) -> Result<Vec<String>, DbError> {
        with_conn!(self.pool, conn => {
            let mut query = staging_batches::table
                .select(staging_batches::batch_id)
                .filter(staging_batches::status.eq_any(BatchStatus::VISIBLE))
                .order(staging_batches::batch_id.asc())
                .into_boxed();
            if let Some(source) = source_name {
                query = query.filter(staging_batches::source_name.eq(source));
            }
            query.load::<String>(&mut conn).await
        })
    }

    /// Move a batch to `to`, rejecting transitions the state machine forbids.
    ///
    /// The update is guarded on the current status so two writers cannot
    /// both advance the same batch.
    pub async fn transition(&self, batch_id: &str, to: BatchStatus) -> Result<()> {
        let batch = self
            .get(batch_id)
            .await?
            .ok_or_else(|| GazetteerError::BatchNotFound(batch_id.to_string()))?;
        let from = batch.status;
        if !from.can_transition_to(to) {
            return Err(GazetteerError::InvalidTransition {
                batch_id: batch_id.to_string(),
                from,
                to,
            });
        }

        let now = now_rfc3339();
        let updated = with_conn!(self.pool, conn => {
            diesel::update(
                staging_batches::table
                    .filter(staging_batches::batch_id.eq(batch_id))
                    .filter(staging_batches::status.eq(from.as_str())),
            )
            .set((
                staging_batches::status.eq(to.as_str()),
                staging_batches::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await
        })?;

        if updated == 0 {
            // Someone else moved it first; report against the fresh state.
            let current = self
                .get(batch_id)
                .await?
                .map(|b| b.status)
                .unwrap_or(BatchStatus::Failed);
            return Err(GazetteerError::InvalidTransition {
                batch_id: batch_id.to_string(),
                from: current,
                to,
            });
        }
        Ok(())
    }

    /// Store row counters and the strategy that wrote the rows.
    pub async fn record_load(
        &self,
        batch_id: &str,
        counts: RowCounts,
        strategy: Option<LoadStrategy>,
    ) -> Result<(), DbError> {
        let now = now_rfc3339();
        with_conn!(self.pool, conn => {
            diesel::update(staging_batches::table.find(batch_id))
                .set((
                    staging_batches::rows_seen.eq(counts.seen),
                    staging_batches::rows_loaded.eq(counts.loaded),
                    staging_batches::rows_skipped.eq(counts.skipped),
                    staging_batches::rows_errored.eq(counts.errored),
                    staging_batches::load_strategy.eq(strategy.map(|s| s.as_str())),
                    staging_batches::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    pub async fn record_verification(
        &self,
        batch_id: &str,
        report: &VerificationReport,
    ) -> Result<(), DbError> {
        let json = serde_json::to_string(report).map_err(super::util::to_diesel_error)?;
        let now = now_rfc3339();
        with_conn!(self.pool, conn => {
            diesel::update(staging_batches::table.find(batch_id))
                .set((
                    staging_batches::verification.eq(Some(&json)),
                    staging_batches::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// Mark a batch failed with a reason.
    pub async fn fail(&self, batch_id: &str, reason: &str) -> Result<()> {
        self.transition(batch_id, BatchStatus::Failed).await?;
        let now = now_rfc3339();
        with_conn!(self.pool, conn => {
            diesel::update(staging_batches::table.find(batch_id))
                .set((
                    staging_batches::error.eq(Some(reason)),
                    staging_batches::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .await
        })?;
        Ok(())
    }

    /// Advance `verified` batches to `merged`. Returns how many moved.
    pub async fn mark_merged(&self, batch_ids: &[String]) -> Result<usize, DbError> {
        if batch_ids.is_empty() {
            return Ok(0);
        }
        let now = now_rfc3339();
        with_conn!(self.pool, conn => {
            diesel::update(
                staging_batches::table
                    .filter(staging_batches::batch_id.eq_any(batch_ids))
                    .filter(staging_batches::status.eq(BatchStatus::Verified.as_str())),
            )
            .set((
                staging_batches::status.eq(BatchStatus::Merged.as_str()),
                staging_batches::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await
        })
    }

    /// Batches that never became visible: `failed`, plus `received` or
    /// `loaded` ones last touched before `stale_before` (RFC 3339).
    pub async fn purgeable(&self, stale_before: &str) -> Result<Vec<Batch>, DbError> {
        with_conn!(self.pool, conn => {
            staging_batches::table
                .select(BatchRecord::as_select())
                .filter(
                    staging_batches::status.eq(BatchStatus::Failed.as_str()).or(
                        staging_batches::status
                            .eq_any([BatchStatus::Received.as_str(), BatchStatus::Loaded.as_str()])
                            .and(staging_batches::updated_at.lt(stale_before)),
                    ),
                )
                .order(staging_batches::batch_id.asc())
                .load::<BatchRecord>(&mut conn)
                .await
                .map(|records| records.into_iter().map(Batch::from).collect())
        })
    }

    pub async fn delete(&self, batch_id: &str) -> Result<bool, DbError> {
        with_conn!(self.pool, conn => {
            let rows = diesel::delete(staging_batches::table.find(batch_id))
                .execute(&mut conn)
                .await?;
            Ok(rows > 0)
        })
    }

    /// Number of batches per status.
    pub async fn count_by_status(&self) -> Result<Vec<(String, i64)>, DbError> {
        use diesel::dsl::count_star;
        with_conn!(self.pool, conn => {
            staging_batches::table
                .group_by(staging_batches::status)
                .select((staging_batches::status, count_star()))
                .order(staging_batches::status.asc())
                .load::<(String, i64)>(&mut conn)
                .await
        })
    }
}
