//! Write strategies for staging rows.
//!
//! The bulk path is all-or-nothing. The row-by-row path is the degraded
//! fallback: each row stands alone and failures are counted, not fatal.

use async_trait::async_trait;

use super::datasets::DatasetSchema;
use crate::models::Lineage;
use crate::repository::{DbError, DbPool, RowChunks, StagingRepository, StagingRow};

#[async_trait]
pub trait StagingWriter: Send + Sync {
    /// Write every chunk as it arrives, all or none of them.
    async fn write_bulk(
        &self,
        table: &str,
        schema: &DatasetSchema,
        lineage: &Lineage,
        chunks: &mut RowChunks,
    ) -> Result<usize, DbError>;

    /// Write a single row.
    async fn write_row(
        &self,
        table: &str,
        schema: &DatasetSchema,
        lineage: &Lineage,
        row: &StagingRow,
    ) -> Result<(), DbError>;

    /// Remove whatever a batch managed to write.
    async fn discard(&self, table: &str, batch_id: &str) -> Result<usize, DbError>;
}

/// Writer backed by the staging repository: chunked INSERTs in one
/// transaction on SQLite, COPY on PostgreSQL.
pub struct DbStagingWriter {
    staging: StagingRepository,
}

impl DbStagingWriter {
    pub fn new(staging: StagingRepository) -> Self {
        Self { staging }
    }
}

#[async_trait]
impl StagingWriter for DbStagingWriter {
    async fn write_bulk(
        &self,
        table: &str,
        schema: &DatasetSchema,
        lineage: &Lineage,
        chunks: &mut RowChunks,
    ) -> Result<usize, DbError> {
        match self.staging.pool() {
            DbPool::Sqlite(_) => {
                self.staging
                    .insert_chunked(table, schema, lineage, chunks)
                    .await
            }
            #[cfg(feature = "postgres")]
            DbPool::Postgres(pg) => {
                crate::repository::copy::copy_rows(pg, table, schema, lineage, chunks).await
            }
        }
    }

    async fn write_row(
        &self,
        table: &str,
        schema: &DatasetSchema,
        lineage: &Lineage,
        row: &StagingRow,
    ) -> Result<(), DbError> {
        self.staging.insert_one(table, schema, lineage, row).await
    }

    async fn discard(&self, table: &str, batch_id: &str) -> Result<usize, DbError> {
        self.staging.delete_batch(table, batch_id).await
    }
}
