//! Database context for managing connections and repository access.
//!
//! The DbContext is the primary entry point for all database operations.
//! It holds the connection pool and hands out repositories that share it.

use std::path::Path;

use diesel::sql_types::Text;
use diesel_async::RunQueryDsl;

use super::batch::BatchRepository;
use super::ledger::LedgerRepository;
use super::links::LinkRepository;
use super::lock::LockRepository;
use super::master::MasterRepository;
use super::pool::{DbError, DbPool, SqlDialect};
use super::source::SourceRepository;
use super::staging::StagingRepository;
use crate::models::{LinkKind, Statistics};
use crate::registry::SourceRegistry;
use crate::with_conn_split;

#[derive(diesel::QueryableByName)]
struct TableName {
    #[diesel(sql_type = Text)]
    name: String,
}

/// Database context that manages the connection pool and provides repository access.
///
/// # Example
/// ```ignore
/// let ctx = DbContext::from_url("postgres://localhost/gazetteer")?;
/// let active = ctx.master().count_active().await?;
/// ```
#[derive(Clone)]
pub struct DbContext {
    pool: DbPool,
}

impl DbContext {
    /// Create a context from a database URL.
    ///
    /// Supports:
    /// - SQLite: file paths or `sqlite:` URLs
    /// - PostgreSQL: `postgres://` or `postgresql://` URLs
    pub fn from_url(url: &str) -> Result<Self, DbError> {
        Ok(Self {
            pool: DbPool::from_url(url)?,
        })
    }

    pub fn sqlite_from_path(path: &Path) -> Self {
        Self {
            pool: DbPool::sqlite_from_path(path),
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn dialect(&self) -> SqlDialect {
        self.pool.dialect()
    }

    pub fn batches(&self) -> BatchRepository {
        BatchRepository::new(self.pool.clone())
    }

    pub fn staging(&self) -> StagingRepository {
        StagingRepository::new(self.pool.clone())
    }

    pub fn master(&self) -> MasterRepository {
        MasterRepository::new(self.pool.clone())
    }

    pub fn links(&self) -> LinkRepository {
        LinkRepository::new(self.pool.clone())
    }

    pub fn ledger(&self) -> LedgerRepository {
        LedgerRepository::new(self.pool.clone())
    }

    pub fn locks(&self) -> LockRepository {
        LockRepository::new(self.pool.clone())
    }

    pub fn sources(&self) -> SourceRepository {
        SourceRepository::new(self.pool.clone())
    }

    /// User tables present in the database, sorted.
    pub async fn list_tables(&self) -> Result<Vec<String>, DbError> {
        let rows: Vec<TableName> = with_conn_split!(self.pool,
            sqlite: conn => {
                diesel::sql_query(
                    "SELECT name FROM sqlite_master \
                     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                )
                .load(&mut conn)
                .await
            },
            postgres: conn => {
                diesel::sql_query(
                    "SELECT tablename AS name FROM pg_tables \
                     WHERE schemaname = current_schema() ORDER BY tablename",
                )
                .load(&mut conn)
                .await
            }
        )?;
        Ok(rows.into_iter().map(|r| r.name).collect())
    }

    /// Counts across batches, staging, master and link tables.
    pub async fn statistics(&self, registry: &SourceRegistry) -> Result<Statistics, DbError> {
        let mut stats = Statistics {
            batches_by_status: self.batches().count_by_status().await?.into_iter().collect(),
            ..Default::default()
        };

        let staging = self.staging();
        for source in registry.all() {
            let per_batch = staging.count_by_batch(&source.staging_table()).await?;
            stats
                .staging_rows
                .insert(source.name.clone(), per_batch.values().sum());
        }

        let master = self.master();
        stats.master_total = master.count_all().await?;
        stats.master_active = master.count_active().await?;
        stats.duplicate_groups = master.count_duplicate_groups().await?;
        stats.average_score = master.average_score().await?;

        let links = self.links();
        for kind in LinkKind::ALL {
            stats
                .links
                .insert(kind.as_str().to_string(), links.count(kind).await?);
        }

        stats.locks = self.locks().list().await?.into_iter().map(|l| l.name).collect();
        Ok(stats)
    }
}
