//! Repository layer for database persistence.
//!
//! Fixed-shape tables go through Diesel's query builder; per-source staging
//! tables and link tables are addressed through sea-query. Both SQLite and
//! PostgreSQL are supported.

pub mod batch;
pub mod context;
#[cfg(feature = "postgres")]
pub mod copy;
pub mod ledger;
pub mod links;
pub mod lock;
pub mod master;
pub mod models;
pub mod pool;
pub mod source;
pub mod staging;
pub mod util;

pub use batch::{BatchFilter, BatchRepository};
pub use context::DbContext;
pub use ledger::LedgerRepository;
pub use links::LinkRepository;
pub use lock::{LockRepository, LINKS_LOCK, PIPELINE_LOCK};
pub use master::{DedupAssignment, MasterChanges, MasterIndexEntry, MasterInsert, MasterRepository};
pub use pool::{build_sql, DbError, DbPool, SqlDialect};
pub use source::{SourceRepository, SyncReport};
pub use staging::{BatchStats, Cell, RowChunk, RowChunks, StagedRow, StagingRepository, StagingRow};

use chrono::{DateTime, Utc};

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_datetime_falls_back_to_epoch() {
        assert_eq!(parse_datetime("garbage"), DateTime::UNIX_EPOCH);
        assert_eq!(
            parse_datetime("2024-03-01T12:00:00+00:00").to_rfc3339(),
            "2024-03-01T12:00:00+00:00"
        );
    }
}
