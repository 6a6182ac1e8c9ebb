//! Migration ledger (`schema_migrations`).

use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl, SimpleAsyncConnection};

use super::models::MigrationRecord;
use super::pool::{DbError, DbPool};
use super::util::now_rfc3339;
use crate::schema::schema_migrations;
use crate::with_conn;

const BOOTSTRAP: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (\
    name TEXT PRIMARY KEY, \
    content_hash TEXT NOT NULL, \
    applied_at TEXT NOT NULL)";

#[derive(Clone)]
pub struct LedgerRepository {
    pool: DbPool,
}

impl LedgerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create the ledger table if this is a fresh database.
    pub async fn bootstrap(&self) -> Result<(), DbError> {
        with_conn!(self.pool, conn => {
            conn.batch_execute(BOOTSTRAP).await
        })
    }

    /// Applied migrations in application order.
    pub async fn applied(&self) -> Result<Vec<MigrationRecord>, DbError> {
        with_conn!(self.pool, conn => {
            schema_migrations::table
                .select(MigrationRecord::as_select())
                .order((schema_migrations::applied_at.asc(), schema_migrations::name.asc()))
                .load::<MigrationRecord>(&mut conn)
                .await
        })
    }

    /// Run a migration's statements and record it, all in one transaction.
    pub async fn apply(
        &self,
        name: &str,
        content_hash: &str,
        statements: Vec<String>,
    ) -> Result<(), DbError> {
        let record = MigrationRecord {
            name: name.to_string(),
            content_hash: content_hash.to_string(),
            applied_at: now_rfc3339(),
        };
        with_conn!(self.pool, conn => {
            conn.transaction(|conn| {
                Box::pin(async move {
                    for sql in statements {
                        diesel::sql_query(sql).execute(conn).await?;
                    }
                    diesel::insert_into(schema_migrations::table)
                        .values(&record)
                        .execute(conn)
                        .await?;
                    Ok::<(), DbError>(())
                })
            })
            .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_apply_records_and_rolls_back() {
        let dir = tempdir().unwrap();
        let pool = DbPool::sqlite_from_path(&dir.path().join("ledger.db"));
        let ledger = LedgerRepository::new(pool);
        ledger.bootstrap().await.unwrap();
        ledger.bootstrap().await.unwrap();

        ledger
            .apply(
                "0001_demo",
                "abc",
                vec!["CREATE TABLE demo (id INTEGER PRIMARY KEY)".to_string()],
            )
            .await
            .unwrap();

        let err = ledger
            .apply(
                "0002_broken",
                "def",
                vec![
                    "CREATE TABLE demo_two (id INTEGER)".to_string(),
                    "CREATE TABLE demo (id INTEGER)".to_string(),
                ],
            )
            .await;
        assert!(err.is_err());

        let applied = ledger.applied().await.unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].name, "0001_demo");
        assert_eq!(applied[0].content_hash, "abc");
    }
}
