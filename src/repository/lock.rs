//! Named run locks.
//!
//! A lock is a row in `run_locks`; acquiring inserts it and fails if the
//! row already exists. Nothing expires on its own: a crashed holder leaves
//! the row behind until `gaz locks release` clears it.

use std::future::Future;

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use tracing::{debug, warn};

use super::models::RunLockRecord;
use super::pool::{DbError, DbPool};
use super::util::{is_unique_violation, now_rfc3339};
use crate::error::{GazetteerError, Result};
use crate::schema::run_locks;
use crate::with_conn;

/// Lock taken by merge, score and dedupe.
pub const PIPELINE_LOCK: &str = "pipeline";
/// Lock taken by the spatial linker.
pub const LINKS_LOCK: &str = "links";

/// Identity written into a lock row: `host:pid`.
pub fn holder_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{}:{}", host, std::process::id())
}

#[derive(Clone)]
pub struct LockRepository {
    pool: DbPool,
}

impl LockRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Take `name` for `holder`, or fail with `LockHeld`.
    pub async fn acquire(&self, name: &str, holder: &str) -> Result<()> {
        let record = RunLockRecord {
            name: name.to_string(),
            holder: holder.to_string(),
            acquired_at: now_rfc3339(),
        };
        let inserted: std::result::Result<usize, DbError> = with_conn!(self.pool, conn => {
            diesel::insert_into(run_locks::table)
                .values(&record)
                .execute(&mut conn)
                .await
        });
        match inserted {
            Ok(_) => {
                debug!("Acquired lock '{}' as {}", name, holder);
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => {
                let current = self.get(name).await?;
                let (holder, since) = current
                    .map(|l| (l.holder, l.acquired_at))
                    .unwrap_or_else(|| ("unknown".to_string(), "unknown".to_string()));
                Err(GazetteerError::LockHeld {
                    name: name.to_string(),
                    holder,
                    since,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drop `name` regardless of holder. Returns whether a row was removed.
    pub async fn release(&self, name: &str) -> Result<bool, DbError> {
        with_conn!(self.pool, conn => {
            let rows = diesel::delete(run_locks::table.find(name))
                .execute(&mut conn)
                .await?;
            Ok(rows > 0)
        })
    }

    /// Drop `name` only if `holder` still owns it.
    pub async fn release_own(&self, name: &str, holder: &str) -> Result<bool, DbError> {
        with_conn!(self.pool, conn => {
            let rows = diesel::delete(
                run_locks::table
                    .filter(run_locks::name.eq(name))
                    .filter(run_locks::holder.eq(holder)),
            )
            .execute(&mut conn)
            .await?;
            Ok(rows > 0)
        })
    }

    pub async fn get(&self, name: &str) -> Result<Option<RunLockRecord>, DbError> {
        with_conn!(self.pool, conn => {
            run_locks::table
                .find(name)
                .select(RunLockRecord::as_select())
                .first::<RunLockRecord>(&mut conn)
                .await
                .optional()
        })
    }

    pub async fn list(&self) -> Result<Vec<RunLockRecord>, DbError> {
        with_conn!(self.pool, conn => {
            run_locks::table
                .select(RunLockRecord::as_select())
                .order(run_locks::name.asc())
                .load::<RunLockRecord>(&mut conn)
                .await
        })
    }

    /// Run `work` while holding `name`. The lock is released whether the
    /// work succeeds or fails.
    pub async fn hold<T, F>(&self, name: &str, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let holder = holder_id();
        self.acquire(name, &holder).await?;
        let outcome = work.await;
        match self.release_own(name, &holder).await {
            Ok(true) => {}
            Ok(false) => warn!("Lock '{}' was released by someone else during the run", name),
            Err(e) => warn!("Failed to release lock '{}': {}", name, e),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::test_context;

    #[tokio::test]
    async fn test_second_holder_is_refused() {
        let (_dir, ctx) = test_context().await;
        let locks = ctx.locks();

        locks.acquire(PIPELINE_LOCK, "host-a:1").await.unwrap();
        let err = locks.acquire(PIPELINE_LOCK, "host-b:2").await.unwrap_err();
        match err {
            GazetteerError::LockHeld { holder, .. } => assert_eq!(holder, "host-a:1"),
            other => panic!("unexpected error: {other}"),
        }

        // Different names do not contend.
        locks.acquire(LINKS_LOCK, "host-b:2").await.unwrap();
        assert_eq!(locks.list().await.unwrap().len(), 2);

        assert!(locks.release(PIPELINE_LOCK).await.unwrap());
        assert!(!locks.release(PIPELINE_LOCK).await.unwrap());
        locks.acquire(PIPELINE_LOCK, "host-b:2").await.unwrap();
    }

    #[tokio::test]
    async fn test_hold_releases_on_error() {
        let (_dir, ctx) = test_context().await;
        let locks = ctx.locks();

        let result: Result<()> = locks
            .hold(PIPELINE_LOCK, async {
                Err(GazetteerError::Config("boom".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert!(locks.get(PIPELINE_LOCK).await.unwrap().is_none());

        let value = locks.hold(PIPELINE_LOCK, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_nested_hold_is_refused() {
        let (_dir, ctx) = test_context().await;
        let locks = ctx.locks();
        let inner = locks.clone();

        let result = locks
            .hold(PIPELINE_LOCK, async move {
                inner.hold(PIPELINE_LOCK, async { Ok(()) }).await
            })
            .await;
        assert!(matches!(result, Err(GazetteerError::LockHeld { .. })));
    }
}
