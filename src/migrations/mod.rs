//! Schema migrations and the tracker that applies them.
//!
//! Migrations are defined with cetane, one rendering per backend. On top of
//! cetane's ordering sits a hash ledger: it stores the SHA-256 of the SQL
//! that was applied, and a migration whose SQL later changes is a conflict
//! that needs a human, never a silent re-run.

mod m0001_core_tables;
mod m0002_link_tables;
mod m0003_master_indexes;
mod staging;

use std::collections::{HashMap, HashSet};
use std::sync::{LazyLock, Mutex, PoisonError};

use cetane::backend::{Postgres as PostgresBackend, Sqlite as SqliteBackend};
use cetane::prelude::{Migration, MigrationRegistry};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{GazetteerError, Result};
use crate::registry::SourceRegistry;
use crate::repository::models::MigrationRecord;
use crate::repository::{DbContext, SqlDialect};

/// Generated migration names live for the whole process; each distinct one
/// is leaked once.
pub(crate) fn static_name(name: String) -> &'static str {
    static NAMES: LazyLock<Mutex<HashSet<&'static str>>> =
        LazyLock::new(|| Mutex::new(HashSet::new()));

    let mut names = NAMES.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(&existing) = names.get(name.as_str()) {
        return existing;
    }
    let leaked: &'static str = Box::leak(name.into_boxed_str());
    names.insert(leaked);
    leaked
}

/// Every migration for a source registry: the fixed schema plus one staging
/// table per source.
pub fn registry(sources: &SourceRegistry) -> MigrationRegistry {
    let mut reg = MigrationRegistry::new();
    reg.register(m0001_core_tables::migration());
    reg.register(m0002_link_tables::migration());
    reg.register(m0003_master_indexes::migration());
    for source in sources.all() {
        reg.register(staging::migration(source));
    }
    reg
}

/// Non-empty forward statements of `migration` on `dialect`.
pub fn forward_sql(migration: &Migration, dialect: SqlDialect) -> Vec<String> {
    let statements: Vec<String> = match dialect {
        SqlDialect::Sqlite => migration
            .forward_sql(&SqliteBackend)
            .into_iter()
            .map(|sql| sql.to_string())
            .collect(),
        SqlDialect::Postgres => migration
            .forward_sql(&PostgresBackend)
            .into_iter()
            .map(|sql| sql.to_string())
            .collect(),
    };
    statements
        .into_iter()
        .filter(|sql| !sql.trim().is_empty())
        .collect()
}

/// A migration rendered for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMigration {
    pub name: String,
    pub statements: Vec<String>,
}

impl PlannedMigration {
    /// SHA-256 hex of the statements, as recorded in the ledger.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for sql in &self.statements {
            hasher.update(sql.trim().as_bytes());
            hasher.update(b";\n");
        }
        hex::encode(hasher.finalize())
    }
}

/// Render every migration for `dialect` in cetane's dependency order.
pub fn resolve(sources: &SourceRegistry, dialect: SqlDialect) -> Result<Vec<PlannedMigration>> {
    let registry = registry(sources);
    let order = registry
        .resolve_order()
        .map_err(|e| GazetteerError::Migration(e.to_string()))?;

    order
        .into_iter()
        .map(|name| {
            let migration = registry.get(name).ok_or_else(|| {
                GazetteerError::Migration(format!("migration '{}' is not registered", name))
            })?;
            Ok(PlannedMigration {
                name: name.to_string(),
                statements: forward_sql(migration, dialect),
            })
        })
        .collect()
}

/// Decide which migrations still need to run.
///
/// Fails with `MigrationConflict` if an applied migration's recorded hash
/// differs from its current content. Ledger entries for migrations that no
/// longer exist are ignored.
pub fn plan<'a>(
    applied: &[MigrationRecord],
    migrations: &'a [PlannedMigration],
) -> Result<Vec<&'a PlannedMigration>> {
    let applied: HashMap<&str, &str> = applied
        .iter()
        .map(|m| (m.name.as_str(), m.content_hash.as_str()))
        .collect();

    let mut pending = Vec::new();
    for migration in migrations {
        match applied.get(migration.name.as_str()) {
            Some(applied_hash) => {
                let new_hash = migration.content_hash();
                if *applied_hash != new_hash {
                    return Err(GazetteerError::MigrationConflict {
                        name: migration.name.clone(),
                        applied_hash: applied_hash.to_string(),
                        new_hash,
                    });
                }
            }
            None => pending.push(migration),
        }
    }
    Ok(pending)
}

/// Applies migrations against a database and reports its state.
#[derive(Clone)]
pub struct MigrationTracker {
    ctx: DbContext,
}

impl MigrationTracker {
    pub fn new(ctx: DbContext) -> Self {
        Self { ctx }
    }

    /// Names of migrations not yet applied.
    pub async fn pending(&self, registry: &SourceRegistry) -> Result<Vec<String>> {
        let ledger = self.ctx.ledger();
        ledger.bootstrap().await?;
        let applied = ledger.applied().await?;
        let migrations = resolve(registry, self.ctx.dialect())?;
        for record in &applied {
            if !migrations.iter().any(|m| m.name == record.name) {
                warn!("Ledger entry '{}' has no matching migration", record.name);
            }
        }
        Ok(plan(&applied, &migrations)?
            .into_iter()
            .map(|m| m.name.clone())
            .collect())
    }

    /// Apply pending migrations, each in its own transaction. Returns the
    /// names applied; an up-to-date database yields an empty list.
    pub async fn run(&self, registry: &SourceRegistry) -> Result<Vec<String>> {
        let ledger = self.ctx.ledger();
        ledger.bootstrap().await?;
        let applied = ledger.applied().await?;
        let migrations = resolve(registry, self.ctx.dialect())?;

        let mut done = Vec::new();
        for migration in plan(&applied, &migrations)? {
            info!("Applying migration {}", migration.name);
            ledger
                .apply(
                    &migration.name,
                    &migration.content_hash(),
                    migration.statements.clone(),
                )
                .await?;
            done.push(migration.name.clone());
        }
        Ok(done)
    }

    /// Fail with `PendingMigrations` unless the schema is current.
    pub async fn ensure_current(&self, registry: &SourceRegistry) -> Result<()> {
        let pending = self.pending(registry).await?;
        if pending.is_empty() {
            Ok(())
        } else {
            Err(GazetteerError::PendingMigrations(pending.len()))
        }
    }
}
