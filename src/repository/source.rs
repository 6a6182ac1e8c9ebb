//! Persisted copy of the source registry (`data_sources`).

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use sha2::{Digest, Sha256};
use tracing::info;

use super::models::{DataSourceRecord, NewDataSource};
use super::pool::{DbError, DbPool};
use super::util::now_rfc3339;
use crate::error::{GazetteerError, Result};
use crate::models::DataSource;
use crate::registry::SourceRegistry;
use crate::schema::{data_sources, staging_batches};
use crate::with_conn;

/// SHA-256 over the canonical JSON of a definition.
pub fn definition_hash(source: &DataSource) -> String {
    let json = serde_json::to_string(source).unwrap_or_default();
    hex::encode(Sha256::digest(json.as_bytes()))
}

/// Outcome of a registry sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub inserted: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
}

#[derive(Clone)]
pub struct SourceRepository {
    pool: DbPool,
}

impl SourceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, name: &str) -> Result<Option<DataSourceRecord>, DbError> {
        with_conn!(self.pool, conn => {
            data_sources::table
                .find(name)
                .select(DataSourceRecord::as_select())
                .first::<DataSourceRecord>(&mut conn)
                .await
                .optional()
        })
    }

    /// Stored definitions in registration order.
    pub async fn list(&self) -> Result<Vec<DataSourceRecord>, DbError> {
        with_conn!(self.pool, conn => {
            data_sources::table
                .select(DataSourceRecord::as_select())
                .order((data_sources::registration_index.asc(), data_sources::name.asc()))
                .load::<DataSourceRecord>(&mut conn)
                .await
        })
    }

    /// Number of batches recorded for a source.
    pub async fn batch_count(&self, name: &str) -> Result<i64, DbError> {
        with_conn!(self.pool, conn => {
            staging_batches::table
                .filter(staging_batches::source_name.eq(name))
                .count()
                .get_result(&mut conn)
                .await
        })
    }

    /// Write the registry to `data_sources`.
    ///
    /// A stored definition that differs from the registry is only replaced
    /// when no batch references it, or when `allow_update` is set.
    pub async fn sync(&self, registry: &SourceRegistry, allow_update: bool) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        for (index, source) in registry.all().iter().enumerate() {
            let hash = definition_hash(source);
            let index = index as i32;
            let existing = self.get(&source.name).await?;

            match existing {
                None => {
                    self.write(source, index, &hash, true).await?;
                    report.inserted.push(source.name.clone());
                }
                Some(stored) if stored.definition_hash == hash => {
                    if stored.registration_index != index {
                        self.write(source, index, &hash, false).await?;
                        report.updated.push(source.name.clone());
                    } else {
                        report.unchanged.push(source.name.clone());
                    }
                }
                Some(_) => {
                    if !allow_update && self.batch_count(&source.name).await? > 0 {
                        return Err(GazetteerError::RegistryConflict {
                            name: source.name.clone(),
                        });
                    }
                    info!("Updating stored definition of source '{}'", source.name);
                    self.write(source, index, &hash, false).await?;
                    report.updated.push(source.name.clone());
                }
            }
        }

        Ok(report)
    }

    async fn write(
        &self,
        source: &DataSource,
        index: i32,
        hash: &str,
        insert: bool,
    ) -> Result<(), DbError> {
        let now = now_rfc3339();
        let delimiter = source.delimiter.map(String::from);
        let values = NewDataSource {
            name: &source.name,
            source_type: source.source_type.as_str(),
            dataset: source.dataset.as_str(),
            priority: source.priority,
            quality_score: source.quality_score,
            coordinate_system: source.coordinate_system.as_str(),
            update_frequency: source.update_frequency.as_str(),
            file_pattern: &source.file_pattern,
            delimiter: delimiter.as_deref(),
            registration_index: index,
            definition_hash: hash,
            updated_at: &now,
        };

        with_conn!(self.pool, conn => {
            if insert {
                diesel::insert_into(data_sources::table)
                    .values((&values, data_sources::created_at.eq(&now)))
                    .execute(&mut conn)
                    .await?;
            } else {
                diesel::update(data_sources::table.find(&source.name))
                    .set(&values)
                    .execute(&mut conn)
                    .await?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{lineage, test_context};

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let (_dir, ctx) = test_context().await;
        let registry = SourceRegistry::builtin();

        let first = ctx.sources().sync(&registry, false).await.unwrap();
        assert_eq!(first.inserted.len(), registry.all().len());

        let second = ctx.sources().sync(&registry, false).await.unwrap();
        assert!(second.inserted.is_empty());
        assert!(second.updated.is_empty());
        assert_eq!(second.unchanged.len(), registry.all().len());

        let stored = ctx.sources().list().await.unwrap();
        assert_eq!(stored[0].name, registry.all()[0].name);
        assert_eq!(stored[0].definition_hash, definition_hash(&registry.all()[0]));
    }

    #[tokio::test]
    async fn test_changed_definition_in_use_needs_update_flag() {
        let (_dir, ctx) = test_context().await;
        let registry = SourceRegistry::builtin();
        ctx.sources().sync(&registry, false).await.unwrap();
        ctx.batches()
            .create(&lineage("B1", "nndr_rates"))
            .await
            .unwrap();

        let mut changed = registry.get("nndr_rates").unwrap().clone();
        changed.quality_score = 0.5;
        let registry = SourceRegistry::with_overrides(vec![changed]).unwrap();

        let err = ctx.sources().sync(&registry, false).await.unwrap_err();
        assert!(matches!(err, GazetteerError::RegistryConflict { ref name } if name == "nndr_rates"));

        let report = ctx.sources().sync(&registry, true).await.unwrap();
        assert_eq!(report.updated, vec!["nndr_rates".to_string()]);
        let stored = ctx.sources().get("nndr_rates").await.unwrap().unwrap();
        assert_eq!(stored.quality_score, 0.5);
    }

    #[tokio::test]
    async fn test_unused_definition_changes_freely() {
        let (_dir, ctx) = test_context().await;
        ctx.sources()
            .sync(&SourceRegistry::builtin(), false)
            .await
            .unwrap();

        let mut changed = SourceRegistry::builtin().get("voa_list").unwrap().clone();
        changed.file_pattern = "valuation_*.csv".to_string();
        let registry = SourceRegistry::with_overrides(vec![changed]).unwrap();
        let report = ctx.sources().sync(&registry, false).await.unwrap();
        assert_eq!(report.updated, vec!["voa_list".to_string()]);
    }
}
