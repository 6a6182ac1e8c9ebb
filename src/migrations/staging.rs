//! Per-source staging table migrations, generated from dataset layouts.

use cetane::prelude::*;

use super::static_name;
use crate::models::DataSource;
use crate::repository::SqlDialect;
use crate::staging::datasets::{schema_for, staging_table_ddl};

/// `staging_<source>_v1`: the source's staging table and its indexes.
pub fn migration(source: &DataSource) -> Migration {
    let table = source.staging_table();
    let schema = schema_for(source.dataset);
    let sqlite = staging_table_ddl(&table, schema, SqlDialect::Sqlite);
    let postgres = staging_table_ddl(&table, schema, SqlDialect::Postgres);

    let name = static_name(format!("staging_{}_v1", source.name));
    sqlite.into_iter().zip(postgres).fold(
        Migration::new(name).depends_on(&["0001_core_tables"]),
        |migration, (lite, pg)| {
            migration.operation(
                RunSql::portable()
                    .for_backend("sqlite", lite)
                    .for_backend("postgres", pg),
            )
        },
    )
}
