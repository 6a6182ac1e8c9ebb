//! Migration tracker and schema snapshot tests.
//!
//! The snapshot is read back through a plain SQLite connection so it checks
//! what actually landed on disk, not what the migration code meant to write.

mod common;

use std::collections::{BTreeMap, BTreeSet};

use common::Fixture;
use gazetteer::migrations::{self, MigrationTracker};
use gazetteer::models::{CoordinateSystem, DataSource, DatasetKind, SourceType, UpdateFrequency};
use gazetteer::registry::SourceRegistry;
use gazetteer::GazetteerError;
use rusqlite::{Connection, Result as SqliteResult};

/// Table name to its columns, in declaration order, as `name TYPE`.
fn extract_tables(conn: &Connection) -> SqliteResult<BTreeMap<String, Vec<String>>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names: Vec<String> = stmt
        .query_map([], |row| row.get(0))?
        .collect::<SqliteResult<Vec<_>>>()?;

    let mut tables = BTreeMap::new();
    for name in names {
        let mut pragma = conn.prepare(&format!("PRAGMA table_info(\"{}\")", name))?;
        let columns = pragma
            .query_map([], |row| {
                Ok(format!(
                    "{} {}",
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?.to_uppercase()
                ))
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        tables.insert(name, columns);
    }
    Ok(tables)
}

fn extract_indexes(conn: &Connection) -> SqliteResult<BTreeSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='index' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<SqliteResult<BTreeSet<String>>>()?;
    Ok(names)
}

fn extra_source() -> DataSource {
    DataSource {
        name: "nndr_leeds".to_string(),
        source_type: SourceType::Rates,
        dataset: DatasetKind::RatesList,
        priority: 9,
        quality_score: 0.75,
        coordinate_system: CoordinateSystem::BritishNationalGrid,
        update_frequency: UpdateFrequency::Monthly,
        file_pattern: "leeds_*.csv".to_string(),
        delimiter: Some('|'),
    }
}

#[tokio::test]
async fn test_schema_snapshot() {
    let f = Fixture::new().await;
    let conn = Connection::open(f.db_path()).unwrap();
    let tables = extract_tables(&conn).unwrap();

    let names: Vec<&str> = tables.keys().map(String::as_str).collect();
    assert_eq!(
        names,
        vec![
            "data_sources",
            "link_postcode_admin_area",
            "link_uprn_map_feature",
            "link_uprn_place_name",
            "link_uprn_postcode",
            "master_gazetteer",
            "run_locks",
            "schema_migrations",
            "staging_batches",
            "stg_nndr_rates",
            "stg_onspd",
            "stg_os_open_map_local",
            "stg_os_open_names",
            "stg_os_open_uprn",
            "stg_ratepayers",
            "stg_voa_list",
        ]
    );

    assert_eq!(
        tables["stg_os_open_uprn"],
        vec![
            "staging_id INTEGER",
            "batch_id TEXT",
            "session_id TEXT",
            "client_name TEXT",
            "source_name TEXT",
            "source_file TEXT",
            "file_size INTEGER",
            "file_modified TEXT",
            "upload_user TEXT",
            "upload_timestamp TEXT",
            "row_number INTEGER",
            "raw_line TEXT",
            "uprn TEXT",
            "x_coordinate REAL",
            "y_coordinate REAL",
            "latitude REAL",
            "longitude REAL",
        ]
    );

    assert_eq!(
        tables["link_uprn_postcode"],
        vec![
            "from_id TEXT",
            "to_id TEXT",
            "distance_meters REAL",
            "link_type TEXT",
            "created_at TEXT",
        ]
    );

    let master = &tables["master_gazetteer"];
    for column in [
        "master_key TEXT",
        "postcode_normalized TEXT",
        "data_source TEXT",
        "field_sources TEXT",
        "data_quality_score INTEGER",
        "duplicate_group_id INTEGER",
        "is_preferred_record INTEGER",
        "is_active INTEGER",
        "record_hash TEXT",
    ] {
        assert!(master.iter().any(|c| c == column), "missing {column}");
    }

    let indexes = extract_indexes(&conn).unwrap();
    for index in [
        "idx_master_uprn",
        "idx_master_ba_reference",
        "idx_master_postcode",
        "idx_staging_batches_status",
        "idx_stg_nndr_rates_batch",
        "idx_stg_nndr_rates_key",
        "idx_link_uprn_postcode_to",
    ] {
        assert!(indexes.contains(index), "missing index {index}");
    }
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let f = Fixture::new().await;
    let tracker = MigrationTracker::new(f.ctx.clone());

    assert!(tracker.run(&f.registry).await.unwrap().is_empty());
    assert!(tracker.pending(&f.registry).await.unwrap().is_empty());
    tracker.ensure_current(&f.registry).await.unwrap();

    let applied = f.ctx.ledger().applied().await.unwrap();
    assert_eq!(applied.len(), migrations::resolve(&f.registry, f.ctx.dialect()).unwrap().len());
}

#[tokio::test]
async fn test_new_source_adds_one_migration() {
    let f = Fixture::new().await;
    let registry = SourceRegistry::with_overrides(vec![extra_source()]).unwrap();
    let tracker = MigrationTracker::new(f.ctx.clone());

    assert_eq!(
        tracker.pending(&registry).await.unwrap(),
        vec!["staging_nndr_leeds_v1".to_string()]
    );
    assert!(matches!(
        tracker.ensure_current(&registry).await,
        Err(GazetteerError::PendingMigrations(1))
    ));

    assert_eq!(
        tracker.run(&registry).await.unwrap(),
        vec!["staging_nndr_leeds_v1".to_string()]
    );
    assert!(f.ctx.list_tables().await.unwrap().contains(&"stg_nndr_leeds".to_string()));
}

#[tokio::test]
async fn test_edited_migration_conflicts() {
    let f = Fixture::new().await;

    // Simulate an applied migration whose definition has since changed.
    let conn = Connection::open(f.db_path()).unwrap();
    conn.execute(
        "UPDATE schema_migrations SET content_hash = 'stale' WHERE name = '0002_link_tables'",
        [],
    )
    .unwrap();
    drop(conn);

    let tracker = MigrationTracker::new(f.ctx.clone());
    match tracker.run(&f.registry).await {
        Err(GazetteerError::MigrationConflict {
            name, applied_hash, ..
        }) => {
            assert_eq!(name, "0002_link_tables");
            assert_eq!(applied_hash, "stale");
        }
        other => panic!("expected a conflict, got {:?}", other.map(|v| v.len())),
    }

    // Nothing else was touched.
    let applied = f.ctx.ledger().applied().await.unwrap();
    assert_eq!(applied.len(), migrations::resolve(&f.registry, f.ctx.dialect()).unwrap().len());
}

#[tokio::test]
async fn test_sync_refuses_to_redefine_a_used_source() {
    let f = Fixture::new().await;
    f.ctx.sources().sync(&f.registry, false).await.unwrap();
    f.load(
        "nndr_2024.csv",
        common::RATES_HEADER,
        &[common::rates_row("BA1", "", "", "100", "", "").as_str()],
        "R1",
    )
    .await;

    let mut changed = f.registry.get("nndr_rates").unwrap().clone();
    changed.quality_score = 0.5;
    let registry = SourceRegistry::with_overrides(vec![changed]).unwrap();

    let err = f.ctx.sources().sync(&registry, false).await.unwrap_err();
    assert!(matches!(err, GazetteerError::RegistryConflict { .. }));

    let report = f.ctx.sources().sync(&registry, true).await.unwrap();
    assert_eq!(report.updated, vec!["nndr_rates".to_string()]);
}
