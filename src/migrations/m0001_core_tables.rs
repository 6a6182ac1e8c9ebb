use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0001_core_tables")
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE data_sources (
    name TEXT PRIMARY KEY NOT NULL,
    source_type TEXT NOT NULL,
    dataset TEXT NOT NULL,
    priority INTEGER NOT NULL,
    quality_score REAL NOT NULL,
    coordinate_system TEXT NOT NULL,
    update_frequency TEXT NOT NULL,
    file_pattern TEXT NOT NULL,
    delimiter TEXT,
    registration_index INTEGER NOT NULL,
    definition_hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE data_sources (
    name TEXT PRIMARY KEY NOT NULL,
    source_type TEXT NOT NULL,
    dataset TEXT NOT NULL,
    priority INTEGER NOT NULL,
    quality_score DOUBLE PRECISION NOT NULL,
    coordinate_system TEXT NOT NULL,
    update_frequency TEXT NOT NULL,
    file_pattern TEXT NOT NULL,
    delimiter TEXT,
    registration_index INTEGER NOT NULL,
    definition_hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#,
                ),
        )
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE staging_batches (
    batch_id TEXT PRIMARY KEY NOT NULL,
    session_id TEXT NOT NULL,
    source_name TEXT NOT NULL,
    client_name TEXT NOT NULL,
    source_file TEXT NOT NULL,
    file_size INTEGER NOT NULL DEFAULT 0,
    file_modified TEXT,
    upload_user TEXT NOT NULL,
    upload_timestamp TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'received',
    rows_seen INTEGER NOT NULL DEFAULT 0,
    rows_loaded INTEGER NOT NULL DEFAULT 0,
    rows_skipped INTEGER NOT NULL DEFAULT 0,
    rows_errored INTEGER NOT NULL DEFAULT 0,
    load_strategy TEXT,
    verification TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE staging_batches (
    batch_id TEXT PRIMARY KEY NOT NULL,
    session_id TEXT NOT NULL,
    source_name TEXT NOT NULL,
    client_name TEXT NOT NULL,
    source_file TEXT NOT NULL,
    file_size BIGINT NOT NULL DEFAULT 0,
    file_modified TEXT,
    upload_user TEXT NOT NULL,
    upload_timestamp TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'received',
    rows_seen BIGINT NOT NULL DEFAULT 0,
    rows_loaded BIGINT NOT NULL DEFAULT 0,
    rows_skipped BIGINT NOT NULL DEFAULT 0,
    rows_errored BIGINT NOT NULL DEFAULT 0,
    load_strategy TEXT,
    verification TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#,
                ),
        )
        .operation(RunSql::new(
            "CREATE INDEX idx_staging_batches_source ON staging_batches(source_name)",
        ))
        .operation(RunSql::new(
            "CREATE INDEX idx_staging_batches_status ON staging_batches(status)",
        ))
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE master_gazetteer (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    master_key TEXT NOT NULL UNIQUE,
    uprn TEXT,
    ba_reference TEXT,
    uarn TEXT,
    full_address TEXT,
    address_line_1 TEXT,
    address_line_2 TEXT,
    address_line_3 TEXT,
    locality TEXT,
    town TEXT,
    postcode TEXT,
    postcode_normalized TEXT,
    x_coordinate REAL,
    y_coordinate REAL,
    latitude REAL,
    longitude REAL,
    geometry TEXT,
    lad_code TEXT,
    ward_code TEXT,
    parish_code TEXT,
    lsoa_code TEXT,
    msoa_code TEXT,
    oa_code TEXT,
    category_code TEXT,
    property_description TEXT,
    rateable_value REAL,
    forecast_rateable_value REAL,
    effective_date TEXT,
    ratepayer_name TEXT,
    ratepayer_type TEXT,
    data_source TEXT NOT NULL DEFAULT '[]',
    source_priority INTEGER,
    field_sources TEXT NOT NULL DEFAULT '{}',
    data_quality_score INTEGER NOT NULL DEFAULT 0,
    last_source_update TEXT,
    duplicate_group_id INTEGER,
    is_preferred_record INTEGER NOT NULL DEFAULT 1,
    is_active INTEGER NOT NULL DEFAULT 1,
    record_hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE master_gazetteer (
    id BIGSERIAL PRIMARY KEY,
    master_key TEXT NOT NULL UNIQUE,
    uprn TEXT,
    ba_reference TEXT,
    uarn TEXT,
    full_address TEXT,
    address_line_1 TEXT,
    address_line_2 TEXT,
    address_line_3 TEXT,
    locality TEXT,
    town TEXT,
    postcode TEXT,
    postcode_normalized TEXT,
    x_coordinate DOUBLE PRECISION,
    y_coordinate DOUBLE PRECISION,
    latitude DOUBLE PRECISION,
    longitude DOUBLE PRECISION,
    geometry TEXT,
    lad_code TEXT,
    ward_code TEXT,
    parish_code TEXT,
    lsoa_code TEXT,
    msoa_code TEXT,
    oa_code TEXT,
    category_code TEXT,
    property_description TEXT,
    rateable_value DOUBLE PRECISION,
    forecast_rateable_value DOUBLE PRECISION,
    effective_date TEXT,
    ratepayer_name TEXT,
    ratepayer_type TEXT,
    data_source TEXT NOT NULL DEFAULT '[]',
    source_priority INTEGER,
    field_sources TEXT NOT NULL DEFAULT '{}',
    data_quality_score INTEGER NOT NULL DEFAULT 0,
    last_source_update TEXT,
    duplicate_group_id BIGINT,
    is_preferred_record INTEGER NOT NULL DEFAULT 1,
    is_active INTEGER NOT NULL DEFAULT 1,
    record_hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#,
                ),
        )
        .operation(RunSql::new(
            r#"CREATE TABLE run_locks (
    name TEXT PRIMARY KEY NOT NULL,
    holder TEXT NOT NULL,
    acquired_at TEXT NOT NULL
)"#,
        ))
}
