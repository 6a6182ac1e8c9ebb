//! Diesel ORM models for the fixed-shape tables.
//!
//! Timestamps are RFC 3339 text and flags are 0/1 integers so the same
//! models work on SQLite and PostgreSQL.

use diesel::prelude::*;

use crate::schema;

/// Registry entry as persisted by `sources sync`.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::data_sources)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DataSourceRecord {
    pub name: String,
    pub source_type: String,
    pub dataset: String,
    pub priority: i32,
    pub quality_score: f64,
    pub coordinate_system: String,
    pub update_frequency: String,
    pub file_pattern: String,
    pub delimiter: Option<String>,
    pub registration_index: i32,
    pub definition_hash: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Writable columns of a registry entry; `created_at` is set on insert.
#[derive(Insertable, AsChangeset, Debug)]
#[diesel(table_name = schema::data_sources)]
#[diesel(treat_none_as_null = true)]
pub struct NewDataSource<'a> {
    pub name: &'a str,
    pub source_type: &'a str,
    pub dataset: &'a str,
    pub priority: i32,
    pub quality_score: f64,
    pub coordinate_system: &'a str,
    pub update_frequency: &'a str,
    pub file_pattern: &'a str,
    pub delimiter: Option<&'a str>,
    pub registration_index: i32,
    pub definition_hash: &'a str,
    pub updated_at: &'a str,
}

/// Staging batch row.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::staging_batches)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct BatchRecord {
    pub batch_id: String,
    pub session_id: String,
    pub source_name: String,
    pub client_name: String,
    pub source_file: String,
    pub file_size: i64,
    pub file_modified: Option<String>,
    pub upload_user: String,
    pub upload_timestamp: String,
    pub status: String,
    pub rows_seen: i64,
    pub rows_loaded: i64,
    pub rows_skipped: i64,
    pub rows_errored: i64,
    pub load_strategy: Option<String>,
    pub verification: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::staging_batches)]
pub struct NewBatch<'a> {
    pub batch_id: &'a str,
    pub session_id: &'a str,
    pub source_name: &'a str,
    pub client_name: &'a str,
    pub source_file: &'a str,
    pub file_size: i64,
    pub file_modified: Option<&'a str>,
    pub upload_user: &'a str,
    pub upload_timestamp: &'a str,
    pub status: &'a str,
    pub rows_seen: i64,
    pub rows_loaded: i64,
    pub rows_skipped: i64,
    pub rows_errored: i64,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Master gazetteer row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::master_gazetteer)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MasterRow {
    pub id: i64,
    pub master_key: String,
    pub uprn: Option<String>,
    pub ba_reference: Option<String>,
    pub uarn: Option<String>,
    pub full_address: Option<String>,
    pub address_line_1: Option<String>,
    pub address_line_2: Option<String>,
    pub address_line_3: Option<String>,
    pub locality: Option<String>,
    pub town: Option<String>,
    pub postcode: Option<String>,
    pub postcode_normalized: Option<String>,
    pub x_coordinate: Option<f64>,
    pub y_coordinate: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub geometry: Option<String>,
    pub lad_code: Option<String>,
    pub ward_code: Option<String>,
    pub parish_code: Option<String>,
    pub lsoa_code: Option<String>,
    pub msoa_code: Option<String>,
    pub oa_code: Option<String>,
    pub category_code: Option<String>,
    pub property_description: Option<String>,
    pub rateable_value: Option<f64>,
    pub forecast_rateable_value: Option<f64>,
    pub effective_date: Option<String>,
    pub ratepayer_name: Option<String>,
    pub ratepayer_type: Option<String>,
    pub data_source: String,
    pub source_priority: Option<i32>,
    pub field_sources: String,
    pub data_quality_score: i32,
    pub last_source_update: Option<String>,
    pub duplicate_group_id: Option<i64>,
    pub is_preferred_record: i32,
    pub is_active: i32,
    pub record_hash: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Merge-owned columns of a master row, written on insert and update.
#[derive(Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = schema::master_gazetteer)]
#[diesel(treat_none_as_null = true)]
pub struct MasterValues {
    pub uprn: Option<String>,
    pub ba_reference: Option<String>,
    pub uarn: Option<String>,
    pub full_address: Option<String>,
    pub address_line_1: Option<String>,
    pub address_line_2: Option<String>,
    pub address_line_3: Option<String>,
    pub locality: Option<String>,
    pub town: Option<String>,
    pub postcode: Option<String>,
    pub postcode_normalized: Option<String>,
    pub x_coordinate: Option<f64>,
    pub y_coordinate: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub geometry: Option<String>,
    pub lad_code: Option<String>,
    pub ward_code: Option<String>,
    pub parish_code: Option<String>,
    pub lsoa_code: Option<String>,
    pub msoa_code: Option<String>,
    pub oa_code: Option<String>,
    pub category_code: Option<String>,
    pub property_description: Option<String>,
    pub rateable_value: Option<f64>,
    pub forecast_rateable_value: Option<f64>,
    pub effective_date: Option<String>,
    pub ratepayer_name: Option<String>,
    pub ratepayer_type: Option<String>,
    pub data_source: String,
    pub source_priority: Option<i32>,
    pub field_sources: String,
    pub last_source_update: Option<String>,
    pub record_hash: String,
    pub updated_at: String,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = schema::master_gazetteer)]
pub struct NewMasterRow {
    pub master_key: String,
    #[diesel(embed)]
    pub values: MasterValues,
    pub data_quality_score: i32,
    pub is_preferred_record: i32,
    pub is_active: i32,
    pub created_at: String,
}

/// Applied migration ledger entry.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = schema::schema_migrations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MigrationRecord {
    pub name: String,
    pub content_hash: String,
    pub applied_at: String,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = schema::run_locks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RunLockRecord {
    pub name: String,
    pub holder: String,
    pub acquired_at: String,
}
