//! Per-source staging tables.
//!
//! Table names come from validated source names and column names from the
//! static dataset layouts, so they are safe to splice into SQL. Row values
//! always go through sea-query, which quotes them for the backend.

use std::collections::HashMap;

use diesel::sql_types::{BigInt, Double, Nullable, Text};
use diesel_async::{AsyncConnection, RunQueryDsl};
use sea_query::{Alias, Asterisk, Expr, Func, InsertStatement, Query, SimpleExpr};
use serde_json::Value;

use super::pool::{build_sql, DbError, DbPool, SqlDialect};
use super::util::to_diesel_error;
use crate::models::{BatchStatus, BoundingBox, Lineage};
use crate::staging::datasets::{DatasetSchema, LINEAGE_COLUMNS};
use crate::with_conn;

/// A typed payload value ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(Option<String>),
    Real(Option<f64>),
}

/// One parsed input line, minus the batch-wide lineage.
#[derive(Debug, Clone)]
pub struct StagingRow {
    pub row_number: i64,
    pub raw_line: String,
    pub cells: Vec<Cell>,
}

/// One chunk of parsed rows, or why parsing stopped.
pub type RowChunk = Result<Vec<StagingRow>, String>;

/// Parsed rows arriving from the reader, one chunk at a time.
pub type RowChunks = tokio::sync::mpsc::Receiver<RowChunk>;

/// A staging row read back for linking or merging.
#[derive(Debug, Clone)]
pub struct StagedRow {
    pub staging_id: i64,
    pub batch_id: String,
    pub upload_timestamp: String,
    values: serde_json::Map<String, Value>,
}

impl StagedRow {
    /// Text value of a payload column (by upstream header name), blank as `None`.
    pub fn text(&self, column: &str) -> Option<String> {
        match self.values.get(&column.to_ascii_lowercase())? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Numeric value of a payload column.
    pub fn real(&self, column: &str) -> Option<f64> {
        match self.values.get(&column.to_ascii_lowercase())? {
            Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        }
    }

    /// Ordering key for "latest row wins": upload time, then staging id.
    pub fn recency(&self) -> (&str, i64) {
        (&self.upload_timestamp, self.staging_id)
    }

    #[cfg(test)]
    pub fn from_parts(staging_id: i64, upload_timestamp: &str, values: serde_json::Value) -> Self {
        Self {
            staging_id,
            batch_id: "TEST".to_string(),
            upload_timestamp: upload_timestamp.to_string(),
            values: values.as_object().cloned().unwrap_or_default(),
        }
    }
}

#[derive(diesel::QueryableByName)]
struct StagedRowRecord {
    #[diesel(sql_type = BigInt)]
    staging_id: i64,
    #[diesel(sql_type = Text)]
    batch_id: String,
    #[diesel(sql_type = Text)]
    upload_timestamp: String,
    #[diesel(sql_type = Text)]
    payload: String,
}

#[derive(diesel::QueryableByName)]
struct KeyStats {
    #[diesel(sql_type = BigInt)]
    total: i64,
    #[diesel(sql_type = BigInt)]
    null_keys: i64,
}

#[derive(diesel::QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    n: i64,
}

#[derive(diesel::QueryableByName)]
struct ExtentRow {
    #[diesel(sql_type = Nullable<Double>)]
    min_x: Option<f64>,
    #[diesel(sql_type = Nullable<Double>)]
    min_y: Option<f64>,
    #[diesel(sql_type = Nullable<Double>)]
    max_x: Option<f64>,
    #[diesel(sql_type = Nullable<Double>)]
    max_y: Option<f64>,
}

/// Raw verification figures for one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchStats {
    pub total_rows: i64,
    pub null_keys: i64,
    pub duplicate_keys: i64,
    pub bbox: Option<BoundingBox>,
}

/// Column list of a staging insert: lineage first, then payload.
pub fn insert_columns(schema: &DatasetSchema) -> Vec<String> {
    LINEAGE_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(schema.columns.iter().map(|c| c.db_name()))
        .collect()
}

fn row_values(lineage: &Lineage, row: &StagingRow) -> Vec<SimpleExpr> {
    let mut values: Vec<SimpleExpr> = vec![
        lineage.batch_id.clone().into(),
        lineage.session_id.clone().into(),
        lineage.client_name.clone().into(),
        lineage.source_name.clone().into(),
        lineage.source_file.clone().into(),
        lineage.file_size.into(),
        lineage.file_modified.clone().into(),
        lineage.upload_user.clone().into(),
        lineage.upload_timestamp.clone().into(),
        row.row_number.into(),
        row.raw_line.clone().into(),
    ];
    for cell in &row.cells {
        values.push(match cell {
            Cell::Text(v) => v.clone().into(),
            Cell::Real(v) => (*v).into(),
        });
    }
    values
}

fn insert_statement(
    table: &str,
    schema: &DatasetSchema,
    lineage: &Lineage,
    rows: &[StagingRow],
) -> Result<InsertStatement, DbError> {
    let mut stmt = Query::insert();
    stmt.into_table(Alias::new(table))
        .columns(insert_columns(schema).into_iter().map(Alias::new));
    for row in rows {
        stmt.values(row_values(lineage, row))
            .map_err(to_diesel_error)?;
    }
    Ok(stmt)
}

#[derive(Clone)]
pub struct StagingRepository {
    pool: DbPool,
}

impl StagingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Insert every chunk as it arrives, one multi-row INSERT per chunk,
    /// all in one transaction. Nothing is written if any chunk fails or the
    /// reader reports an error.
    pub async fn insert_chunked(
        &self,
        table: &str,
        schema: &DatasetSchema,
        lineage: &Lineage,
        chunks: &mut RowChunks,
    ) -> Result<usize, DbError> {
        let db = &self.pool;
        with_conn!(self.pool, conn => {
            conn.transaction(|conn| {
                Box::pin(async move {
                    let mut written = 0;
                    while let Some(chunk) = chunks.recv().await {
                        let rows = chunk.map_err(to_diesel_error)?;
                        if rows.is_empty() {
                            continue;
                        }
                        let stmt = insert_statement(table, schema, lineage, &rows)?;
                        written += diesel::sql_query(build_sql(db, &stmt)).execute(conn).await?;
                    }
                    Ok::<usize, DbError>(written)
                })
            })
            .await
        })
    }

    /// Insert a single row in its own statement.
    pub async fn insert_one(
        &self,
        table: &str,
        schema: &DatasetSchema,
        lineage: &Lineage,
        row: &StagingRow,
    ) -> Result<(), DbError> {
        let stmt = insert_statement(table, schema, lineage, std::slice::from_ref(row))?;
        let sql = build_sql(&self.pool, &stmt);
        with_conn!(self.pool, conn => {
            diesel::sql_query(sql).execute(&mut conn).await?;
            Ok(())
        })
    }

    /// Remove every row a batch wrote.
    pub async fn delete_batch(&self, table: &str, batch_id: &str) -> Result<usize, DbError> {
        let stmt = Query::delete()
            .from_table(Alias::new(table))
            .and_where(Expr::col(Alias::new("batch_id")).eq(batch_id))
            .to_owned();
        let sql = build_sql(&self.pool, &stmt);
        with_conn!(self.pool, conn => {
            diesel::sql_query(sql).execute(&mut conn).await
        })
    }

    /// Row count, null-key count, duplicate-key count and coordinate extent
    /// of one batch. `coordinates` names the (x, y) columns to measure.
    pub async fn batch_stats(
        &self,
        table: &str,
        schema: &DatasetSchema,
        batch_id: &str,
        coordinates: Option<(&str, &str)>,
    ) -> Result<BatchStats, DbError> {
        let key = Alias::new(schema.key_db_name());
        let in_batch = Expr::col(Alias::new("batch_id")).eq(batch_id);

        let key_stats = Query::select()
            .expr_as(Expr::col(Asterisk).count(), Alias::new("total"))
            .expr_as(
                Func::coalesce([
                    Expr::expr(
                        Expr::case(
                            Expr::col(key.clone())
                                .is_null()
                                .or(Expr::col(key.clone()).eq("")),
                            1,
                        )
                        .finally(0),
                    )
                    .sum(),
                    Expr::val(0).into(),
                ]),
                Alias::new("null_keys"),
            )
            .from(Alias::new(table))
            .and_where(in_batch.clone())
            .to_owned();

        let duplicated = Query::select()
            .column(key.clone())
            .from(Alias::new(table))
            .and_where(in_batch.clone())
            .and_where(Expr::col(key.clone()).is_not_null())
            .group_by_col(key)
            .and_having(Expr::expr(Expr::col(Asterisk).count()).gt(1))
            .to_owned();
        let duplicates = Query::select()
            .expr_as(Expr::col(Asterisk).count(), Alias::new("n"))
            .from_subquery(duplicated, Alias::new("d"))
            .to_owned();

        let extent = coordinates.map(|(x, y)| {
            let (x, y) = (x.to_ascii_lowercase(), y.to_ascii_lowercase());
            Query::select()
                .expr_as(Expr::col(Alias::new(&x)).min(), Alias::new("min_x"))
                .expr_as(Expr::col(Alias::new(&y)).min(), Alias::new("min_y"))
                .expr_as(Expr::col(Alias::new(&x)).max(), Alias::new("max_x"))
                .expr_as(Expr::col(Alias::new(&y)).max(), Alias::new("max_y"))
                .from(Alias::new(table))
                .and_where(in_batch.clone())
                .and_where(Expr::col(Alias::new(&x)).is_not_null())
                .and_where(Expr::col(Alias::new(&y)).is_not_null())
                .to_owned()
        });

        let key_sql = build_sql(&self.pool, &key_stats);
        let dup_sql = build_sql(&self.pool, &duplicates);
        let extent_sql = extent.map(|stmt| build_sql(&self.pool, &stmt));

        with_conn!(self.pool, conn => {
            let keys: KeyStats = diesel::sql_query(key_sql).get_result(&mut conn).await?;
            let dups: CountRow = diesel::sql_query(dup_sql).get_result(&mut conn).await?;
            let bbox = match extent_sql {
                Some(sql) => {
                    let row: ExtentRow = diesel::sql_query(sql).get_result(&mut conn).await?;
                    match (row.min_x, row.min_y, row.max_x, row.max_y) {
                        (Some(min_x), Some(min_y), Some(max_x), Some(max_y)) => Some(BoundingBox {
                            min_x,
                            min_y,
                            max_x,
                            max_y,
                        }),
                        _ => None,
                    }
                }
                None => None,
            };
            Ok(BatchStats {
                total_rows: keys.total,
                null_keys: keys.null_keys,
                duplicate_keys: dups.n,
                bbox,
            })
        })
    }

    /// All rows of visible batches, ordered by staging id.
    pub async fn load_visible(
        &self,
        table: &str,
        schema: &DatasetSchema,
    ) -> Result<Vec<StagedRow>, DbError> {
        let pairs: Vec<String> = schema
            .columns
            .iter()
            .map(|c| format!("'{0}', s.{0}", c.db_name()))
            .collect();
        let payload = match self.pool.dialect() {
            SqlDialect::Sqlite => format!("json_object({})", pairs.join(", ")),
            SqlDialect::Postgres => format!("json_build_object({})::text", pairs.join(", ")),
        };
        let visible = BatchStatus::VISIBLE
            .iter()
            .map(|s| format!("'{}'", s))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT s.staging_id, s.batch_id, s.upload_timestamp, {payload} AS payload \
             FROM {table} s \
             WHERE s.batch_id IN (SELECT batch_id FROM staging_batches WHERE status IN ({visible})) \
             ORDER BY s.staging_id"
        );

        let records: Vec<StagedRowRecord> = with_conn!(self.pool, conn => {
            diesel::sql_query(sql).load(&mut conn).await
        })?;

        records
            .into_iter()
            .map(|r| {
                let values = match serde_json::from_str::<Value>(&r.payload) {
                    Ok(Value::Object(map)) => map,
                    Ok(_) => serde_json::Map::new(),
                    Err(e) => return Err(to_diesel_error(e)),
                };
                Ok(StagedRow {
                    staging_id: r.staging_id,
                    batch_id: r.batch_id,
                    upload_timestamp: r.upload_timestamp,
                    values,
                })
            })
            .collect()
    }

    /// Row count per batch id for a staging table.
    pub async fn count_by_batch(&self, table: &str) -> Result<HashMap<String, i64>, DbError> {
        #[derive(diesel::QueryableByName)]
        struct BatchCount {
            #[diesel(sql_type = Text)]
            batch_id: String,
            #[diesel(sql_type = BigInt)]
            n: i64,
        }

        let stmt = Query::select()
            .column(Alias::new("batch_id"))
            .expr_as(Expr::col(Asterisk).count(), Alias::new("n"))
            .from(Alias::new(table))
            .group_by_col(Alias::new("batch_id"))
            .to_owned();
        let sql = build_sql(&self.pool, &stmt);
        let rows: Vec<BatchCount> = with_conn!(self.pool, conn => {
            diesel::sql_query(sql).load(&mut conn).await
        })?;
        Ok(rows.into_iter().map(|r| (r.batch_id, r.n)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatasetKind;
    use crate::repository::test_support::{lineage, row_chunks, test_context};
    use crate::staging::datasets::schema_for;

    fn ratepayer_row(n: i64, ba: Option<&str>, name: &str) -> StagingRow {
        StagingRow {
            row_number: n,
            raw_line: format!("{},{},COMPANY", ba.unwrap_or(""), name),
            cells: vec![
                Cell::Text(ba.map(str::to_string)),
                Cell::Text(Some(name.to_string())),
                Cell::Text(Some("COMPANY".to_string())),
            ],
        }
    }

    #[tokio::test]
    async fn test_chunked_insert_and_stats() {
        let (_dir, ctx) = test_context().await;
        let schema = schema_for(DatasetKind::Ratepayers);
        let lineage = lineage("B1", "ratepayers");
        ctx.batches().create(&lineage).await.unwrap();

        let rows = vec![
            ratepayer_row(1, Some("BA1"), "O'Neill Ltd"),
            ratepayer_row(2, Some("BA2"), "Acme"),
            ratepayer_row(3, Some("BA2"), "Acme Again"),
            ratepayer_row(4, None, "Nobody"),
        ];
        let mut chunks = row_chunks(rows, 3);
        let written = ctx
            .staging()
            .insert_chunked("stg_ratepayers", schema, &lineage, &mut chunks)
            .await
            .unwrap();
        assert_eq!(written, 4);

        let stats = ctx
            .staging()
            .batch_stats("stg_ratepayers", schema, "B1", None)
            .await
            .unwrap();
        assert_eq!(stats.total_rows, 4);
        assert_eq!(stats.null_keys, 1);
        assert_eq!(stats.duplicate_keys, 1);
        assert_eq!(stats.bbox, None);
    }

    #[tokio::test]
    async fn test_reader_error_rolls_back_earlier_chunks() {
        let (_dir, ctx) = test_context().await;
        let schema = schema_for(DatasetKind::Ratepayers);
        let lineage = lineage("B1", "ratepayers");
        ctx.batches().create(&lineage).await.unwrap();

        let (tx, mut chunks) = tokio::sync::mpsc::channel(4);
        tx.send(Ok(vec![ratepayer_row(1, Some("BA1"), "Acme")]))
            .await
            .unwrap();
        tx.send(Err("line 9: unreadable".to_string())).await.unwrap();
        drop(tx);

        assert!(ctx
            .staging()
            .insert_chunked("stg_ratepayers", schema, &lineage, &mut chunks)
            .await
            .is_err());
        assert!(ctx
            .staging()
            .count_by_batch("stg_ratepayers")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_rows_invisible_until_verified() {
        let (_dir, ctx) = test_context().await;
        let schema = schema_for(DatasetKind::Ratepayers);
        let lineage = lineage("B1", "ratepayers");
        ctx.batches().create(&lineage).await.unwrap();
        ctx.staging()
            .insert_one("stg_ratepayers", schema, &lineage, &ratepayer_row(1, Some("BA1"), "Acme"))
            .await
            .unwrap();

        assert!(ctx
            .staging()
            .load_visible("stg_ratepayers", schema)
            .await
            .unwrap()
            .is_empty());

        ctx.batches()
            .transition("B1", BatchStatus::Loaded)
            .await
            .unwrap();
        ctx.batches()
            .transition("B1", BatchStatus::Verified)
            .await
            .unwrap();

        let rows = ctx
            .staging()
            .load_visible("stg_ratepayers", schema)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text("BA_REFERENCE").as_deref(), Some("BA1"));
        assert_eq!(rows[0].text("RATEPAYER_NAME").as_deref(), Some("Acme"));
    }

    #[tokio::test]
    async fn test_delete_batch() {
        let (_dir, ctx) = test_context().await;
        let schema = schema_for(DatasetKind::Ratepayers);
        let lineage = lineage("B1", "ratepayers");
        ctx.batches().create(&lineage).await.unwrap();
        ctx.staging()
            .insert_chunked(
                "stg_ratepayers",
                schema,
                &lineage,
                &mut row_chunks(vec![ratepayer_row(1, Some("BA1"), "Acme")], 10),
            )
            .await
            .unwrap();

        assert_eq!(
            ctx.staging()
                .delete_batch("stg_ratepayers", "B1")
                .await
                .unwrap(),
            1
        );
        assert!(ctx
            .staging()
            .count_by_batch("stg_ratepayers")
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_staged_row_accessors() {
        let row = StagedRow::from_parts(
            1,
            "2024-01-01T00:00:00+00:00",
            serde_json::json!({"uprn": " 100 ", "x_coordinate": 530000.5, "town": "", "y": "12.5"}),
        );
        assert_eq!(row.text("UPRN").as_deref(), Some("100"));
        assert_eq!(row.real("X_COORDINATE"), Some(530000.5));
        assert_eq!(row.text("TOWN"), None);
        assert_eq!(row.real("Y"), Some(12.5));
        assert_eq!(row.real("MISSING"), None);
    }
}
