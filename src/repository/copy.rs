//! PostgreSQL bulk path: `COPY ... FROM STDIN` into a staging table.
//!
//! A COPY is one statement, so a failure part-way leaves no rows behind.
//! Dropping the sink before `finish` aborts it.

#![cfg(feature = "postgres")]

use futures_util::{pin_mut, SinkExt};
use tokio_postgres::{CopyInSink, NoTls};
use tracing::error;

use super::pool::{DbError, PgPool};
use super::staging::{insert_columns, Cell, RowChunks, StagingRow};
use super::util::to_diesel_error;
use super::util::pg_to_diesel_error as pg_error;
use crate::models::Lineage;
use crate::staging::datasets::DatasetSchema;

/// Escape a value for COPY text format.
fn escape_copy_value(value: Option<&str>) -> String {
    match value {
        None => "\\N".to_string(),
        Some(s) => s
            .replace('\\', "\\\\")
            .replace('\t', "\\t")
            .replace('\n', "\\n")
            .replace('\r', "\\r"),
    }
}

fn copy_line(lineage: &Lineage, row: &StagingRow) -> String {
    let mut fields = vec![
        escape_copy_value(Some(&lineage.batch_id)),
        escape_copy_value(Some(&lineage.session_id)),
        escape_copy_value(Some(&lineage.client_name)),
        escape_copy_value(Some(&lineage.source_name)),
        escape_copy_value(Some(&lineage.source_file)),
        lineage.file_size.to_string(),
        escape_copy_value(lineage.file_modified.as_deref()),
        escape_copy_value(Some(&lineage.upload_user)),
        escape_copy_value(Some(&lineage.upload_timestamp)),
        row.row_number.to_string(),
        escape_copy_value(Some(&row.raw_line)),
    ];
    for cell in &row.cells {
        fields.push(match cell {
            Cell::Text(v) => escape_copy_value(v.as_deref()),
            Cell::Real(Some(v)) => v.to_string(),
            Cell::Real(None) => "\\N".to_string(),
        });
    }
    let mut line = fields.join("\t");
    line.push('\n');
    line
}

/// Stream every chunk into `table` with one COPY, one message per chunk.
/// Returns the rows written.
pub async fn copy_rows(
    pool: &PgPool,
    table: &str,
    schema: &DatasetSchema,
    lineage: &Lineage,
    chunks: &mut RowChunks,
) -> Result<usize, DbError> {
    let (client, connection) = tokio_postgres::connect(pool.database_url(), NoTls)
        .await
        .map_err(pg_error)?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("PostgreSQL connection error: {}", e);
        }
    });

    let sql = format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT text)",
        table,
        insert_columns(schema).join(", ")
    );
    let sink: CopyInSink<bytes::Bytes> = client.copy_in(&sql).await.map_err(pg_error)?;
    pin_mut!(sink);

    while let Some(chunk) = chunks.recv().await {
        let rows = chunk.map_err(to_diesel_error)?;
        let mut data = String::with_capacity(rows.len() * 256);
        for row in &rows {
            data.push_str(&copy_line(lineage, row));
        }
        sink.send(bytes::Bytes::from(data))
            .await
            .map_err(pg_error)?;
    }

    let written = sink.finish().await.map_err(pg_error)?;
    Ok(written as usize)
}
