//! Staging loader: one delimited file in, one lineage-tagged batch out.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::datasets::{schema_for, ColumnType, DatasetSchema};
use super::ids::{new_batch_id, new_session_id, validate_identifier};
use super::reader::{DelimitedReader, RawRecord};
use super::verify;
use super::writer::{DbStagingWriter, StagingWriter};
use crate::error::{GazetteerError, Result};
use crate::models::{BatchStatus, DataSource, Lineage, LoadStrategy, RowCounts, VerificationReport};
use crate::registry::SourceRegistry;
use crate::repository::{Cell, DbContext, RowChunk, RowChunks, StagingRow};

/// `[loader]` settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    /// Rows per chunk read from the file and per multi-row INSERT.
    pub bulk_chunk_size: usize,
    /// How many examples of each row-level problem to log.
    pub sample_errors: usize,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            bulk_chunk_size: 500,
            sample_errors: 5,
        }
    }
}

/// Caller-supplied lineage for one load.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub client_name: String,
    /// Defaults to `user@host` of the current process.
    pub upload_user: Option<String>,
    pub session_id: Option<String>,
    pub batch_id: Option<String>,
    /// Overrides the source's delimiter.
    pub delimiter: Option<char>,
}

/// Counters of one load.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub rows_seen: i64,
    pub rows_loaded: i64,
    /// Rows dropped for an empty natural key.
    pub rows_skipped: i64,
    /// Undecodable rows plus rows the row-by-row path could not write.
    pub rows_errored: i64,
    pub rows_padded: i64,
    pub rows_truncated: i64,
    pub numeric_nulls: i64,
    pub strategy: Option<LoadStrategy>,
    /// Why the bulk path was abandoned, if it was.
    pub bulk_error: Option<String>,
    pub verification: Option<VerificationReport>,
}

impl LoadReport {
    pub fn counts(&self) -> RowCounts {
        RowCounts {
            seen: self.rows_seen,
            loaded: self.rows_loaded,
            skipped: self.rows_skipped,
            errored: self.rows_errored,
        }
    }
}

/// Result of a successful load: the batch is `verified`.
#[derive(Debug, Clone, Serialize)]
pub struct LoadOutcome {
    pub batch_id: String,
    pub session_id: String,
    pub source_name: String,
    pub status: BatchStatus,
    pub rows_loaded: i64,
    pub report: LoadReport,
}

/// Called with the number of data rows parsed so far.
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

const PROGRESS_EVERY: u64 = 10_000;

/// Parsed chunks buffered between the reading thread and the writer.
const CHUNKS_IN_FLIGHT: usize = 4;

pub struct StagingLoader {
    ctx: DbContext,
    registry: SourceRegistry,
    settings: LoaderSettings,
    writer: Box<dyn StagingWriter>,
    progress: Option<ProgressCallback>,
}

impl StagingLoader {
    pub fn new(ctx: DbContext, registry: SourceRegistry, settings: LoaderSettings) -> Self {
        let writer = DbStagingWriter::new(ctx.staging());
        Self {
            ctx,
            registry,
            settings,
            writer: Box::new(writer),
            progress: None,
        }
    }

    /// Replace the write strategy.
    pub fn with_writer(mut self, writer: Box<dyn StagingWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Load one file into its source's staging table.
    ///
    /// `source_name` may be omitted, in which case the file name is matched
    /// against the registry's patterns. The batch is `verified` on success;
    /// on any error after the batch was recorded it is marked `failed`.
    pub async fn load(
        &self,
        path: &Path,
        source_name: Option<&str>,
        options: LoadOptions,
    ) -> Result<LoadOutcome> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let source = match source_name {
            Some(name) => self.registry.require(name)?,
            None => self.registry.detect(&file_name)?,
        };

        let now = Utc::now();
        let batch_id = match options.batch_id.as_deref() {
            Some(id) => validate_identifier(id)?.to_string(),
            None => new_batch_id(now),
        };
        let session_id = match options.session_id.as_deref() {
            Some(id) => validate_identifier(id)?.to_string(),
            None => new_session_id(now),
        };
        if self.ctx.batches().exists(&batch_id).await? {
            return Err(GazetteerError::DuplicateBatch(batch_id));
        }

        let metadata = tokio::fs::metadata(path).await?;
        let lineage = Lineage {
            batch_id: batch_id.clone(),
            session_id: session_id.clone(),
            client_name: options.client_name.clone(),
            source_name: source.name.clone(),
            source_file: file_name,
            file_size: metadata.len() as i64,
            file_modified: metadata
                .modified()
                .ok()
                .map(|t| DateTime::<Utc>::from(t).to_rfc3339()),
            upload_user: options.upload_user.clone().unwrap_or_else(default_upload_user),
            upload_timestamp: now.to_rfc3339_opts(SecondsFormat::Micros, true),
        };

        self.ctx.batches().create(&lineage).await?;
        info!(
            "Batch {} received: {} -> {}",
            batch_id,
            lineage.source_file,
            source.staging_table()
        );

        let delimiter = options.delimiter.unwrap_or_else(|| source.delimiter());
        match self.ingest(path, source, &lineage, delimiter).await {
            Ok(report) => {
                info!(
                    "Batch {} verified: {} loaded, {} skipped, {} errored",
                    batch_id, report.rows_loaded, report.rows_skipped, report.rows_errored
                );
                Ok(LoadOutcome {
                    batch_id,
                    session_id,
                    source_name: source.name.clone(),
                    status: BatchStatus::Verified,
                    rows_loaded: report.rows_loaded,
                    report,
                })
            }
            Err(e) => {
                error!("Batch {} failed: {}", batch_id, e);
                if let Err(mark) = self.ctx.batches().fail(&batch_id, &e.to_string()).await {
                    warn!("Could not mark batch {} failed: {}", batch_id, mark);
                }
                Err(e)
            }
        }
    }

    async fn ingest(
        &self,
        path: &Path,
        source: &DataSource,
        lineage: &Lineage,
        delimiter: char,
    ) -> Result<LoadReport> {
        let schema = schema_for(source.dataset);
        let table = source.staging_table();
        let batch_id = lineage.batch_id.as_str();

        let (mut chunks, reader) = self
            .start_reader(path, schema, delimiter, self.progress.clone())
            .await?;
        let bulk = self
            .writer
            .write_bulk(&table, schema, lineage, &mut chunks)
            .await;
        drop(chunks);
        let mut report = join_reader(reader).await?;

        match bulk {
            Ok(written) => {
                report.rows_loaded = written as i64;
                report.strategy = Some(LoadStrategy::Bulk);
            }
            Err(e) => {
                warn!(
                    "Bulk load of batch {} failed, falling back to row-by-row: {}",
                    batch_id, e
                );
                report = self
                    .write_rows(path, &table, schema, lineage, delimiter)
                    .await?;
                report.bulk_error = Some(e.to_string());
                report.strategy = Some(LoadStrategy::RowByRow);
            }
        }

        let batches = self.ctx.batches();
        batches
            .record_load(batch_id, report.counts(), report.strategy)
            .await?;
        batches.transition(batch_id, BatchStatus::Loaded).await?;

        let stats = self
            .ctx
            .staging()
            .batch_stats(
                &table,
                schema,
                batch_id,
                schema.coordinate_columns(source.coordinate_system),
            )
            .await?;
        let verification = verify::evaluate(&stats, report.rows_seen, source.coordinate_system);
        batches.record_verification(batch_id, &verification).await?;
        report.verification = Some(verification.clone());

        if let Some(reason) = verification.failure {
            return Err(GazetteerError::VerificationFailed {
                batch_id: batch_id.to_string(),
                reason,
            });
        }
        batches.transition(batch_id, BatchStatus::Verified).await?;
        Ok(report)
    }

    /// Open the file on a blocking thread and stream its rows in chunks.
    async fn start_reader(
        &self,
        path: &Path,
        schema: &'static DatasetSchema,
        delimiter: char,
        progress: Option<ProgressCallback>,
    ) -> Result<(RowChunks, JoinHandle<Result<LoadReport>>)> {
        let path = path.to_path_buf();
        let settings = self.settings;
        let parser = tokio::task::spawn_blocking(move || {
            RowParser::open(&path, schema, delimiter, settings, progress)
        })
        .await
        .map_err(std::io::Error::other)??;

        let (tx, rx) = mpsc::channel(CHUNKS_IN_FLIGHT);
        let chunk_size = settings.bulk_chunk_size.max(1);
        let reader = tokio::task::spawn_blocking(move || stream_chunks(parser, chunk_size, tx));
        Ok((rx, reader))
    }

    /// Degraded path: re-read the file and write one statement per row,
    /// failures counted.
    async fn write_rows(
        &self,
        path: &Path,
        table: &str,
        schema: &'static DatasetSchema,
        lineage: &Lineage,
        delimiter: char,
    ) -> Result<LoadReport> {
        let (mut chunks, reader) = self.start_reader(path, schema, delimiter, None).await?;
        let mut last_error = None;
        let mut loaded = 0i64;
        let mut failed = 0i64;

        while let Some(Ok(rows)) = chunks.recv().await {
            for row in &rows {
                match self.writer.write_row(table, schema, lineage, row).await {
                    Ok(()) => loaded += 1,
                    Err(e) => {
                        failed += 1;
                        if failed as usize <= self.settings.sample_errors {
                            warn!(
                                "Batch {} row {}: insert failed: {}",
                                lineage.batch_id, row.row_number, e
                            );
                        }
                        last_error = Some(e.to_string());
                    }
                }
            }
        }
        drop(chunks);

        let mut report = match join_reader(reader).await {
            Ok(report) => report,
            Err(e) => {
                self.writer.discard(table, &lineage.batch_id).await?;
                return Err(e);
            }
        };

        if loaded == 0 && failed > 0 {
            let removed = self.writer.discard(table, &lineage.batch_id).await?;
            debug!("Discarded {} rows of batch {}", removed, lineage.batch_id);
            return Err(GazetteerError::BulkLoadFailure {
                batch_id: lineage.batch_id.clone(),
                reason: last_error.unwrap_or_else(|| "row-by-row load wrote nothing".to_string()),
            });
        }

        report.rows_loaded = loaded;
        report.rows_errored += failed;
        Ok(report)
    }
}

async fn join_reader(reader: JoinHandle<Result<LoadReport>>) -> Result<LoadReport> {
    reader.await.map_err(std::io::Error::other)?
}

/// Send `parser`'s chunks to the writer until the file ends or the writer
/// hangs up. A read error is forwarded so the writer rolls back.
fn stream_chunks(
    mut parser: RowParser,
    chunk_size: usize,
    tx: mpsc::Sender<RowChunk>,
) -> Result<LoadReport> {
    loop {
        match parser.next_chunk(chunk_size) {
            Ok(Some(rows)) => {
                if tx.blocking_send(Ok(rows)).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = tx.blocking_send(Err(e.to_string()));
                return Err(e);
            }
        }
    }
    Ok(parser.finish())
}

/// `user@host` of the current process.
pub fn default_upload_user() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    match hostname::get() {
        Ok(host) => format!("{}@{}", user, host.to_string_lossy()),
        Err(_) => user,
    }
}

/// Typed data rows of one file, read a chunk at a time.
struct RowParser {
    reader: DelimitedReader<BufReader<File>>,
    schema: &'static DatasetSchema,
    file_label: String,
    sample: i64,
    progress: Option<ProgressCallback>,
    report: LoadReport,
}

impl RowParser {
    /// Open `path` and check its header row.
    fn open(
        path: &Path,
        schema: &'static DatasetSchema,
        delimiter: char,
        settings: LoaderSettings,
        progress: Option<ProgressCallback>,
    ) -> Result<Self> {
        let file_label = path.display().to_string();
        let mut reader = DelimitedReader::new(BufReader::new(File::open(path)?), delimiter);

        let header = match reader.next_record()? {
            Some(record) => record.fields.map_err(|reason| GazetteerError::HeaderMismatch {
                file: file_label.clone(),
                dataset: schema.kind.as_str().to_string(),
                detail: reason,
            })?,
            None => {
                return Err(GazetteerError::HeaderMismatch {
                    file: file_label,
                    dataset: schema.kind.as_str().to_string(),
                    detail: "file has no header row".to_string(),
                })
            }
        };
        schema
            .check_header(&header)
            .map_err(|detail| GazetteerError::HeaderMismatch {
                file: file_label.clone(),
                dataset: schema.kind.as_str().to_string(),
                detail,
            })?;

        Ok(Self {
            reader,
            schema,
            file_label,
            sample: settings.sample_errors as i64,
            progress,
            report: LoadReport::default(),
        })
    }

    /// Up to `size` typed rows, or `None` once the file is exhausted.
    fn next_chunk(&mut self, size: usize) -> Result<Option<Vec<StagingRow>>> {
        let mut rows = Vec::with_capacity(size);
        while rows.len() < size {
            let Some(record) = self.reader.next_record()? else {
                break;
            };
            if let Some(row) = self.parse_record(record) {
                rows.push(row);
            }
        }
        Ok((!rows.is_empty()).then_some(rows))
    }

    fn parse_record(&mut self, record: RawRecord) -> Option<StagingRow> {
        let schema = self.schema;
        let report = &mut self.report;
        report.rows_seen += 1;
        let row_number = report.rows_seen;

        if let Some(ref progress) = self.progress {
            if row_number as u64 % PROGRESS_EVERY == 0 {
                progress(row_number as u64);
            }
        }

        let mut fields = match record.fields {
            Ok(fields) => fields,
            Err(reason) => {
                report.rows_errored += 1;
                if report.rows_errored <= self.sample {
                    warn!("{} line {}: malformed row: {}", self.file_label, record.line, reason);
                }
                return None;
            }
        };

        if fields.len() < schema.width() {
            report.rows_padded += 1;
            fields.resize(schema.width(), String::new());
        } else if fields.len() > schema.width() {
            report.rows_truncated += 1;
            fields.truncate(schema.width());
        }

        if fields[schema.key_index()].trim().is_empty() {
            report.rows_skipped += 1;
            if report.rows_skipped <= self.sample {
                warn!(
                    "{} line {}: missing key {}, row skipped",
                    self.file_label, record.line, schema.key
                );
            }
            return None;
        }

        let mut cells = Vec::with_capacity(schema.width());
        for (value, column) in fields.iter().zip(schema.columns) {
            let value = value.trim();
            cells.push(match column.ty {
                ColumnType::Text => Cell::Text((!value.is_empty()).then(|| value.to_string())),
                ColumnType::Real if value.is_empty() => Cell::Real(None),
                ColumnType::Real => match value.parse::<f64>() {
                    Ok(v) if v.is_finite() => Cell::Real(Some(v)),
                    _ => {
                        report.numeric_nulls += 1;
                        if report.numeric_nulls <= self.sample {
                            warn!(
                                "{} line {}: {} value '{}' is not numeric, stored as NULL",
                                self.file_label, record.line, column.name, value
                            );
                        }
                        Cell::Real(None)
                    }
                },
            });
        }

        Some(StagingRow {
            row_number,
            raw_line: record.raw,
            cells,
        })
    }

    /// Final counters, with totals logged for problems past the sample.
    fn finish(self) -> LoadReport {
        for (count, what) in [
            (self.report.rows_errored, "malformed"),
            (self.report.rows_skipped, "missing-key"),
            (self.report.numeric_nulls, "non-numeric"),
        ] {
            if count > self.sample {
                warn!("{}: {} {} values in total", self.file_label, count, what);
            }
        }
        self.report
    }
}
