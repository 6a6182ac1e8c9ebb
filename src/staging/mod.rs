//! Staging ingestion: raw delimited extracts into per-source tables.
//!
//! Every row carries the lineage of the batch that wrote it. A batch only
//! becomes visible downstream once it reaches `verified`.

pub mod datasets;
pub mod ids;
pub mod loader;
pub mod reader;
pub mod verify;
pub mod writer;

pub use datasets::{schema_for, ColumnDef, ColumnType, DatasetSchema, LINEAGE_COLUMNS};
pub use loader::{
    LoadOptions, LoadOutcome, LoadReport, LoaderSettings, ProgressCallback, StagingLoader,
};
pub use writer::{DbStagingWriter, StagingWriter};
