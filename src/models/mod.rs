//! Data models for the gazetteer pipeline.

mod batch;
mod link;
mod master;
mod source;
mod summary;

pub use batch::{
    Batch, BatchStatus, BoundingBox, Lineage, LoadStrategy, RowCounts, VerificationReport,
};
pub use link::{Link, LinkKind, LinkType};
pub use master::{MasterFields, MasterKey, MasterRecord, MergedRecord};
pub use source::{CoordinateSystem, DataSource, DatasetKind, SourceType, UpdateFrequency};
pub use summary::{RunSummary, Statistics};
