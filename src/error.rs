//! Pipeline error types.
//!
//! Row-level problems (malformed rows, missing join keys) never surface here;
//! they are counted in run summaries. These variants abort a batch or a run.

use thiserror::Error;

use crate::models::BatchStatus;

pub type Result<T, E = GazetteerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum GazetteerError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown data source '{0}'")]
    UnknownSource(String),

    #[error("File '{file}' matches several sources ({candidates}); pass --source explicitly")]
    AmbiguousSource { file: String, candidates: String },

    #[error("Invalid source registry: {0}")]
    InvalidRegistry(String),

    #[error("Source '{name}' is referenced by existing batches and differs from the stored definition; re-run with --update")]
    RegistryConflict { name: String },

    #[error("Header of '{file}' does not match the {dataset} schema: {detail}")]
    HeaderMismatch {
        file: String,
        dataset: String,
        detail: String,
    },

    #[error("Bulk load of batch {batch_id} failed: {reason}")]
    BulkLoadFailure { batch_id: String, reason: String },

    #[error("Batch {batch_id} failed verification: {reason}")]
    VerificationFailed { batch_id: String, reason: String },

    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    #[error("Batch id '{0}' already exists")]
    DuplicateBatch(String),

    #[error("Invalid identifier '{0}' (allowed: letters, digits, '_', '.', ':', '-', up to 64 chars)")]
    InvalidIdentifier(String),

    #[error("Batch {batch_id} cannot move from {from} to {to}")]
    InvalidTransition {
        batch_id: String,
        from: BatchStatus,
        to: BatchStatus,
    },

    #[error("Migration '{name}' was applied with hash {applied_hash} but now hashes to {new_hash}; resolve manually")]
    MigrationConflict {
        name: String,
        applied_hash: String,
        new_hash: String,
    },

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("{0} pending migration(s); run 'gaz migrate' first")]
    PendingMigrations(usize),

    #[error("Run lock '{name}' is held by {holder} since {since}")]
    LockHeld {
        name: String,
        holder: String,
        since: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}
