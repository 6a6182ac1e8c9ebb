//! Consolidation of staging data into the master gazetteer.

pub mod engine;
pub mod enrich;
pub mod fields;
pub mod postcode;

pub use engine::{KeyAliases, MergeEngine, MergePlan};
pub use postcode::normalize_postcode;
