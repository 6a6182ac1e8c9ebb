//! Gazetteer - staging ingestion and consolidation of UK property datasets.
//!
//! Raw extracts are loaded into per-source staging tables, linked spatially,
//! folded into a single master gazetteer in source-priority order, scored for
//! completeness and grouped into duplicate clusters.

#![allow(clippy::should_implement_trait)]

pub mod cli;
pub mod config;
pub mod dedup;
pub mod error;
pub mod merge;
pub mod migrations;
pub mod models;
pub mod quality;
pub mod registry;
pub mod repository;
pub mod schema;
pub mod spatial;
pub mod staging;

pub use error::{GazetteerError, Result};
