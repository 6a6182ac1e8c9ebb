//! Duplicate detection and preferred-record selection.

pub mod resolver;
pub mod union_find;

pub use resolver::{resolve, DedupSettings, DuplicateResolver};
pub use union_find::UnionFind;
