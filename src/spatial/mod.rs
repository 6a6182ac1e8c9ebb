//! Spatial linking of address points to postcodes, places and map features.
//!
//! All coordinates are EPSG:27700 metres, so distances are plain Euclidean.

pub mod index;
pub mod layers;
pub mod linker;

pub use index::{GridIndex, Point};
pub use linker::{nearest_links, LinkSummary, LinkThresholds, SpatialLinker};
