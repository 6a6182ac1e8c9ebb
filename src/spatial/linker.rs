//! Spatial linker: regenerates the link tables from visible staging data.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::index::{GridIndex, Point};
use super::layers::{planar_point, point_layer, postcode_rows};
use crate::error::{GazetteerError, Result};
use crate::models::{DatasetKind, Link, LinkKind, LinkType};
use crate::registry::SourceRegistry;
use crate::repository::{DbContext, LINKS_LOCK};

/// `[links]` distance thresholds in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkThresholds {
    pub postcode_meters: f64,
    pub place_name_meters: f64,
    pub map_feature_meters: f64,
}

impl Default for LinkThresholds {
    fn default() -> Self {
        Self {
            postcode_meters: 1000.0,
            place_name_meters: 5000.0,
            map_feature_meters: 100.0,
        }
    }
}

impl LinkThresholds {
    /// Threshold of a spatial link kind; attribute links have none.
    pub fn for_kind(&self, kind: LinkKind) -> Option<f64> {
        match kind {
            LinkKind::UprnPostcode => Some(self.postcode_meters),
            LinkKind::UprnPlaceName => Some(self.place_name_meters),
            LinkKind::UprnMapFeature => Some(self.map_feature_meters),
            LinkKind::PostcodeAdminArea => None,
        }
    }
}

/// Outcome of linking one kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkSummary {
    pub kind: LinkKind,
    /// Candidate rows on the `from` side.
    pub from_rows: usize,
    pub linked: usize,
    /// Rows with no target within the threshold.
    pub unmatched: usize,
}

/// Link every point in `from` to its nearest target within `threshold`.
///
/// Output is ordered by `from` id.
pub fn nearest_links(from: &[Point], targets: Vec<Point>, threshold: f64) -> Vec<Link> {
    let index = GridIndex::build(targets, threshold);
    let mut links: Vec<Link> = from
        .iter()
        .filter_map(|p| {
            index.nearest(p.x, p.y, threshold).map(|(target, d)| Link {
                from_id: p.id.clone(),
                to_id: target.id.clone(),
                distance_meters: d,
                link_type: LinkType::Spatial,
            })
        })
        .collect();
    links.sort_by(|a, b| a.from_id.cmp(&b.from_id));
    links
}

pub struct SpatialLinker {
    ctx: DbContext,
    registry: SourceRegistry,
    thresholds: LinkThresholds,
}

impl SpatialLinker {
    pub fn new(ctx: DbContext, registry: SourceRegistry, thresholds: LinkThresholds) -> Self {
        Self {
            ctx,
            registry,
            thresholds,
        }
    }

    /// Rebuild the given link kinds (all of them when `kinds` is empty)
    /// while holding the links lock.
    pub async fn run(&self, kinds: &[LinkKind]) -> Result<Vec<LinkSummary>> {
        let kinds: Vec<LinkKind> = if kinds.is_empty() {
            LinkKind::ALL.to_vec()
        } else {
            kinds.to_vec()
        };
        self.ctx
            .locks()
            .hold(LINKS_LOCK, async {
                let needs_addresses = kinds.iter().any(|k| k.link_type() == LinkType::Spatial);
                let addresses = if needs_addresses {
                    point_layer(&self.ctx, &self.registry, DatasetKind::AddressPoints).await?
                } else {
                    Vec::new()
                };
                debug!("Loaded {} address points", addresses.len());

                let mut summaries = Vec::with_capacity(kinds.len());
                for kind in kinds {
                    summaries.push(self.link_kind(kind, &addresses).await?);
                }
                Ok::<_, GazetteerError>(summaries)
            })
            .await
    }

    async fn link_kind(&self, kind: LinkKind, addresses: &[Point]) -> Result<LinkSummary> {
        let (from_rows, links) = match kind {
            LinkKind::UprnPostcode => {
                let targets = self.postcode_points().await?;
                let threshold = self.thresholds.postcode_meters;
                (addresses.len(), nearest_links(addresses, targets, threshold))
            }
            LinkKind::UprnPlaceName => {
                let targets =
                    point_layer(&self.ctx, &self.registry, DatasetKind::PlaceNames).await?;
                let threshold = self.thresholds.place_name_meters;
                (addresses.len(), nearest_links(addresses, targets, threshold))
            }
            LinkKind::UprnMapFeature => {
                let targets =
                    point_layer(&self.ctx, &self.registry, DatasetKind::MapFeatures).await?;
                let threshold = self.thresholds.map_feature_meters;
                (addresses.len(), nearest_links(addresses, targets, threshold))
            }
            LinkKind::PostcodeAdminArea => self.admin_area_links().await?,
        };

        let linked = self.ctx.links().replace(kind, &links).await?;
        let summary = LinkSummary {
            kind,
            from_rows,
            linked,
            unmatched: from_rows.saturating_sub(linked),
        };
        info!(
            "Linked {}: {} of {} rows ({} beyond threshold)",
            kind.as_str(),
            summary.linked,
            summary.from_rows,
            summary.unmatched
        );
        Ok(summary)
    }

    /// Live postcode centroids, identified by the published postcode.
    async fn postcode_points(&self) -> Result<Vec<Point>> {
        let rows = postcode_rows(&self.ctx, &self.registry).await?;
        Ok(rows
            .values()
            .filter_map(|row| {
                let pcds = row.text("PCDS")?;
                planar_point(&pcds, row, DatasetKind::PostcodeDirectory)
            })
            .collect())
    }

    /// Postcode to local authority district, straight from the directory.
    async fn admin_area_links(&self) -> Result<(usize, Vec<Link>)> {
        let rows = postcode_rows(&self.ctx, &self.registry).await?;
        let mut links: Vec<Link> = rows
            .values()
            .filter_map(|row| {
                Some(Link {
                    from_id: row.text("PCDS")?,
                    to_id: row.text("LAD_CODE")?,
                    distance_meters: 0.0,
                    link_type: LinkType::Attribute,
                })
            })
            .collect();
        links.sort_by(|a, b| a.from_id.cmp(&b.from_id));
        Ok((rows.len(), links))
    }
}
