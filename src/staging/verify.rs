//! Post-load verification of a batch.

use crate::models::{BoundingBox, CoordinateSystem, VerificationReport};
use crate::repository::BatchStats;

/// Plausible extent of Great Britain in EPSG:27700 metres.
pub const BNG_EXTENT: BoundingBox = BoundingBox {
    min_x: 0.0,
    min_y: 0.0,
    max_x: 700_000.0,
    max_y: 1_300_000.0,
};

/// Plausible extent in WGS84, as (longitude, latitude).
pub const WGS84_EXTENT: BoundingBox = BoundingBox {
    min_x: -9.0,
    min_y: 49.0,
    max_x: 2.5,
    max_y: 61.0,
};

/// Judge a loaded batch. Only gross format errors fail it: nothing loaded
/// from a file that had rows, or coordinates outside the plausible range of
/// the declared system.
pub fn evaluate(stats: &BatchStats, rows_seen: i64, crs: CoordinateSystem) -> VerificationReport {
    let mut report = VerificationReport {
        total_rows: stats.total_rows,
        null_keys: stats.null_keys,
        duplicate_keys: stats.duplicate_keys,
        bbox: stats.bbox,
        failure: None,
    };

    if stats.total_rows == 0 && rows_seen > 0 {
        report.failure = Some(format!(
            "no rows loaded from a file with {} data rows",
            rows_seen
        ));
        return report;
    }

    let extent = match crs {
        CoordinateSystem::BritishNationalGrid => Some(BNG_EXTENT),
        CoordinateSystem::Wgs84 => Some(WGS84_EXTENT),
        CoordinateSystem::None => None,
    };
    if let (Some(bbox), Some(extent)) = (stats.bbox, extent) {
        if !bbox.within(&extent) {
            report.failure = Some(format!(
                "coordinates [{}, {}] - [{}, {}] fall outside the plausible {} range",
                bbox.min_x,
                bbox.min_y,
                bbox.max_x,
                bbox.max_y,
                crs.as_str()
            ));
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(total: i64, bbox: Option<BoundingBox>) -> BatchStats {
        BatchStats {
            total_rows: total,
            null_keys: 0,
            duplicate_keys: 0,
            bbox,
        }
    }

    #[test]
    fn test_empty_file_is_fine_but_all_rows_lost_is_not() {
        assert!(evaluate(&stats(0, None), 0, CoordinateSystem::None)
            .failure
            .is_none());
        assert!(evaluate(&stats(0, None), 10, CoordinateSystem::None)
            .failure
            .is_some());
    }

    #[test]
    fn test_bbox_checked_against_declared_system() {
        let london = BoundingBox {
            min_x: 520_000.0,
            min_y: 170_000.0,
            max_x: 540_000.0,
            max_y: 190_000.0,
        };
        assert!(
            evaluate(&stats(5, Some(london)), 5, CoordinateSystem::BritishNationalGrid)
                .failure
                .is_none()
        );

        // Eastings and northings swapped into lat/lon columns.
        let report = evaluate(&stats(5, Some(london)), 5, CoordinateSystem::Wgs84);
        assert!(report.failure.unwrap().contains("EPSG:4326"));

        let swapped = BoundingBox::of_point(51.5, -0.12);
        assert!(
            evaluate(&stats(1, Some(swapped)), 1, CoordinateSystem::BritishNationalGrid)
                .failure
                .is_some()
        );
    }
}
