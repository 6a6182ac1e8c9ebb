//! Staging batch models.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of one ingest run.
///
/// `received -> loaded -> verified -> (merged | failed)`. Any state before
/// `merged` may fall to `failed`; `failed` and `merged` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Received,
    Loaded,
    Verified,
    Merged,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Loaded => "loaded",
            Self::Verified => "verified",
            Self::Merged => "merged",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "received" => Some(Self::Received),
            "loaded" => Some(Self::Loaded),
            "verified" => Some(Self::Verified),
            "merged" => Some(Self::Merged),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        matches!(
            (self, next),
            (Received, Loaded)
                | (Loaded, Verified)
                | (Verified, Merged)
                | (Received, Failed)
                | (Loaded, Failed)
                | (Verified, Failed)
        )
    }

    /// Rows of batches in these states are visible to linker and merge.
    pub fn is_visible(&self) -> bool {
        matches!(self, Self::Verified | Self::Merged)
    }

    pub const VISIBLE: [&'static str; 2] = ["verified", "merged"];
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which write tier produced a batch's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStrategy {
    Bulk,
    RowByRow,
}

impl LoadStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bulk => "bulk",
            Self::RowByRow => "row_by_row",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "bulk" => Some(Self::Bulk),
            "row_by_row" => Some(Self::RowByRow),
            _ => None,
        }
    }
}

/// Lineage stamped on every staging row of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lineage {
    pub batch_id: String,
    pub session_id: String,
    pub client_name: String,
    pub source_name: String,
    pub source_file: String,
    pub file_size: i64,
    pub file_modified: Option<String>,
    pub upload_user: String,
    pub upload_timestamp: String,
}

/// Coordinate extent of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn of_point(x: f64, y: f64) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    pub fn extend(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    pub fn within(&self, outer: &BoundingBox) -> bool {
        self.min_x >= outer.min_x
            && self.min_y >= outer.min_y
            && self.max_x <= outer.max_x
            && self.max_y <= outer.max_y
    }
}

/// Post-load checks for gross format errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub total_rows: i64,
    pub null_keys: i64,
    pub duplicate_keys: i64,
    pub bbox: Option<BoundingBox>,
    /// Reason the batch was rejected, if it was.
    pub failure: Option<String>,
}

/// Row counters of one load.
///
/// `skipped` counts rows dropped for a missing key; `errored` counts
/// undecodable rows and rows the row-by-row writer could not insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCounts {
    pub seen: i64,
    pub loaded: i64,
    pub skipped: i64,
    pub errored: i64,
}

/// One ingest run as recorded in `staging_batches`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub lineage: Lineage,
    pub status: BatchStatus,
    pub counts: RowCounts,
    pub load_strategy: Option<LoadStrategy>,
    pub verification: Option<VerificationReport>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    pub fn batch_id(&self) -> &str {
        &self.lineage.batch_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(BatchStatus::Received.can_transition_to(BatchStatus::Loaded));
        assert!(BatchStatus::Loaded.can_transition_to(BatchStatus::Verified));
        assert!(BatchStatus::Verified.can_transition_to(BatchStatus::Merged));
    }

    #[test]
    fn test_terminal_states() {
        for next in [
            BatchStatus::Received,
            BatchStatus::Loaded,
            BatchStatus::Verified,
            BatchStatus::Merged,
            BatchStatus::Failed,
        ] {
            assert!(!BatchStatus::Failed.can_transition_to(next));
            assert!(!BatchStatus::Merged.can_transition_to(next));
        }
    }

    #[test]
    fn test_no_skipping_verification() {
        assert!(!BatchStatus::Loaded.can_transition_to(BatchStatus::Merged));
        assert!(!BatchStatus::Received.can_transition_to(BatchStatus::Verified));
    }

    #[test]
    fn test_visibility() {
        assert!(!BatchStatus::Received.is_visible());
        assert!(!BatchStatus::Loaded.is_visible());
        assert!(BatchStatus::Verified.is_visible());
        assert!(BatchStatus::Merged.is_visible());
        assert!(!BatchStatus::Failed.is_visible());
    }

    #[test]
    fn test_bbox_extend() {
        let mut bbox = BoundingBox::of_point(10.0, 20.0);
        bbox.extend(5.0, 30.0);
        assert_eq!(bbox.min_x, 5.0);
        assert_eq!(bbox.max_y, 30.0);
        assert!(bbox.within(&BoundingBox {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 100.0,
            max_y: 100.0
        }));
    }
}
