//! Counters reported by every pipeline stage.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Outcome of one merge, score or dedupe pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub seen: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deactivated: usize,
    /// Rows dropped for a missing key.
    pub skipped: usize,
    pub errored: usize,
}

impl RunSummary {
    /// Whether the pass wrote anything.
    pub fn wrote(&self) -> bool {
        self.inserted + self.updated + self.deactivated > 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seen {}, inserted {}, updated {}, unchanged {}, deactivated {}, skipped {}, errored {}",
            self.seen,
            self.inserted,
            self.updated,
            self.unchanged,
            self.deactivated,
            self.skipped,
            self.errored
        )
    }
}

/// Snapshot of the whole pipeline, printed by `gaz status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statistics {
    pub batches_by_status: BTreeMap<String, i64>,
    /// Staging rows per source.
    pub staging_rows: BTreeMap<String, i64>,
    pub master_total: i64,
    pub master_active: i64,
    pub duplicate_groups: i64,
    pub average_score: Option<f64>,
    pub links: BTreeMap<String, i64>,
    /// Names of run locks currently held.
    pub locks: Vec<String>,
}
