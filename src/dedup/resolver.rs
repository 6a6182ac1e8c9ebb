//! Duplicate resolution over active master rows.
//!
//! Two rows are duplicates when they share a UPRN, share a BA reference, or
//! share a normalised postcode and lie within `max_distance_meters` of each
//! other. The relation is closed transitively with a union-find.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::union_find::UnionFind;
use crate::error::Result;
use crate::models::{MasterRecord, RunSummary};
use crate::repository::{DbContext, DedupAssignment, PIPELINE_LOCK};

/// `[dedup]` settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupSettings {
    pub max_distance_meters: f64,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            max_distance_meters: 10.0,
        }
    }
}

/// Ordering of group members, best first: highest score, then most
/// authoritative source, then oldest, then lowest id.
fn preference(a: &MasterRecord, b: &MasterRecord) -> Ordering {
    b.data_quality_score
        .cmp(&a.data_quality_score)
        .then_with(|| {
            let pa = a.merged.source_priority.unwrap_or(i32::MAX);
            let pb = b.merged.source_priority.unwrap_or(i32::MAX);
            pa.cmp(&pb)
        })
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

fn union_on<K, F>(uf: &mut UnionFind, rows: &[&MasterRecord], key_of: F)
where
    K: std::hash::Hash + Eq,
    F: Fn(&MasterRecord) -> Option<K>,
{
    let mut first_seen: HashMap<K, usize> = HashMap::new();
    for (i, row) in rows.iter().enumerate() {
        if let Some(key) = key_of(row) {
            match first_seen.get(&key) {
                Some(&j) => {
                    uf.union(i, j);
                }
                None => {
                    first_seen.insert(key, i);
                }
            }
        }
    }
}

/// Desired group and preferred flag for every row in `rows`.
///
/// Inactive rows get no group and are never preferred.
pub fn resolve(rows: &[MasterRecord], settings: &DedupSettings) -> Vec<DedupAssignment> {
    let active: Vec<&MasterRecord> = rows.iter().filter(|r| r.is_active).collect();
    let mut uf = UnionFind::new(active.len());

    union_on(&mut uf, &active, |r| r.fields().uprn.clone());
    union_on(&mut uf, &active, |r| r.fields().ba_reference.clone());

    let mut by_postcode: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, row) in active.iter().enumerate() {
        if let (Some(postcode), true) = (row.merged.postcode_normalized(), row.fields().has_coordinates()) {
            by_postcode.entry(postcode).or_default().push(i);
        }
    }
    for members in by_postcode.values() {
        for (n, &i) in members.iter().enumerate() {
            for &j in &members[n + 1..] {
                if planar_distance(active[i], active[j])
                    .is_some_and(|d| d <= settings.max_distance_meters)
                {
                    uf.union(i, j);
                }
            }
        }
    }

    let mut assignments = Vec::with_capacity(rows.len());
    for group in uf.groups() {
        let mut members: Vec<&MasterRecord> = group.iter().map(|&i| active[i]).collect();
        if members.len() == 1 {
            assignments.push(DedupAssignment {
                id: members[0].id,
                duplicate_group_id: None,
                is_preferred_record: true,
            });
            continue;
        }
        let group_id = members.iter().map(|r| r.id).min();
        members.sort_by(|a, b| preference(a, b));
        for (rank, row) in members.iter().enumerate() {
            assignments.push(DedupAssignment {
                id: row.id,
                duplicate_group_id: group_id,
                is_preferred_record: rank == 0,
            });
        }
    }

    assignments.extend(rows.iter().filter(|r| !r.is_active).map(|r| DedupAssignment {
        id: r.id,
        duplicate_group_id: None,
        is_preferred_record: false,
    }));
    assignments.sort_by_key(|a| a.id);
    assignments
}

fn planar_distance(a: &MasterRecord, b: &MasterRecord) -> Option<f64> {
    let (fa, fb) = (a.fields(), b.fields());
    let dx = fa.x_coordinate? - fb.x_coordinate?;
    let dy = fa.y_coordinate? - fb.y_coordinate?;
    Some(dx.hypot(dy))
}

pub struct DuplicateResolver {
    ctx: DbContext,
    settings: DedupSettings,
}

impl DuplicateResolver {
    pub fn new(ctx: DbContext, settings: DedupSettings) -> Self {
        Self { ctx, settings }
    }

    /// Resolve while holding the pipeline lock.
    pub async fn run(&self) -> Result<RunSummary> {
        self.ctx.locks().hold(PIPELINE_LOCK, self.pass()).await
    }

    /// One resolution pass, writing only rows whose group or flag changed.
    /// The caller is responsible for holding the pipeline lock.
    pub async fn pass(&self) -> Result<RunSummary> {
        let master = self.ctx.master();
        let rows = master.list_all().await?;
        let current: HashMap<i64, (Option<i64>, bool)> = rows
            .iter()
            .map(|r| (r.id, (r.duplicate_group_id, r.is_preferred_record)))
            .collect();

        let desired = resolve(&rows, &self.settings);
        let changed: Vec<DedupAssignment> = desired
            .into_iter()
            .filter(|a| current.get(&a.id) != Some(&(a.duplicate_group_id, a.is_preferred_record)))
            .collect();

        let updated = master.update_dedup(&changed).await?;
        let summary = RunSummary {
            seen: rows.len(),
            updated,
            unchanged: rows.len() - changed.len(),
            ..Default::default()
        };
        info!(
            "Dedupe: {} ({} groups)",
            summary,
            master.count_duplicate_groups().await?
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MasterFields, MergedRecord};
    use chrono::{TimeZone, Utc};

    fn row(id: i64, score: i32, fields: MasterFields) -> MasterRecord {
        MasterRecord {
            id,
            master_key: format!("K{}", id),
            merged: MergedRecord {
                fields,
                source_priority: Some(1),
                ..Default::default()
            },
            data_quality_score: score,
            duplicate_group_id: None,
            is_preferred_record: true,
            is_active: true,
            record_hash: String::new(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn uprn(v: &str) -> MasterFields {
        MasterFields {
            uprn: Some(v.into()),
            ..Default::default()
        }
    }

    fn located(postcode: &str, x: f64, y: f64) -> MasterFields {
        MasterFields {
            postcode: Some(postcode.into()),
            x_coordinate: Some(x),
            y_coordinate: Some(y),
            ..Default::default()
        }
    }

    fn by_id(assignments: &[DedupAssignment], id: i64) -> DedupAssignment {
        *assignments.iter().find(|a| a.id == id).unwrap()
    }

    #[test]
    fn test_transitive_groups_and_single_preferred() {
        let mut a = uprn("100");
        a.ba_reference = Some("BA1".into());
        let rows = vec![
            row(3, 40, a),
            row(5, 60, MasterFields {
                ba_reference: Some("BA1".into()),
                ..Default::default()
            }),
            row(7, 20, uprn("100")),
            row(9, 90, uprn("999")),
        ];
        let out = resolve(&rows, &DedupSettings::default());

        for id in [3, 5, 7] {
            assert_eq!(by_id(&out, id).duplicate_group_id, Some(3));
        }
        assert!(by_id(&out, 5).is_preferred_record);
        assert!(!by_id(&out, 3).is_preferred_record);
        assert_eq!(
            out.iter()
                .filter(|a| a.duplicate_group_id == Some(3) && a.is_preferred_record)
                .count(),
            1
        );
        // Singleton: no group, preferred.
        assert_eq!(by_id(&out, 9).duplicate_group_id, None);
        assert!(by_id(&out, 9).is_preferred_record);
    }

    #[test]
    fn test_postcode_needs_distance() {
        let rows = vec![
            row(1, 50, located("LS1 1AA", 430000.0, 433000.0)),
            row(2, 50, located("ls11aa", 430006.0, 433008.0)),
            row(3, 50, located("LS1 1AA", 430100.0, 433000.0)),
            row(4, 50, located("LS1 1AB", 430000.0, 433000.0)),
        ];
        let out = resolve(&rows, &DedupSettings::default());

        assert_eq!(by_id(&out, 1).duplicate_group_id, Some(1));
        assert_eq!(by_id(&out, 2).duplicate_group_id, Some(1));
        assert_eq!(by_id(&out, 3).duplicate_group_id, None);
        assert_eq!(by_id(&out, 4).duplicate_group_id, None);
        // Ties fall through to the lowest id.
        assert!(by_id(&out, 1).is_preferred_record);
    }

    #[test]
    fn test_symmetric_under_input_order() {
        let rows = vec![
            row(1, 10, uprn("A")),
            row(2, 10, uprn("A")),
            row(3, 30, MasterFields {
                ba_reference: Some("B".into()),
                ..uprn("A")
            }),
            row(4, 10, MasterFields {
                ba_reference: Some("B".into()),
                ..Default::default()
            }),
        ];
        let forward = resolve(&rows, &DedupSettings::default());
        let mut reversed_rows = rows.clone();
        reversed_rows.reverse();
        let reversed = resolve(&reversed_rows, &DedupSettings::default());
        assert_eq!(forward, reversed);
        assert!(by_id(&forward, 3).is_preferred_record);
    }

    #[test]
    fn test_inactive_rows_are_cleared() {
        let mut gone = row(2, 99, uprn("A"));
        gone.is_active = false;
        gone.duplicate_group_id = Some(1);
        let rows = vec![row(1, 10, uprn("A")), gone];
        let out = resolve(&rows, &DedupSettings::default());

        assert_eq!(by_id(&out, 1).duplicate_group_id, None);
        assert!(by_id(&out, 1).is_preferred_record);
        assert_eq!(by_id(&out, 2).duplicate_group_id, None);
        assert!(!by_id(&out, 2).is_preferred_record);
    }

    #[test]
    fn test_preference_order() {
        let mut a = row(1, 50, uprn("A"));
        let mut b = row(2, 50, uprn("A"));
        a.merged.source_priority = Some(3);
        b.merged.source_priority = Some(2);
        assert_eq!(preference(&a, &b), Ordering::Greater);

        b.merged.source_priority = Some(3);
        b.created_at = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(preference(&a, &b), Ordering::Greater);

        a.data_quality_score = 51;
        assert_eq!(preference(&a, &b), Ordering::Less);
    }

    #[tokio::test]
    async fn test_pass_writes_only_changes() {
        use crate::repository::test_support::test_context;
        use crate::repository::{MasterChanges, MasterInsert};

        let (_dir, ctx) = test_context().await;
        let insert = |key: &str, fields: MasterFields, score: i32| MasterInsert {
            master_key: key.to_string(),
            merged: MergedRecord {
                fields,
                ..Default::default()
            },
            data_quality_score: score,
        };
        let mut with_ba = uprn("100");
        with_ba.ba_reference = Some("BA1".into());
        ctx.master()
            .apply(&MasterChanges {
                inserts: vec![
                    insert("UPRN:100", uprn("100"), 20),
                    insert("BA:BA1", with_ba, 40),
                    insert("UPRN:200", uprn("200"), 20),
                ],
                ..Default::default()
            })
            .await
            .unwrap();

        let resolver = DuplicateResolver::new(ctx.clone(), DedupSettings::default());
        let first = resolver.run().await.unwrap();
        assert_eq!(first.seen, 3);
        // Inserted rows start preferred with no group; only the loser and
        // the winner's group id change.
        assert_eq!(first.updated, 2);
        assert_eq!(ctx.master().count_duplicate_groups().await.unwrap(), 1);

        let preferred = ctx.master().get_by_key("BA:BA1").await.unwrap().unwrap();
        assert!(preferred.is_preferred_record);
        let other = ctx.master().get_by_key("UPRN:100").await.unwrap().unwrap();
        assert!(!other.is_preferred_record);
        assert_eq!(other.duplicate_group_id, preferred.duplicate_group_id);

        let second = resolver.run().await.unwrap();
        assert_eq!(second.updated, 0);
        assert_eq!(second.unchanged, 3);
    }
}
