//! Reading keyed point layers out of visible staging rows.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::index::Point;
use crate::merge::postcode::normalize_postcode;
use crate::models::DatasetKind;
use crate::registry::SourceRegistry;
use crate::repository::{DbContext, DbError, StagedRow};
use crate::staging::schema_for;

/// Latest visible rows of one source, keyed.
#[derive(Debug, Clone)]
pub struct SourceRows {
    pub source: String,
    pub rows: HashMap<String, StagedRow>,
}

/// Latest visible row per key for each source of `dataset`, most
/// authoritative source first. Rows for which `key_of` returns `None` are
/// ignored.
pub async fn rows_by_source<F>(
    ctx: &DbContext,
    registry: &SourceRegistry,
    dataset: DatasetKind,
    key_of: F,
) -> Result<Vec<SourceRows>, DbError>
where
    F: Fn(&StagedRow) -> Option<String>,
{
    let schema = schema_for(dataset);
    let staging = ctx.staging();
    let mut layers = Vec::new();

    for source in registry.by_dataset(dataset) {
        let rows = staging.load_visible(&source.staging_table(), schema).await?;
        layers.push(SourceRows {
            source: source.name.clone(),
            rows: latest_per_key(rows, &key_of),
        });
    }
    Ok(layers)
}

/// Latest visible row per key over every source of `dataset`.
///
/// Within a source the most recent row wins (upload time, then staging id).
/// Across sources the most authoritative source that has the key wins.
pub async fn keyed_rows<F>(
    ctx: &DbContext,
    registry: &SourceRegistry,
    dataset: DatasetKind,
    key_of: F,
) -> Result<BTreeMap<String, StagedRow>, DbError>
where
    F: Fn(&StagedRow) -> Option<String>,
{
    let layers = rows_by_source(ctx, registry, dataset, key_of).await?;
    Ok(combine(layers))
}

/// Fold per-source rows into one row per key, earlier sources first.
pub fn combine(layers: Vec<SourceRows>) -> BTreeMap<String, StagedRow> {
    let mut merged = BTreeMap::new();
    for layer in layers {
        for (key, row) in layer.rows {
            merged.entry(key).or_insert(row);
        }
    }
    merged
}

/// Reduce rows to the most recent one per key.
pub fn latest_per_key<F>(rows: Vec<StagedRow>, key_of: F) -> HashMap<String, StagedRow>
where
    F: Fn(&StagedRow) -> Option<String>,
{
    let mut latest: HashMap<String, StagedRow> = HashMap::new();
    for row in rows {
        let Some(key) = key_of(&row) else {
            continue;
        };
        let newer = latest
            .get(&key)
            .is_none_or(|current| row.recency() > current.recency());
        if newer {
            latest.insert(key, row);
        }
    }
    latest
}

/// Planar point of a row, keyed by `id`.
pub fn planar_point(id: &str, row: &StagedRow, dataset: DatasetKind) -> Option<Point> {
    let (x_col, y_col) = schema_for(dataset).planar?;
    Some(Point::new(id, row.real(x_col)?, row.real(y_col)?))
}

/// Points of a dataset, keyed by its natural key, sorted by id.
pub async fn point_layer(
    ctx: &DbContext,
    registry: &SourceRegistry,
    dataset: DatasetKind,
) -> Result<Vec<Point>, DbError> {
    let key = schema_for(dataset).key;
    let rows = keyed_rows(ctx, registry, dataset, |row| row.text(key)).await?;
    Ok(rows
        .iter()
        .filter_map(|(id, row)| planar_point(id, row, dataset))
        .collect())
}

fn postcode_key(row: &StagedRow) -> Option<String> {
    row.text("PCDS")
        .map(|p| normalize_postcode(&p))
        .filter(|p| !p.is_empty())
}

pub fn is_terminated(row: &StagedRow) -> bool {
    row.text("DATE_TERMINATED").is_some()
}

/// Postcode directory rows per source, keyed by normalised postcode.
///
/// Terminated rows are kept: a termination in a newer release has to beat
/// the live row of an older one. Use [`live_postcodes`] to drop them.
pub async fn postcode_directories(
    ctx: &DbContext,
    registry: &SourceRegistry,
) -> Result<Vec<SourceRows>, DbError> {
    rows_by_source(ctx, registry, DatasetKind::PostcodeDirectory, postcode_key).await
}

/// Postcodes whose authoritative row (latest row of the most authoritative
/// directory that has them) is not terminated.
pub fn live_postcodes(directories: &[SourceRows]) -> BTreeSet<String> {
    let mut decided: HashMap<&str, bool> = HashMap::new();
    for layer in directories {
        for (postcode, row) in &layer.rows {
            decided.entry(postcode.as_str()).or_insert(!is_terminated(row));
        }
    }
    decided
        .into_iter()
        .filter(|(_, live)| *live)
        .map(|(postcode, _)| postcode.to_string())
        .collect()
}

/// Live postcode directory rows keyed by normalised postcode.
pub async fn postcode_rows(
    ctx: &DbContext,
    registry: &SourceRegistry,
) -> Result<BTreeMap<String, StagedRow>, DbError> {
    let mut rows = combine(postcode_directories(ctx, registry).await?);
    rows.retain(|_, row| !is_terminated(row));
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_latest_per_key_prefers_newer_upload_then_higher_id() {
        let rows = vec![
            StagedRow::from_parts(1, "2024-01-02T00:00:00.000000Z", json!({"uprn": "1", "x_coordinate": 1.0})),
            StagedRow::from_parts(2, "2024-01-01T00:00:00.000000Z", json!({"uprn": "1", "x_coordinate": 2.0})),
            StagedRow::from_parts(3, "2024-01-02T00:00:00.000000Z", json!({"uprn": "2", "x_coordinate": 3.0})),
            StagedRow::from_parts(4, "2024-01-02T00:00:00.000000Z", json!({"uprn": "2", "x_coordinate": 4.0})),
            StagedRow::from_parts(5, "2024-01-03T00:00:00.000000Z", json!({"uprn": null})),
        ];
        let latest = latest_per_key(rows, |r| r.text("UPRN"));

        assert_eq!(latest.len(), 2);
        assert_eq!(latest["1"].staging_id, 1);
        assert_eq!(latest["2"].staging_id, 4);
    }

    fn directory_row(id: i64, at: &str, postcode: &str, terminated: Option<&str>) -> StagedRow {
        StagedRow::from_parts(
            id,
            at,
            json!({"pcds": postcode, "lad_code": "E08000035", "date_terminated": terminated}),
        )
    }

    fn layer(source: &str, rows: Vec<StagedRow>) -> SourceRows {
        SourceRows {
            source: source.to_string(),
            rows: latest_per_key(rows, postcode_key),
        }
    }

    #[test]
    fn test_newer_termination_beats_older_live_row() {
        let onspd = layer(
            "onspd",
            vec![
                directory_row(1, "2024-01-01T00:00:00.000000Z", "LS1 1AA", None),
                directory_row(2, "2024-06-01T00:00:00.000000Z", "ls11aa", Some("202405")),
                directory_row(3, "2024-01-01T00:00:00.000000Z", "LS2 2BB", None),
            ],
        );
        let live = live_postcodes(std::slice::from_ref(&onspd));
        assert_eq!(live, BTreeSet::from(["LS22BB".to_string()]));

        let mut rows = combine(vec![onspd]);
        rows.retain(|_, row| !is_terminated(row));
        assert_eq!(rows.keys().collect::<Vec<_>>(), vec!["LS22BB"]);
    }

    #[test]
    fn test_authoritative_directory_decides_termination() {
        let top = layer(
            "onspd",
            vec![directory_row(1, "2024-01-01T00:00:00.000000Z", "LS1 1AA", Some("202301"))],
        );
        let lower = layer(
            "nspl",
            vec![
                directory_row(2, "2024-06-01T00:00:00.000000Z", "LS1 1AA", None),
                directory_row(3, "2024-06-01T00:00:00.000000Z", "LS3 3CC", None),
            ],
        );
        let live = live_postcodes(&[top, lower]);
        assert_eq!(live, BTreeSet::from(["LS33CC".to_string()]));
    }

    #[test]
    fn test_planar_point_needs_both_coordinates() {
        let full = StagedRow::from_parts(1, "t", json!({"x_coordinate": 10.0, "y_coordinate": "20"}));
        let half = StagedRow::from_parts(2, "t", json!({"x_coordinate": 10.0}));

        assert_eq!(
            planar_point("U1", &full, DatasetKind::AddressPoints),
            Some(Point::new("U1", 10.0, 20.0))
        );
        assert_eq!(planar_point("U2", &half, DatasetKind::AddressPoints), None);
        assert_eq!(planar_point("V", &full, DatasetKind::ValuationList), None);
    }
}
