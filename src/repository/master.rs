//! Master gazetteer repository.

use std::collections::{BTreeMap, HashMap};

use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::models::{MasterRow, MasterValues, NewMasterRow};
use super::parse_datetime;
use super::pool::{DbError, DbPool};
use super::util::now_rfc3339;
use crate::models::{MasterFields, MasterRecord, MergedRecord};
use crate::schema::master_gazetteer;
use crate::with_conn;

impl From<MasterRow> for MasterRecord {
    fn from(row: MasterRow) -> Self {
        let fields = MasterFields {
            uprn: row.uprn,
            ba_reference: row.ba_reference,
            uarn: row.uarn,
            full_address: row.full_address,
            address_line_1: row.address_line_1,
            address_line_2: row.address_line_2,
            address_line_3: row.address_line_3,
            locality: row.locality,
            town: row.town,
            postcode: row.postcode,
            lad_code: row.lad_code,
            ward_code: row.ward_code,
            parish_code: row.parish_code,
            lsoa_code: row.lsoa_code,
            msoa_code: row.msoa_code,
            oa_code: row.oa_code,
            category_code: row.category_code,
            property_description: row.property_description,
            effective_date: row.effective_date,
            ratepayer_name: row.ratepayer_name,
            ratepayer_type: row.ratepayer_type,
            x_coordinate: row.x_coordinate,
            y_coordinate: row.y_coordinate,
            latitude: row.latitude,
            longitude: row.longitude,
            rateable_value: row.rateable_value,
            forecast_rateable_value: row.forecast_rateable_value,
        };
        MasterRecord {
            id: row.id,
            master_key: row.master_key,
            merged: MergedRecord {
                fields,
                data_source: serde_json::from_str(&row.data_source).unwrap_or_default(),
                source_priority: row.source_priority,
                field_sources: serde_json::from_str::<BTreeMap<String, String>>(&row.field_sources)
                    .unwrap_or_default(),
                last_source_update: row.last_source_update,
            },
            data_quality_score: row.data_quality_score,
            duplicate_group_id: row.duplicate_group_id,
            is_preferred_record: row.is_preferred_record != 0,
            is_active: row.is_active != 0,
            record_hash: row.record_hash,
            created_at: parse_datetime(&row.created_at),
            updated_at: parse_datetime(&row.updated_at),
        }
    }
}

impl MasterValues {
    /// Column values for a merged record.
    pub fn from_merged(merged: &MergedRecord, updated_at: &str) -> Self {
        let f = merged.fields.clone();
        Self {
            postcode_normalized: merged.postcode_normalized(),
            geometry: f.geometry_wkt(),
            uprn: f.uprn,
            ba_reference: f.ba_reference,
            uarn: f.uarn,
            full_address: f.full_address,
            address_line_1: f.address_line_1,
            address_line_2: f.address_line_2,
            address_line_3: f.address_line_3,
            locality: f.locality,
            town: f.town,
            postcode: f.postcode,
            x_coordinate: f.x_coordinate,
            y_coordinate: f.y_coordinate,
            latitude: f.latitude,
            longitude: f.longitude,
            lad_code: f.lad_code,
            ward_code: f.ward_code,
            parish_code: f.parish_code,
            lsoa_code: f.lsoa_code,
            msoa_code: f.msoa_code,
            oa_code: f.oa_code,
            category_code: f.category_code,
            property_description: f.property_description,
            rateable_value: f.rateable_value,
            forecast_rateable_value: f.forecast_rateable_value,
            effective_date: f.effective_date,
            ratepayer_name: f.ratepayer_name,
            ratepayer_type: f.ratepayer_type,
            data_source: serde_json::to_string(&merged.data_source)
                .unwrap_or_else(|_| "[]".to_string()),
            source_priority: merged.source_priority,
            field_sources: serde_json::to_string(&merged.field_sources)
                .unwrap_or_else(|_| "{}".to_string()),
            last_source_update: merged.last_source_update.clone(),
            record_hash: merged.content_hash(),
            updated_at: updated_at.to_string(),
        }
    }
}

/// What the merge engine needs to know about an existing row.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterIndexEntry {
    pub id: i64,
    pub record_hash: String,
    pub is_active: bool,
}

/// A new master row to insert.
#[derive(Debug, Clone)]
pub struct MasterInsert {
    pub master_key: String,
    pub merged: MergedRecord,
    pub data_quality_score: i32,
}

/// Writes produced by one merge pass, applied atomically.
#[derive(Debug, Clone, Default)]
pub struct MasterChanges {
    pub inserts: Vec<MasterInsert>,
    /// Rows whose content changed or which reappeared; all become active.
    pub updates: Vec<(i64, MergedRecord)>,
    pub deactivate: Vec<i64>,
}

impl MasterChanges {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deactivate.is_empty()
    }
}

/// Duplicate-resolution outcome for one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupAssignment {
    pub id: i64,
    pub duplicate_group_id: Option<i64>,
    pub is_preferred_record: bool,
}

#[derive(Clone)]
pub struct MasterRepository {
    pool: DbPool,
}

impl MasterRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Existing rows keyed by master key.
    pub async fn index(&self) -> Result<HashMap<String, MasterIndexEntry>, DbError> {
        let rows: Vec<(i64, String, String, i32)> = with_conn!(self.pool, conn => {
            master_gazetteer::table
                .select((
                    master_gazetteer::id,
                    master_gazetteer::master_key,
                    master_gazetteer::record_hash,
                    master_gazetteer::is_active,
                ))
                .load(&mut conn)
                .await
        })?;
        Ok(rows
            .into_iter()
            .map(|(id, key, record_hash, active)| {
                (
                    key,
                    MasterIndexEntry {
                        id,
                        record_hash,
                        is_active: active != 0,
                    },
                )
            })
            .collect())
    }

    /// Apply one merge pass in a single transaction.
    pub async fn apply(&self, changes: &MasterChanges) -> Result<(), DbError> {
        if changes.is_empty() {
            return Ok(());
        }
        let now = now_rfc3339();
        let inserts: Vec<NewMasterRow> = changes
            .inserts
            .iter()
            .map(|i| NewMasterRow {
                master_key: i.master_key.clone(),
                values: MasterValues::from_merged(&i.merged, &now),
                data_quality_score: i.data_quality_score,
                is_preferred_record: 1,
                is_active: 1,
                created_at: now.clone(),
            })
            .collect();
        let updates: Vec<(i64, MasterValues)> = changes
            .updates
            .iter()
            .map(|(id, merged)| (*id, MasterValues::from_merged(merged, &now)))
            .collect();
        let deactivate = changes.deactivate.clone();

        with_conn!(self.pool, conn => {
            conn.transaction(|conn| {
                Box::pin(async move {
                    for row in &inserts {
                        diesel::insert_into(master_gazetteer::table)
                            .values(row)
                            .execute(conn)
                            .await?;
                    }
                    for (id, values) in &updates {
                        diesel::update(master_gazetteer::table.find(*id))
                            .set((values, master_gazetteer::is_active.eq(1)))
                            .execute(conn)
                            .await?;
                    }
                    for chunk in deactivate.chunks(500) {
                        diesel::update(master_gazetteer::table.filter(master_gazetteer::id.eq_any(chunk)))
                            .set((
                                master_gazetteer::is_active.eq(0),
                                master_gazetteer::duplicate_group_id.eq(None::<i64>),
                                master_gazetteer::is_preferred_record.eq(0),
                                master_gazetteer::updated_at.eq(&now),
                            ))
                            .execute(conn)
                            .await?;
                    }
                    Ok::<(), DbError>(())
                })
            })
            .await
        })
    }

    pub async fn get_by_key(&self, master_key: &str) -> Result<Option<MasterRecord>, DbError> {
        with_conn!(self.pool, conn => {
            master_gazetteer::table
                .filter(master_gazetteer::master_key.eq(master_key))
                .select(MasterRow::as_select())
                .first::<MasterRow>(&mut conn)
                .await
                .optional()
                .map(|opt| opt.map(MasterRecord::from))
        })
    }

    /// Active rows ordered by id.
    pub async fn list_active(&self) -> Result<Vec<MasterRecord>, DbError> {
        with_conn!(self.pool, conn => {
            master_gazetteer::table
                .filter(master_gazetteer::is_active.eq(1))
                .select(MasterRow::as_select())
                .order(master_gazetteer::id.asc())
                .load::<MasterRow>(&mut conn)
                .await
                .map(|rows| rows.into_iter().map(MasterRecord::from).collect())
        })
    }

    /// Every row, active or not, ordered by id.
    pub async fn list_all(&self) -> Result<Vec<MasterRecord>, DbError> {
        with_conn!(self.pool, conn => {
            master_gazetteer::table
                .select(MasterRow::as_select())
                .order(master_gazetteer::id.asc())
                .load::<MasterRow>(&mut conn)
                .await
                .map(|rows| rows.into_iter().map(MasterRecord::from).collect())
        })
    }

    pub async fn count_all(&self) -> Result<i64, DbError> {
        with_conn!(self.pool, conn => {
            master_gazetteer::table.count().get_result(&mut conn).await
        })
    }

    pub async fn count_active(&self) -> Result<i64, DbError> {
        with_conn!(self.pool, conn => {
            master_gazetteer::table
                .filter(master_gazetteer::is_active.eq(1))
                .count()
                .get_result(&mut conn)
                .await
        })
    }

    /// Number of distinct duplicate groups among active rows.
    pub async fn count_duplicate_groups(&self) -> Result<i64, DbError> {
        let groups: Vec<Option<i64>> = with_conn!(self.pool, conn => {
            master_gazetteer::table
                .filter(master_gazetteer::is_active.eq(1))
                .filter(master_gazetteer::duplicate_group_id.is_not_null())
                .select(master_gazetteer::duplicate_group_id)
                .distinct()
                .load(&mut conn)
                .await
        })?;
        Ok(groups.len() as i64)
    }

    /// Average quality score of active rows.
    pub async fn average_score(&self) -> Result<Option<f64>, DbError> {
        let scores: Vec<i32> = with_conn!(self.pool, conn => {
            master_gazetteer::table
                .filter(master_gazetteer::is_active.eq(1))
                .select(master_gazetteer::data_quality_score)
                .load(&mut conn)
                .await
        })?;
        if scores.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            scores.iter().map(|s| f64::from(*s)).sum::<f64>() / scores.len() as f64,
        ))
    }

    /// Write new quality scores in one transaction.
    pub async fn update_scores(&self, scores: &[(i64, i32)]) -> Result<usize, DbError> {
        if scores.is_empty() {
            return Ok(0);
        }
        let scores = scores.to_vec();
        let now = now_rfc3339();
        with_conn!(self.pool, conn => {
            conn.transaction(|conn| {
                Box::pin(async move {
                    let mut written = 0;
                    for (id, score) in scores {
                        written += diesel::update(master_gazetteer::table.find(id))
                            .set((
                                master_gazetteer::data_quality_score.eq(score),
                                master_gazetteer::updated_at.eq(&now),
                            ))
                            .execute(conn)
                            .await?;
                    }
                    Ok::<usize, DbError>(written)
                })
            })
            .await
        })
    }

    /// Write duplicate groups and preferred flags in one transaction.
    pub async fn update_dedup(&self, assignments: &[DedupAssignment]) -> Result<usize, DbError> {
        if assignments.is_empty() {
            return Ok(0);
        }
        let assignments = assignments.to_vec();
        let now = now_rfc3339();
        with_conn!(self.pool, conn => {
            conn.transaction(|conn| {
                Box::pin(async move {
                    let mut written = 0;
                    for a in assignments {
                        written += diesel::update(master_gazetteer::table.find(a.id))
                            .set((
                                master_gazetteer::duplicate_group_id.eq(a.duplicate_group_id),
                                master_gazetteer::is_preferred_record
                                    .eq(i32::from(a.is_preferred_record)),
                                master_gazetteer::updated_at.eq(&now),
                            ))
                            .execute(conn)
                            .await?;
                    }
                    Ok::<usize, DbError>(written)
                })
            })
            .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::test_context;

    fn merged(uprn: &str, town: &str) -> MergedRecord {
        MergedRecord {
            fields: MasterFields {
                uprn: Some(uprn.to_string()),
                town: Some(town.to_string()),
                postcode: Some("sw1a 1aa".to_string()),
                x_coordinate: Some(529090.0),
                y_coordinate: Some(179645.0),
                ..Default::default()
            },
            data_source: vec!["os_open_uprn".to_string()],
            source_priority: Some(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_insert_update_deactivate() {
        let (_dir, ctx) = test_context().await;
        let master = ctx.master();

        master
            .apply(&MasterChanges {
                inserts: vec![MasterInsert {
                    master_key: "UPRN:1".to_string(),
                    merged: merged("1", "London"),
                    data_quality_score: 50,
                }],
                ..Default::default()
            })
            .await
            .unwrap();

        let record = master.get_by_key("UPRN:1").await.unwrap().unwrap();
        assert!(record.is_active);
        assert_eq!(record.fields().town.as_deref(), Some("London"));
        assert_eq!(record.record_hash, merged("1", "London").content_hash());
        assert_eq!(record.merged.data_source, vec!["os_open_uprn"]);

        let index = master.index().await.unwrap();
        let entry = &index["UPRN:1"];
        master
            .apply(&MasterChanges {
                updates: vec![(entry.id, merged("1", "Westminster"))],
                ..Default::default()
            })
            .await
            .unwrap();
        let record = master.get_by_key("UPRN:1").await.unwrap().unwrap();
        assert_eq!(record.fields().town.as_deref(), Some("Westminster"));

        master
            .apply(&MasterChanges {
                deactivate: vec![entry.id],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(master.count_active().await.unwrap(), 0);
        assert_eq!(master.count_all().await.unwrap(), 1);
        assert!(!master.index().await.unwrap()["UPRN:1"].is_active);
    }

    #[tokio::test]
    async fn test_geometry_and_normalized_postcode_written() {
        let (_dir, ctx) = test_context().await;
        let master = ctx.master();
        master
            .apply(&MasterChanges {
                inserts: vec![MasterInsert {
                    master_key: "UPRN:7".to_string(),
                    merged: merged("7", "London"),
                    data_quality_score: 0,
                }],
                ..Default::default()
            })
            .await
            .unwrap();

        async fn stored(pool: &DbPool) -> Result<(Option<String>, Option<String>), DbError> {
            with_conn!(pool, conn => {
                master_gazetteer::table
                    .select((master_gazetteer::postcode_normalized, master_gazetteer::geometry))
                    .first(&mut conn)
                    .await
            })
        }
        let values = stored(ctx.pool()).await.unwrap();
        assert_eq!(values.0.as_deref(), Some("SW1A1AA"));
        assert_eq!(values.1.as_deref(), Some("POINT(529090 179645)"));
    }

    #[tokio::test]
    async fn test_scores_and_dedup_updates() {
        let (_dir, ctx) = test_context().await;
        let master = ctx.master();
        master
            .apply(&MasterChanges {
                inserts: vec![
                    MasterInsert {
                        master_key: "UPRN:1".to_string(),
                        merged: merged("1", "A"),
                        data_quality_score: 0,
                    },
                    MasterInsert {
                        master_key: "UPRN:2".to_string(),
                        merged: merged("2", "B"),
                        data_quality_score: 0,
                    },
                ],
                ..Default::default()
            })
            .await
            .unwrap();
        let rows = master.list_active().await.unwrap();
        let (a, b) = (rows[0].id, rows[1].id);

        master.update_scores(&[(a, 80), (b, 40)]).await.unwrap();
        master
            .update_dedup(&[
                DedupAssignment {
                    id: a,
                    duplicate_group_id: Some(a),
                    is_preferred_record: true,
                },
                DedupAssignment {
                    id: b,
                    duplicate_group_id: Some(a),
                    is_preferred_record: false,
                },
            ])
            .await
            .unwrap();

        let rows = master.list_active().await.unwrap();
        assert_eq!(rows[0].data_quality_score, 80);
        assert!(rows[0].is_preferred_record);
        assert!(!rows[1].is_preferred_record);
        assert_eq!(master.count_duplicate_groups().await.unwrap(), 1);
        assert_eq!(master.average_score().await.unwrap(), Some(60.0));
    }
}
