//! Cross-source enrichment passes run after the direct sources are folded.
//!
//! Every pass only fills fields that are still null. The order is fixed:
//! postcode from the nearest-postcode link, locality from the nearest place,
//! admin codes from the postcode directory, then ratepayer details.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::models::{DatasetKind, LinkKind, MasterFields, MergedRecord};
use crate::registry::SourceRegistry;
use crate::repository::{DbContext, DbError};
use crate::spatial::layers::{
    is_terminated, keyed_rows, live_postcodes, postcode_directories, rows_by_source,
};

use super::postcode::normalize_postcode;

/// Partial fields plus the registry source that supplied them.
#[derive(Debug, Clone, PartialEq)]
pub struct Supplied {
    pub source: String,
    pub fields: MasterFields,
}

/// Lookup tables for the enrichment passes.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentData {
    /// UPRN to nearest postcode.
    pub uprn_postcode: HashMap<String, String>,
    /// UPRN to nearest place id.
    pub uprn_place: HashMap<String, String>,
    /// Place id to place name.
    pub place_names: HashMap<String, String>,
    /// Normalised postcode to admin codes, one entry per directory that
    /// lists it, most authoritative first.
    pub admin_areas: HashMap<String, Vec<Supplied>>,
    /// BA reference to ratepayer details, most authoritative first.
    pub ratepayers: HashMap<String, Vec<Supplied>>,
    /// Batches whose rows fed the lookups.
    pub batch_ids: BTreeSet<String>,
}

impl EnrichmentData {
    pub async fn load(ctx: &DbContext, registry: &SourceRegistry) -> Result<Self, DbError> {
        let links = ctx.links();
        let mut data = Self {
            uprn_postcode: links.map(LinkKind::UprnPostcode).await?,
            uprn_place: links.map(LinkKind::UprnPlaceName).await?,
            ..Default::default()
        };

        for (id, row) in keyed_rows(ctx, registry, DatasetKind::PlaceNames, |r| r.text("ID")).await? {
            if let Some(name) = row.text("NAME1") {
                data.place_names.insert(id, name);
            }
            data.batch_ids.insert(row.batch_id);
        }

        let directories = postcode_directories(ctx, registry).await?;
        let live = live_postcodes(&directories);
        for layer in directories {
            for (postcode, row) in layer.rows {
                if !live.contains(&postcode) || is_terminated(&row) {
                    continue;
                }
                let codes = MasterFields {
                    lad_code: row.text("LAD_CODE"),
                    ward_code: row.text("WARD_CODE"),
                    parish_code: row.text("PARISH_CODE"),
                    lsoa_code: row.text("LSOA_CODE"),
                    msoa_code: row.text("MSOA_CODE"),
                    oa_code: row.text("OA_CODE"),
                    ..Default::default()
                };
                data.admin_areas.entry(postcode).or_default().push(Supplied {
                    source: layer.source.clone(),
                    fields: codes,
                });
                data.batch_ids.insert(row.batch_id);
            }
        }

        let ratepayers =
            rows_by_source(ctx, registry, DatasetKind::Ratepayers, |r| r.text("BA_REFERENCE")).await?;
        for layer in ratepayers {
            for (ba, row) in layer.rows {
                let details = MasterFields {
                    ratepayer_name: row.text("RATEPAYER_NAME"),
                    ratepayer_type: row.text("RATEPAYER_TYPE"),
                    ..Default::default()
                };
                data.ratepayers.entry(ba).or_default().push(Supplied {
                    source: layer.source.clone(),
                    fields: details,
                });
                data.batch_ids.insert(row.batch_id);
            }
        }

        Ok(data)
    }
}

/// Counters of one enrichment run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichStats {
    /// Field values written.
    pub filled: usize,
    /// Records whose join key had no counterpart.
    pub missing_keys: usize,
}

fn fill(record: &mut MergedRecord, partial: &MasterFields, label: &str) -> usize {
    let mut filled = 0;
    let sources = &mut record.field_sources;
    record.fields.fill_from(partial, |field| {
        sources.insert(field.to_string(), label.to_string());
        filled += 1;
    });
    filled
}

fn needs_admin_codes(f: &MasterFields) -> bool {
    f.lad_code.is_none()
        || f.ward_code.is_none()
        || f.parish_code.is_none()
        || f.lsoa_code.is_none()
        || f.msoa_code.is_none()
        || f.oa_code.is_none()
}

/// Run the four passes over `records` in place.
pub fn enrich(records: &mut BTreeMap<String, MergedRecord>, data: &EnrichmentData) -> EnrichStats {
    let mut stats = EnrichStats::default();

    for record in records.values_mut() {
        if record.fields.postcode.is_none() {
            if let Some(uprn) = record.fields.uprn.clone() {
                match data.uprn_postcode.get(&uprn) {
                    Some(postcode) => {
                        let partial = MasterFields {
                            postcode: Some(postcode.clone()),
                            ..Default::default()
                        };
                        stats.filled += fill(record, &partial, LinkKind::UprnPostcode.table());
                    }
                    None => stats.missing_keys += 1,
                }
            }
        }
    }

    for record in records.values_mut() {
        if record.fields.locality.is_none() {
            if let Some(uprn) = record.fields.uprn.clone() {
                let name = data
                    .uprn_place
                    .get(&uprn)
                    .and_then(|place| data.place_names.get(place));
                match name {
                    Some(name) => {
                        let partial = MasterFields {
                            locality: Some(name.clone()),
                            ..Default::default()
                        };
                        stats.filled += fill(record, &partial, LinkKind::UprnPlaceName.table());
                    }
                    None => stats.missing_keys += 1,
                }
            }
        }
    }

    for record in records.values_mut() {
        if !needs_admin_codes(&record.fields) {
            continue;
        }
        if let Some(postcode) = record.fields.postcode.as_deref().map(normalize_postcode) {
            match data.admin_areas.get(&postcode) {
                Some(directories) => {
                    for supplied in directories {
                        stats.filled += fill(record, &supplied.fields, &supplied.source);
                    }
                }
                None => stats.missing_keys += 1,
            }
        }
    }

    for record in records.values_mut() {
        if record.fields.ratepayer_name.is_some() && record.fields.ratepayer_type.is_some() {
            continue;
        }
        if let Some(ba) = record.fields.ba_reference.clone() {
            match data.ratepayers.get(&ba) {
                Some(sources) => {
                    for supplied in sources {
                        stats.filled += fill(record, &supplied.fields, &supplied.source);
                    }
                }
                None => stats.missing_keys += 1,
            }
        }
    }

    stats
}
