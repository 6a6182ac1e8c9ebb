//! Master gazetteer record models.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Generates `MasterFields` plus name-driven helpers so the merge engine can
/// fold sources field by field without hand-written per-field code.
macro_rules! master_fields {
    (text: [$($t:ident),* $(,)?], number: [$($n:ident),* $(,)?]) => {
        /// Merge-owned attributes of a master record. Every field is optional;
        /// `None` means no source has supplied a value.
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct MasterFields {
            $(pub $t: Option<String>,)*
            $(pub $n: Option<f64>,)*
        }

        impl MasterFields {
            /// Every merge-owned field name, in declaration order.
            pub const FIELD_NAMES: &'static [&'static str] = &[
                $(stringify!($t),)*
                $(stringify!($n),)*
            ];

            /// Copy each field of `other` that is still null here.
            ///
            /// `on_fill` is called with the name of every field written.
            pub fn fill_from(&mut self, other: &MasterFields, mut on_fill: impl FnMut(&'static str)) {
                $(
                    if self.$t.is_none() && other.$t.is_some() {
                        self.$t = other.$t.clone();
                        on_fill(stringify!($t));
                    }
                )*
                $(
                    if self.$n.is_none() && other.$n.is_some() {
                        self.$n = other.$n;
                        on_fill(stringify!($n));
                    }
                )*
            }

            /// Names of fields holding a value.
            pub fn populated(&self) -> Vec<&'static str> {
                let mut names = Vec::new();
                $(if self.$t.is_some() { names.push(stringify!($t)); })*
                $(if self.$n.is_some() { names.push(stringify!($n)); })*
                names
            }

            /// Replace blank strings and non-finite numbers with `None`.
            pub fn clean(&mut self) {
                $(
                    if self.$t.as_deref().is_some_and(|v| v.trim().is_empty()) {
                        self.$t = None;
                    } else if let Some(v) = self.$t.as_mut() {
                        let trimmed = v.trim();
                        if trimmed.len() != v.len() {
                            *v = trimmed.to_string();
                        }
                    }
                )*
                $(
                    if self.$n.is_some_and(|v| !v.is_finite()) {
                        self.$n = None;
                    }
                )*
            }
        }
    };
}

master_fields! {
    text: [
        uprn,
        ba_reference,
        uarn,
        full_address,
        address_line_1,
        address_line_2,
        address_line_3,
        locality,
        town,
        postcode,
        lad_code,
        ward_code,
        parish_code,
        lsoa_code,
        msoa_code,
        oa_code,
        category_code,
        property_description,
        effective_date,
        ratepayer_name,
        ratepayer_type,
    ],
    number: [
        x_coordinate,
        y_coordinate,
        latitude,
        longitude,
        rateable_value,
        forecast_rateable_value,
    ]
}

impl MasterFields {
    /// Drop half-populated coordinate pairs; a lone easting locates nothing.
    pub fn normalize(&mut self) {
        self.clean();
        if self.x_coordinate.is_none() || self.y_coordinate.is_none() {
            self.x_coordinate = None;
            self.y_coordinate = None;
        }
        if self.latitude.is_none() || self.longitude.is_none() {
            self.latitude = None;
            self.longitude = None;
        }
    }

    pub fn has_coordinates(&self) -> bool {
        self.x_coordinate.is_some() && self.y_coordinate.is_some()
    }

    /// WKT point in EPSG:27700, when planar coordinates are known.
    pub fn geometry_wkt(&self) -> Option<String> {
        match (self.x_coordinate, self.y_coordinate) {
            (Some(x), Some(y)) => Some(format!("POINT({} {})", x, y)),
            _ => None,
        }
    }
}

/// Stable identity of a master record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MasterKey {
    /// Address-registry identifier.
    Uprn(String),
    /// Business-rates reference.
    BaReference(String),
    /// Neither identifier known: source name plus the row's dataset key.
    Surrogate { source: String, key: String },
}

impl MasterKey {
    /// Pick the strongest identifier available in `fields`.
    pub fn for_fields(fields: &MasterFields, source: &str, dataset_key: &str) -> Self {
        if let Some(uprn) = fields.uprn.as_deref() {
            Self::Uprn(uprn.to_string())
        } else if let Some(ba) = fields.ba_reference.as_deref() {
            Self::BaReference(ba.to_string())
        } else {
            Self::Surrogate {
                source: source.to_string(),
                key: dataset_key.to_string(),
            }
        }
    }
}

impl fmt::Display for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uprn(v) => write!(f, "UPRN:{}", v),
            Self::BaReference(v) => write!(f, "BA:{}", v),
            Self::Surrogate { source, key } => write!(f, "SRC:{}:{}", source, key),
        }
    }
}

/// Resolved content of a master record as produced by one merge pass.
///
/// Everything here is derived from staging data, so two passes over
/// unchanged staging produce equal values and equal hashes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub fields: MasterFields,
    /// Contributing direct sources, most authoritative first.
    pub data_source: Vec<String>,
    pub source_priority: Option<i32>,
    /// Field name to the source (or enrichment) that supplied it.
    pub field_sources: BTreeMap<String, String>,
    pub last_source_update: Option<String>,
}

impl MergedRecord {
    pub fn postcode_normalized(&self) -> Option<String> {
        self.fields
            .postcode
            .as_deref()
            .map(crate::merge::postcode::normalize_postcode)
            .filter(|p| !p.is_empty())
    }

    /// SHA-256 over the canonical JSON of the merged content.
    pub fn content_hash(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A persisted master gazetteer row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterRecord {
    pub id: i64,
    pub master_key: String,
    pub merged: MergedRecord,
    pub data_quality_score: i32,
    pub duplicate_group_id: Option<i64>,
    pub is_preferred_record: bool,
    pub is_active: bool,
    pub record_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MasterRecord {
    pub fn fields(&self) -> &MasterFields {
        &self.merged.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_from_only_fills_nulls() {
        let mut target = MasterFields {
            rateable_value: Some(1000.0),
            ..Default::default()
        };
        let other = MasterFields {
            rateable_value: Some(2000.0),
            postcode: Some("AB1 2CD".to_string()),
            ..Default::default()
        };

        let mut filled = Vec::new();
        target.fill_from(&other, |f| filled.push(f));

        assert_eq!(target.rateable_value, Some(1000.0));
        assert_eq!(target.postcode.as_deref(), Some("AB1 2CD"));
        assert_eq!(filled, vec!["postcode"]);
    }

    #[test]
    fn test_normalize_drops_half_pairs_and_blanks() {
        let mut fields = MasterFields {
            x_coordinate: Some(530000.0),
            latitude: Some(51.5),
            longitude: Some(-0.1),
            town: Some("   ".to_string()),
            locality: Some(" Soho ".to_string()),
            rateable_value: Some(f64::NAN),
            ..Default::default()
        };
        fields.normalize();

        assert_eq!(fields.x_coordinate, None);
        assert_eq!(fields.latitude, Some(51.5));
        assert_eq!(fields.town, None);
        assert_eq!(fields.locality.as_deref(), Some("Soho"));
        assert_eq!(fields.rateable_value, None);
    }

    #[test]
    fn test_master_key_precedence() {
        let mut fields = MasterFields {
            uprn: Some("100".to_string()),
            ba_reference: Some("BA1".to_string()),
            ..Default::default()
        };
        assert_eq!(
            MasterKey::for_fields(&fields, "nndr", "BA1").to_string(),
            "UPRN:100"
        );

        fields.uprn = None;
        assert_eq!(
            MasterKey::for_fields(&fields, "nndr", "BA1").to_string(),
            "BA:BA1"
        );

        fields.ba_reference = None;
        assert_eq!(
            MasterKey::for_fields(&fields, "voa", "U9").to_string(),
            "SRC:voa:U9"
        );
    }

    #[test]
    fn test_content_hash_is_stable() {
        let record = MergedRecord {
            fields: MasterFields {
                uprn: Some("1".to_string()),
                ..Default::default()
            },
            data_source: vec!["os_uprn".to_string()],
            source_priority: Some(1),
            ..Default::default()
        };
        assert_eq!(record.content_hash(), record.clone().content_hash());

        let mut changed = record.clone();
        changed.fields.town = Some("Leeds".to_string());
        assert_ne!(record.content_hash(), changed.content_hash());
    }

    #[test]
    fn test_geometry_wkt() {
        let fields = MasterFields {
            x_coordinate: Some(1.5),
            y_coordinate: Some(2.0),
            ..Default::default()
        };
        assert_eq!(fields.geometry_wkt().as_deref(), Some("POINT(1.5 2)"));
    }
}
