//! Data source models for the source registry.

use serde::{Deserialize, Serialize};

/// Broad category of an upstream dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// National address identifiers (UPRN points).
    Reference,
    /// Postcode directories.
    Postcode,
    /// Place-name gazetteers.
    PlaceNames,
    /// Street and map-feature layers.
    MapFeatures,
    /// Business-rates property registers.
    Rates,
    /// Valuation lists.
    Valuation,
    /// Ratepayer details keyed by rates reference.
    Ratepayer,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reference => "reference",
            Self::Postcode => "postcode",
            Self::PlaceNames => "place_names",
            Self::MapFeatures => "map_features",
            Self::Rates => "rates",
            Self::Valuation => "valuation",
            Self::Ratepayer => "ratepayer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "reference" => Some(Self::Reference),
            "postcode" => Some(Self::Postcode),
            "place_names" => Some(Self::PlaceNames),
            "map_features" => Some(Self::MapFeatures),
            "rates" => Some(Self::Rates),
            "valuation" => Some(Self::Valuation),
            "ratepayer" => Some(Self::Ratepayer),
            _ => None,
        }
    }
}

/// Staging schema a source's files follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    AddressPoints,
    PostcodeDirectory,
    PlaceNames,
    MapFeatures,
    RatesList,
    ValuationList,
    Ratepayers,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 7] = [
        Self::AddressPoints,
        Self::PostcodeDirectory,
        Self::PlaceNames,
        Self::MapFeatures,
        Self::RatesList,
        Self::ValuationList,
        Self::Ratepayers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddressPoints => "address_points",
            Self::PostcodeDirectory => "postcode_directory",
            Self::PlaceNames => "place_names",
            Self::MapFeatures => "map_features",
            Self::RatesList => "rates_list",
            Self::ValuationList => "valuation_list",
            Self::Ratepayers => "ratepayers",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    /// Whether rows of this dataset create or update master records directly.
    pub fn is_direct(&self) -> bool {
        matches!(
            self,
            Self::AddressPoints | Self::RatesList | Self::ValuationList
        )
    }
}

/// Coordinate reference system declared by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// British National Grid, metres.
    #[serde(rename = "EPSG:27700")]
    BritishNationalGrid,
    /// WGS84 latitude/longitude.
    #[serde(rename = "EPSG:4326")]
    Wgs84,
    #[serde(rename = "none")]
    None,
}

impl CoordinateSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BritishNationalGrid => "EPSG:27700",
            Self::Wgs84 => "EPSG:4326",
            Self::None => "none",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "EPSG:27700" => Some(Self::BritishNationalGrid),
            "EPSG:4326" => Some(Self::Wgs84),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

/// How often the upstream publisher refreshes a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateFrequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Annual,
    Adhoc,
}

impl UpdateFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Annual => "annual",
            Self::Adhoc => "adhoc",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            "quarterly" => Some(Self::Quarterly),
            "annual" => Some(Self::Annual),
            "adhoc" => Some(Self::Adhoc),
            _ => None,
        }
    }
}

/// An upstream dataset known to the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    /// Unique name; also names the staging table (`stg_<name>`).
    pub name: String,
    pub source_type: SourceType,
    pub dataset: DatasetKind,
    /// Lower is more authoritative.
    pub priority: i32,
    /// Declared trust in the publisher, 0.0 to 1.0.
    pub quality_score: f64,
    pub coordinate_system: CoordinateSystem,
    pub update_frequency: UpdateFrequency,
    /// Glob (`*`, `?`) matched against file names.
    pub file_pattern: String,
    /// Field delimiter for delimited extracts.
    #[serde(default)]
    pub delimiter: Option<char>,
}

impl DataSource {
    /// Name of the staging table holding this source's rows.
    pub fn staging_table(&self) -> String {
        format!("stg_{}", self.name)
    }

    pub fn delimiter(&self) -> char {
        self.delimiter.unwrap_or(',')
    }

    /// Whether a file name matches this source's pattern (case-insensitive).
    pub fn matches_file(&self, file_name: &str) -> bool {
        glob_to_regex(&self.file_pattern)
            .map(|re| re.is_match(file_name))
            .unwrap_or(false)
    }
}

fn glob_to_regex(pattern: &str) -> Option<regex::Regex> {
    let mut re = String::from("(?i)^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    regex::Regex::new(&re).ok()
}
