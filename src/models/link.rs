//! Derived link models.

use serde::{Deserialize, Serialize};

/// One of the regenerated link tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// Address point to nearest postcode centroid.
    UprnPostcode,
    /// Address point to nearest named place.
    UprnPlaceName,
    /// Address point to nearest map feature.
    UprnMapFeature,
    /// Postcode to its local authority district.
    PostcodeAdminArea,
}

impl LinkKind {
    pub const ALL: [LinkKind; 4] = [
        Self::UprnPostcode,
        Self::UprnPlaceName,
        Self::UprnMapFeature,
        Self::PostcodeAdminArea,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UprnPostcode => "postcode",
            Self::UprnPlaceName => "place_name",
            Self::UprnMapFeature => "map_feature",
            Self::PostcodeAdminArea => "admin_area",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    pub fn table(&self) -> &'static str {
        match self {
            Self::UprnPostcode => "link_uprn_postcode",
            Self::UprnPlaceName => "link_uprn_place_name",
            Self::UprnMapFeature => "link_uprn_map_feature",
            Self::PostcodeAdminArea => "link_postcode_admin_area",
        }
    }

    pub fn link_type(&self) -> LinkType {
        match self {
            Self::PostcodeAdminArea => LinkType::Attribute,
            _ => LinkType::Spatial,
        }
    }
}

/// How a link was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    /// Nearest neighbour within a distance threshold.
    Spatial,
    /// Equality on a shared attribute.
    Attribute,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spatial => "spatial",
            Self::Attribute => "attribute",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "spatial" => Some(Self::Spatial),
            "attribute" => Some(Self::Attribute),
            _ => None,
        }
    }
}

/// A row of a link table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub from_id: String,
    pub to_id: String,
    pub distance_meters: f64,
    pub link_type: LinkType,
}
