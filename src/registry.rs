//! Source registry: the set of upstream datasets the pipeline knows about.
//!
//! The registry is a plain value built once at startup and handed to the
//! loader and merge engine. Registration order matters: it breaks ties
//! between sources that share a priority.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{GazetteerError, Result};
use crate::models::{CoordinateSystem, DataSource, DatasetKind, SourceType, UpdateFrequency};

static SOURCE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,47}$").unwrap());

/// Validated, ordered collection of data sources.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    sources: Vec<DataSource>,
}

impl SourceRegistry {
    /// Build a registry, rejecting invalid definitions.
    pub fn new(sources: Vec<DataSource>) -> Result<Self> {
        validate(&sources)?;
        Ok(Self { sources })
    }

    /// Registry of the standard UK datasets.
    pub fn builtin() -> Self {
        Self {
            sources: builtin_sources(),
        }
    }

    /// Built-in sources with config entries applied on top.
    ///
    /// An override with a built-in name replaces that definition in place
    /// (keeping its registration slot); other entries are appended.
    pub fn with_overrides(overrides: Vec<DataSource>) -> Result<Self> {
        let mut sources = builtin_sources();
        for source in overrides {
            match sources.iter_mut().find(|s| s.name == source.name) {
                Some(existing) => *existing = source,
                None => sources.push(source),
            }
        }
        Self::new(sources)
    }

    pub fn all(&self) -> &[DataSource] {
        &self.sources
    }

    pub fn get(&self, name: &str) -> Option<&DataSource> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// Look up a source, failing with `UnknownSource`.
    pub fn require(&self, name: &str) -> Result<&DataSource> {
        self.get(name)
            .ok_or_else(|| GazetteerError::UnknownSource(name.to_string()))
    }

    pub fn registration_index(&self, name: &str) -> Option<usize> {
        self.sources.iter().position(|s| s.name == name)
    }

    /// Sources sorted by `(priority, registration index)`.
    pub fn ordered(&self) -> Vec<&DataSource> {
        let mut indexed: Vec<(usize, &DataSource)> = self.sources.iter().enumerate().collect();
        indexed.sort_by_key(|(idx, s)| (s.priority, *idx));
        indexed.into_iter().map(|(_, s)| s).collect()
    }

    /// Sources whose rows create master records, most authoritative first.
    pub fn direct_sources(&self) -> Vec<&DataSource> {
        self.ordered()
            .into_iter()
            .filter(|s| s.dataset.is_direct())
            .collect()
    }

    /// Sources following one dataset schema, most authoritative first.
    pub fn by_dataset(&self, dataset: DatasetKind) -> Vec<&DataSource> {
        self.ordered()
            .into_iter()
            .filter(|s| s.dataset == dataset)
            .collect()
    }

    /// Pick the single source whose file pattern matches `file_name`.
    pub fn detect(&self, file_name: &str) -> Result<&DataSource> {
        let matches: Vec<&DataSource> = self
            .sources
            .iter()
            .filter(|s| s.matches_file(file_name))
            .collect();

        match matches.as_slice() {
            [] => Err(GazetteerError::UnknownSource(format!(
                "no source pattern matches '{}'",
                file_name
            ))),
            [one] => Ok(one),
            many => Err(GazetteerError::AmbiguousSource {
                file: file_name.to_string(),
                candidates: many
                    .iter()
                    .map(|s| s.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn validate(sources: &[DataSource]) -> Result<()> {
    let mut names = HashSet::new();
    let mut priorities: HashSet<(SourceType, i32)> = HashSet::new();

    for source in sources {
        if !SOURCE_NAME.is_match(&source.name) {
            return Err(GazetteerError::InvalidRegistry(format!(
                "source name '{}' must be lowercase letters, digits and '_', starting with a letter",
                source.name
            )));
        }
        if !names.insert(source.name.as_str()) {
            return Err(GazetteerError::InvalidRegistry(format!(
                "duplicate source name '{}'",
                source.name
            )));
        }
        if !(0.0..=1.0).contains(&source.quality_score) {
            return Err(GazetteerError::InvalidRegistry(format!(
                "source '{}' has quality_score {} outside 0.0..=1.0",
                source.name, source.quality_score
            )));
        }
        if !priorities.insert((source.source_type, source.priority)) {
            return Err(GazetteerError::InvalidRegistry(format!(
                "source '{}' shares priority {} with another {} source",
                source.name,
                source.priority,
                source.source_type.as_str()
            )));
        }
        if source.file_pattern.trim().is_empty() {
            return Err(GazetteerError::InvalidRegistry(format!(
                "source '{}' has an empty file_pattern",
                source.name
            )));
        }
        if matches!(source.delimiter, Some('"') | Some('\n') | Some('\r')) {
            return Err(GazetteerError::InvalidRegistry(format!(
                "source '{}' uses a reserved delimiter",
                source.name
            )));
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn source(
    name: &str,
    source_type: SourceType,
    dataset: DatasetKind,
    priority: i32,
    quality_score: f64,
    coordinate_system: CoordinateSystem,
    update_frequency: UpdateFrequency,
    file_pattern: &str,
) -> DataSource {
    DataSource {
        name: name.to_string(),
        source_type,
        dataset,
        priority,
        quality_score,
        coordinate_system,
        update_frequency,
        file_pattern: file_pattern.to_string(),
        delimiter: None,
    }
}

fn builtin_sources() -> Vec<DataSource> {
    use CoordinateSystem::{BritishNationalGrid, None as NoCoordinates};
    vec![
        source(
            "os_open_uprn",
            SourceType::Reference,
            DatasetKind::AddressPoints,
            1,
            0.98,
            BritishNationalGrid,
            UpdateFrequency::Quarterly,
            "osopenuprn_*.csv",
        ),
        source(
            "onspd",
            SourceType::Postcode,
            DatasetKind::PostcodeDirectory,
            1,
            0.95,
            BritishNationalGrid,
            UpdateFrequency::Quarterly,
            "onspd_*.csv",
        ),
        source(
            "os_open_names",
            SourceType::PlaceNames,
            DatasetKind::PlaceNames,
            1,
            0.9,
            BritishNationalGrid,
            UpdateFrequency::Quarterly,
            "opname_*.csv",
        ),
        source(
            "os_open_map_local",
            SourceType::MapFeatures,
            DatasetKind::MapFeatures,
            1,
            0.85,
            BritishNationalGrid,
            UpdateFrequency::Annual,
            "opmplc_*.csv",
        ),
        source(
            "nndr_rates",
            SourceType::Rates,
            DatasetKind::RatesList,
            2,
            0.85,
            BritishNationalGrid,
            UpdateFrequency::Monthly,
            "nndr_*.csv",
        ),
        source(
            "voa_list",
            SourceType::Valuation,
            DatasetKind::ValuationList,
            3,
            0.9,
            NoCoordinates,
            UpdateFrequency::Annual,
            "voa_*.csv",
        ),
        source(
            "ratepayers",
            SourceType::Ratepayer,
            DatasetKind::Ratepayers,
            4,
            0.7,
            NoCoordinates,
            UpdateFrequency::Monthly,
            "ratepayers_*.csv",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates(name: &str, priority: i32) -> DataSource {
        source(
            name,
            SourceType::Rates,
            DatasetKind::RatesList,
            priority,
            0.8,
            CoordinateSystem::BritishNationalGrid,
            UpdateFrequency::Monthly,
            &format!("{}_*.csv", name),
        )
    }

    #[test]
    fn test_builtin_is_valid() {
        let registry = SourceRegistry::builtin();
        assert!(SourceRegistry::new(registry.all().to_vec()).is_ok());
    }

    #[test]
    fn test_rejects_priority_tie_within_type() {
        let err = SourceRegistry::new(vec![rates("a", 1), rates("b", 1)]).unwrap_err();
        assert!(matches!(err, GazetteerError::InvalidRegistry(_)));
    }

    #[test]
    fn test_rejects_bad_quality_and_names() {
        let mut bad = rates("a", 1);
        bad.quality_score = 1.5;
        assert!(SourceRegistry::new(vec![bad]).is_err());

        assert!(SourceRegistry::new(vec![rates("Bad-Name", 1)]).is_err());
        assert!(SourceRegistry::new(vec![rates("dup", 1), rates("dup", 2)]).is_err());
    }

    #[test]
    fn test_ordering_breaks_ties_by_registration() {
        let mut valuation = rates("val", 2);
        valuation.source_type = SourceType::Valuation;
        valuation.dataset = DatasetKind::ValuationList;

        let registry = SourceRegistry::new(vec![rates("late", 5), valuation, rates("early", 2)])
            .unwrap();
        let names: Vec<&str> = registry.ordered().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["val", "early", "late"]);
    }

    #[test]
    fn test_override_replaces_in_place() {
        let mut nndr = SourceRegistry::builtin()
            .get("nndr_rates")
            .cloned()
            .unwrap();
        nndr.quality_score = 0.5;
        let registry = SourceRegistry::with_overrides(vec![nndr, rates("extra", 9)]).unwrap();

        assert_eq!(registry.require("nndr_rates").unwrap().quality_score, 0.5);
        assert_eq!(
            registry.registration_index("nndr_rates"),
            SourceRegistry::builtin().registration_index("nndr_rates")
        );
        assert_eq!(registry.registration_index("extra"), Some(registry.all().len() - 1));
    }

    #[test]
    fn test_detect() {
        let registry = SourceRegistry::builtin();
        assert_eq!(
            registry.detect("nndr_2024_06.csv").unwrap().name,
            "nndr_rates"
        );
        assert!(matches!(
            registry.detect("unknown.txt"),
            Err(GazetteerError::UnknownSource(_))
        ));

        let ambiguous =
            SourceRegistry::new(vec![rates("aa", 1), {
                let mut s = rates("bb", 2);
                s.file_pattern = "aa_*.csv".to_string();
                s
            }])
            .unwrap();
        assert!(matches!(
            ambiguous.detect("aa_1.csv"),
            Err(GazetteerError::AmbiguousSource { .. })
        ));
    }

    #[test]
    fn test_require_unknown() {
        assert!(matches!(
            SourceRegistry::builtin().require("nope"),
            Err(GazetteerError::UnknownSource(_))
        ));
    }
}
