//! Configuration management.
//!
//! A `Config` is read from `gazetteer.toml`, `.yaml`/`.yml` or `.json`,
//! either named with `--config` or discovered by prefer in its standard
//! locations. `Settings` is the resolved runtime view: where
//! the data lives and which database to open.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::dedup::DedupSettings;
use crate::error::{GazetteerError, Result};
use crate::models::DataSource;
use crate::registry::SourceRegistry;
use crate::repository::util::is_postgres_url;
use crate::repository::DbContext;
use crate::spatial::LinkThresholds;
use crate::staging::LoaderSettings;

pub const DEFAULT_DATABASE_FILENAME: &str = "gazetteer.db";

const CONFIG_STEM: &str = "gazetteer";

/// File-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the default SQLite database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database URL, or a SQLite file path relative to the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Registry entries layered over the built-in sources.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<DataSource>,
    #[serde(default)]
    pub links: LinkThresholds,
    #[serde(default)]
    pub dedup: DedupSettings,
    #[serde(default)]
    pub loader: LoaderSettings,
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Parse a config file, picking the format from its extension.
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            GazetteerError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
        let mut config = Self::parse(&contents, ext)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn parse(contents: &str, format: &str) -> Result<Self> {
        match format {
            "toml" => toml::from_str(contents)
                .map_err(|e| GazetteerError::Config(format!("Failed to parse TOML config: {}", e))),
            "yaml" | "yml" => serde_yaml::from_str(contents)
                .map_err(|e| GazetteerError::Config(format!("Failed to parse YAML config: {}", e))),
            "json" => serde_json::from_str(contents)
                .map_err(|e| GazetteerError::Config(format!("Failed to parse JSON config: {}", e))),
            other => Err(GazetteerError::Config(format!(
                "Unsupported config format '{}'",
                other
            ))),
        }
    }

    /// Path of a `gazetteer` config file in prefer's standard search
    /// locations, if there is one.
    pub async fn discover() -> Option<PathBuf> {
        match prefer::load(CONFIG_STEM).await {
            Ok(found) => found.source_path().map(|p| p.to_path_buf()),
            Err(_) => None,
        }
    }

    /// Load the explicit config file, or the discovered one, or defaults.
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::discover().await,
        };
        match path {
            Some(path) => {
                tracing::debug!("Loading config from {}", path.display());
                Self::load_from_path(&path).await
            }
            None => Ok(Self::default()),
        }
    }

    /// Directory relative paths in this config resolve against.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// The built-in registry with this config's `[[sources]]` applied.
    pub fn registry(&self) -> Result<SourceRegistry> {
        SourceRegistry::with_overrides(self.sources.clone())
    }

    /// SHA-256 of the serialized config, shown by `gaz config show`.
    pub fn hash(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| GazetteerError::Config(e.to_string()))
    }
}

/// Expand `~` and make `path` absolute against `base_dir`.
pub fn resolve_path(path: &str, base_dir: &Path) -> PathBuf {
    let expanded = shellexpand::tilde(path);
    let path = Path::new(expanded.as_ref());
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gazetteer")
}

fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn looks_like_url(value: &str) -> bool {
    value.contains("://") || value.starts_with("sqlite:")
}

/// Command-line inputs that feed settings resolution.
#[derive(Debug, Clone, Default)]
pub struct SettingsOptions {
    pub config_path: Option<PathBuf>,
    pub database: Option<String>,
    pub data_dir: Option<PathBuf>,
}

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub database_url: String,
}

impl Settings {
    /// Resolve settings from flags, config and an optional `DATABASE_URL`.
    ///
    /// Database precedence: environment, then `--database`, then the
    /// config's `database`, then `<data_dir>/gazetteer.db`.
    pub fn resolve(options: &SettingsOptions, config: &Config, env_url: Option<String>) -> Self {
        let base_dir = config.base_dir().unwrap_or_else(current_dir);

        let data_dir = match (&options.data_dir, &config.data_dir) {
            (Some(dir), _) => resolve_path(&dir.display().to_string(), &current_dir()),
            (None, Some(dir)) => resolve_path(dir, &base_dir),
            (None, None) => default_data_dir(),
        };

        let database_url = if let Some(url) = env_url.filter(|u| !u.is_empty()) {
            tracing::debug!("Using DATABASE_URL from environment");
            url
        } else if let Some(ref flag) = options.database {
            if looks_like_url(flag) {
                flag.clone()
            } else {
                resolve_path(flag, &current_dir()).display().to_string()
            }
        } else if let Some(ref db) = config.database {
            if looks_like_url(db) {
                db.clone()
            } else {
                resolve_path(db, &data_dir).display().to_string()
            }
        } else {
            data_dir
                .join(DEFAULT_DATABASE_FILENAME)
                .display()
                .to_string()
        };

        Self {
            data_dir,
            database_url,
        }
    }

    pub fn is_postgres(&self) -> bool {
        is_postgres_url(&self.database_url)
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create data directory '{}': {}",
                    self.data_dir.display(),
                    e
                ),
            )
        })
    }

    pub fn create_db_context(&self) -> Result<DbContext> {
        Ok(DbContext::from_url(&self.database_url)?)
    }
}

/// Locate and read the config, then resolve settings against the
/// process environment.
pub async fn load_settings(options: SettingsOptions) -> Result<(Settings, Config)> {
    let config = Config::load(options.config_path.as_deref()).await?;

    let env_url = std::env::var("DATABASE_URL").ok();
    let settings = Settings::resolve(&options, &config, env_url);
    Ok((settings, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CoordinateSystem, DatasetKind, SourceType, UpdateFrequency};

    const TOML: &str = r#"
data_dir = "/srv/gazetteer"

[links]
postcode_meters = 750.0

[dedup]
max_distance_meters = 25.0

[[sources]]
name = "nndr_leeds"
source_type = "rates"
dataset = "rates_list"
priority = 7
quality_score = 0.8
coordinate_system = "EPSG:27700"
update_frequency = "monthly"
file_pattern = "leeds_nndr_*.csv"
"#;

    #[test]
    fn test_parse_toml_sections() {
        let config = Config::parse(TOML, "toml").unwrap();
        assert_eq!(config.data_dir.as_deref(), Some("/srv/gazetteer"));
        assert_eq!(config.links.postcode_meters, 750.0);
        assert_eq!(
            config.links.place_name_meters,
            LinkThresholds::default().place_name_meters
        );
        assert_eq!(config.dedup.max_distance_meters, 25.0);
        assert_eq!(config.loader.bulk_chunk_size, LoaderSettings::default().bulk_chunk_size);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].source_type, SourceType::Rates);
    }

    #[test]
    fn test_formats_agree() {
        let toml = Config::parse(TOML, "toml").unwrap();
        let json = serde_json::to_string(&toml).unwrap();
        let from_json = Config::parse(&json, "json").unwrap();
        let yaml = serde_yaml::to_string(&toml).unwrap();
        let from_yaml = Config::parse(&yaml, "yml").unwrap();
        assert_eq!(toml.hash(), from_json.hash());
        assert_eq!(toml.hash(), from_yaml.hash());
        assert!(Config::parse("", "ini").is_err());
    }

    #[test]
    fn test_registry_appends_config_sources() {
        let config = Config::parse(TOML, "toml").unwrap();
        let registry = config.registry().unwrap();
        let builtin = SourceRegistry::builtin().all().len();
        assert_eq!(registry.all().len(), builtin + 1);
        assert_eq!(registry.all().last().unwrap().name, "nndr_leeds");
        assert_eq!(
            registry.detect("leeds_nndr_2024.csv").unwrap().name,
            "nndr_leeds"
        );
    }

    #[test]
    fn test_registry_rejects_bad_override() {
        let config = Config {
            sources: vec![DataSource {
                name: "Bad Name".into(),
                source_type: SourceType::Rates,
                dataset: DatasetKind::RatesList,
                priority: 99,
                quality_score: 0.5,
                coordinate_system: CoordinateSystem::BritishNationalGrid,
                update_frequency: UpdateFrequency::Annual,
                file_pattern: "*.csv".into(),
                delimiter: None,
            }],
            ..Default::default()
        };
        assert!(matches!(
            config.registry(),
            Err(GazetteerError::InvalidRegistry(_))
        ));
    }

    #[test]
    fn test_database_precedence() {
        let config = Config {
            data_dir: Some("/srv/gaz".into()),
            database: Some("pipeline.db".into()),
            ..Default::default()
        };
        let mut options = SettingsOptions::default();

        let settings = Settings::resolve(&options, &config, None);
        assert_eq!(settings.data_dir, PathBuf::from("/srv/gaz"));
        assert_eq!(settings.database_url, "/srv/gaz/pipeline.db");

        options.database = Some("postgres://u:p@db/gaz".into());
        let settings = Settings::resolve(&options, &config, None);
        assert_eq!(settings.database_url, "postgres://u:p@db/gaz");
        assert!(settings.is_postgres());

        let settings = Settings::resolve(
            &options,
            &config,
            Some("sqlite:/tmp/env.db".into()),
        );
        assert_eq!(settings.database_url, "sqlite:/tmp/env.db");

        // An empty variable counts as unset.
        let settings = Settings::resolve(&options, &config, Some(String::new()));
        assert_eq!(settings.database_url, "postgres://u:p@db/gaz");
    }

    #[test]
    fn test_default_database_under_data_dir() {
        let options = SettingsOptions {
            data_dir: Some(PathBuf::from("/var/lib/gaz")),
            ..Default::default()
        };
        let settings = Settings::resolve(&options, &Config::default(), None);
        assert_eq!(settings.database_url, "/var/lib/gaz/gazetteer.db");
    }

    #[tokio::test]
    async fn test_explicit_path_and_relative_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gazetteer.yaml");
        std::fs::write(&path, "data_dir: ./state\n").unwrap();

        let config = Config::load(Some(&path)).await.unwrap();
        assert_eq!(config.source_path.as_deref(), Some(path.as_path()));
        let settings = Settings::resolve(&SettingsOptions::default(), &config, None);
        assert_eq!(settings.data_dir, dir.path().join("./state"));
        assert_eq!(
            settings.database_url,
            dir.path().join("./state").join(DEFAULT_DATABASE_FILENAME).display().to_string()
        );
    }

    #[tokio::test]
    async fn test_missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let err = Config::load(Some(&missing)).await.unwrap_err();
        assert!(matches!(err, GazetteerError::Config(_)));
    }
}
