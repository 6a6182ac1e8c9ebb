//! Shared fixtures for the end-to-end tests.

#![allow(dead_code)]

use std::path::PathBuf;

use gazetteer::migrations::MigrationTracker;
use gazetteer::registry::SourceRegistry;
use gazetteer::repository::DbContext;
use gazetteer::staging::{LoadOptions, LoadOutcome, LoaderSettings, StagingLoader};
use tempfile::TempDir;

pub const RATES_HEADER: &str = "BA_REFERENCE,UPRN,PROPERTY_DESCRIPTION,CATEGORY_CODE,\
ADDRESS_LINE_1,ADDRESS_LINE_2,ADDRESS_LINE_3,TOWN,POSTCODE,RATEABLE_VALUE,EFFECTIVE_DATE,\
X_COORDINATE,Y_COORDINATE";
pub const UPRN_HEADER: &str = "UPRN,X_COORDINATE,Y_COORDINATE,LATITUDE,LONGITUDE";
pub const ONSPD_HEADER: &str = "PCDS,EASTING,NORTHING,LATITUDE,LONGITUDE,LAD_CODE,WARD_CODE,\
PARISH_CODE,LSOA_CODE,MSOA_CODE,OA_CODE,DATE_TERMINATED";

/// A migrated database in a temporary directory plus the registry it uses.
pub struct Fixture {
    pub dir: TempDir,
    pub ctx: DbContext,
    pub registry: SourceRegistry,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_registry(SourceRegistry::builtin()).await
    }

    pub async fn with_registry(registry: SourceRegistry) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let ctx = DbContext::sqlite_from_path(&dir.path().join("gazetteer.db"));
        MigrationTracker::new(ctx.clone()).run(&registry).await.unwrap();
        Self { dir, ctx, registry }
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("gazetteer.db")
    }

    pub fn write(&self, name: &str, header: &str, rows: &[&str]) -> PathBuf {
        let mut body = format!("{}\n", header);
        for row in rows {
            body.push_str(row);
            body.push('\n');
        }
        let path = self.dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    pub fn loader(&self) -> StagingLoader {
        StagingLoader::new(
            self.ctx.clone(),
            self.registry.clone(),
            LoaderSettings::default(),
        )
    }

    /// Load a file with an explicit batch id; the source is detected from
    /// the file name.
    pub async fn load(&self, name: &str, header: &str, rows: &[&str], batch_id: &str) -> LoadOutcome {
        let path = self.write(name, header, rows);
        self.loader()
            .load(&path, None, options(batch_id))
            .await
            .unwrap()
    }
}

pub fn options(batch_id: &str) -> LoadOptions {
    LoadOptions {
        client_name: "integration".to_string(),
        upload_user: Some("tester@example".to_string()),
        batch_id: Some(batch_id.to_string()),
        ..Default::default()
    }
}

/// One rates-list row with the columns the tests vary.
pub fn rates_row(ba: &str, uprn: &str, postcode: &str, rv: &str, x: &str, y: &str) -> String {
    format!("{ba},{uprn},Shop,CS,1 High St,,,Leeds,{postcode},{rv},2023-04-01,{x},{y}")
}
