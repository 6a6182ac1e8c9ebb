//! Declared column layouts of the staging datasets.

use crate::models::{CoordinateSystem, DatasetKind};
use crate::repository::SqlDialect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Real,
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnDef {
    /// Header name as published upstream.
    pub name: &'static str,
    pub ty: ColumnType,
}

impl ColumnDef {
    /// Column name inside the staging table.
    pub fn db_name(&self) -> String {
        self.name.to_ascii_lowercase()
    }
}

const fn text(name: &'static str) -> ColumnDef {
    ColumnDef {
        name,
        ty: ColumnType::Text,
    }
}

const fn real(name: &'static str) -> ColumnDef {
    ColumnDef {
        name,
        ty: ColumnType::Real,
    }
}

/// Layout of one dataset's delimited extract.
#[derive(Debug)]
pub struct DatasetSchema {
    pub kind: DatasetKind,
    /// Natural key column; rows without it are skipped.
    pub key: &'static str,
    pub columns: &'static [ColumnDef],
    /// Easting/northing columns, when the dataset carries planar coordinates.
    pub planar: Option<(&'static str, &'static str)>,
    /// Latitude/longitude columns, when the dataset carries WGS84 coordinates.
    pub geographic: Option<(&'static str, &'static str)>,
}

static ADDRESS_POINTS: DatasetSchema = DatasetSchema {
    kind: DatasetKind::AddressPoints,
    key: "UPRN",
    columns: &[
        text("UPRN"),
        real("X_COORDINATE"),
        real("Y_COORDINATE"),
        real("LATITUDE"),
        real("LONGITUDE"),
    ],
    planar: Some(("X_COORDINATE", "Y_COORDINATE")),
    geographic: Some(("LATITUDE", "LONGITUDE")),
};

static POSTCODE_DIRECTORY: DatasetSchema = DatasetSchema {
    kind: DatasetKind::PostcodeDirectory,
    key: "PCDS",
    columns: &[
        text("PCDS"),
        real("EASTING"),
        real("NORTHING"),
        real("LATITUDE"),
        real("LONGITUDE"),
        text("LAD_CODE"),
        text("WARD_CODE"),
        text("PARISH_CODE"),
        text("LSOA_CODE"),
        text("MSOA_CODE"),
        text("OA_CODE"),
        text("DATE_TERMINATED"),
    ],
    planar: Some(("EASTING", "NORTHING")),
    geographic: Some(("LATITUDE", "LONGITUDE")),
};

static PLACE_NAMES: DatasetSchema = DatasetSchema {
    kind: DatasetKind::PlaceNames,
    key: "ID",
    columns: &[
        text("ID"),
        text("NAME1"),
        text("LOCAL_TYPE"),
        real("GEOMETRY_X"),
        real("GEOMETRY_Y"),
        text("POSTCODE_DISTRICT"),
        text("POPULATED_PLACE"),
        text("DISTRICT_BOROUGH"),
    ],
    planar: Some(("GEOMETRY_X", "GEOMETRY_Y")),
    geographic: None,
};

static MAP_FEATURES: DatasetSchema = DatasetSchema {
    kind: DatasetKind::MapFeatures,
    key: "ID",
    columns: &[
        text("ID"),
        text("FEATURE_CODE"),
        text("THEME"),
        text("DISTINCTIVE_NAME"),
        real("X"),
        real("Y"),
    ],
    planar: Some(("X", "Y")),
    geographic: None,
};

static RATES_LIST: DatasetSchema = DatasetSchema {
    kind: DatasetKind::RatesList,
    key: "BA_REFERENCE",
    columns: &[
        text("BA_REFERENCE"),
        text("UPRN"),
        text("PROPERTY_DESCRIPTION"),
        text("CATEGORY_CODE"),
        text("ADDRESS_LINE_1"),
        text("ADDRESS_LINE_2"),
        text("ADDRESS_LINE_3"),
        text("TOWN"),
        text("POSTCODE"),
        real("RATEABLE_VALUE"),
        text("EFFECTIVE_DATE"),
        real("X_COORDINATE"),
        real("Y_COORDINATE"),
    ],
    planar: Some(("X_COORDINATE", "Y_COORDINATE")),
    geographic: None,
};

static VALUATION_LIST: DatasetSchema = DatasetSchema {
    kind: DatasetKind::ValuationList,
    key: "UARN",
    columns: &[
        text("UARN"),
        text("BA_REFERENCE"),
        text("UPRN"),
        text("DESCRIPTION_CODE"),
        text("FULL_ADDRESS"),
        text("POSTCODE"),
        real("RATEABLE_VALUE"),
        real("DRAFT_RATEABLE_VALUE"),
        text("EFFECTIVE_DATE"),
    ],
    planar: None,
    geographic: None,
};

static RATEPAYERS: DatasetSchema = DatasetSchema {
    kind: DatasetKind::Ratepayers,
    key: "BA_REFERENCE",
    columns: &[
        text("BA_REFERENCE"),
        text("RATEPAYER_NAME"),
        text("RATEPAYER_TYPE"),
    ],
    planar: None,
    geographic: None,
};

/// Lineage columns stamped on every staging row, in insert order.
pub const LINEAGE_COLUMNS: [&str; 11] = [
    "batch_id",
    "session_id",
    "client_name",
    "source_name",
    "source_file",
    "file_size",
    "file_modified",
    "upload_user",
    "upload_timestamp",
    "row_number",
    "raw_line",
];

pub fn schema_for(kind: DatasetKind) -> &'static DatasetSchema {
    match kind {
        DatasetKind::AddressPoints => &ADDRESS_POINTS,
        DatasetKind::PostcodeDirectory => &POSTCODE_DIRECTORY,
        DatasetKind::PlaceNames => &PLACE_NAMES,
        DatasetKind::MapFeatures => &MAP_FEATURES,
        DatasetKind::RatesList => &RATES_LIST,
        DatasetKind::ValuationList => &VALUATION_LIST,
        DatasetKind::Ratepayers => &RATEPAYERS,
    }
}

impl DatasetSchema {
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn key_index(&self) -> usize {
        self.column_index(self.key).unwrap_or(0)
    }

    pub fn key_db_name(&self) -> String {
        self.key.to_ascii_lowercase()
    }

    /// Coordinate columns to check for a source's declared system, as (x, y).
    ///
    /// For WGS84 the pair is (longitude, latitude) so bounding boxes keep
    /// x as the east-west axis.
    pub fn coordinate_columns(&self, crs: CoordinateSystem) -> Option<(&'static str, &'static str)> {
        match crs {
            CoordinateSystem::BritishNationalGrid => self.planar,
            CoordinateSystem::Wgs84 => self.geographic.map(|(lat, lon)| (lon, lat)),
            CoordinateSystem::None => None,
        }
    }

    /// Compare a file header against the declared columns.
    ///
    /// Names are compared case-insensitively after trimming; a leading
    /// byte-order mark is ignored. Returns a description of the first
    /// difference.
    pub fn check_header(&self, header: &[String]) -> std::result::Result<(), String> {
        let normalized: Vec<String> = header
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let h = if i == 0 { h.trim_start_matches('\u{feff}') } else { h };
                h.trim().to_ascii_uppercase()
            })
            .collect();

        if normalized.len() != self.width() {
            return Err(format!(
                "expected {} columns, found {}",
                self.width(),
                normalized.len()
            ));
        }

        for (i, (found, expected)) in normalized.iter().zip(self.columns).enumerate() {
            if found != expected.name {
                return Err(format!(
                    "column {} is '{}', expected '{}'",
                    i + 1,
                    found,
                    expected.name
                ));
            }
        }
        Ok(())
    }
}

/// DDL creating the staging table for a source following `schema`.
pub fn staging_table_ddl(table: &str, schema: &DatasetSchema, dialect: SqlDialect) -> Vec<String> {
    let (id_col, real_ty, int_ty) = match dialect {
        SqlDialect::Sqlite => ("staging_id INTEGER PRIMARY KEY AUTOINCREMENT", "REAL", "INTEGER"),
        SqlDialect::Postgres => ("staging_id BIGSERIAL PRIMARY KEY", "DOUBLE PRECISION", "BIGINT"),
    };

    let mut columns = vec![
        id_col.to_string(),
        "batch_id TEXT NOT NULL".to_string(),
        "session_id TEXT NOT NULL".to_string(),
        "client_name TEXT NOT NULL".to_string(),
        "source_name TEXT NOT NULL".to_string(),
        "source_file TEXT NOT NULL".to_string(),
        format!("file_size {} NOT NULL", int_ty),
        "file_modified TEXT".to_string(),
        "upload_user TEXT NOT NULL".to_string(),
        "upload_timestamp TEXT NOT NULL".to_string(),
        format!("row_number {} NOT NULL", int_ty),
        "raw_line TEXT NOT NULL".to_string(),
    ];
    for column in schema.columns {
        let ty = match column.ty {
            ColumnType::Text => "TEXT",
            ColumnType::Real => real_ty,
        };
        columns.push(format!("{} {}", column.db_name(), ty));
    }

    vec![
        format!("CREATE TABLE {} (\n    {}\n)", table, columns.join(",\n    ")),
        format!("CREATE INDEX idx_{}_batch ON {}(batch_id)", table, table),
        format!(
            "CREATE INDEX idx_{}_key ON {}({})",
            table,
            table,
            schema.key_db_name()
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_header_accepts_case_whitespace_and_bom() {
        let schema = schema_for(DatasetKind::Ratepayers);
        assert!(schema
            .check_header(&header(&["\u{feff}ba_reference", " Ratepayer_Name ", "RATEPAYER_TYPE"]))
            .is_ok());
    }

    #[test]
    fn test_header_rejects_wrong_columns() {
        let schema = schema_for(DatasetKind::Ratepayers);
        let err = schema
            .check_header(&header(&["BA_REFERENCE", "NAME", "RATEPAYER_TYPE"]))
            .unwrap_err();
        assert!(err.contains("column 2"));

        let err = schema.check_header(&header(&["BA_REFERENCE"])).unwrap_err();
        assert!(err.contains("expected 3 columns"));
    }

    #[test]
    fn test_every_schema_has_its_key() {
        for kind in DatasetKind::ALL {
            let schema = schema_for(kind);
            assert_eq!(schema.kind, kind);
            assert!(schema.column_index(schema.key).is_some());
            if let Some((x, y)) = schema.planar {
                assert!(schema.column_index(x).is_some());
                assert!(schema.column_index(y).is_some());
            }
        }
    }

    #[test]
    fn test_wgs84_columns_are_lon_lat() {
        let schema = schema_for(DatasetKind::AddressPoints);
        assert_eq!(
            schema.coordinate_columns(CoordinateSystem::Wgs84),
            Some(("LONGITUDE", "LATITUDE"))
        );
        assert_eq!(
            schema_for(DatasetKind::ValuationList)
                .coordinate_columns(CoordinateSystem::BritishNationalGrid),
            None
        );
    }

    #[test]
    fn test_staging_ddl_shape() {
        let ddl = staging_table_ddl(
            "stg_nndr",
            schema_for(DatasetKind::RatesList),
            SqlDialect::Sqlite,
        );
        assert_eq!(ddl.len(), 3);
        assert!(ddl[0].contains("staging_id INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(ddl[0].contains("rateable_value REAL"));
        assert!(ddl[2].contains("stg_nndr(ba_reference)"));

        let pg = staging_table_ddl(
            "stg_nndr",
            schema_for(DatasetKind::RatesList),
            SqlDialect::Postgres,
        );
        assert!(pg[0].contains("BIGSERIAL"));
        assert!(pg[0].contains("rateable_value DOUBLE PRECISION"));
    }
}
