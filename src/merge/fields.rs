//! Mapping of direct-source staging rows onto master fields.

use crate::models::{DatasetKind, MasterFields};
use crate::repository::StagedRow;

/// Master fields supplied by one row of a direct dataset.
///
/// Returns `None` for datasets that only enrich (postcodes, places,
/// features, ratepayers).
pub fn map_row(dataset: DatasetKind, row: &StagedRow) -> Option<MasterFields> {
    let mut fields = match dataset {
        DatasetKind::AddressPoints => MasterFields {
            uprn: row.text("UPRN"),
            x_coordinate: row.real("X_COORDINATE"),
            y_coordinate: row.real("Y_COORDINATE"),
            latitude: row.real("LATITUDE"),
            longitude: row.real("LONGITUDE"),
            ..Default::default()
        },
        DatasetKind::RatesList => MasterFields {
            ba_reference: row.text("BA_REFERENCE"),
            uprn: row.text("UPRN"),
            property_description: row.text("PROPERTY_DESCRIPTION"),
            category_code: row.text("CATEGORY_CODE"),
            address_line_1: row.text("ADDRESS_LINE_1"),
            address_line_2: row.text("ADDRESS_LINE_2"),
            address_line_3: row.text("ADDRESS_LINE_3"),
            town: row.text("TOWN"),
            postcode: row.text("POSTCODE"),
            rateable_value: row.real("RATEABLE_VALUE"),
            effective_date: row.text("EFFECTIVE_DATE"),
            x_coordinate: row.real("X_COORDINATE"),
            y_coordinate: row.real("Y_COORDINATE"),
            ..Default::default()
        },
        DatasetKind::ValuationList => MasterFields {
            uarn: row.text("UARN"),
            ba_reference: row.text("BA_REFERENCE"),
            uprn: row.text("UPRN"),
            category_code: row.text("DESCRIPTION_CODE"),
            full_address: row.text("FULL_ADDRESS"),
            postcode: row.text("POSTCODE"),
            rateable_value: row.real("RATEABLE_VALUE"),
            forecast_rateable_value: row.real("DRAFT_RATEABLE_VALUE"),
            effective_date: row.text("EFFECTIVE_DATE"),
            ..Default::default()
        },
        DatasetKind::PostcodeDirectory
        | DatasetKind::PlaceNames
        | DatasetKind::MapFeatures
        | DatasetKind::Ratepayers => return None,
    };
    fields.normalize();
    Some(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rates_row_mapping() {
        let row = StagedRow::from_parts(
            1,
            "t",
            json!({
                "ba_reference": "BA1",
                "uprn": "",
                "town": " Leeds ",
                "postcode": "LS1 1AA",
                "rateable_value": 12000.0,
                "x_coordinate": 430000.0,
                "y_coordinate": null
            }),
        );
        let fields = map_row(DatasetKind::RatesList, &row).unwrap();

        assert_eq!(fields.ba_reference.as_deref(), Some("BA1"));
        assert_eq!(fields.uprn, None);
        assert_eq!(fields.town.as_deref(), Some("Leeds"));
        assert_eq!(fields.rateable_value, Some(12000.0));
        // Half a coordinate pair is dropped.
        assert_eq!(fields.x_coordinate, None);
    }

    #[test]
    fn test_valuation_and_enrichment_only_datasets() {
        let row = StagedRow::from_parts(
            1,
            "t",
            json!({"uarn": "77", "description_code": "CS", "draft_rateable_value": 900.0}),
        );
        let fields = map_row(DatasetKind::ValuationList, &row).unwrap();
        assert_eq!(fields.uarn.as_deref(), Some("77"));
        assert_eq!(fields.category_code.as_deref(), Some("CS"));
        assert_eq!(fields.forecast_rateable_value, Some(900.0));

        assert!(map_row(DatasetKind::Ratepayers, &row).is_none());
        assert!(map_row(DatasetKind::PostcodeDirectory, &row).is_none());
    }
}
