use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0003_master_indexes")
        .depends_on(&["0001_core_tables"])
        .operation(RunSql::new(
            "CREATE INDEX idx_master_uprn ON master_gazetteer(uprn) WHERE uprn IS NOT NULL",
        ))
        .operation(RunSql::new(
            "CREATE INDEX idx_master_ba_reference ON master_gazetteer(ba_reference) WHERE ba_reference IS NOT NULL",
        ))
        .operation(RunSql::new(
            "CREATE INDEX idx_master_postcode ON master_gazetteer(postcode_normalized)",
        ))
        .operation(RunSql::new(
            "CREATE INDEX idx_master_active ON master_gazetteer(is_active)",
        ))
        .operation(RunSql::new(
            "CREATE INDEX idx_master_duplicate_group ON master_gazetteer(duplicate_group_id) WHERE duplicate_group_id IS NOT NULL",
        ))
}
