use cetane::prelude::*;

use crate::models::LinkKind;

pub fn migration() -> Migration {
    let mut migration = Migration::new("0002_link_tables").depends_on(&["0001_core_tables"]);
    for kind in LinkKind::ALL {
        let table = kind.table();
        let index = format!("CREATE INDEX idx_{table}_to ON {table}(to_id)");
        migration = migration
            .operation(
                RunSql::portable()
                    .for_backend("sqlite", link_table(table, "REAL"))
                    .for_backend("postgres", link_table(table, "DOUBLE PRECISION")),
            )
            .operation(
                RunSql::portable()
                    .for_backend("sqlite", index.clone())
                    .for_backend("postgres", index),
            );
    }
    migration
}

fn link_table(table: &str, real: &str) -> String {
    format!(
        r#"CREATE TABLE {table} (
    from_id TEXT NOT NULL,
    to_id TEXT NOT NULL,
    distance_meters {real} NOT NULL,
    link_type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (from_id, to_id)
)"#
    )
}
