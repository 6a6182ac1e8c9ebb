//! Derived link tables.
//!
//! Each kind of link lives in its own table; every linker run replaces a
//! table's contents wholesale.

use std::collections::HashMap;

use diesel::sql_types::{Double, Text};
use diesel_async::{AsyncConnection, RunQueryDsl};
use sea_query::{Alias, Asterisk, Expr, Order, Query};

use super::pool::{build_sql, DbError, DbPool};
use super::util::{now_rfc3339, to_diesel_error};
use crate::models::{Link, LinkKind, LinkType};
use crate::with_conn;

const INSERT_CHUNK: usize = 500;

#[derive(diesel::QueryableByName)]
struct LinkRow {
    #[diesel(sql_type = Text)]
    from_id: String,
    #[diesel(sql_type = Text)]
    to_id: String,
    #[diesel(sql_type = Double)]
    distance_meters: f64,
    #[diesel(sql_type = Text)]
    link_type: String,
}

#[derive(diesel::QueryableByName)]
struct CountRow {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    n: i64,
}

#[derive(Clone)]
pub struct LinkRepository {
    pool: DbPool,
}

impl LinkRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Replace all links of `kind` in one transaction.
    pub async fn replace(&self, kind: LinkKind, links: &[Link]) -> Result<usize, DbError> {
        let table = kind.table();
        let now = now_rfc3339();

        let delete = Query::delete().from_table(Alias::new(table)).to_owned();
        let mut statements = vec![build_sql(&self.pool, &delete)];
        for chunk in links.chunks(INSERT_CHUNK) {
            let mut insert = Query::insert();
            insert.into_table(Alias::new(table)).columns([
                Alias::new("from_id"),
                Alias::new("to_id"),
                Alias::new("distance_meters"),
                Alias::new("link_type"),
                Alias::new("created_at"),
            ]);
            for link in chunk {
                insert
                    .values([
                        link.from_id.clone().into(),
                        link.to_id.clone().into(),
                        link.distance_meters.into(),
                        link.link_type.as_str().into(),
                        now.clone().into(),
                    ])
                    .map_err(to_diesel_error)?;
            }
            statements.push(build_sql(&self.pool, &insert));
        }

        with_conn!(self.pool, conn => {
            conn.transaction(|conn| {
                Box::pin(async move {
                    for sql in statements {
                        diesel::sql_query(sql).execute(conn).await?;
                    }
                    Ok::<(), DbError>(())
                })
            })
            .await
        })?;
        Ok(links.len())
    }

    /// Links of `kind` ordered by source id, optionally limited.
    pub async fn list(&self, kind: LinkKind, limit: Option<u64>) -> Result<Vec<Link>, DbError> {
        let mut stmt = Query::select()
            .columns([
                Alias::new("from_id"),
                Alias::new("to_id"),
                Alias::new("distance_meters"),
                Alias::new("link_type"),
            ])
            .from(Alias::new(kind.table()))
            .order_by(Alias::new("from_id"), Order::Asc)
            .to_owned();
        if let Some(limit) = limit {
            stmt.limit(limit);
        }
        let sql = build_sql(&self.pool, &stmt);

        let rows: Vec<LinkRow> = with_conn!(self.pool, conn => {
            diesel::sql_query(sql).load(&mut conn).await
        })?;
        Ok(rows
            .into_iter()
            .map(|r| Link {
                from_id: r.from_id,
                to_id: r.to_id,
                distance_meters: r.distance_meters,
                link_type: LinkType::from_str(&r.link_type).unwrap_or(kind.link_type()),
            })
            .collect())
    }

    /// `from_id -> to_id` for every link of `kind`.
    pub async fn map(&self, kind: LinkKind) -> Result<HashMap<String, String>, DbError> {
        Ok(self
            .list(kind, None)
            .await?
            .into_iter()
            .map(|l| (l.from_id, l.to_id))
            .collect())
    }

    pub async fn count(&self, kind: LinkKind) -> Result<i64, DbError> {
        let stmt = Query::select()
            .expr_as(Expr::col(Asterisk).count(), Alias::new("n"))
            .from(Alias::new(kind.table()))
            .to_owned();
        let sql = build_sql(&self.pool, &stmt);
        let row: CountRow = with_conn!(self.pool, conn => {
            diesel::sql_query(sql).get_result(&mut conn).await
        })?;
        Ok(row.n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::test_context;

    fn link(from: &str, to: &str, d: f64) -> Link {
        Link {
            from_id: from.to_string(),
            to_id: to.to_string(),
            distance_meters: d,
            link_type: LinkType::Spatial,
        }
    }

    #[tokio::test]
    async fn test_replace_is_wholesale() {
        let (_dir, ctx) = test_context().await;
        let links = ctx.links();

        links
            .replace(
                LinkKind::UprnPostcode,
                &[link("1", "AB1 2CD", 12.5), link("2", "AB1 2CE", 30.0)],
            )
            .await
            .unwrap();
        assert_eq!(links.count(LinkKind::UprnPostcode).await.unwrap(), 2);

        links
            .replace(LinkKind::UprnPostcode, &[link("3", "AB1 2CF", 1.0)])
            .await
            .unwrap();
        let stored = links.list(LinkKind::UprnPostcode, None).await.unwrap();
        assert_eq!(stored, vec![link("3", "AB1 2CF", 1.0)]);

        // Other kinds are untouched.
        assert_eq!(links.count(LinkKind::UprnPlaceName).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_map_by_from_id() {
        let (_dir, ctx) = test_context().await;
        let links = ctx.links();
        links
            .replace(LinkKind::UprnPlaceName, &[link("10", "PN1", 250.0)])
            .await
            .unwrap();
        let map = links.map(LinkKind::UprnPlaceName).await.unwrap();
        assert_eq!(map.get("10").map(String::as_str), Some("PN1"));
    }
}
