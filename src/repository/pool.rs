//! Unified database connection pool supporting SQLite and PostgreSQL.
//!
//! The backend is picked at runtime from the database URL. Repositories run
//! the same Diesel code against either backend through [`with_conn!`].

use std::path::Path;

use diesel::sqlite::SqliteConnection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::AsyncConnection;
use sea_query::{QueryStatementWriter, SqliteQueryBuilder};

#[cfg(feature = "postgres")]
use diesel_async::pooled_connection::deadpool::Pool as DeadPool;
#[cfg(feature = "postgres")]
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
#[cfg(feature = "postgres")]
use diesel_async::AsyncPgConnection;

use super::util::to_diesel_error;

/// Diesel error type alias.
pub type DbError = diesel::result::Error;

/// Async SQLite connection type.
pub type SqliteConn = SyncConnectionWrapper<SqliteConnection>;

/// Async PostgreSQL connection type.
#[cfg(feature = "postgres")]
pub type PgConn = deadpool::managed::Object<AsyncDieselConnectionManager<AsyncPgConnection>>;

/// SQL flavour of the connected backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Sqlite,
    Postgres,
}

impl SqlDialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }
}

/// SQLite "pool": connections are opened on demand.
#[derive(Clone)]
pub struct SqlitePool {
    database_url: String,
}

impl SqlitePool {
    pub fn new(database_url: &str) -> Self {
        let url = database_url.strip_prefix("sqlite:").unwrap_or(database_url);
        Self {
            database_url: url.to_string(),
        }
    }

    pub fn from_path(path: &Path) -> Self {
        Self::new(&path.display().to_string())
    }

    /// Open a connection with foreign keys on and a busy timeout so
    /// concurrent loaders wait on each other instead of failing.
    pub async fn get(&self) -> Result<SqliteConn, DbError> {
        use diesel_async::SimpleAsyncConnection;

        let mut conn = SqliteConn::establish(&self.database_url)
            .await
            .map_err(to_diesel_error)?;
        conn.batch_execute("PRAGMA busy_timeout = 30000; PRAGMA foreign_keys = ON;")
            .await?;
        Ok(conn)
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}

/// PostgreSQL connection pool.
#[cfg(feature = "postgres")]
#[derive(Clone)]
pub struct PgPool {
    pool: DeadPool<AsyncPgConnection>,
    database_url: String,
}

#[cfg(feature = "postgres")]
impl PgPool {
    pub fn new(database_url: &str, max_size: usize) -> Result<Self, DbError> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = DeadPool::builder(config)
            .max_size(max_size)
            .build()
            .map_err(to_diesel_error)?;
        Ok(Self {
            pool,
            database_url: database_url.to_string(),
        })
    }

    pub async fn get(&self) -> Result<PgConn, DbError> {
        self.pool.get().await.map_err(to_diesel_error)
    }

    /// URL for opening raw `tokio-postgres` clients (COPY).
    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}

/// Unified database pool that supports both SQLite and PostgreSQL.
#[derive(Clone)]
pub enum DbPool {
    Sqlite(SqlitePool),
    #[cfg(feature = "postgres")]
    Postgres(PgPool),
}

impl DbPool {
    /// Create a pool from a database URL.
    ///
    /// `postgres://` and `postgresql://` select PostgreSQL (when compiled
    /// in); everything else is treated as a SQLite path.
    pub fn from_url(url: &str) -> Result<Self, DbError> {
        if super::util::is_postgres_url(url) {
            #[cfg(feature = "postgres")]
            {
                return Ok(DbPool::Postgres(PgPool::new(url, 10)?));
            }
            #[cfg(not(feature = "postgres"))]
            {
                return Err(to_diesel_error(
                    "PostgreSQL support not compiled. Use --features postgres",
                ));
            }
        }

        Ok(DbPool::Sqlite(SqlitePool::new(url)))
    }

    pub fn sqlite_from_path(path: &Path) -> Self {
        DbPool::Sqlite(SqlitePool::from_path(path))
    }

    pub fn is_sqlite(&self) -> bool {
        matches!(self, DbPool::Sqlite(_))
    }

    pub fn dialect(&self) -> SqlDialect {
        match self {
            DbPool::Sqlite(_) => SqlDialect::Sqlite,
            #[cfg(feature = "postgres")]
            DbPool::Postgres(_) => SqlDialect::Postgres,
        }
    }
}

/// Render a sea-query statement for the pool's backend with values inlined.
///
/// Used for tables whose names are only known at runtime (staging and link
/// tables); sea-query handles identifier quoting and literal escaping.
pub fn build_sql<S: QueryStatementWriter>(pool: &DbPool, stmt: &S) -> String {
    match pool.dialect() {
        SqlDialect::Sqlite => stmt.to_string(SqliteQueryBuilder),
        SqlDialect::Postgres => stmt.to_string(sea_query::PostgresQueryBuilder),
    }
}

/// Run a block against a connection from either backend.
///
/// The body is expanded once per backend, so the same Diesel code
/// type-checks against both connection types.
///
/// # Example
/// ```ignore
/// with_conn!(self.pool, conn => {
///     staging_batches::table.load::<BatchRecord>(&mut conn).await
/// })
/// ```
#[macro_export]
macro_rules! with_conn {
    ($pool:expr, $conn:ident => $body:expr) => {{
        match &$pool {
            $crate::repository::pool::DbPool::Sqlite(pool) => {
                let mut $conn = pool.get().await?;
                $body
            }
            #[cfg(feature = "postgres")]
            $crate::repository::pool::DbPool::Postgres(pool) => {
                let mut $conn = pool.get().await?;
                $body
            }
        }
    }};
}

/// Like [`with_conn!`] but with a separate body per backend, for SQL whose
/// syntax differs.
#[macro_export]
macro_rules! with_conn_split {
    ($pool:expr, sqlite: $sqlite_conn:ident => $sqlite_body:expr, postgres: $pg_conn:ident => $pg_body:expr) => {{
        match &$pool {
            $crate::repository::pool::DbPool::Sqlite(pool) => {
                let mut $sqlite_conn = pool.get().await?;
                $sqlite_body
            }
            #[cfg(feature = "postgres")]
            $crate::repository::pool::DbPool::Postgres(pool) => {
                let mut $pg_conn = pool.get().await?;
                $pg_body
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_query::{Alias, Query};

    #[test]
    fn test_pool_detection() {
        assert!(DbPool::from_url("/path/to/db.sqlite").unwrap().is_sqlite());
        assert!(DbPool::from_url("sqlite:/path/to/db").unwrap().is_sqlite());
        assert_eq!(
            DbPool::from_url("/tmp/x.db").unwrap().dialect(),
            SqlDialect::Sqlite
        );

        #[cfg(feature = "postgres")]
        assert_eq!(
            DbPool::from_url("postgres://localhost/test")
                .unwrap()
                .dialect(),
            SqlDialect::Postgres
        );
        #[cfg(not(feature = "postgres"))]
        assert!(DbPool::from_url("postgres://localhost/test").is_err());
    }

    #[test]
    fn test_build_sql_escapes_literals() {
        let pool = DbPool::from_url("/tmp/x.db").unwrap();
        let stmt = Query::insert()
            .into_table(Alias::new("stg_demo"))
            .columns([Alias::new("name")])
            .values_panic(["O'Brien".into()])
            .to_owned();
        let sql = build_sql(&pool, &stmt);
        assert!(sql.contains("'O''Brien'"), "{}", sql);
    }
}
