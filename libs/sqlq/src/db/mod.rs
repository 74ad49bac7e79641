//! Database layer - store handle, dialects and transactions

mod transaction;

use std::str::FromStr;
use std::time::Duration;

use sqlx::{
    migrate::Migrator,
    postgres::{PgPool, PgPoolOptions},
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions},
};

use crate::{Error, Result};

pub use transaction::{in_tx, Tx, TxFuture};

static SQLITE_MIGRATOR: Migrator = sqlx::migrate!("./migrations/sqlite");
static POSTGRES_MIGRATOR: Migrator = sqlx::migrate!("./migrations/postgres");

/// SQL dialect of a [`Store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Sqlite,
    Postgres,
}

/// Handle to the backing store. Cloning shares the underlying pool.
#[derive(Debug, Clone)]
pub enum Store {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

impl Store {
    /// Connect to the database at `url`, choosing the dialect from the URL scheme.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_pool_size(url, 10).await
    }

    /// Like [`Store::connect`] with an explicit pool size.
    ///
    /// In-memory SQLite URLs always get a single connection, because every
    /// connection would otherwise open its own empty database.
    pub async fn connect_with_pool_size(url: &str, max_connections: u32) -> Result<Self> {
        if url.starts_with("sqlite:") && is_in_memory(url) {
            if max_connections > 1 {
                tracing::warn!(
                    max_connections,
                    "In-memory SQLite store is limited to one connection"
                );
            }
            let options = SqliteConnectOptions::from_str(url)?;
            return Self::connect_sqlite_in_memory(options).await;
        }

        if url.starts_with("sqlite:") {
            let options = SqliteConnectOptions::from_str(url)?
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_secs(5))
                .foreign_keys(true);

            let pool = SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect_with(options)
                .await?;

            tracing::debug!(max_connections, "Connected to SQLite store");
            Ok(Store::Sqlite(pool))
        } else if url.starts_with("postgres:") || url.starts_with("postgresql:") {
            let pool = PgPoolOptions::new()
                .max_connections(max_connections)
                .connect(url)
                .await?;

            tracing::debug!(max_connections, "Connected to PostgreSQL store");
            Ok(Store::Postgres(pool))
        } else {
            let scheme = url.split(':').next().unwrap_or_default();
            Err(Error::UnsupportedDatabase(scheme.to_string()))
        }
    }

    /// Open a private in-memory SQLite database.
    ///
    /// The pool holds exactly one connection that is never recycled, so the
    /// database lives as long as any clone of the returned handle.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        Self::connect_sqlite_in_memory(options).await
    }

    async fn connect_sqlite_in_memory(options: SqliteConnectOptions) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Store::Sqlite(pool))
    }

    pub fn flavor(&self) -> Flavor {
        match self {
            Store::Sqlite(_) => Flavor::Sqlite,
            Store::Postgres(_) => Flavor::Postgres,
        }
    }

    /// Apply the embedded schema migrations for this store's dialect.
    pub async fn migrate(&self) -> Result<()> {
        match self {
            Store::Sqlite(pool) => SQLITE_MIGRATOR.run(pool).await?,
            Store::Postgres(pool) => POSTGRES_MIGRATOR.run(pool).await?,
        }

        tracing::info!(flavor = ?self.flavor(), "Schema migrations applied");
        Ok(())
    }

    /// Begin a transaction that the caller must commit or roll back.
    pub async fn begin(&self) -> Result<Tx<'static>> {
        let tx = match self {
            Store::Sqlite(pool) => Tx::Sqlite(pool.begin().await.map_err(Error::Begin)?),
            Store::Postgres(pool) => Tx::Postgres(pool.begin().await.map_err(Error::Begin)?),
        };

        Ok(tx)
    }

    pub async fn close(&self) {
        match self {
            Store::Sqlite(pool) => pool.close().await,
            Store::Postgres(pool) => pool.close().await,
        }
    }
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_rejects_unknown_scheme() {
        let result = Store::connect("mysql://localhost/queue").await;
        match result {
            Err(Error::UnsupportedDatabase(scheme)) => assert_eq!(scheme, "mysql"),
            other => panic!("expected UnsupportedDatabase, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn in_memory_store_migrates() {
        let store = Store::connect_in_memory().await.unwrap();
        assert_eq!(store.flavor(), Flavor::Sqlite);
        store.migrate().await.unwrap();

        let Store::Sqlite(pool) = &store else {
            panic!("expected sqlite store");
        };
        let count: i64 = sqlx::query_scalar("select count(*) from sqlq")
            .fetch_one(pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn detects_in_memory_urls() {
        assert!(is_in_memory("sqlite::memory:"));
        assert!(is_in_memory("sqlite://file:queue?mode=memory&cache=shared"));
        assert!(!is_in_memory("sqlite://queue.db"));
        assert!(!is_in_memory("postgres://localhost/queue"));
    }

    #[tokio::test]
    async fn in_memory_url_gets_one_connection_whatever_the_pool_size() {
        let store = Store::connect_with_pool_size("sqlite::memory:", 8)
            .await
            .unwrap();
        store.migrate().await.unwrap();

        let Store::Sqlite(pool) = &store else {
            panic!("expected sqlite store");
        };
        assert_eq!(pool.options().get_max_connections(), 1);

        // Every statement sees the migrated table.
        let counts = futures::future::join_all((0..4).map(|_| {
            sqlx::query_scalar::<_, i64>("select count(*) from sqlq").fetch_one(pool)
        }))
        .await;
        for count in counts {
            assert_eq!(count.unwrap(), 0);
        }
    }
}
