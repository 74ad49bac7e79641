#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::path::Path;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context as _;
use sqlq::{Queue, QueueOptions, Store};

/// Set to run every store test against PostgreSQL as well as SQLite.
pub const POSTGRES_URL_ENV: &str = "SQLQ_TEST_POSTGRES_URL";

/// Stores to run a test against: a fresh in-memory SQLite database, plus
/// PostgreSQL when [`POSTGRES_URL_ENV`] is set.
///
/// The PostgreSQL database is shared between tests, so callers must use
/// [`unique_name`] for their queues.
pub async fn stores() -> anyhow::Result<Vec<Store>> {
    init_tracing();

    let sqlite = Store::connect_in_memory()
        .await
        .context("open in-memory sqlite store")?;
    sqlite.migrate().await.context("migrate sqlite store")?;

    let mut stores = vec![sqlite];

    if let Ok(url) = std::env::var(POSTGRES_URL_ENV) {
        let postgres = Store::connect_with_pool_size(&url, 5)
            .await
            .context("connect to postgres store")?;
        postgres.migrate().await.context("migrate postgres store")?;
        stores.push(postgres);
    }

    Ok(stores)
}

/// Stores whose pools hand out several connections at once, so claims
/// really race: a SQLite file under `dir`, plus PostgreSQL when
/// [`POSTGRES_URL_ENV`] is set.
pub async fn pooled_stores(dir: &Path, max_connections: u32) -> anyhow::Result<Vec<Store>> {
    init_tracing();

    let url = format!("sqlite://{}", dir.join("queue.db").display());
    let sqlite = Store::connect_with_pool_size(&url, max_connections)
        .await
        .context("open sqlite file store")?;
    sqlite.migrate().await.context("migrate sqlite store")?;

    let mut stores = vec![sqlite];

    if let Ok(url) = std::env::var(POSTGRES_URL_ENV) {
        let postgres = Store::connect_with_pool_size(&url, max_connections)
            .await
            .context("connect to postgres store")?;
        postgres.migrate().await.context("migrate postgres store")?;
        stores.push(postgres);
    }

    Ok(stores)
}

/// A queue name no other test run will use.
pub fn unique_name(prefix: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    format!("{prefix}_{}_{n}_{nanos}", std::process::id())
}

pub fn queue(store: &Store, prefix: &str) -> anyhow::Result<Queue> {
    Ok(Queue::new(store.clone(), QueueOptions::new(unique_name(prefix)))?)
}

pub fn queue_with(store: &Store, options: QueueOptions) -> anyhow::Result<Queue> {
    let options = QueueOptions {
        name: unique_name(&options.name),
        ..options
    };
    Ok(Queue::new(store.clone(), options)?)
}

fn init_tracing() {
    use tracing_subscriber::prelude::*;
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "sqlq=info,sqlx=warn".into()),
            )
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}
