//! Shared application state

use anyhow::Context;
use sqlq::{Queue, Store};

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub queue: Queue,
}

impl AppState {
    /// Connect to the configured store, migrate it if asked to, and open the queue.
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let store = Store::connect_with_pool_size(&config.database.url, config.database.max_connections)
            .await
            .context("Failed to connect to database")?;

        if config.database.run_migrations {
            store
                .migrate()
                .await
                .context("Failed to run database migrations")?;
        }

        let queue = Queue::new(store, config.queue.options()).context("Failed to open queue")?;

        tracing::info!(
            queue = %queue.name(),
            flavor = ?queue.store().flavor(),
            max_receive = queue.max_receive(),
            timeout = ?queue.timeout(),
            "Queue ready"
        );

        Ok(Self { queue })
    }

    pub fn from_queue(queue: Queue) -> Self {
        Self { queue }
    }
}
