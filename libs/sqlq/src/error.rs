//! Error types for the queue engine and job runner

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cannot start transaction: {0}")]
    Begin(sqlx::Error),

    #[error("Cannot commit transaction: {0}")]
    Commit(sqlx::Error),

    #[error("Cannot roll back transaction after error (rollback error: {rollback}), original error: {source}")]
    Rollback {
        rollback: sqlx::Error,
        #[source]
        source: Box<Error>,
    },

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported database URL: {0}")]
    UnsupportedDatabase(String),

    /// The caller's cancellation token fired while waiting.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Job \"{0}\" already registered")]
    DuplicateJob(String),

    #[error("Job \"{0}\" not registered")]
    UnregisteredJob(String),

    #[error("Envelope error: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Error::InvalidConfig(message.into())
    }
}
