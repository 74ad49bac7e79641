//! Transaction support for atomic queue operations

use std::panic::AssertUnwindSafe;

use futures::{future::BoxFuture, FutureExt};
use sqlx::{Postgres, Sqlite, Transaction};

use super::{Flavor, Store};
use crate::{Error, Result};

/// Future returned by the unit of work passed to [`in_tx`].
pub type TxFuture<'t, T> = BoxFuture<'t, Result<T>>;

/// An open transaction in either dialect.
///
/// The variants are public so callers can run their own statements next to
/// the `_tx` queue operations and have both commit or roll back together.
pub enum Tx<'c> {
    Sqlite(Transaction<'c, Sqlite>),
    Postgres(Transaction<'c, Postgres>),
}

impl Tx<'_> {
    pub fn flavor(&self) -> Flavor {
        match self {
            Tx::Sqlite(_) => Flavor::Sqlite,
            Tx::Postgres(_) => Flavor::Postgres,
        }
    }

    pub async fn commit(self) -> Result<()> {
        match self {
            Tx::Sqlite(tx) => tx.commit().await,
            Tx::Postgres(tx) => tx.commit().await,
        }
        .map_err(Error::Commit)
    }

    pub async fn rollback(self) -> std::result::Result<(), sqlx::Error> {
        match self {
            Tx::Sqlite(tx) => tx.rollback().await,
            Tx::Postgres(tx) => tx.rollback().await,
        }
    }
}

/// Run `work` inside a transaction on `store`.
///
/// Commits when `work` succeeds. When it returns an error the transaction is
/// rolled back and the error is returned; if the rollback fails as well the
/// result is [`Error::Rollback`] carrying both. When `work` panics the
/// transaction is rolled back first and the panic then resumes unchanged.
///
/// ```rust,ignore
/// let id = in_tx(&store, move |tx| {
///     Box::pin(async move { queue.send_and_get_id_tx(tx, Message::new(body)).await })
/// })
/// .await?;
/// ```
pub async fn in_tx<T, F>(store: &Store, work: F) -> Result<T>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut Tx<'static>) -> TxFuture<'t, T>,
{
    let mut tx = store.begin().await?;

    let outcome = AssertUnwindSafe(work(&mut tx)).catch_unwind().await;

    match outcome {
        Ok(Ok(value)) => {
            tx.commit().await?;
            Ok(value)
        }
        Ok(Err(err)) => Err(rolled_back(err, tx.rollback().await)),
        Err(panic) => {
            if let Err(e) = tx.rollback().await {
                tracing::error!(error = %e, "Failed to roll back transaction after panic");
            }
            std::panic::resume_unwind(panic)
        }
    }
}

/// The error to report once a failed unit of work has been rolled back.
fn rolled_back(err: Error, rollback: std::result::Result<(), sqlx::Error>) -> Error {
    match rollback {
        Ok(()) => err,
        Err(rollback) => Error::Rollback {
            rollback,
            source: Box::new(err),
        },
    }
}
