//! Durable message queue on top of a SQL table
//!
//! Messages live in a single `sqlq` table in SQLite or PostgreSQL and are
//! told apart by queue name. The crate is split into three layers:
//!
//! - `db`: store handle, schema migrations and the [`in_tx`] transaction helper
//! - `queue`: send, receive, extend and delete with per-message visibility
//!   timeouts, delays, priorities and a maximum receive count
//! - `jobs`: named jobs with opaque payloads and a [`Runner`] that executes
//!   them with a concurrency limit and automatic lease renewal
//!
//! Delivery is at least once. Every operation has a `_tx` variant that runs in
//! a caller-owned transaction, so sending a message can be made atomic with
//! the caller's own writes.
//!
//! ```rust,no_run
//! use sqlq::{Message, Queue, QueueOptions, Store};
//!
//! # async fn demo() -> sqlq::Result<()> {
//! let store = Store::connect("sqlite://app.db").await?;
//! store.migrate().await?;
//!
//! let queue = Queue::new(store, QueueOptions::new("emails"))?;
//! queue.send(Message::new("hello")).await?;
//!
//! if let Some(message) = queue.receive().await? {
//!     queue.delete(&message.id).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod error;
pub mod jobs;
pub mod queue;

pub use db::{in_tx, Flavor, Store, Tx, TxFuture};
pub use error::{Error, Result};
pub use jobs::{create, create_tx, JobFuture, JobOptions, Runner, RunnerConfig};
pub use queue::{Message, MessageId, Queue, QueueOptions};
pub use tokio_util::sync::CancellationToken;
