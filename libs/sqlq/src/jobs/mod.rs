//! Named jobs on top of a queue
//!
//! A job message carries the job name and an opaque payload. [`create`] sends
//! one; a [`Runner`] receives them and calls the function registered under
//! the name.

mod envelope;
mod runner;

use std::time::Duration;

use crate::db::Tx;
use crate::queue::{Message, MessageId, Queue};
use crate::Result;

use envelope::Envelope;

pub use runner::{JobFuture, Runner, RunnerConfig};

/// Per-job send options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOptions {
    /// Higher priority jobs run first.
    pub priority: i32,
    /// The job is not run before this has passed.
    pub delay: Duration,
}

impl JobOptions {
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Create a job named `name` with `payload` on `queue`.
pub async fn create(
    queue: &Queue,
    name: &str,
    payload: impl Into<Vec<u8>>,
    options: JobOptions,
) -> Result<MessageId> {
    let message = job_message(name, payload.into(), options)?;
    let id = queue.send_and_get_id(message).await?;
    tracing::debug!(queue = %queue.name(), job = %name, message_id = %id, "Created job");
    Ok(id)
}

/// Like [`create`], but within an existing transaction.
pub async fn create_tx(
    tx: &mut Tx<'_>,
    queue: &Queue,
    name: &str,
    payload: impl Into<Vec<u8>>,
    options: JobOptions,
) -> Result<MessageId> {
    let message = job_message(name, payload.into(), options)?;
    let id = queue.send_and_get_id_tx(tx, message).await?;
    tracing::debug!(queue = %queue.name(), job = %name, message_id = %id, "Created job");
    Ok(id)
}

fn job_message(name: &str, payload: Vec<u8>, options: JobOptions) -> Result<Message> {
    let body = Envelope::new(name, payload).encode()?;
    Ok(Message::new(body)
        .with_delay(options.delay)
        .with_priority(options.priority))
}
