//! Named message queue backed by a SQL table
//!
//! Many named queues share the `sqlq` table and are told apart by the `queue`
//! column. A received message stays in the table, hidden from other receivers
//! until its visibility timeout passes. Messages that are never deleted are
//! redelivered up to `max_receive` times and are then kept but never handed
//! out again.

mod models;
mod sql;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::db::{in_tx, Store, Tx};
use crate::{Error, Result};

pub use models::{Message, MessageId};
use models::ClaimedRow;

/// Options for [`Queue::new`].
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub name: String,
    /// Number of times a message can be received before it is no longer handed out.
    pub max_receive: u32,
    /// Default visibility timeout applied when a message is received.
    pub timeout: Duration,
}

impl QueueOptions {
    /// Options for the queue `name` with the defaults:
    ///
    /// - `max_receive`: 3
    /// - `timeout`: 5 seconds
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_receive: 3,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn max_receive(mut self, max_receive: u32) -> Self {
        self.max_receive = max_receive;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A named queue. Cheap to clone; clones share the store's pool.
#[derive(Debug, Clone)]
pub struct Queue {
    store: Store,
    name: Arc<str>,
    max_receive: u32,
    timeout: Duration,
}

impl Queue {
    /// Create a queue handle. Nothing is written to the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the name is empty, `max_receive`
    /// is 0, or the timeout is zero.
    pub fn new(store: Store, options: QueueOptions) -> Result<Self> {
        if options.name.is_empty() {
            return Err(Error::invalid_config("queue name cannot be empty"));
        }

        if options.max_receive == 0 {
            return Err(Error::invalid_config(
                "max_receive must be greater than 0",
            ));
        }

        if options.timeout.is_zero() {
            return Err(Error::invalid_config("timeout must be greater than 0"));
        }

        Ok(Self {
            store,
            name: Arc::from(options.name),
            max_receive: options.max_receive,
            timeout: options.timeout,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_receive(&self) -> u32 {
        self.max_receive
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Send a message, visible to receivers once its delay has passed.
    pub async fn send(&self, message: Message) -> Result<()> {
        self.send_and_get_id(message).await.map(|_| ())
    }

    /// Like [`Queue::send`], but within an existing transaction.
    pub async fn send_tx(&self, tx: &mut Tx<'_>, message: Message) -> Result<()> {
        self.send_and_get_id_tx(tx, message).await.map(|_| ())
    }

    /// Like [`Queue::send`], but also returns the id of the new message, which
    /// can be used to extend or delete it without receiving it first.
    pub async fn send_and_get_id(&self, message: Message) -> Result<MessageId> {
        let queue = self.clone();
        in_tx(&self.store, move |tx| {
            Box::pin(async move { queue.send_and_get_id_tx(tx, message).await })
        })
        .await
    }

    /// Like [`Queue::send_and_get_id`], but within an existing transaction.
    pub async fn send_and_get_id_tx(&self, tx: &mut Tx<'_>, message: Message) -> Result<MessageId> {
        let timeout = deadline(message.delay)?;

        let id: String = match tx {
            Tx::Sqlite(tx) => {
                sqlx::query_scalar::<_, String>(sql::sqlite::SEND)
                    .bind(&*self.name)
                    .bind(&message.body)
                    .bind(sql::sqlite_timestamp(timeout))
                    .bind(message.priority)
                    .fetch_one(&mut **tx)
                    .await?
            }
            Tx::Postgres(tx) => {
                sqlx::query_scalar::<_, String>(sql::postgres::SEND)
                    .bind(&*self.name)
                    .bind(&message.body)
                    .bind(timeout)
                    .bind(message.priority)
                    .fetch_one(&mut **tx)
                    .await?
            }
        };

        tracing::debug!(
            queue = %self.name,
            message_id = %id,
            delay = ?message.delay,
            priority = message.priority,
            "Sent message"
        );

        Ok(MessageId::from(id))
    }

    /// Receive the highest priority, oldest visible message, or `None` if
    /// there is none.
    ///
    /// The message is hidden from other receivers for the queue's timeout and
    /// its receive count is incremented, in one statement.
    pub async fn receive(&self) -> Result<Option<Message>> {
        let queue = self.clone();
        in_tx(&self.store, move |tx| {
            Box::pin(async move { queue.receive_tx(tx).await })
        })
        .await
    }

    /// Like [`Queue::receive`], but within an existing transaction.
    pub async fn receive_tx(&self, tx: &mut Tx<'_>) -> Result<Option<Message>> {
        let now = Utc::now();
        let timeout = deadline_from(now, self.timeout)?;

        let row: Option<ClaimedRow> = match tx {
            Tx::Sqlite(tx) => {
                sqlx::query_as::<_, ClaimedRow>(sql::sqlite::RECEIVE)
                    .bind(sql::sqlite_timestamp(timeout))
                    .bind(&*self.name)
                    .bind(sql::sqlite_timestamp(now))
                    .bind(i64::from(self.max_receive))
                    .fetch_optional(&mut **tx)
                    .await?
            }
            Tx::Postgres(tx) => {
                sqlx::query_as::<_, ClaimedRow>(sql::postgres::RECEIVE)
                    .bind(timeout)
                    .bind(&*self.name)
                    .bind(now)
                    .bind(i32::try_from(self.max_receive).unwrap_or(i32::MAX))
                    .fetch_optional(&mut **tx)
                    .await?
            }
        };

        let message = row.map(Message::from);
        if let Some(message) = &message {
            tracing::debug!(
                queue = %self.name,
                message_id = %message.id,
                received = message.received,
                "Received message"
            );
        }

        Ok(message)
    }

    /// Receive a message, polling every `interval` until one is available or
    /// `cancel` fires.
    ///
    /// The first attempt is made immediately. Cancellation is checked between
    /// attempts, so an attempt that has started always completes and a claimed
    /// message is never dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] once `cancel` fires, and
    /// [`Error::InvalidConfig`] for a zero `interval`.
    pub async fn receive_and_wait(
        &self,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<Message> {
        if interval.is_zero() {
            return Err(Error::invalid_config(
                "poll interval must be greater than 0",
            ));
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = ticker.tick() => {}
            }

            if let Some(message) = self.receive().await? {
                return Ok(message);
            }
        }
    }

    /// Hide the message `id` for `delay` from now, whoever holds it.
    pub async fn extend(&self, id: &MessageId, delay: Duration) -> Result<()> {
        let queue = self.clone();
        let id = id.clone();
        in_tx(&self.store, move |tx| {
            Box::pin(async move { queue.extend_tx(tx, &id, delay).await })
        })
        .await
    }

    /// Like [`Queue::extend`], but within an existing transaction.
    pub async fn extend_tx(&self, tx: &mut Tx<'_>, id: &MessageId, delay: Duration) -> Result<()> {
        let timeout = deadline(delay)?;

        match tx {
            Tx::Sqlite(tx) => {
                sqlx::query(sql::sqlite::EXTEND)
                    .bind(sql::sqlite_timestamp(timeout))
                    .bind(&*self.name)
                    .bind(id.as_str())
                    .execute(&mut **tx)
                    .await?;
            }
            Tx::Postgres(tx) => {
                sqlx::query(sql::postgres::EXTEND)
                    .bind(timeout)
                    .bind(&*self.name)
                    .bind(id.as_str())
                    .execute(&mut **tx)
                    .await?;
            }
        }

        tracing::debug!(queue = %self.name, message_id = %id, delay = ?delay, "Extended message");
        Ok(())
    }

    /// Delete the message `id`. Deleting an unknown id is not an error.
    pub async fn delete(&self, id: &MessageId) -> Result<()> {
        let queue = self.clone();
        let id = id.clone();
        in_tx(&self.store, move |tx| {
            Box::pin(async move { queue.delete_tx(tx, &id).await })
        })
        .await
    }

    /// Like [`Queue::delete`], but within an existing transaction.
    pub async fn delete_tx(&self, tx: &mut Tx<'_>, id: &MessageId) -> Result<()> {
        match tx {
            Tx::Sqlite(tx) => {
                sqlx::query(sql::sqlite::DELETE)
                    .bind(&*self.name)
                    .bind(id.as_str())
                    .execute(&mut **tx)
                    .await?;
            }
            Tx::Postgres(tx) => {
                sqlx::query(sql::postgres::DELETE)
                    .bind(&*self.name)
                    .bind(id.as_str())
                    .execute(&mut **tx)
                    .await?;
            }
        }

        tracing::debug!(queue = %self.name, message_id = %id, "Deleted message");
        Ok(())
    }
}

fn deadline(delay: Duration) -> Result<DateTime<Utc>> {
    deadline_from(Utc::now(), delay)
}

fn deadline_from(now: DateTime<Utc>, delay: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .ok_or_else(|| Error::invalid_config(format!("delay {delay:?} is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> Store {
        Store::connect_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn new_rejects_empty_name() {
        let result = Queue::new(store().await, QueueOptions::new(""));
        match result {
            Err(e) => assert!(e.to_string().contains("queue name cannot be empty")),
            Ok(_) => panic!("Expected error for empty name"),
        }
    }

    #[tokio::test]
    async fn new_rejects_zero_max_receive() {
        let result = Queue::new(store().await, QueueOptions::new("test").max_receive(0));
        match result {
            Err(e) => assert!(e.to_string().contains("max_receive must be greater than 0")),
            Ok(_) => panic!("Expected error for zero max_receive"),
        }
    }

    #[tokio::test]
    async fn new_rejects_zero_timeout() {
        let result = Queue::new(store().await, QueueOptions::new("test").timeout(Duration::ZERO));
        match result {
            Err(e) => assert!(e.to_string().contains("timeout must be greater than 0")),
            Ok(_) => panic!("Expected error for zero timeout"),
        }
    }

    #[tokio::test]
    async fn options_have_defaults() {
        let queue = Queue::new(store().await, QueueOptions::new("test")).unwrap();
        assert_eq!(queue.name(), "test");
        assert_eq!(queue.max_receive(), 3);
        assert_eq!(queue.timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn receive_and_wait_rejects_zero_interval() {
        let queue = Queue::new(store().await, QueueOptions::new("test")).unwrap();
        let result = queue
            .receive_and_wait(Duration::ZERO, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn deadline_rejects_out_of_range_delay() {
        assert!(deadline(Duration::MAX).is_err());
        let now = Utc::now();
        assert_eq!(
            deadline_from(now, Duration::from_millis(1500)).unwrap(),
            now + chrono::Duration::milliseconds(1500)
        );
    }
}
