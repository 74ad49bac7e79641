//! Queue domain models

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identifier assigned by the store when a message is inserted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl AsRef<str> for MessageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A queue message.
///
/// When sending, `body`, `delay` and `priority` are used and `id` is ignored.
/// A received message carries its `id`, `body`, `priority` and the number of
/// times it has been received, including the current claim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub body: Vec<u8>,
    pub delay: Duration,
    /// Higher priority messages are received first.
    pub priority: i32,
    pub received: u32,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Columns returned by a successful claim.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ClaimedRow {
    pub id: String,
    pub body: Vec<u8>,
    pub priority: i32,
    pub received: i32,
}

impl From<ClaimedRow> for Message {
    fn from(row: ClaimedRow) -> Self {
        Self {
            id: MessageId(row.id),
            body: row.body,
            delay: Duration::ZERO,
            priority: row.priority,
            received: u32::try_from(row.received).unwrap_or_default(),
        }
    }
}
