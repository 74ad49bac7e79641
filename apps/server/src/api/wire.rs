//! JSON shapes exchanged over HTTP
//!
//! Requests and responses wrap one message: `{"Message": {"ID", "Body", "Delay", "Priority"}}`.
//! `Body` is base64 text and `Delay` is signed nanoseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlq::Message;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MessageEnvelope {
    #[serde(rename = "Message", default)]
    pub message: WireMessage,
}

#[derive(Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WireMessage {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(with = "base64_body")]
    pub body: Vec<u8>,
    pub delay: i64,
    pub priority: i32,
}

impl WireMessage {
    /// The delay as a duration, or `None` if it is negative.
    pub fn delay(&self) -> Option<Duration> {
        u64::try_from(self.delay).ok().map(Duration::from_nanos)
    }
}

impl From<Message> for WireMessage {
    fn from(message: Message) -> Self {
        Self {
            id: message.id.to_string(),
            body: message.body,
            delay: 0,
            priority: message.priority,
        }
    }
}

mod base64_body {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    /// `null` and a missing field both mean an empty body.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD.decode(encoded).map_err(D::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
