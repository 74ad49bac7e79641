//! Queue handlers
//!
//! - `GET /` receives a message, optionally long-polling with `?timeout=`
//! - `POST /` sends a message
//! - `PUT /` extends a message's timeout
//! - `DELETE /` deletes a message

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use sqlq::{CancellationToken, Message, MessageId};
use tokio::task::JoinHandle;

use super::duration::parse_duration;
use super::wire::{MessageEnvelope, WireMessage};
use crate::error::{Error, Result};
use crate::state::AppState;

/// Upper bound for `timeout`.
const MAX_WAIT: Duration = Duration::from_secs(20);

/// Default polling interval while long-polling, capped at the timeout.
const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Default, Deserialize)]
pub struct ReceiveParams {
    pub timeout: Option<String>,
    pub interval: Option<String>,
}

pub async fn receive(
    State(state): State<AppState>,
    Query(params): Query<ReceiveParams>,
) -> Result<Response> {
    let timeout = match non_empty(&params.timeout) {
        Some(text) => Some(parse_wait(text)?),
        None => None,
    };

    let message = match timeout {
        None => state
            .queue
            .receive()
            .await
            .map_err(Error::queue("error receiving message"))?,
        Some(timeout) => {
            let interval = match non_empty(&params.interval) {
                Some(text) => parse_interval(text, timeout)?,
                None => timeout.min(DEFAULT_INTERVAL),
            };
            receive_within(&state, timeout, interval).await?
        }
    };

    Ok(match message {
        Some(message) => Json(MessageEnvelope {
            message: WireMessage::from(message),
        })
        .into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// Long-poll until a message arrives or `timeout` passes.
async fn receive_within(
    state: &AppState,
    timeout: Duration,
    interval: Duration,
) -> Result<Option<Message>> {
    let cancel = CancellationToken::new();
    // Dropped with the request, which also ends the deadline task.
    let _guard = cancel.clone().drop_guard();
    spawn_deadline(cancel.clone(), timeout);

    match state.queue.receive_and_wait(interval, &cancel).await {
        Ok(message) => Ok(Some(message)),
        Err(e) if e.is_cancelled() => Ok(None),
        Err(e) => Err(Error::queue("error receiving message")(e)),
    }
}

/// Cancel `cancel` after `timeout`, or return early once it is cancelled.
fn spawn_deadline(cancel: CancellationToken, timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(timeout) => cancel.cancel(),
        }
    })
}

pub async fn send(State(state): State<AppState>, body: Bytes) -> Result<StatusCode> {
    let request = decode(&body)?.message;

    let delay = request
        .delay()
        .ok_or_else(|| Error::bad_request("delay cannot be negative"))?;

    let message = Message::new(request.body)
        .with_delay(delay)
        .with_priority(request.priority);

    state
        .queue
        .send(message)
        .await
        .map_err(Error::queue("error sending message"))?;

    Ok(StatusCode::OK)
}

pub async fn extend(State(state): State<AppState>, body: Bytes) -> Result<StatusCode> {
    let request = decode(&body)?.message;

    if request.id.is_empty() {
        return Err(Error::bad_request("ID cannot be empty"));
    }

    let delay = request
        .delay()
        .filter(|delay| !delay.is_zero())
        .ok_or_else(|| Error::bad_request("delay must be larger than zero"))?;

    state
        .queue
        .extend(&MessageId::from(request.id), delay)
        .await
        .map_err(Error::queue("error extending message"))?;

    Ok(StatusCode::OK)
}

pub async fn delete(State(state): State<AppState>, body: Bytes) -> Result<StatusCode> {
    let request = decode(&body)?.message;

    if request.id.is_empty() {
        return Err(Error::bad_request("ID cannot be empty"));
    }

    state
        .queue
        .delete(&MessageId::from(request.id))
        .await
        .map_err(Error::queue("error deleting message"))?;

    Ok(StatusCode::OK)
}

fn decode(body: &[u8]) -> Result<MessageEnvelope> {
    serde_json::from_slice(body)
        .map_err(|e| Error::bad_request(format!("error decoding request: {e}")))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

fn parse_wait(text: &str) -> Result<Duration> {
    let nanos = parse_duration(text)
        .map_err(|e| Error::bad_request(format!("error parsing timeout parameter: {e}")))?;

    match u64::try_from(nanos).map(Duration::from_nanos) {
        Ok(timeout) if !timeout.is_zero() && timeout <= MAX_WAIT => Ok(timeout),
        _ => Err(Error::bad_request(
            "timeout must be between 0 (exclusive) and 20 (inclusive) seconds",
        )),
    }
}

fn parse_interval(text: &str, timeout: Duration) -> Result<Duration> {
    let nanos = parse_duration(text)
        .map_err(|e| Error::bad_request(format!("error parsing interval parameter: {e}")))?;

    match u64::try_from(nanos).map(Duration::from_nanos) {
        Ok(interval) if !interval.is_zero() && interval <= timeout => Ok(interval),
        _ => Err(Error::bad_request(
            "interval must be between 0 (exclusive) and timeout (inclusive)",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_must_be_positive_and_at_most_twenty_seconds() {
        assert_eq!(parse_wait("20s").unwrap(), MAX_WAIT);
        assert_eq!(parse_wait("250ms").unwrap(), Duration::from_millis(250));
        assert!(parse_wait("0").is_err());
        assert!(parse_wait("-1s").is_err());
        assert!(parse_wait("21s").is_err());
        assert!(parse_wait("soon").is_err());
    }

    #[test]
    fn interval_must_fit_inside_timeout() {
        let timeout = Duration::from_secs(1);
        assert_eq!(
            parse_interval("1s", timeout).unwrap(),
            Duration::from_secs(1)
        );
        assert!(parse_interval("1001ms", timeout).is_err());
        assert!(parse_interval("0s", timeout).is_err());
    }

    #[tokio::test]
    async fn deadline_cancels_after_timeout() {
        let cancel = CancellationToken::new();
        let deadline = spawn_deadline(cancel.clone(), Duration::from_millis(50));

        tokio::time::timeout(Duration::from_secs(2), deadline)
            .await
            .unwrap()
            .unwrap();
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn deadline_ends_when_request_is_dropped() {
        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();
        let deadline = spawn_deadline(cancel.clone(), MAX_WAIT);

        drop(guard);

        tokio::time::timeout(Duration::from_secs(1), deadline)
            .await
            .expect("deadline task should stop with the request")
            .unwrap();
    }
}
