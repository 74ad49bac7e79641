mod support;

use std::collections::HashSet;

use anyhow::Context as _;
use sqlq::{Message, MessageId, Queue};

const MESSAGES: usize = 64;
const RECEIVERS: usize = 8;

/// Receive until the queue reports nothing visible.
async fn drain(queue: Queue) -> sqlq::Result<Vec<MessageId>> {
    let mut ids = Vec::new();
    while let Some(message) = queue.receive().await? {
        ids.push(message.id);
    }
    Ok(ids)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_receivers_never_claim_the_same_message() -> anyhow::Result<()> {
    let dir = tempfile::tempdir().context("create temp dir")?;

    for store in support::pooled_stores(dir.path(), RECEIVERS as u32).await? {
        let queue = support::queue(&store, "claims")?;

        let mut sent = HashSet::new();
        for i in 0..MESSAGES {
            sent.insert(queue.send_and_get_id(Message::new(i.to_string())).await?);
        }

        let receivers: Vec<_> = (0..RECEIVERS)
            .map(|_| tokio::spawn(drain(queue.clone())))
            .collect();

        let mut claimed = Vec::new();
        for receiver in receivers {
            claimed.extend(receiver.await.context("receiver task panicked")??);
        }

        let unique: HashSet<_> = claimed.iter().cloned().collect();
        assert_eq!(unique.len(), claimed.len(), "a message was claimed twice");
        assert_eq!(claimed.len(), MESSAGES);
        assert_eq!(unique, sent);
        assert!(queue.receive().await?.is_none());

        store.close().await;
    }
    Ok(())
}
