//! Time-windowed chat history kept in the widget's keyed storage.
//!
//! The whole sequence lives under one key as a JSON array. Every mutation is a
//! read-modify-write of that value, serialised by `rmw` so two tasks sharing a
//! store cannot lose each other's appends.

use crate::{
    chat::{ChatMessage, Sender},
    clock::Clock,
    error::{Error, Result},
    kv::KeyValueStore,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub const MESSAGES_KEY: &str = "chatMessages";
pub const SNAPSHOT_KEY: &str = "chat_conversation";

/// Messages older than this are dropped by [`MessageStore::prune`].
pub const RETENTION_MS: i64 = 60 * 60 * 1000;

#[derive(Clone)]
pub struct MessageStore {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    rmw: Arc<Mutex<()>>,
}

impl MessageStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            kv,
            clock,
            rmw: Arc::new(Mutex::new(())),
        }
    }

    /// Appends a message stamped with the current time and returns it.
    pub async fn append(&self, sender: Sender, content: impl Into<String>) -> Result<ChatMessage> {
        let _guard = self.rmw.lock().await;

        let mut messages = self.read().await?;
        let message = ChatMessage::new(self.clock.now_ms(), sender, content);
        messages.push(message.clone());
        self.write(&messages).await?;

        Ok(message)
    }

    /// Drops every message with `time < now - RETENTION_MS`. Returns how many went.
    pub async fn prune(&self, now: i64) -> Result<usize> {
        let _guard = self.rmw.lock().await;

        let mut messages = self.read().await?;
        let before = messages.len();
        let cutoff = now.saturating_sub(RETENTION_MS);
        messages.retain(|m| m.time >= cutoff);
        let removed = before - messages.len();

        self.write(&messages).await?;
        if removed > 0 {
            debug!("Pruned {} expired chat message(s)", removed);
        }

        Ok(removed)
    }

    /// Prunes against the store's own clock.
    pub async fn prune_expired(&self) -> Result<usize> {
        self.prune(self.clock.now_ms()).await
    }

    /// The persisted sequence as stored. Call `prune` first if expired entries matter.
    pub async fn list(&self) -> Result<Vec<ChatMessage>> {
        let _guard = self.rmw.lock().await;
        self.read().await
    }

    /// Empties the history, discarding whatever was stored.
    pub async fn reset(&self) -> Result<()> {
        let _guard = self.rmw.lock().await;
        self.write(&[]).await
    }

    /// Stores the rendered conversation markup. Nothing reads it back.
    pub async fn save_snapshot(&self, html: &str) -> Result<()> {
        self.kv.set(SNAPSHOT_KEY, html).await?;
        Ok(())
    }

    async fn read(&self) -> Result<Vec<ChatMessage>> {
        match self.kv.get(MESSAGES_KEY).await? {
            Some(raw) if !raw.trim().is_empty() => {
                serde_json::from_str(&raw).map_err(Error::CorruptHistory)
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn write(&self, messages: &[ChatMessage]) -> Result<()> {
        let encoded = serde_json::to_string(messages)
            .map_err(|e| Error::Storage(anyhow::Error::new(e)))?;
        self.kv.set(MESSAGES_KEY, &encoded).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv::MemoryKv;

    fn store_at(start_ms: i64) -> (MessageStore, Arc<MemoryKv>, Arc<ManualClock>) {
        let kv = Arc::new(MemoryKv::new());
        let clock = Arc::new(ManualClock::new(start_ms));
        (MessageStore::new(kv.clone(), clock.clone()), kv, clock)
    }

    fn contents(messages: &[ChatMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[tokio::test]
    async fn list_preserves_append_order() {
        let (store, _, clock) = store_at(1_000);

        store.append(Sender::User, "one").await.unwrap();
        store.append(Sender::Agent, "two").await.unwrap();
        // Same timestamp, still ordered by insertion.
        store.append(Sender::Agent, "three").await.unwrap();
        clock.advance(1);
        store.append(Sender::User, "one").await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(contents(&listed), vec!["one", "two", "three", "one"]);
        assert_eq!(listed[0].sender, Sender::User);
        assert_eq!(listed[3].time, 1_001);
    }

    #[tokio::test]
    async fn prune_removes_only_expired() {
        let (store, _, clock) = store_at(0);

        store.append(Sender::User, "hello").await.unwrap();
        clock.set(10);
        store.append(Sender::Agent, "world").await.unwrap();

        assert_eq!(store.prune(3_600_005).await.unwrap(), 1);
        assert_eq!(contents(&store.list().await.unwrap()), vec!["world"]);

        assert_eq!(store.prune(3_600_050).await.unwrap(), 1);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn prune_keeps_boundary_message() {
        let (store, _, _) = store_at(0);
        store.append(Sender::User, "edge").await.unwrap();

        // time == now - 1h is still inside the window.
        assert_eq!(store.prune(RETENTION_MS).await.unwrap(), 0);
        assert_eq!(store.prune(RETENTION_MS + 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn prune_at_extreme_clock_values() {
        let (store, _, _) = store_at(i64::MIN);
        store.append(Sender::User, "early").await.unwrap();

        assert_eq!(store.prune(i64::MIN).await.unwrap(), 0);
        assert_eq!(store.prune(i64::MAX).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn prune_both_at_once() {
        let (store, _, clock) = store_at(0);
        store.append(Sender::User, "hello").await.unwrap();
        clock.set(10);
        store.append(Sender::Agent, "world").await.unwrap();

        assert_eq!(store.prune(3_600_050).await.unwrap(), 2);
        assert!(store.list().await.unwrap().is_empty());
        // Idempotent once nothing is left to expire.
        assert_eq!(store.prune(3_600_050).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn retained_messages_are_unchanged() {
        let (store, _, clock) = store_at(5_000_000);
        let kept = store.append(Sender::Agent, "| a |\n|---|\n| 1 |").await.unwrap();

        clock.advance(60_000);
        store.prune_expired().await.unwrap();

        assert_eq!(store.list().await.unwrap(), vec![kept]);
    }

    #[tokio::test]
    async fn concurrent_appends_are_not_lost() {
        let (store, _, _) = store_at(0);

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append(Sender::User, format!("m{}", i)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.list().await.unwrap().len(), 32);
    }

    #[tokio::test]
    async fn corrupt_history_is_reported_then_reset() {
        let (store, kv, _) = store_at(0);
        kv.set(MESSAGES_KEY, "[{\"time\": ").await.unwrap();

        assert!(matches!(store.list().await, Err(Error::CorruptHistory(_))));
        assert!(matches!(
            store.append(Sender::User, "x").await,
            Err(Error::CorruptHistory(_))
        ));

        store.reset().await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
        store.append(Sender::User, "x").await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reads_history_written_by_the_page_script() {
        let (store, kv, _) = store_at(0);
        kv.set(
            MESSAGES_KEY,
            r#"[{"time":1,"sender":"user","content":"hi"},{"time":2,"sender":"agent","content":"*hey*"}]"#,
        )
        .await
        .unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed[1], ChatMessage::new(2, Sender::Agent, "*hey*"));
    }

    #[tokio::test]
    async fn snapshot_is_stored_verbatim() {
        let (store, kv, _) = store_at(0);
        store.save_snapshot("<p>hi</p>").await.unwrap();
        assert_eq!(kv.get(SNAPSHOT_KEY).await.unwrap().as_deref(), Some("<p>hi</p>"));
    }
}
