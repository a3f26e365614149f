use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::info;

use wkdesk_core::domain::conversation::{Checkpoint, ThreadId};

use super::{CheckpointStore, KeyValueStore, RepositoryError};

/// Volatile store scoped to the process lifetime.
pub struct InMemoryKeyValueStore {
    entries: RwLock<HashMap<String, String>>,
}

impl Default for InMemoryKeyValueStore {
    fn default() -> Self {
        info!(event_name = "storage.memory.initialized", "in-memory key-value store initialized");
        Self { entries: RwLock::new(HashMap::new()) }
    }
}

#[async_trait::async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn set(&self, key: &str, value: &str) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).cloned())
    }

    async fn get_all(&self) -> Result<Vec<String>, RepositoryError> {
        self.values().await
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        entries.clear();
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries.keys().cloned().collect())
    }

    async fn values(&self) -> Result<Vec<String>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries.values().cloned().collect())
    }

    async fn items(&self) -> Result<Vec<(String, String)>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().map(|(key, value)| (key.clone(), value.clone())).collect())
    }

    async fn len(&self) -> Result<usize, RepositoryError> {
        Ok(self.entries.read().await.len())
    }

    async fn contains(&self, key: &str) -> Result<bool, RepositoryError> {
        Ok(self.entries.read().await.contains_key(key))
    }
}

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    threads: RwLock<HashMap<ThreadId, Vec<Checkpoint>>>,
}

#[async_trait::async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn put(&self, checkpoint: Checkpoint) -> Result<(), RepositoryError> {
        let mut threads = self.threads.write().await;
        threads.entry(checkpoint.thread_id.clone()).or_default().push(checkpoint);
        Ok(())
    }

    async fn latest(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, RepositoryError> {
        let threads = self.threads.read().await;
        Ok(threads
            .get(thread_id)
            .and_then(|history| history.iter().max_by_key(|checkpoint| checkpoint.step))
            .cloned())
    }

    async fn list(&self, thread_id: &ThreadId) -> Result<Vec<Checkpoint>, RepositoryError> {
        let threads = self.threads.read().await;
        let mut history = threads.get(thread_id).cloned().unwrap_or_default();
        history.sort_by_key(|checkpoint| checkpoint.step);
        Ok(history)
    }

    async fn delete_thread(&self, thread_id: &ThreadId) -> Result<(), RepositoryError> {
        let mut threads = self.threads.write().await;
        threads.remove(thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wkdesk_core::domain::conversation::{
        Checkpoint, CheckpointSource, ConversationState, Message, ThreadId,
    };

    use crate::repositories::{CheckpointStore, InMemoryCheckpointStore};

    fn checkpoint(thread: &ThreadId, step: i64, text: &str) -> Checkpoint {
        let mut state = ConversationState::default();
        state.append([Message::user(text)]);
        Checkpoint::new(thread.clone(), step, CheckpointSource::Input, state)
    }

    #[tokio::test]
    async fn latest_returns_highest_step_per_thread() {
        let store = InMemoryCheckpointStore::default();
        let thread = ThreadId("client:c1".to_string());
        let other = ThreadId("client:c2".to_string());

        store.put(checkpoint(&thread, 2, "second")).await.expect("put");
        store.put(checkpoint(&thread, 1, "first")).await.expect("put");
        store.put(checkpoint(&other, 9, "elsewhere")).await.expect("put");

        let latest = store.latest(&thread).await.expect("latest").expect("checkpoint exists");
        assert_eq!(latest.step, 2);

        let steps: Vec<i64> =
            store.list(&thread).await.expect("list").iter().map(|cp| cp.step).collect();
        assert_eq!(steps, vec![1, 2]);
    }

    #[tokio::test]
    async fn delete_thread_leaves_other_threads_untouched() {
        let store = InMemoryCheckpointStore::default();
        let thread = ThreadId("client:c1".to_string());
        let other = ThreadId("client:c2".to_string());
        store.put(checkpoint(&thread, 1, "a")).await.expect("put");
        store.put(checkpoint(&other, 1, "b")).await.expect("put");

        store.delete_thread(&thread).await.expect("delete");

        assert!(store.latest(&thread).await.expect("latest").is_none());
        assert!(store.latest(&other).await.expect("latest").is_some());
    }
}
