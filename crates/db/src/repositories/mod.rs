use async_trait::async_trait;
use thiserror::Error;

use wkdesk_core::domain::conversation::{Checkpoint, ThreadId};

pub mod checkpoint;
pub mod key_value;
pub mod memory;

pub use checkpoint::SqlCheckpointStore;
pub use key_value::SqlKeyValueStore;
pub use memory::{InMemoryCheckpointStore, InMemoryKeyValueStore};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// String-keyed, string-valued record store. Every call commits on its own.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> Result<(), RepositoryError>;
    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError>;
    async fn get_all(&self) -> Result<Vec<String>, RepositoryError>;
    /// Absent keys are ignored.
    async fn delete(&self, key: &str) -> Result<(), RepositoryError>;
    async fn clear(&self) -> Result<(), RepositoryError>;
    async fn keys(&self) -> Result<Vec<String>, RepositoryError>;
    async fn values(&self) -> Result<Vec<String>, RepositoryError>;
    async fn items(&self) -> Result<Vec<(String, String)>, RepositoryError>;
    async fn len(&self) -> Result<usize, RepositoryError>;
    async fn contains(&self, key: &str) -> Result<bool, RepositoryError>;

    async fn is_empty(&self) -> Result<bool, RepositoryError> {
        Ok(self.len().await? == 0)
    }
}

/// Append-only history of conversation snapshots, addressed by thread.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn put(&self, checkpoint: Checkpoint) -> Result<(), RepositoryError>;
    /// Checkpoint with the highest step for the thread.
    async fn latest(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, RepositoryError>;
    /// All checkpoints of the thread, oldest first.
    async fn list(&self, thread_id: &ThreadId) -> Result<Vec<Checkpoint>, RepositoryError>;
    async fn delete_thread(&self, thread_id: &ThreadId) -> Result<(), RepositoryError>;
}
