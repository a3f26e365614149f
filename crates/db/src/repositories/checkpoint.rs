use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use wkdesk_core::domain::conversation::{Checkpoint, CheckpointSource, ConversationState, ThreadId};

use super::{CheckpointStore, RepositoryError};
use crate::DbPool;

/// Durable checkpointer over the `checkpoints` table. Snapshots are stored as
/// JSON so a thread survives process restarts.
pub struct SqlCheckpointStore {
    pool: DbPool,
}

impl SqlCheckpointStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CheckpointStore for SqlCheckpointStore {
    async fn put(&self, checkpoint: Checkpoint) -> Result<(), RepositoryError> {
        let state_json = serde_json::to_string(&checkpoint.state)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO checkpoints (thread_id, checkpoint_id, step, source, state_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(checkpoint.thread_id.as_str())
        .bind(checkpoint.checkpoint_id.to_string())
        .bind(checkpoint.step)
        .bind(checkpoint.source.as_str())
        .bind(state_json)
        .bind(checkpoint.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, RepositoryError> {
        let row = sqlx::query(
            "SELECT thread_id, checkpoint_id, step, source, state_json, created_at
             FROM checkpoints
             WHERE thread_id = ?
             ORDER BY step DESC, created_at DESC
             LIMIT 1",
        )
        .bind(thread_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| decode_checkpoint(&row)).transpose()
    }

    async fn list(&self, thread_id: &ThreadId) -> Result<Vec<Checkpoint>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT thread_id, checkpoint_id, step, source, state_json, created_at
             FROM checkpoints
             WHERE thread_id = ?
             ORDER BY step ASC, created_at ASC",
        )
        .bind(thread_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_checkpoint).collect()
    }

    async fn delete_thread(&self, thread_id: &ThreadId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM checkpoints WHERE thread_id = ?")
            .bind(thread_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn decode_checkpoint(row: &sqlx::sqlite::SqliteRow) -> Result<Checkpoint, RepositoryError> {
    let thread_id: String = row.try_get("thread_id")?;
    let checkpoint_id: String = row.try_get("checkpoint_id")?;
    let source: String = row.try_get("source")?;
    let state_json: String = row.try_get("state_json")?;
    let created_at: String = row.try_get("created_at")?;

    let checkpoint_id = Uuid::parse_str(&checkpoint_id)
        .map_err(|error| RepositoryError::Decode(format!("checkpoint_id: {error}")))?;
    let source = source.parse::<CheckpointSource>().map_err(RepositoryError::Decode)?;
    let state = serde_json::from_str::<ConversationState>(&state_json)
        .map_err(|error| RepositoryError::Decode(format!("state_json: {error}")))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("created_at: {error}")))?;

    Ok(Checkpoint {
        thread_id: ThreadId(thread_id),
        checkpoint_id,
        step: row.try_get("step")?,
        source,
        state,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wkdesk_core::domain::conversation::{
        Checkpoint, CheckpointSource, ConversationState, Message, ThreadId, ToolCall,
    };

    use crate::repositories::{CheckpointStore, SqlCheckpointStore};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn tool_round_trip_state() -> ConversationState {
        let mut state = ConversationState::default();
        state.append([
            Message::user("weather in Stuttgart?"),
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCall {
                    id: "call_1".to_string(),
                    name: "tavily_search".to_string(),
                    arguments: json!({"query": "weather Stuttgart"}),
                }],
            ),
            Message::tool_result("call_1", r#"[{"title":"Forecast"}]"#),
            Message::assistant("It is sunny in Stuttgart."),
        ]);
        state
    }

    #[tokio::test]
    async fn latest_restores_full_message_history() {
        let pool = setup().await;
        let store = SqlCheckpointStore::new(pool.clone());
        let thread = ThreadId("client:c1".to_string());

        let state = tool_round_trip_state();
        store
            .put(Checkpoint::new(thread.clone(), 0, CheckpointSource::Input, ConversationState::default()))
            .await
            .expect("put input");
        store
            .put(Checkpoint::new(thread.clone(), 3, CheckpointSource::Reason, state.clone()))
            .await
            .expect("put reason");

        let latest = store.latest(&thread).await.expect("latest").expect("checkpoint exists");
        assert_eq!(latest.step, 3);
        assert_eq!(latest.source, CheckpointSource::Reason);
        assert_eq!(latest.state, state);

        pool.close().await;
    }

    #[tokio::test]
    async fn threads_are_isolated() {
        let pool = setup().await;
        let store = SqlCheckpointStore::new(pool.clone());
        let first = ThreadId("client:c1".to_string());
        let second = ThreadId("client:c2".to_string());

        store
            .put(Checkpoint::new(first.clone(), 1, CheckpointSource::Input, tool_round_trip_state()))
            .await
            .expect("put");

        assert!(store.latest(&second).await.expect("latest").is_none());
        assert_eq!(store.list(&first).await.expect("list").len(), 1);

        store.delete_thread(&first).await.expect("delete");
        assert!(store.list(&first).await.expect("list").is_empty());

        pool.close().await;
    }

    #[tokio::test]
    async fn corrupt_state_surfaces_decode_error() {
        let pool = setup().await;
        sqlx::query(
            "INSERT INTO checkpoints (thread_id, checkpoint_id, step, source, state_json, created_at)
             VALUES ('client:c9', '6f1c1f0e-8c1b-4d2f-9a65-0c1f1d8f3e11', 1, 'reason', 'not json', '2026-03-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("seed corrupt row");

        let store = SqlCheckpointStore::new(pool.clone());
        let error = store
            .latest(&ThreadId("client:c9".to_string()))
            .await
            .expect_err("corrupt state should not decode");
        assert!(error.to_string().contains("state_json"));

        pool.close().await;
    }
}
