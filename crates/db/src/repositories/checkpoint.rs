use chrono::Utc;
use sqlx::Row;

use brainstorm_core::domain::state::{ConversationState, ThreadKey};

use super::{CheckpointRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCheckpointRepository {
    pool: DbPool,
}

impl SqlCheckpointRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CheckpointRepository for SqlCheckpointRepository {
    async fn load(&self, key: &ThreadKey) -> Result<Option<ConversationState>, RepositoryError> {
        let row = sqlx::query(
            "SELECT state_json FROM conversation_checkpoints WHERE user_id = ? AND session_id = ?",
        )
        .bind(&key.user_id.0)
        .bind(&key.session_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let state_json: String =
            row.try_get("state_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let state: ConversationState = serde_json::from_str(&state_json)
            .map_err(|e| RepositoryError::Decode(format!("state_json: {e}")))?;

        if &state.thread_key() != key {
            return Err(RepositoryError::Decode(format!(
                "checkpoint for `{key}` carries identity `{}`",
                state.thread_key()
            )));
        }

        Ok(Some(state))
    }

    async fn save(&self, state: &ConversationState) -> Result<(), RepositoryError> {
        let key = state.thread_key();
        let state_json =
            serde_json::to_string(state).map_err(|e| RepositoryError::Encode(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO conversation_checkpoints
                 (user_id, session_id, thread_id, state_json, message_count, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id, session_id) DO UPDATE SET
                 state_json = excluded.state_json,
                 message_count = excluded.message_count,
                 updated_at = excluded.updated_at",
        )
        .bind(&key.user_id.0)
        .bind(&key.session_id.0)
        .bind(key.thread_id())
        .bind(&state_json)
        .bind(state.messages().len() as i64)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_if_unchanged(
        &self,
        state: &ConversationState,
        loaded_messages: usize,
    ) -> Result<(), RepositoryError> {
        let key = state.thread_key();
        let state_json =
            serde_json::to_string(state).map_err(|e| RepositoryError::Encode(e.to_string()))?;

        let result = sqlx::query(
            "UPDATE conversation_checkpoints
             SET state_json = ?, message_count = ?, updated_at = ?
             WHERE user_id = ? AND session_id = ? AND message_count = ?",
        )
        .bind(&state_json)
        .bind(state.messages().len() as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(&key.user_id.0)
        .bind(&key.session_id.0)
        .bind(loaded_messages as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::StaleCheckpoint {
                thread_id: key.thread_id(),
                expected: loaded_messages,
            });
        }
        Ok(())
    }

    async fn delete(&self, key: &ThreadKey) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM conversation_checkpoints WHERE user_id = ? AND session_id = ?",
        )
        .bind(&key.user_id.0)
        .bind(&key.session_id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use brainstorm_core::domain::message::Message;
    use brainstorm_core::domain::state::{ConversationState, StateUpdate, ThreadKey};

    use super::SqlCheckpointRepository;
    use crate::repositories::{CheckpointRepository, RepositoryError};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlCheckpointRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlCheckpointRepository::new(pool)
    }

    #[tokio::test]
    async fn save_then_load_returns_latest_snapshot() {
        let repo = setup().await;
        let key = ThreadKey::new("alice", "s-1").expect("key");

        let first = ConversationState::with_human_message(&key, "hi");
        repo.save(&first).await.expect("save first");

        let second = first
            .clone()
            .merged(
                StateUpdate::empty()
                    .with_message(Message::assistant("hello"))
                    .with_memory("likes rust"),
            );
        repo.save(&second).await.expect("save second");

        let loaded = repo.load(&key).await.expect("load").expect("checkpoint");
        assert_eq!(loaded, second);
        assert_eq!(loaded.memory(), ["likes rust".to_string()]);
    }

    #[tokio::test]
    async fn stale_continuation_is_rejected_instead_of_overwriting() {
        let repo = setup().await;
        let key = ThreadKey::new("alice", "s-1").expect("key");
        let loaded = ConversationState::with_human_message(&key, "hi");
        repo.save(&loaded).await.expect("seed");

        let winner = loaded.clone().merged(
            StateUpdate::empty()
                .with_message(Message::human("from process a"))
                .with_message(Message::assistant("reply a")),
        );
        let loser = loaded.clone().merged(
            StateUpdate::empty()
                .with_message(Message::human("from process b"))
                .with_message(Message::assistant("reply b")),
        );

        repo.save_if_unchanged(&winner, 1).await.expect("first writer");
        let stale = repo.save_if_unchanged(&loser, 1).await;

        assert!(matches!(
            stale,
            Err(RepositoryError::StaleCheckpoint { ref thread_id, expected: 1 })
                if thread_id == "alice_s-1"
        ));
        assert_eq!(repo.load(&key).await.expect("load"), Some(winner));
    }

    #[tokio::test]
    async fn colliding_thread_labels_stay_distinct() {
        let repo = setup().await;
        let left = ThreadKey::new("a_b", "c").expect("key");
        let right = ThreadKey::new("a", "b_c").expect("key");
        assert_eq!(left.thread_id(), right.thread_id());

        repo.save(&ConversationState::with_human_message(&left, "left")).await.expect("save");
        repo.save(&ConversationState::with_human_message(&right, "right")).await.expect("save");

        let loaded_left = repo.load(&left).await.expect("load").expect("left");
        let loaded_right = repo.load(&right).await.expect("load").expect("right");
        assert_eq!(loaded_left.messages()[0].content, "left");
        assert_eq!(loaded_right.messages()[0].content, "right");
    }

    #[tokio::test]
    async fn missing_and_deleted_threads_load_as_none() {
        let repo = setup().await;
        let key = ThreadKey::new("bob", "s-9").expect("key");

        assert!(repo.load(&key).await.expect("load").is_none());

        repo.save(&ConversationState::new(&key)).await.expect("save");
        assert!(repo.delete(&key).await.expect("delete"));
        assert!(repo.load(&key).await.expect("load").is_none());
    }
}
