use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use brainstorm_core::domain::prd::{PrdKey, PrdRecord, PrdSummary};
use brainstorm_core::domain::state::{ConversationState, ThreadKey, UserId};

pub mod checkpoint;
pub mod memory;
pub mod prd;

pub use checkpoint::SqlCheckpointRepository;
pub use memory::{InMemoryCheckpointRepository, InMemoryPrdRepository};
pub use prd::SqlPrdRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("stale checkpoint for `{thread_id}`: expected {expected} stored messages")]
    StaleCheckpoint { thread_id: String, expected: usize },
}

/// Storage of PRDs keyed by `(user_id, feature_name)`. Every lookup carries the owning user.
#[async_trait]
pub trait PrdRepository: Send + Sync {
    async fn find(&self, key: &PrdKey) -> Result<Option<PrdRecord>, RepositoryError>;

    /// Inserts the record, or overwrites every column of an existing one with the same key.
    async fn insert_or_replace(&self, record: PrdRecord) -> Result<(), RepositoryError>;

    /// Rewrites `content` and `updated_at` in place. Returns `false` when no row matched.
    async fn update_content(
        &self,
        key: &PrdKey,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<PrdSummary>, RepositoryError>;
}

/// Last-known conversation snapshot per thread.
#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    async fn load(&self, key: &ThreadKey) -> Result<Option<ConversationState>, RepositoryError>;
    /// Writes the snapshot unconditionally, replacing any existing one.
    async fn save(&self, state: &ConversationState) -> Result<(), RepositoryError>;

    /// Writes the snapshot only if the stored one still holds `loaded_messages` messages.
    /// Fails with [`RepositoryError::StaleCheckpoint`] when another writer got there first.
    async fn save_if_unchanged(
        &self,
        state: &ConversationState,
        loaded_messages: usize,
    ) -> Result<(), RepositoryError>;
    async fn delete(&self, key: &ThreadKey) -> Result<bool, RepositoryError>;
}

pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}
