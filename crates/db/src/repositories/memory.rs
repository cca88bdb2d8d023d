use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use brainstorm_core::domain::prd::{PrdKey, PrdRecord, PrdSummary};
use brainstorm_core::domain::state::{ConversationState, ThreadKey, UserId};

use super::{CheckpointRepository, PrdRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryPrdRepository {
    records: RwLock<HashMap<PrdKey, PrdRecord>>,
}

#[async_trait::async_trait]
impl PrdRepository for InMemoryPrdRepository {
    async fn find(&self, key: &PrdKey) -> Result<Option<PrdRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.get(key).cloned())
    }

    async fn insert_or_replace(&self, record: PrdRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        records.insert(record.key.clone(), record);
        Ok(())
    }

    async fn update_content(
        &self,
        key: &PrdKey,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut records = self.records.write().await;
        match records.get_mut(key) {
            Some(record) => {
                record.content = content.to_string();
                record.updated_at = updated_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<PrdSummary>, RepositoryError> {
        let records = self.records.read().await;
        let mut summaries: Vec<PrdSummary> = records
            .values()
            .filter(|record| &record.key.user_id == user_id)
            .map(|record| PrdSummary {
                feature_name: record.key.feature.clone(),
                title: record.title.clone(),
                description: record.description.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.feature_name.cmp(&b.feature_name));
        Ok(summaries)
    }
}

#[derive(Default)]
pub struct InMemoryCheckpointRepository {
    states: RwLock<HashMap<ThreadKey, ConversationState>>,
}

#[async_trait::async_trait]
impl CheckpointRepository for InMemoryCheckpointRepository {
    async fn load(&self, key: &ThreadKey) -> Result<Option<ConversationState>, RepositoryError> {
        let states = self.states.read().await;
        Ok(states.get(key).cloned())
    }

    async fn save(&self, state: &ConversationState) -> Result<(), RepositoryError> {
        let mut states = self.states.write().await;
        states.insert(state.thread_key(), state.clone());
        Ok(())
    }

    async fn save_if_unchanged(
        &self,
        state: &ConversationState,
        loaded_messages: usize,
    ) -> Result<(), RepositoryError> {
        let key = state.thread_key();
        let mut states = self.states.write().await;
        match states.get_mut(&key) {
            Some(stored) if stored.messages().len() == loaded_messages => {
                *stored = state.clone();
                Ok(())
            }
            _ => Err(RepositoryError::StaleCheckpoint {
                thread_id: key.thread_id(),
                expected: loaded_messages,
            }),
        }
    }

    async fn delete(&self, key: &ThreadKey) -> Result<bool, RepositoryError> {
        let mut states = self.states.write().await;
        Ok(states.remove(key).is_some())
    }
}
