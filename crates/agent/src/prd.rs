//! PRD generation and retrieval, isolated per user.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::info;

use brainstorm_core::domain::message::Message;
use brainstorm_core::domain::prd::{PrdKey, PrdRecord, PrdSummary, PrdWriteStatus};
use brainstorm_core::domain::state::UserId;
use brainstorm_db::repositories::{PrdRepository, RepositoryError};

use crate::llm::{LlmClient, LlmError};
use crate::locks::KeyedLocks;
use crate::prompts;

#[derive(Debug, Error)]
pub enum PrdError {
    #[error("prd persistence failed: {0}")]
    Persistence(#[from] RepositoryError),
    #[error("prd generation failed: {0}")]
    Llm(#[from] LlmError),
    #[error("prd prompt could not be rendered: {0}")]
    Prompt(#[from] tera::Error),
    #[error("user_id must not be empty")]
    MissingUser,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedPrd {
    pub feature: String,
    pub user_id: UserId,
    pub content: String,
    pub status: PrdWriteStatus,
}

impl GeneratedPrd {
    pub fn render(&self) -> String {
        format!(
            "PRD {} in database for feature: {} (User: {})\n\n{}",
            self.status.as_str(),
            self.feature,
            self.user_id,
            self.content
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerateRequest<'a> {
    pub feature: &'a str,
    pub description: &'a str,
    pub user_input: &'a str,
    pub update_existing: bool,
}

pub struct PrdService {
    repository: Arc<dyn PrdRepository>,
    llm: Arc<dyn LlmClient>,
    locks: KeyedLocks<PrdKey>,
}

impl PrdService {
    pub fn new(repository: Arc<dyn PrdRepository>, llm: Arc<dyn LlmClient>) -> Self {
        Self { repository, llm, locks: KeyedLocks::default() }
    }

    /// Generates a PRD with the LLM and upserts it under `(user_id, feature)`.
    ///
    /// Calls for the same key are serialized from the initial read through the final write.
    pub async fn generate(
        &self,
        request: GenerateRequest<'_>,
        user_id: &UserId,
    ) -> Result<GeneratedPrd, PrdError> {
        if user_id.0.trim().is_empty() {
            return Err(PrdError::MissingUser);
        }

        let key = PrdKey::new(user_id.clone(), request.feature);
        let _guard = self.locks.acquire(&key).await;

        let existing =
            if request.update_existing { self.repository.find(&key).await? } else { None };
        let prompt = prompts::prd_prompt(
            request.feature,
            request.description,
            request.user_input,
            existing.as_ref().map(|record| record.content.as_str()),
        )?;

        let reply = self.llm.complete(None, &[Message::human(prompt)], &[]).await?;
        let content = reply.content;
        let now = Utc::now();

        let status = if request.update_existing && existing.is_some() {
            if self.repository.update_content(&key, &content, now).await? {
                PrdWriteStatus::Updated
            } else {
                self.insert(&key, &request, &content).await?;
                PrdWriteStatus::Created
            }
        } else if request.update_existing {
            self.insert(&key, &request, &content).await?;
            PrdWriteStatus::Created
        } else {
            self.insert(&key, &request, &content).await?;
            PrdWriteStatus::Saved
        };

        info!(
            event_name = "agent.prd.written",
            user_id = %user_id,
            feature = %key.feature.as_str(),
            status = status.as_str(),
            "prd persisted"
        );

        Ok(GeneratedPrd {
            feature: request.feature.to_string(),
            user_id: user_id.clone(),
            content,
            status,
        })
    }

    /// Exact-key lookup. `Ok(None)` means the user has no PRD for that feature.
    pub async fn read(&self, feature: &str, user_id: &UserId) -> Result<Option<String>, PrdError> {
        let key = PrdKey::new(user_id.clone(), feature);
        Ok(self.repository.find(&key).await?.map(|record| record.content))
    }

    pub async fn list(&self, user_id: &UserId) -> Result<Vec<PrdSummary>, PrdError> {
        Ok(self.repository.list_for_user(user_id).await?)
    }

    async fn insert(
        &self,
        key: &PrdKey,
        request: &GenerateRequest<'_>,
        content: &str,
    ) -> Result<(), PrdError> {
        let now = Utc::now();
        self.repository
            .insert_or_replace(PrdRecord {
                key: key.clone(),
                title: request.feature.to_string(),
                description: request.description.to_string(),
                content: content.to_string(),
                created_at: now,
                updated_at: now,
            })
            .await?;
        Ok(())
    }
}
