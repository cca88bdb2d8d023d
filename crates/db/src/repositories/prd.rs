use chrono::{DateTime, Utc};
use sqlx::Row;

use brainstorm_core::domain::prd::{FeatureKey, PrdKey, PrdRecord, PrdSummary};
use brainstorm_core::domain::state::UserId;

use super::{parse_timestamp, PrdRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPrdRepository {
    pool: DbPool,
}

impl SqlPrdRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_prd(row: &sqlx::sqlite::SqliteRow) -> Result<PrdRecord, RepositoryError> {
    let user_id: String =
        row.try_get("user_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let feature_name: String =
        row.try_get("feature_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let title: String = row.try_get("title").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let description: String =
        row.try_get("description").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let content: String =
        row.try_get("content").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at_str: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(PrdRecord {
        key: PrdKey { user_id: UserId(user_id), feature: FeatureKey(feature_name) },
        title,
        description,
        content,
        created_at: parse_timestamp("created_at", &created_at_str)?,
        updated_at: parse_timestamp("updated_at", &updated_at_str)?,
    })
}

#[async_trait::async_trait]
impl PrdRepository for SqlPrdRepository {
    async fn find(&self, key: &PrdKey) -> Result<Option<PrdRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT user_id, feature_name, title, description, content, created_at, updated_at
             FROM prds WHERE user_id = ? AND feature_name = ?",
        )
        .bind(&key.user_id.0)
        .bind(key.feature.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_prd(r)?)),
            None => Ok(None),
        }
    }

    async fn insert_or_replace(&self, record: PrdRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO prds (user_id, feature_name, title, description, content, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id, feature_name) DO UPDATE SET
                 title = excluded.title,
                 description = excluded.description,
                 content = excluded.content,
                 created_at = excluded.created_at,
                 updated_at = excluded.updated_at",
        )
        .bind(&record.key.user_id.0)
        .bind(record.key.feature.as_str())
        .bind(&record.title)
        .bind(&record.description)
        .bind(&record.content)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_content(
        &self,
        key: &PrdKey,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE prds SET content = ?, updated_at = ? WHERE user_id = ? AND feature_name = ?",
        )
        .bind(content)
        .bind(updated_at.to_rfc3339())
        .bind(&key.user_id.0)
        .bind(key.feature.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<PrdSummary>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT feature_name, title, description FROM prds
             WHERE user_id = ? ORDER BY feature_name ASC",
        )
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(PrdSummary {
                    feature_name: FeatureKey(
                        row.try_get("feature_name")
                            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
                    ),
                    title: row
                        .try_get("title")
                        .map_err(|e| RepositoryError::Decode(e.to_string()))?,
                    description: row
                        .try_get("description")
                        .map_err(|e| RepositoryError::Decode(e.to_string()))?,
                })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()
    }
}
