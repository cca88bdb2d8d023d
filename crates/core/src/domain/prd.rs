use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::state::UserId;

/// Storage key derived from a human feature name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureKey(pub String);

impl FeatureKey {
    /// Spaces and path separators become underscores; everything else is kept verbatim.
    pub fn normalize(feature: &str) -> Self {
        Self(feature.replace([' ', '/'], "_"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Composite key of a persisted PRD. Always carries the owning user.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrdKey {
    pub user_id: UserId,
    pub feature: FeatureKey,
}

impl PrdKey {
    pub fn new(user_id: UserId, feature_name: &str) -> Self {
        Self { user_id, feature: FeatureKey::normalize(feature_name) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrdRecord {
    pub key: PrdKey,
    pub title: String,
    pub description: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrdSummary {
    pub feature_name: FeatureKey,
    pub title: String,
    pub description: String,
}

/// How a `generate` call landed in storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrdWriteStatus {
    /// Update mode found no prior record and inserted one.
    Created,
    /// Update mode rewrote the content of an existing record.
    Updated,
    /// Default mode replaced whatever was stored under the key.
    Saved,
}

impl PrdWriteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Saved => "saved",
        }
    }
}
