use chrono::{DateTime, SubsecRound, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier shared by both memory tiers.
pub type RecordId = Uuid;

/// Ordered metadata attached to a record.
pub type Metadata = IndexMap<String, serde_json::Value>;

/// Unit of storage in either memory tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique identifier (random 128-bit).
    pub id: RecordId,
    /// Stored text.
    pub content: String,
    /// Free-form metadata, insertion ordered.
    #[serde(default)]
    pub metadata: Metadata,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Wall-clock expiry. Only ever set in the short-term tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl MemoryRecord {
    /// Creates a record with a fresh id and the current timestamp.
    ///
    /// Timestamps are kept at microsecond precision, the resolution of the long-term store.
    #[must_use]
    pub fn new(content: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            metadata,
            created_at: Utc::now().trunc_subsecs(6),
            expires_at: None,
        }
    }

    /// Returns true if the keyword (already lower-cased) occurs in the content or metadata.
    pub(crate) fn matches_lowercase(&self, keyword: &str) -> bool {
        if self.content.to_lowercase().contains(keyword) {
            return true;
        }
        let value_hit = self.metadata.values().any(|value| match value {
            serde_json::Value::String(text) => text.to_lowercase().contains(keyword),
            other => other.to_string().to_lowercase().contains(keyword),
        });
        value_hit || metadata_text(&self.metadata).to_lowercase().contains(keyword)
    }
}

/// JSON rendering of metadata used for text matching and persistence.
#[must_use]
pub fn metadata_text(metadata: &Metadata) -> String {
    serde_json::to_string(metadata).unwrap_or_default()
}

/// Builds metadata from `(key, value)` pairs.
#[must_use]
pub fn metadata<K, V, I>(pairs: I) -> Metadata
where
    K: Into<String>,
    V: Into<serde_json::Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}
