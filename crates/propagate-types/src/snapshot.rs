use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A promoted contract baseline. Immutable once stored.
///
/// `version_hash` is the first 16 hex characters of `SHA-256(content)` and is
/// the sole identity of a snapshot: `put` is idempotent on this value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSnapshot {
    pub version_hash: String,
    pub content: String,
    pub source_ref: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl ContractSnapshot {
    pub fn new(version_hash: impl Into<String>, content: impl Into<String>, source_ref: Option<String>) -> Self {
        Self {
            version_hash: version_hash.into(),
            content: content.into(),
            source_ref,
            captured_at: Utc::now(),
        }
    }
}
