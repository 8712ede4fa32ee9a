use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Append-only row written on every job status transition. Never mutated
/// or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub job_id: uuid::Uuid,
    pub old_status: Option<String>,
    pub new_status: String,
    pub changed_at: DateTime<Utc>,
    pub detail: Option<String>,
}

/// Substring the reconciler writes into `detail` when a CI-unknown poll
/// occurs, so the attempt count can be derived by counting matching rows
/// rather than maintaining a separate counter column (see DESIGN.md's
/// resolution of the CI-unknown open question).
pub const CI_UNKNOWN_MARKER: &str = "CI status unknown";
