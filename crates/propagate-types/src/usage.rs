use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only input to the impact resolver. Ingestion is external; the core
/// only queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRequest {
    pub ts: DateTime<Utc>,
    pub caller_service: String,
    pub method: String,
    pub route_template: String,
    pub status_code: u16,
    pub duration_ms: u64,
}
