use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryJobDetail {
    pub target_repo: String,
    pub pr_url: Option<String>,
    pub status: String,
}

/// The two webhook events spec §6 names, tagged so the sink can dispatch on
/// `event_type` without a separate routing table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "kebab-case")]
pub enum NotifyEvent {
    PrOpened {
        change_id: i64,
        job_id: uuid::Uuid,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
        source_repo: String,
        target_repo: String,
        target_service: String,
        pr_url: String,
        severity: String,
        is_breaking: bool,
        summary: String,
        changed_routes: Vec<String>,
    },
    RecoveryComplete {
        change_id: i64,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
        affected_services: Vec<String>,
        job_details: Vec<RecoveryJobDetail>,
        mttr_seconds: u64,
    },
}

impl NotifyEvent {
    /// The webhook path this event is POSTed to (spec §6).
    pub fn path(&self) -> &'static str {
        match self {
            NotifyEvent::PrOpened { .. } => "/api/v1/webhooks/pr-opened",
            NotifyEvent::RecoveryComplete { .. } => "/api/v1/webhooks/recovery-complete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pr_opened_serializes_with_event_type_tag() {
        let event = NotifyEvent::PrOpened {
            change_id: 1,
            job_id: uuid::Uuid::nil(),
            timestamp: Utc::now(),
            source_repo: "org/api-core".to_string(),
            target_repo: "org/billing-service".to_string(),
            target_service: "billing-service".to_string(),
            pr_url: "https://github.com/org/billing-service/pull/1".to_string(),
            severity: "critical".to_string(),
            is_breaking: true,
            summary: "New required field(s): priority".to_string(),
            changed_routes: vec!["POST /api/v1/sessions".to_string()],
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "pr-opened");
        assert_eq!(event.path(), "/api/v1/webhooks/pr-opened");
    }
}
