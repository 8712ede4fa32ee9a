use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `remediation_jobs.status`. Monotonic under the state machine of spec
/// §4.9/§4.10 — see `propagate_core::reconciler` for the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    PrOpened,
    CiFailed,
    NeedsHuman,
    Green,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::CiFailed | JobStatus::NeedsHuman | JobStatus::Green)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::PrOpened => "pr_opened",
            JobStatus::CiFailed => "ci_failed",
            JobStatus::NeedsHuman => "needs_human",
            JobStatus::Green => "green",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "pr_opened" => Ok(JobStatus::PrOpened),
            "ci_failed" => Ok(JobStatus::CiFailed),
            "needs_human" => Ok(JobStatus::NeedsHuman),
            "green" => Ok(JobStatus::Green),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Persisted per (change, repo). Jointly owned: the dispatcher creates it,
/// the status reconciler mutates it thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationJob {
    pub job_id: uuid::Uuid,
    pub change_id: i64,
    pub target_repo: String,
    pub status: JobStatus,
    pub agent_run_id: Option<String>,
    pub pr_url: Option<String>,
    pub bundle_hash: String,
    pub error_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_dry_run: bool,
}

impl RemediationJob {
    pub fn new_queued(change_id: i64, target_repo: impl Into<String>, bundle_hash: impl Into<String>, is_dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            job_id: uuid::Uuid::new_v4(),
            change_id,
            target_repo: target_repo.into(),
            status: JobStatus::Queued,
            agent_run_id: None,
            pr_url: None,
            bundle_hash: bundle_hash.into(),
            error_summary: None,
            created_at: now,
            updated_at: now,
            is_dry_run,
        }
    }

    pub fn new_blocked(
        change_id: i64,
        target_repo: impl Into<String>,
        bundle_hash: impl Into<String>,
        error_summary: impl Into<String>,
        is_dry_run: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: uuid::Uuid::new_v4(),
            change_id,
            target_repo: target_repo.into(),
            status: JobStatus::NeedsHuman,
            agent_run_id: None,
            pr_url: None,
            bundle_hash: bundle_hash.into(),
            error_summary: Some(error_summary.into()),
            created_at: now,
            updated_at: now,
            is_dry_run,
        }
    }

    /// `"change-{change_id}-{bundle_hash}"` per spec §4.9/§6.
    pub fn idempotency_key(&self) -> String {
        format!("change-{}-{}", self.change_id, self.bundle_hash)
    }
}
