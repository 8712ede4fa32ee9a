//! Guardrailed dispatcher (spec §4.9). Grounded on
//! `original_source/propagate/dispatcher.py` for the exact unit-of-work
//! ordering — guardrail check before job-row creation and before semaphore
//! acquisition, semaphore held only around the live dispatch call,
//! `idempotency_key = bundle_hash` via `job.idempotency_key()` — translated
//! from `asyncio.gather(..., return_exceptions=True)` to a
//! `tokio::task::JoinSet`, matching `healer::ci::spawner`'s fan-out shape.

use std::sync::Arc;

use chrono::Utc;
use propagate_types::{AuditLogEntry, AuditStore, JobStatus, JobStore, RemediationJob, RepoFixBundle};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::guardrails::Guardrails;
use crate::ports::AgentPort;

async fn append_audit(audit: &dyn AuditStore, job: &RemediationJob, old_status: Option<&str>, detail: impl Into<String>) {
    let entry = AuditLogEntry {
        id: 0,
        job_id: job.job_id,
        old_status: old_status.map(str::to_string),
        new_status: job.status.as_str().to_string(),
        changed_at: Utc::now(),
        detail: Some(detail.into()),
    };
    if let Err(err) = audit.append(entry).await {
        tracing::warn!(job_id = %job.job_id, error = %err, "failed to append audit log row");
    }
}

/// The one unit of work the dispatcher fans out per bundle.
pub struct Dispatcher {
    pub jobs: Arc<dyn JobStore>,
    pub audit: Arc<dyn AuditStore>,
    pub agent: Arc<dyn AgentPort>,
    pub guardrails: Arc<Guardrails>,
}

impl Dispatcher {
    pub fn new(jobs: Arc<dyn JobStore>, audit: Arc<dyn AuditStore>, agent: Arc<dyn AgentPort>, guardrails: Arc<Guardrails>) -> Self {
        Self { jobs, audit, agent, guardrails }
    }

    /// Fan out `bundles` under the guardrails' concurrency cap. Returns one
    /// `RemediationJob` per bundle. Fire-and-forget: does not wait for any
    /// dispatched job to reach a terminal status — that is the
    /// orchestrator's job, via the status reconciler.
    ///
    /// Ordering guarantee: every dispatch in this wave is started (the
    /// `create_session` call issued or the guardrail-blocked row created)
    /// before this function returns.
    pub async fn dispatch_wave(
        &self,
        change_id: i64,
        bundles: Vec<RepoFixBundle>,
        wave_context: Option<serde_json::Value>,
        is_dry_run: bool,
    ) -> Vec<RemediationJob> {
        let semaphore = Arc::new(Semaphore::new(self.guardrails.max_parallel().max(1)));
        let mut set = JoinSet::new();

        for bundle in bundles {
            let jobs = self.jobs.clone();
            let audit = self.audit.clone();
            let agent = self.agent.clone();
            let guardrails = self.guardrails.clone();
            let semaphore = semaphore.clone();
            let wave_context = wave_context.clone();
            set.spawn(async move {
                dispatch_one(jobs.as_ref(), audit.as_ref(), agent.as_ref(), guardrails.as_ref(), &semaphore, change_id, bundle, wave_context, is_dry_run).await
            });
        }

        let mut results = Vec::new();
        while let Some(outcome) = set.join_next().await {
            match outcome {
                Ok(job) => results.push(job),
                Err(err) => tracing::error!(error = %err, "dispatch task panicked"),
            }
        }
        results
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_one(
    jobs: &dyn JobStore,
    audit: &dyn AuditStore,
    agent: &dyn AgentPort,
    guardrails: &Guardrails,
    semaphore: &Semaphore,
    change_id: i64,
    bundle: RepoFixBundle,
    wave_context: Option<serde_json::Value>,
    is_dry_run: bool,
) -> RemediationJob {
    let violations = guardrails.validate_paths(&bundle.all_target_paths());
    if !violations.is_empty() {
        let job = RemediationJob::new_blocked(change_id, &bundle.target_repo, &bundle.bundle_hash, violations.join("; "), is_dry_run);
        let job = persist_create(jobs, job).await;
        append_audit(audit, &job, None, job.error_summary.clone().unwrap_or_default()).await;
        return job;
    }

    let queued = RemediationJob::new_queued(change_id, &bundle.target_repo, &bundle.bundle_hash, is_dry_run);
    let queued = persist_create(jobs, queued).await;
    append_audit(audit, &queued, None, "job created, awaiting dispatch slot").await;

    let _permit = semaphore.acquire().await;

    let mut running = queued.clone();
    running.status = JobStatus::Running;
    running.updated_at = Utc::now();
    let running = persist_update(jobs, running).await;
    append_audit(audit, &running, Some(JobStatus::Queued.as_str()), "dispatching to the agent").await;

    match agent.create_session(&bundle.prompt, &running.idempotency_key(), wave_context.as_ref()).await {
        Ok(session) => {
            let mut dispatched = running.clone();
            dispatched.agent_run_id = Some(session.session_id);
            dispatched.updated_at = Utc::now();
            persist_update(jobs, dispatched).await
        }
        Err(err) => {
            let mut blocked = running.clone();
            blocked.status = JobStatus::NeedsHuman;
            blocked.error_summary = Some(format!("agent dispatch failed: {err}"));
            blocked.updated_at = Utc::now();
            let blocked = persist_update(jobs, blocked).await;
            append_audit(audit, &blocked, Some(JobStatus::Running.as_str()), blocked.error_summary.clone().unwrap_or_default()).await;
            blocked
        }
    }
}

async fn persist_create(jobs: &dyn JobStore, job: RemediationJob) -> RemediationJob {
    match jobs.create(job.clone()).await {
        Ok(stored) => stored,
        Err(err) => {
            tracing::error!(job_id = %job.job_id, error = %err, "failed to persist new remediation job");
            job
        }
    }
}

async fn persist_update(jobs: &dyn JobStore, job: RemediationJob) -> RemediationJob {
    match jobs.update(job.clone()).await {
        Ok(stored) => stored,
        Err(err) => {
            tracing::error!(job_id = %job.job_id, error = %err, "failed to persist remediation job transition");
            job
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use propagate_config::GuardrailConfig;
    use propagate_scm::{AgentSession, AgentStatus, ScmError, StructuredOutput};
    use propagate_types::StoreError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeJobStore {
        jobs: Mutex<Vec<RemediationJob>>,
    }

    #[async_trait]
    impl JobStore for FakeJobStore {
        async fn create(&self, job: RemediationJob) -> Result<RemediationJob, StoreError> {
            self.jobs.lock().unwrap().push(job.clone());
            Ok(job)
        }
        async fn update(&self, job: RemediationJob) -> Result<RemediationJob, StoreError> {
            let mut jobs = self.jobs.lock().unwrap();
            if let Some(existing) = jobs.iter_mut().find(|j| j.job_id == job.job_id) {
                *existing = job.clone();
            }
            Ok(job)
        }
        async fn get(&self, job_id: uuid::Uuid) -> Result<RemediationJob, StoreError> {
            self.jobs.lock().unwrap().iter().find(|j| j.job_id == job_id).cloned().ok_or(StoreError::NotFound)
        }
        async fn by_change(&self, change_id: i64) -> Result<Vec<RemediationJob>, StoreError> {
            Ok(self.jobs.lock().unwrap().iter().filter(|j| j.change_id == change_id).cloned().collect())
        }
        async fn needing_reconciliation(&self) -> Result<Vec<RemediationJob>, StoreError> {
            Ok(self.jobs.lock().unwrap().iter().filter(|j| !j.status.is_terminal() || j.pr_url.is_some()).cloned().collect())
        }
    }

    #[derive(Default)]
    struct FakeAuditStore {
        rows: Mutex<Vec<AuditLogEntry>>,
    }

    #[async_trait]
    impl AuditStore for FakeAuditStore {
        async fn append(&self, entry: AuditLogEntry) -> Result<AuditLogEntry, StoreError> {
            self.rows.lock().unwrap().push(entry.clone());
            Ok(entry)
        }
        async fn for_job(&self, job_id: uuid::Uuid) -> Result<Vec<AuditLogEntry>, StoreError> {
            Ok(self.rows.lock().unwrap().iter().filter(|r| r.job_id == job_id).cloned().collect())
        }
        async fn count_with_marker(&self, job_id: uuid::Uuid, marker: &str) -> Result<u32, StoreError> {
            Ok(self.rows.lock().unwrap().iter().filter(|r| r.job_id == job_id && r.detail.as_deref().unwrap_or_default().contains(marker)).count() as u32)
        }
    }

    struct FakeAgent {
        fail: bool,
    }

    #[async_trait]
    impl AgentPort for FakeAgent {
        async fn create_session(&self, _prompt: &str, idempotency_key: &str, _wave_context: Option<&serde_json::Value>) -> Result<AgentSession, ScmError> {
            if self.fail {
                return Err(ScmError::Api { status: 500, body: "boom".to_string() });
            }
            Ok(AgentSession {
                session_id: format!("sess-{idempotency_key}"),
                status_enum: AgentStatus::Queued,
                structured_output: StructuredOutput::default(),
                prompt: None,
            })
        }
        async fn get_session(&self, _session_id: &str) -> Result<AgentSession, ScmError> {
            unreachable!("dispatcher never polls")
        }
        async fn send_message(&self, _session_id: &str, _message: &str, _wave_context: Option<&serde_json::Value>) -> Result<(), ScmError> {
            unreachable!("dispatcher never sends follow-up messages")
        }
    }

    fn bundle(service: &str, client_paths: Vec<String>) -> RepoFixBundle {
        RepoFixBundle {
            target_repo: format!("org/{service}"),
            target_service: service.to_string(),
            change_summary: "New required field(s): priority".to_string(),
            breaking_changes: vec![],
            affected_routes: vec!["POST /api/v1/sessions".to_string()],
            call_count_7d: 10,
            client_paths,
            test_paths: vec![],
            frontend_paths: vec![],
            prompt: "fix it".to_string(),
            bundle_hash: "abc123abc123abcd".to_string(),
        }
    }

    #[tokio::test]
    async fn guardrail_violation_blocks_without_dispatch() {
        let dispatcher = Dispatcher::new(
            Arc::new(FakeJobStore::default()),
            Arc::new(FakeAuditStore::default()),
            Arc::new(FakeAgent { fail: false }),
            Arc::new(Guardrails::new(GuardrailConfig::default())),
        );
        let bundles = vec![bundle("billing-service", vec!["infra/terraform/main.tf".to_string()])];
        let jobs = dispatcher.dispatch_wave(1, bundles, None, false).await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::NeedsHuman);
        assert!(jobs[0].agent_run_id.is_none());
        assert!(jobs[0].error_summary.as_ref().unwrap().starts_with("Guardrail violation"));
    }

    #[tokio::test]
    async fn clean_bundle_dispatches_and_records_run_id() {
        let dispatcher = Dispatcher::new(
            Arc::new(FakeJobStore::default()),
            Arc::new(FakeAuditStore::default()),
            Arc::new(FakeAgent { fail: false }),
            Arc::new(Guardrails::new(GuardrailConfig::default())),
        );
        let bundles = vec![bundle("billing-service", vec!["src/clients/api_core.rs".to_string()])];
        let jobs = dispatcher.dispatch_wave(1, bundles, None, false).await;
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].agent_run_id.is_some());
        assert!(jobs[0].agent_run_id.as_ref().unwrap().contains(&jobs[0].idempotency_key()));
    }

    #[tokio::test]
    async fn agent_failure_lands_job_in_needs_human() {
        let dispatcher = Dispatcher::new(
            Arc::new(FakeJobStore::default()),
            Arc::new(FakeAuditStore::default()),
            Arc::new(FakeAgent { fail: true }),
            Arc::new(Guardrails::new(GuardrailConfig::default())),
        );
        let bundles = vec![bundle("billing-service", vec!["src/clients/api_core.rs".to_string()])];
        let jobs = dispatcher.dispatch_wave(1, bundles, None, false).await;
        assert_eq!(jobs[0].status, JobStatus::NeedsHuman);
        assert!(jobs[0].error_summary.as_ref().unwrap().contains("agent dispatch failed"));
    }

    #[tokio::test]
    async fn other_bundles_still_dispatch_when_one_is_blocked() {
        let dispatcher = Dispatcher::new(
            Arc::new(FakeJobStore::default()),
            Arc::new(FakeAuditStore::default()),
            Arc::new(FakeAgent { fail: false }),
            Arc::new(Guardrails::new(GuardrailConfig::default())),
        );
        let bundles = vec![
            bundle("billing-service", vec!["infra/terraform/main.tf".to_string()]),
            bundle("dashboard-service", vec!["src/clients/api_core.rs".to_string()]),
        ];
        let jobs = dispatcher.dispatch_wave(1, bundles, None, false).await;
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().any(|j| j.status == JobStatus::NeedsHuman));
        assert!(jobs.iter().any(|j| j.status == JobStatus::Running || j.agent_run_id.is_some()));
    }
}
