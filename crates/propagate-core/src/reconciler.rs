//! Status reconciler (spec §4.10). Grounded on
//! `original_source/propagate/check_status.py` in full: the terminal-status
//! set, GitHub-Checks-API-first/self-reported-fallback CI source of truth,
//! the PR-URL regex (now `propagate_scm::parse_pr_url`), and CI-unknown
//! attempt counting via audit-log querying (DESIGN.md's resolution of the
//! sentinel open question). The poll-loop/report-accumulation shape follows
//! `healer::reconcile::IssueReconciler`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use propagate_notify::{NotifyEvent, Notifier};
use propagate_scm::{parse_pr_url, ci_outcome_from_check_runs, AgentStatus, CiOutcome, PullRequest};
use propagate_types::{AuditLogEntry, AuditStore, ChangeStore, JobStatus, JobStore, RemediationJob, CI_UNKNOWN_MARKER};

use crate::guardrails::Guardrails;
use crate::ports::{AgentPort, GitHubPort};

/// Everything the reconciler needs to fire a `pr-opened` webhook (spec §6)
/// on a fresh transition into `pr_opened` — kept separate from the core
/// polling fields because it is optional: a reconciler with no notifier
/// configured just skips delivery (`Notifier::has_sink` is also checked).
struct PrNotificationContext {
    notifier: Arc<Notifier>,
    changes: Arc<dyn ChangeStore>,
    source_repo: String,
    service_by_repo: HashMap<String, String>,
}

/// What the state-machine table of spec §4.10 step 4 decided for this poll.
enum Transition {
    To(JobStatus, String),
    /// Stay at `pr_opened`; record one more CI-unknown attempt.
    HoldCiUnknown,
}

fn ci_outcome_from_agent_self_report(status: Option<&str>) -> CiOutcome {
    match status {
        Some("passed") | Some("merged") => CiOutcome::Passed,
        Some("failed") | Some("closed") => CiOutcome::Failed,
        _ => CiOutcome::Unknown,
    }
}

fn map_transition(agent_status: AgentStatus, has_open_pr: bool, ci: CiOutcome) -> Transition {
    use AgentStatus::*;
    match agent_status {
        Queued | Running | Working => {
            if has_open_pr {
                Transition::To(JobStatus::PrOpened, "agent running, an attachable PR is open".to_string())
            } else {
                Transition::To(JobStatus::Running, "agent still running".to_string())
            }
        }
        Blocked => {
            if has_open_pr {
                Transition::To(JobStatus::PrOpened, "agent blocked, PR still open, keep observing".to_string())
            } else {
                Transition::To(JobStatus::NeedsHuman, "agent blocked with no PR".to_string())
            }
        }
        Stopped | Completed => {
            if !has_open_pr {
                Transition::To(JobStatus::NeedsHuman, "agent finished with no PR".to_string())
            } else {
                match ci {
                    CiOutcome::Passed => Transition::To(JobStatus::Green, "CI passed".to_string()),
                    CiOutcome::Failed => Transition::To(JobStatus::CiFailed, "CI failed".to_string()),
                    // Pending folds into the unknown branch: GitHub hasn't
                    // given a definitive answer yet either way.
                    CiOutcome::Pending | CiOutcome::Unknown => Transition::HoldCiUnknown,
                }
            }
        }
        Failed | Error | Cancelled => {
            if has_open_pr {
                Transition::To(JobStatus::CiFailed, "agent reported failure".to_string())
            } else {
                Transition::To(JobStatus::NeedsHuman, "agent reported failure with no PR".to_string())
            }
        }
        Unknown => Transition::To(JobStatus::NeedsHuman, "agent reported an unrecognized status".to_string()),
    }
}

/// PR replacement search (spec §4.10 step 3): prefer (a) identical head
/// branch, then (b) identical title, then (c) a unique same-author match,
/// then (d) the most recently created open PR.
fn find_replacement_open_pr(closed: &PullRequest, candidates: &[PullRequest]) -> Option<PullRequest> {
    if let Some(pr) = candidates.iter().find(|c| c.head.git_ref == closed.head.git_ref) {
        return Some(pr.clone());
    }
    if let Some(pr) = candidates.iter().find(|c| c.title == closed.title) {
        return Some(pr.clone());
    }
    let same_author: Vec<&PullRequest> = candidates.iter().filter(|c| c.user.login == closed.user.login).collect();
    if same_author.len() == 1 {
        return Some(same_author[0].clone());
    }
    candidates.iter().max_by_key(|c| c.created_at).cloned()
}

pub struct Reconciler {
    pub jobs: Arc<dyn JobStore>,
    pub audit: Arc<dyn AuditStore>,
    pub agent: Arc<dyn AgentPort>,
    pub github: Arc<dyn GitHubPort>,
    pub guardrails: Arc<Guardrails>,
    pub ci_unknown_max_attempts: u32,
    notifications: Option<PrNotificationContext>,
}

impl Reconciler {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        audit: Arc<dyn AuditStore>,
        agent: Arc<dyn AgentPort>,
        github: Arc<dyn GitHubPort>,
        guardrails: Arc<Guardrails>,
        ci_unknown_max_attempts: u32,
    ) -> Self {
        Self { jobs, audit, agent, github, guardrails, ci_unknown_max_attempts, notifications: None }
    }

    /// Enable `pr-opened` webhook delivery (spec §6) on fresh transitions
    /// into `pr_opened`. `service_by_repo` maps `target_repo` back to the
    /// service-map name the bundle builder used, since `RemediationJob`
    /// itself only carries `target_repo` (spec §3).
    pub fn with_notifications(
        mut self,
        notifier: Arc<Notifier>,
        changes: Arc<dyn ChangeStore>,
        source_repo: impl Into<String>,
        service_by_repo: HashMap<String, String>,
    ) -> Self {
        self.notifications = Some(PrNotificationContext { notifier, changes, source_repo: source_repo.into(), service_by_repo });
        self
    }

    /// Poll every job the store reports as needing reconciliation — called
    /// both by the background loop and by the orchestrator between waves.
    pub async fn reconcile_all(&self) -> Vec<RemediationJob> {
        let candidates = match self.jobs.needing_reconciliation().await {
            Ok(jobs) => jobs,
            Err(err) => {
                tracing::error!(error = %err, "failed to list jobs needing reconciliation");
                return Vec::new();
            }
        };
        let mut results = Vec::with_capacity(candidates.len());
        for job in candidates {
            results.push(self.reconcile_job(job).await);
        }
        results
    }

    /// Reconcile one job. Idempotent: calling this again on a job already
    /// at its stable target state with the external world unchanged is a
    /// no-op — no audit row, no store write.
    pub async fn reconcile_job(&self, job: RemediationJob) -> RemediationJob {
        let Some(agent_run_id) = job.agent_run_id.clone() else {
            return job;
        };
        if job.status.is_terminal() && job.pr_url.is_none() {
            return job;
        }

        let session = match self.agent.get_session(&agent_run_id).await {
            Ok(session) => session,
            Err(err) if err.is_retryable() => {
                tracing::debug!(job_id = %job.job_id, error = %err, "transient error polling agent session, will retry next cycle");
                return job;
            }
            Err(err) => {
                tracing::warn!(job_id = %job.job_id, error = %err, "non-retryable error polling agent session this cycle");
                return job;
            }
        };

        let mut job = job;
        let old_status = job.status;
        let old_pr_url = job.pr_url.clone();
        let mut current_pr: Option<PullRequest> = None;

        if let Some(pr_ref) = session.structured_output.pull_request.as_ref() {
            if let Some((owner, repo, number)) = parse_pr_url(&pr_ref.url) {
                if let Ok(pr) = self.github.get_pull_request(&owner, &repo, number).await {
                    if pr.is_attachable() {
                        job.pr_url = Some(pr.html_url.clone());
                        current_pr = Some(pr);
                    } else {
                        job.pr_url = None;
                    }
                }
            }
        } else if let Some(existing_url) = job.pr_url.clone() {
            if let Some((owner, repo, number)) = parse_pr_url(&existing_url) {
                if let Ok(pr) = self.github.get_pull_request(&owner, &repo, number).await {
                    if pr.is_attachable() {
                        current_pr = Some(pr);
                    } else if let Ok(open_prs) = self.github.list_open_pull_requests(&owner, &repo).await {
                        if let Some(replacement) = find_replacement_open_pr(&pr, &open_prs) {
                            job.pr_url = Some(replacement.html_url.clone());
                            current_pr = Some(replacement);
                        } else {
                            job.pr_url = None;
                        }
                    } else {
                        job.pr_url = None;
                    }
                }
            }
        }

        let has_open_pr = current_pr.is_some();

        let ci_outcome = if let Some(pr) = &current_pr {
            match self.github.check_runs_for_sha(&pr_owner(pr), &pr_repo(pr), &pr.head.sha).await {
                Ok(runs) => {
                    let outcome = ci_outcome_from_check_runs(&runs);
                    if outcome == CiOutcome::Unknown {
                        ci_outcome_from_agent_self_report(session.structured_output.ci_status.as_deref())
                    } else {
                        outcome
                    }
                }
                Err(_) => ci_outcome_from_agent_self_report(session.structured_output.ci_status.as_deref()),
            }
        } else {
            CiOutcome::Unknown
        };

        let transition = map_transition(session.status_enum, has_open_pr, ci_outcome);
        let is_hold = matches!(transition, Transition::HoldCiUnknown);

        // CI-unknown always advances the attempt counter, even when the
        // observable status stays at `pr_opened` — that is the point of
        // the hold. Every other transition only writes when something
        // actually changed, keeping repeated polls of a stable job inert.
        let (new_status, detail) = match transition {
            Transition::To(status, detail) => {
                if status == JobStatus::Green {
                    match self.validate_post_execution_paths(current_pr.as_ref()).await {
                        Ok(()) => (JobStatus::Green, detail),
                        Err(reason) => (JobStatus::NeedsHuman, reason),
                    }
                } else {
                    (status, detail)
                }
            }
            Transition::HoldCiUnknown => {
                let attempts = self.audit.count_with_marker(job.job_id, CI_UNKNOWN_MARKER).await.unwrap_or(0) + 1;
                if attempts >= self.ci_unknown_max_attempts {
                    (JobStatus::CiFailed, "failing closed: CI status unknown after max attempts".to_string())
                } else {
                    (JobStatus::PrOpened, format!("{CI_UNKNOWN_MARKER}, retrying (attempt {attempts}/{})", self.ci_unknown_max_attempts))
                }
            }
        };

        let is_hold_retry = is_hold && new_status == JobStatus::PrOpened;
        if new_status == old_status && job.pr_url == old_pr_url && !is_hold_retry {
            return job;
        }

        self.apply_transition(&mut job, old_status, new_status, detail).await;
        self.persist(job).await
    }

    async fn validate_post_execution_paths(&self, pr: Option<&PullRequest>) -> Result<(), String> {
        let Some(pr) = pr else {
            return Ok(());
        };
        let owner = pr_owner(pr);
        let repo = pr_repo(pr);
        match self.github.pull_request_files(&owner, &repo, pr.number).await {
            Ok(files) => {
                let violations = self.guardrails.validate_paths(&files);
                if violations.is_empty() {
                    Ok(())
                } else {
                    Err(format!("Post-execution path violation: {}", violations.join("; ")))
                }
            }
            Err(err) => {
                if self.guardrails.has_protected_paths() {
                    Err(format!("Cannot verify PR changed files: {err}"))
                } else {
                    Ok(())
                }
            }
        }
    }

    async fn apply_transition(&self, job: &mut RemediationJob, old_status: JobStatus, new_status: JobStatus, detail: String) {
        job.status = new_status;
        job.updated_at = Utc::now();
        if new_status != JobStatus::NeedsHuman {
            job.error_summary = None;
        } else {
            job.error_summary = Some(detail.clone());
        }
        self.append_audit(job, Some(old_status), detail).await;

        if new_status == JobStatus::PrOpened && old_status != JobStatus::PrOpened {
            self.notify_pr_opened(job).await;
        }
    }

    /// Fire the `pr-opened` webhook (spec §6) on a fresh transition into
    /// `pr_opened`. Best-effort: a missing notifier, an unmapped repo, or a
    /// change lookup failure all just skip delivery rather than blocking
    /// the reconcile pass.
    async fn notify_pr_opened(&self, job: &RemediationJob) {
        let Some(ctx) = &self.notifications else { return };
        if !ctx.notifier.has_sink() {
            return;
        }
        let Some(pr_url) = job.pr_url.clone() else { return };
        let change = match ctx.changes.get(job.change_id).await {
            Ok(change) => change,
            Err(err) => {
                tracing::warn!(job_id = %job.job_id, error = %err, "could not load change for pr-opened webhook, skipping delivery");
                return;
            }
        };
        let target_service = ctx.service_by_repo.get(&job.target_repo).cloned().unwrap_or_else(|| job.target_repo.clone());
        ctx.notifier.notify(NotifyEvent::PrOpened {
            change_id: change.change_id,
            job_id: job.job_id,
            timestamp: Utc::now(),
            source_repo: ctx.source_repo.clone(),
            target_repo: job.target_repo.clone(),
            target_service,
            pr_url,
            severity: change.severity.as_str().to_string(),
            is_breaking: change.is_breaking,
            summary: change.summary.clone(),
            changed_routes: change.changed_routes.clone(),
        });
    }

    async fn append_audit(&self, job: &RemediationJob, old_status: Option<JobStatus>, detail: String) {
        let entry = AuditLogEntry {
            id: 0,
            job_id: job.job_id,
            old_status: old_status.map(|s| s.as_str().to_string()),
            new_status: job.status.as_str().to_string(),
            changed_at: Utc::now(),
            detail: Some(detail),
        };
        if let Err(err) = self.audit.append(entry).await {
            tracing::warn!(job_id = %job.job_id, error = %err, "failed to append audit log row");
        }
    }

    async fn persist(&self, job: RemediationJob) -> RemediationJob {
        match self.jobs.update(job.clone()).await {
            Ok(stored) => stored,
            Err(err) => {
                tracing::error!(job_id = %job.job_id, error = %err, "failed to persist reconciled job");
                job
            }
        }
    }
}

fn pr_owner(pr: &PullRequest) -> String {
    parse_pr_url(&pr.html_url).map(|(owner, _, _)| owner).unwrap_or_default()
}

fn pr_repo(pr: &PullRequest) -> String {
    parse_pr_url(&pr.html_url).map(|(_, repo, _)| repo).unwrap_or_default()
}
