//! Wave-context propagator (spec §4.11). Newly structured — no direct
//! `original_source/` module covers this precise concept — but reusing
//! `bundle.rs`'s sorting conventions and `dispatcher.rs`'s
//! fire-and-forget-but-log-failures posture for the per-session sends.

use std::collections::BTreeMap;

use propagate_types::{JobStatus, RemediationJob};
use serde::Serialize;

use crate::ports::{AgentPort, GitHubPort};

const PATTERN_KEYWORDS: &[(&str, &str)] = &[
    ("client", "updated API client callsites"),
    ("gateway", "updated API client callsites"),
    ("api/", "updated API client callsites"),
    ("test", "updated test fixtures"),
    ("spec", "updated test fixtures"),
    ("frontend", "updated frontend integration"),
    ("ui/", "updated frontend integration"),
];

#[derive(Debug, Clone, Serialize)]
struct RepoContext {
    status: &'static str,
    pr_url: Option<String>,
    change_summary: String,
    changed_files: Vec<String>,
    inferred_patterns: Vec<String>,
}

/// The `wave_context` envelope sent verbatim to every next-wave session.
#[derive(Debug, Clone, Serialize)]
struct WaveContextEnvelope {
    #[serde(rename = "type")]
    kind: &'static str,
    wave_index: usize,
    source_wave_index: usize,
    upstream_fix_summaries: Vec<String>,
    notable_patterns: Vec<String>,
    test_fixtures_changed: Vec<String>,
    ci_green_prs: Vec<String>,
}

fn infer_patterns(changed_files: &[String]) -> Vec<String> {
    let mut patterns = Vec::new();
    for file in changed_files {
        for (keyword, pattern) in PATTERN_KEYWORDS {
            if file.contains(keyword) && !patterns.contains(&pattern.to_string()) {
                patterns.push(pattern.to_string());
            }
        }
    }
    patterns
}

/// Build the structured per-repo summary of a completed wave, then push it
/// as a `wave_context` message into every still-active session of the next
/// wave. Call after `dispatcher.dispatch_wave` jobs have all reached a
/// terminal status (or the wave's wait budget expired).
pub struct WavePropagator {
    pub github: std::sync::Arc<dyn GitHubPort>,
    pub agent: std::sync::Arc<dyn AgentPort>,
}

impl WavePropagator {
    pub fn new(github: std::sync::Arc<dyn GitHubPort>, agent: std::sync::Arc<dyn AgentPort>) -> Self {
        Self { github, agent }
    }

    async fn repo_context(&self, job: &RemediationJob, change_summary: &str) -> RepoContext {
        let changed_files = if let Some(pr_url) = job.pr_url.as_deref() {
            if let Some((owner, repo, number)) = propagate_scm::parse_pr_url(pr_url) {
                self.github.pull_request_files(&owner, &repo, number).await.unwrap_or_default()
            } else {
                Vec::new()
            }
        } else {
            Vec::new()
        };
        let inferred_patterns = infer_patterns(&changed_files);
        RepoContext {
            status: job.status.as_str(),
            pr_url: job.pr_url.clone(),
            change_summary: change_summary.to_string(),
            changed_files,
            inferred_patterns,
        }
    }

    /// `completed_wave_jobs` are this wave's finished (or timed-out) jobs;
    /// `next_wave_sessions` are the active `agent_run_id`s of the jobs about
    /// to be dispatched in the following wave, keyed by target repo purely
    /// for deterministic ordering of the log messages.
    pub async fn propagate(
        &self,
        source_wave_index: usize,
        wave_index: usize,
        completed_wave_jobs: &[RemediationJob],
        change_summary: &str,
        next_wave_sessions: &[(String, String)],
    ) {
        let mut contexts: BTreeMap<String, RepoContext> = BTreeMap::new();
        for job in completed_wave_jobs {
            let ctx = self.repo_context(job, change_summary).await;
            contexts.insert(job.target_repo.clone(), ctx);
        }

        let upstream_fix_summaries: Vec<String> = contexts
            .values()
            .filter(|c| c.status == JobStatus::Green.as_str())
            .map(|c| c.change_summary.clone())
            .collect();
        let mut notable_patterns: Vec<String> = Vec::new();
        for ctx in contexts.values() {
            for pattern in &ctx.inferred_patterns {
                if !notable_patterns.contains(pattern) {
                    notable_patterns.push(pattern.clone());
                }
            }
        }
        let test_fixtures_changed: Vec<String> = contexts
            .values()
            .flat_map(|c| c.changed_files.iter().filter(|f| f.contains("test") || f.contains("spec")).cloned())
            .collect();
        let ci_green_prs: Vec<String> = contexts
            .values()
            .filter(|c| c.status == JobStatus::Green.as_str())
            .filter_map(|c| c.pr_url.clone())
            .collect();

        let envelope = WaveContextEnvelope {
            kind: "wave-context",
            wave_index,
            source_wave_index,
            upstream_fix_summaries,
            notable_patterns,
            test_fixtures_changed,
            ci_green_prs,
        };
        let envelope_value = match serde_json::to_value(&envelope) {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize wave context envelope");
                return;
            }
        };

        let message = format!(
            "Wave {source_wave_index} completed. {} upstream fix(es) landed; review the attached context before proceeding.",
            envelope.upstream_fix_summaries.len()
        );

        for (target_repo, session_id) in next_wave_sessions {
            if let Err(err) = self.agent.send_message(session_id, &message, Some(&envelope_value)).await {
                tracing::warn!(target_repo = %target_repo, session_id = %session_id, error = %err, "failed to push wave context, continuing with the rest of the wave");
            }
        }
    }
}
