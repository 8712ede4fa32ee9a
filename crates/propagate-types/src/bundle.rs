use serde::{Deserialize, Serialize};

/// Ephemeral, per-impacted-repository remediation brief. One bundle per
/// service, never per route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoFixBundle {
    pub target_repo: String,
    pub target_service: String,
    pub change_summary: String,
    pub breaking_changes: Vec<String>,
    pub affected_routes: Vec<String>,
    pub call_count_7d: u64,
    pub client_paths: Vec<String>,
    pub test_paths: Vec<String>,
    pub frontend_paths: Vec<String>,
    pub prompt: String,
    /// First 16 hex chars of SHA-256 over the canonicalized bundle
    /// contents. Stable across runs with identical inputs.
    pub bundle_hash: String,
}

impl RepoFixBundle {
    /// All path classes a remediation is expected to touch — used both by
    /// the dispatcher's pre-dispatch guardrail check and by the reconciler's
    /// post-execution path validation.
    pub fn all_target_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .client_paths
            .iter()
            .chain(self.test_paths.iter())
            .chain(self.frontend_paths.iter())
            .cloned()
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }
}
