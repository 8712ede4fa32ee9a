//! Narrow trait seams over the two SCM HTTP clients (spec §9's "inject the
//! concrete backend at wiring time" note, applied here to `propagate-scm`
//! the same way `propagate-types::store` applies it to persistence) so the
//! dispatcher, reconciler, and wave propagator can be exercised against
//! fakes in tests without standing up `wiremock` servers for every case.

use async_trait::async_trait;
use propagate_scm::{AgentSession, CheckRun, PullRequest, ScmError};

#[async_trait]
pub trait AgentPort: Send + Sync {
    async fn create_session(
        &self,
        prompt: &str,
        idempotency_key: &str,
        wave_context: Option<&serde_json::Value>,
    ) -> Result<AgentSession, ScmError>;
    async fn get_session(&self, session_id: &str) -> Result<AgentSession, ScmError>;
    async fn send_message(&self, session_id: &str, message: &str, wave_context: Option<&serde_json::Value>) -> Result<(), ScmError>;
}

#[async_trait]
impl AgentPort for propagate_scm::AgentClient {
    async fn create_session(
        &self,
        prompt: &str,
        idempotency_key: &str,
        wave_context: Option<&serde_json::Value>,
    ) -> Result<AgentSession, ScmError> {
        propagate_scm::AgentClient::create_session(self, prompt, idempotency_key, wave_context).await
    }

    async fn get_session(&self, session_id: &str) -> Result<AgentSession, ScmError> {
        propagate_scm::AgentClient::get_session(self, session_id).await
    }

    async fn send_message(&self, session_id: &str, message: &str, wave_context: Option<&serde_json::Value>) -> Result<(), ScmError> {
        propagate_scm::AgentClient::send_message(self, session_id, message, wave_context).await
    }
}

#[async_trait]
pub trait GitHubPort: Send + Sync {
    async fn get_pull_request(&self, owner: &str, repo: &str, number: u64) -> Result<PullRequest, ScmError>;
    async fn check_runs_for_sha(&self, owner: &str, repo: &str, sha: &str) -> Result<Vec<CheckRun>, ScmError>;
    async fn pull_request_files(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<String>, ScmError>;
    async fn list_open_pull_requests(&self, owner: &str, repo: &str) -> Result<Vec<PullRequest>, ScmError>;
}

#[async_trait]
impl GitHubPort for propagate_scm::GitHubClient {
    async fn get_pull_request(&self, owner: &str, repo: &str, number: u64) -> Result<PullRequest, ScmError> {
        propagate_scm::GitHubClient::get_pull_request(self, owner, repo, number).await
    }

    async fn check_runs_for_sha(&self, owner: &str, repo: &str, sha: &str) -> Result<Vec<CheckRun>, ScmError> {
        propagate_scm::GitHubClient::check_runs_for_sha(self, owner, repo, sha).await
    }

    async fn pull_request_files(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<String>, ScmError> {
        let files = propagate_scm::GitHubClient::pull_request_files(self, owner, repo, number).await?;
        Ok(files.into_iter().map(|f| f.filename).collect())
    }

    async fn list_open_pull_requests(&self, owner: &str, repo: &str) -> Result<Vec<PullRequest>, ScmError> {
        propagate_scm::GitHubClient::list_open_pull_requests(self, owner, repo).await
    }
}
