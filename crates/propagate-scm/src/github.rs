//! Read-side GitHub REST client: PR metadata, check-runs, changed files,
//! and open-PR listing (spec §6). Grounded on the header/auth/error
//! conventions of a sibling webhook-management client in the same corpus,
//! adapted here to read operations only.

use std::time::Duration;

use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;

use crate::error::ScmError;
use crate::retry::with_retry;

const GITHUB_API_URL: &str = "https://api.github.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    Open,
    Closed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub state: PrState,
    #[serde(default)]
    pub merged: bool,
    pub title: String,
    pub html_url: String,
    pub user: PrUser,
    pub head: PrHead,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrUser {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrHead {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
}

impl PullRequest {
    /// A PR is attachable iff it is not (closed and not merged) — spec
    /// §4.10 step 2.
    pub fn is_attachable(&self) -> bool {
        !(self.state == PrState::Closed && !self.merged)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckRun {
    pub status: String,
    pub conclusion: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CheckRunsResponse {
    check_runs: Vec<CheckRun>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangedFile {
    pub filename: String,
}

/// Aggregate CI outcome derived from a PR's check runs (spec §4.10): all
/// complete + all success/skipped => passed; any incomplete => pending;
/// else failed. An empty check-run list is `Unknown` — GitHub has nothing
/// to report, so the caller should fall back to agent self-reported status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiOutcome {
    Passed,
    Pending,
    Failed,
    Unknown,
}

pub fn ci_outcome_from_check_runs(runs: &[CheckRun]) -> CiOutcome {
    if runs.is_empty() {
        return CiOutcome::Unknown;
    }
    let all_complete = runs.iter().all(|r| r.status == "completed");
    if !all_complete {
        return CiOutcome::Pending;
    }
    let all_passed = runs
        .iter()
        .all(|r| matches!(r.conclusion.as_deref(), Some("success") | Some("skipped")));
    if all_passed {
        CiOutcome::Passed
    } else {
        CiOutcome::Failed
    }
}

/// `https://github.com/{owner}/{repo}/pull/{n}` — used to recover
/// owner/repo/number from a `pr_url` stored on a job.
pub fn parse_pr_url(url: &str) -> Option<(String, String, u64)> {
    let re = Regex::new(r"^https://github\.com/([^/]+)/([^/]+)/pull/(\d+)").ok()?;
    let caps = re.captures(url)?;
    let owner = caps.get(1)?.as_str().to_string();
    let repo = caps.get(2)?.as_str().to_string();
    let number: u64 = caps.get(3)?.as_str().parse().ok()?;
    Some((owner, repo, number))
}

#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
}

impl GitHubClient {
    pub fn new(token: Option<&str>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static("2022-11-28"));
        headers.insert(USER_AGENT, HeaderValue::from_static("propagate-engine/1.0"));
        if let Some(token) = token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, ScmError> {
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            let body = resp.text().await.unwrap_or_default();
            return Err(ScmError::Authentication { status: status.as_u16(), body });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ScmError::Api { status: status.as_u16(), body });
        }
        Ok(resp)
    }

    pub async fn get_pull_request(&self, owner: &str, repo: &str, number: u64) -> Result<PullRequest, ScmError> {
        with_retry(|| async {
            let resp = self
                .client
                .get(format!("{GITHUB_API_URL}/repos/{owner}/{repo}/pulls/{number}"))
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await?;
            let resp = Self::check_response(resp).await?;
            resp.json::<PullRequest>().await.map_err(ScmError::from)
        })
        .await
    }

    pub async fn check_runs_for_sha(&self, owner: &str, repo: &str, sha: &str) -> Result<Vec<CheckRun>, ScmError> {
        with_retry(|| async {
            let resp = self
                .client
                .get(format!("{GITHUB_API_URL}/repos/{owner}/{repo}/commits/{sha}/check-runs"))
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await?;
            let resp = Self::check_response(resp).await?;
            resp.json::<CheckRunsResponse>().await.map(|r| r.check_runs).map_err(ScmError::from)
        })
        .await
    }

    pub async fn pull_request_files(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<ChangedFile>, ScmError> {
        with_retry(|| async {
            let resp = self
                .client
                .get(format!("{GITHUB_API_URL}/repos/{owner}/{repo}/pulls/{number}/files"))
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await?;
            let resp = Self::check_response(resp).await?;
            resp.json::<Vec<ChangedFile>>().await.map_err(ScmError::from)
        })
        .await
    }

    pub async fn list_open_pull_requests(&self, owner: &str, repo: &str) -> Result<Vec<PullRequest>, ScmError> {
        with_retry(|| async {
            let resp = self
                .client
                .get(format!("{GITHUB_API_URL}/repos/{owner}/{repo}/pulls"))
                .query(&[("state", "open")])
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await?;
            let resp = Self::check_response(resp).await?;
            resp.json::<Vec<PullRequest>>().await.map_err(ScmError::from)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pr_url() {
        let (owner, repo, number) = parse_pr_url("https://github.com/org/repo/pull/55").unwrap();
        assert_eq!(owner, "org");
        assert_eq!(repo, "repo");
        assert_eq!(number, 55);
    }

    #[test]
    fn rejects_non_pr_url() {
        assert!(parse_pr_url("https://github.com/org/repo/issues/1").is_none());
    }

    #[test]
    fn ci_outcome_passed_on_all_success() {
        let runs = vec![
            CheckRun { status: "completed".into(), conclusion: Some("success".into()) },
            CheckRun { status: "completed".into(), conclusion: Some("skipped".into()) },
        ];
        assert_eq!(ci_outcome_from_check_runs(&runs), CiOutcome::Passed);
    }

    #[test]
    fn ci_outcome_pending_when_incomplete() {
        let runs = vec![CheckRun { status: "in_progress".into(), conclusion: None }];
        assert_eq!(ci_outcome_from_check_runs(&runs), CiOutcome::Pending);
    }

    #[test]
    fn ci_outcome_failed_on_any_failure() {
        let runs = vec![
            CheckRun { status: "completed".into(), conclusion: Some("success".into()) },
            CheckRun { status: "completed".into(), conclusion: Some("failure".into()) },
        ];
        assert_eq!(ci_outcome_from_check_runs(&runs), CiOutcome::Failed);
    }

    #[test]
    fn ci_outcome_unknown_when_no_runs() {
        assert_eq!(ci_outcome_from_check_runs(&[]), CiOutcome::Unknown);
    }
}
