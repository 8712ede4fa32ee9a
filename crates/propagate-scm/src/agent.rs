//! Client for the agent's session API (spec §6). Genericized from a single
//! vendor's coding-agent API: create a session, poll it, and send follow-up
//! messages carrying wave context.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ScmError;
use crate::retry::with_retry;

const CREATE_TIMEOUT: Duration = Duration::from_secs(60);
const GET_TIMEOUT: Duration = Duration::from_secs(30);
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// `status_enum` as reported by the agent. `#[serde(other)]` absorbs any
/// value this client doesn't yet know about rather than failing to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Queued,
    Running,
    Working,
    Blocked,
    Stopped,
    Completed,
    Failed,
    Error,
    Cancelled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PullRequestRef {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StructuredOutput {
    pub pull_request: Option<PullRequestRef>,
    pub ci_status: Option<String>,
    pub changed_files: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentSession {
    pub session_id: String,
    pub status_enum: AgentStatus,
    #[serde(default)]
    pub structured_output: StructuredOutput,
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    prompt: &'a str,
    idempotency_key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    wave_context: Option<&'a serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    wave_context: Option<&'a serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct AgentClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AgentClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
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

    /// `idempotency_key = "change-{change_id}-{bundle_hash}"`. The server
    /// is expected to collapse duplicate creates on this key (spec §6).
    pub async fn create_session(
        &self,
        prompt: &str,
        idempotency_key: &str,
        wave_context: Option<&serde_json::Value>,
    ) -> Result<AgentSession, ScmError> {
        with_retry(|| async {
            let resp = self
                .client
                .post(format!("{}/sessions", self.base_url))
                .timeout(CREATE_TIMEOUT)
                .bearer_auth(&self.api_key)
                .json(&CreateSessionRequest { prompt, idempotency_key, wave_context })
                .send()
                .await?;
            let resp = Self::check_response(resp).await?;
            resp.json::<AgentSession>().await.map_err(ScmError::from)
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<AgentSession, ScmError> {
        with_retry(|| async {
            let resp = self
                .client
                .get(format!("{}/sessions/{session_id}", self.base_url))
                .timeout(GET_TIMEOUT)
                .bearer_auth(&self.api_key)
                .send()
                .await?;
            let resp = Self::check_response(resp).await?;
            resp.json::<AgentSession>().await.map_err(ScmError::from)
        })
        .await
    }

    pub async fn send_message(
        &self,
        session_id: &str,
        message: &str,
        wave_context: Option<&serde_json::Value>,
    ) -> Result<(), ScmError> {
        with_retry(|| async {
            let resp = self
                .client
                .post(format!("{}/sessions/{session_id}/messages", self.base_url))
                .timeout(SEND_TIMEOUT)
                .bearer_auth(&self.api_key)
                .json(&SendMessageRequest { message, wave_context })
                .send()
                .await?;
            Self::check_response(resp).await?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn create_session_sends_idempotency_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "session_id": "sess-1",
                "status_enum": "queued",
                "structured_output": {},
            })))
            .mount(&server)
            .await;

        let client = AgentClient::new(server.uri(), "token");
        let session = client.create_session("do the thing", "change-1-abc123", None).await.unwrap();
        assert_eq!(session.session_id, "sess-1");
        assert_eq!(session.status_enum, AgentStatus::Queued);
    }

    #[tokio::test]
    async fn unknown_status_does_not_fail_to_parse() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sessions/sess-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "session_id": "sess-1",
                "status_enum": "some_future_value",
                "structured_output": {},
            })))
            .mount(&server)
            .await;

        let client = AgentClient::new(server.uri(), "token");
        let session = client.get_session("sess-1").await.unwrap();
        assert_eq!(session.status_enum, AgentStatus::Unknown);
    }

    #[tokio::test]
    async fn auth_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sessions/sess-1"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let client = AgentClient::new(server.uri(), "token");
        let err = client.get_session("sess-1").await.unwrap_err();
        assert!(matches!(err, ScmError::Authentication { status: 401, .. }));
    }
}
