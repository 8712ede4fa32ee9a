#[derive(Debug, thiserror::Error)]
pub enum ScmError {
    #[error("authentication failed ({status}): {body}")]
    Authentication { status: u16, body: String },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("response did not match the expected shape: {0}")]
    UnexpectedShape(String),
}

impl ScmError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScmError::Api { status, .. } if matches!(status, 429 | 502 | 503 | 504))
            || matches!(self, ScmError::Http(e) if e.is_timeout() || e.is_connect())
    }
}
