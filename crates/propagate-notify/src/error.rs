#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("http error delivering webhook: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook sink not configured")]
    NotConfigured,
    #[error("failed to serialize webhook payload: {0}")]
    Serialization(#[from] serde_json::Error),
}
