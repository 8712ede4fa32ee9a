//! Fire-and-forget delivery of the propagation engine's webhook events.
//!
//! ```no_run
//! # use propagate_notify::{Notifier, NotifyEvent};
//! # async fn example(notifier: Notifier) {
//! notifier.notify(NotifyEvent::RecoveryComplete {
//!     change_id: 1,
//!     timestamp: chrono::Utc::now(),
//!     affected_services: vec!["billing-service".into()],
//!     job_details: vec![],
//!     mttr_seconds: 420,
//! });
//! # }
//! ```

pub mod error;
pub mod events;

pub use error::ChannelError;
pub use events::{NotifyEvent, RecoveryJobDetail};

use std::time::Duration;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivers events to the single configured notification sink base URL.
/// Delivery failures are logged and ignored — they never abort the
/// pipeline (spec §6, §7).
#[derive(Debug, Clone)]
pub struct Notifier {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl Notifier {
    pub fn new(base_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, base_url }
    }

    pub fn from_config(cfg: &propagate_config::Config) -> Self {
        Self::new(cfg.notification_webhook_url.clone())
    }

    pub fn has_sink(&self) -> bool {
        self.base_url.is_some()
    }

    /// Spawn delivery of `event` and return immediately. Never blocks the
    /// caller and never propagates a delivery error.
    pub fn notify(&self, event: NotifyEvent) {
        let Some(base_url) = self.base_url.clone() else {
            tracing::debug!("notification sink not configured, dropping {:?}", event.path());
            return;
        };
        let client = self.client.clone();
        tokio::spawn(async move {
            match deliver(&client, &base_url, &event).await {
                Ok(()) => tracing::debug!(path = event.path(), "webhook delivered"),
                Err(err) => tracing::warn!(path = event.path(), error = %err, "webhook delivery failed"),
            }
        });
    }

    /// Synchronous variant for tests and for callers (e.g. the orchestrator
    /// CLI in `--ci` mode) that want delivery confirmation before exiting.
    pub async fn notify_and_wait(&self, event: NotifyEvent) -> Result<(), ChannelError> {
        let Some(base_url) = self.base_url.clone() else {
            return Err(ChannelError::NotConfigured);
        };
        deliver(&self.client, &base_url, &event).await
    }
}

async fn deliver(client: &reqwest::Client, base_url: &str, event: &NotifyEvent) -> Result<(), ChannelError> {
    let url = format!("{}{}", base_url.trim_end_matches('/'), event.path());
    client.post(url).json(event).send().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn delivers_pr_opened_to_configured_sink() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/webhooks/pr-opened"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let notifier = Notifier::new(Some(server.uri()));
        let event = NotifyEvent::PrOpened {
            change_id: 1,
            job_id: uuid::Uuid::nil(),
            timestamp: chrono::Utc::now(),
            source_repo: "org/api-core".to_string(),
            target_repo: "org/billing-service".to_string(),
            target_service: "billing-service".to_string(),
            pr_url: "https://github.com/org/billing-service/pull/1".to_string(),
            severity: "critical".to_string(),
            is_breaking: true,
            summary: "New required field(s): priority".to_string(),
            changed_routes: vec!["POST /api/v1/sessions".to_string()],
        };
        notifier.notify_and_wait(event).await.unwrap();
    }

    #[tokio::test]
    async fn without_sink_returns_not_configured() {
        let notifier = Notifier::new(None);
        let err = notifier
            .notify_and_wait(NotifyEvent::RecoveryComplete {
                change_id: 1,
                timestamp: chrono::Utc::now(),
                affected_services: vec![],
                job_details: vec![],
                mttr_seconds: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::NotConfigured));
    }
}
