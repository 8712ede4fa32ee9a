use std::future::Future;
use std::time::Duration;

use crate::error::ScmError;

/// Exponential backoff: base 1s, doubling, up to 3 retries, only on
/// transient transport errors (spec §5). Authentication errors (401/403)
/// are non-retryable and surface immediately.
pub async fn with_retry<T, F, Fut>(mut attempt: F) -> Result<T, ScmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ScmError>>,
{
    const MAX_RETRIES: u32 = 3;
    let mut delay = Duration::from_secs(1);
    let mut last_err = None;

    for attempt_no in 0..=MAX_RETRIES {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt_no < MAX_RETRIES => {
                tracing::warn!(attempt = attempt_no, error = %err, "retrying after transient error");
                tokio::time::sleep(delay).await;
                delay *= 2;
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_err.expect("loop always sets last_err before exhausting retries"))
}
