use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Run `f`, and on failure run it exactly once more after `backoff`.
pub async fn retry_once<T, E, F, Fut>(op: &'static str, backoff: Duration, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    match f().await {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!("{} failed, retrying once in {:?}: {}", op, backoff, e);
            tokio::time::sleep(backoff).await;
            f().await
        }
    }
}
