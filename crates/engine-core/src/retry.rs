use std::future::Future;
use std::time::Duration;

use crate::error::EngineError;

/// Runs `op` with up to two retries on `TransientIo` classification, backing off
/// 500ms then 1000ms. `PermanentIo`, `ParseFailure`, and all other kinds are
/// returned immediately without retry (§7: "400-class responses are fatal to
/// the attempt").
pub async fn retry_transient<F, Fut, T>(component: &str, mut op: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    const BACKOFF: [Duration; 2] = [Duration::from_millis(500), Duration::from_millis(1000)];

    let mut last_err = None;
    for delay in BACKOFF {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() => {
                tracing::warn!(component, error = %e, "transient failure, retrying");
                last_err = Some(e);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }

    op().await.map_err(|e| {
        tracing::error!(component, error = %e, "exhausted retries");
        last_err.unwrap_or(e)
    })
}
