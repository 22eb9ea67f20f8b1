//! Bounded retry for best-effort engine operations
//!
//! Cleanup calls (ephemeral container removal, volume removal) can hit
//! transient "busy" answers from the engine. They are retried a fixed
//! number of times with a fixed delay; anything still failing after that
//! is the caller's decision to log or propagate.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Default attempt count for cleanup operations
pub const DEFAULT_TRIES: u32 = 3;

/// Default fixed delay between attempts
pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);

/// Run `operation` up to `tries` times, sleeping `delay` between attempts.
///
/// Retries only errors for which `retry_if` returns true; other errors
/// (and the error of the final attempt) propagate immediately.
pub async fn retry<T, E, F, Fut, P>(
    tries: u32,
    delay: Duration,
    mut operation: F,
    retry_if: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let tries = tries.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < tries && retry_if(&err) => {
                debug!("Attempt {}/{} failed: {}", attempt, tries, err);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
