//! Small retry-with-fixed-backoff helper shared by the Catalog Client
//! (spec.md §4.D). Structured as an explicit attempt counter plus
//! `tokio::time::sleep` between attempts, the same shape as the teacher's
//! own inline retry loop in `process_item_with_retry`, rather than a pulled-in
//! backoff crate.

use std::future::Future;
use std::time::Duration;

/// What to do with a failed attempt: stop immediately, or try again if
/// attempts remain.
pub enum RetryDecision<E> {
    Terminal(E),
    Retryable(E),
}

pub async fn retry_with_fixed_backoff<T, E, F, Fut>(
    max_attempts: u32,
    backoff: Duration,
    mut attempt_fn: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RetryDecision<E>>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match attempt_fn(attempt).await {
            Ok(v) => return Ok(v),
            Err(RetryDecision::Terminal(e)) => return Err(e),
            Err(RetryDecision::Retryable(e)) => {
                if attempt >= max_attempts {
                    return Err(e);
                }
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
