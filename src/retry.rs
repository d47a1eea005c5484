use std::future::Future;
use std::time::Duration;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    pub delay: Duration,
}

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum Attempt<T, E> {
    Done(T),
    /// Try again; `E` is returned if the retry budget is exhausted.
    Retry(E),
    Fatal(E),
}

/// Runs `op` until it finishes, fails fatally, or exceeds the policy's retry
/// budget. `op` receives the number of retries so far. Every kind of retry
/// draws from the same budget.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let mut retries = 0u32;
    loop {
        match op(retries).await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fatal(err) => return Err(err),
            Attempt::Retry(err) => {
                retries += 1;
                if retries > policy.max_retries {
                    debug!(retries, "retry budget exhausted");
                    return Err(err);
                }
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}
