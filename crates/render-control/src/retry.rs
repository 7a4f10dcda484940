//! Bounded async retry.

use std::future::Future;

use sunder_common::config::RetryPolicy;

/// Every try failed.
#[derive(Debug, thiserror::Error)]
#[error("gave up after {tries} tries: {last_error}")]
pub struct RetryExhausted<E: std::fmt::Display> {
    pub tries: u32,
    pub last_error: E,
}

/// Run `op` until it succeeds or `policy.max_tries` tries have failed,
/// sleeping between tries as the policy says.
pub async fn retry_with_policy<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, RetryExhausted<E>>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_tries = policy.max_tries.max(1);
    let mut try_number = 1;
    loop {
        match op(try_number).await {
            Ok(value) => return Ok(value),
            Err(err) if try_number >= max_tries => {
                return Err(RetryExhausted {
                    tries: try_number,
                    last_error: err,
                });
            }
            Err(err) => {
                let delay = policy.delay_after(try_number);
                tracing::debug!(
                    try_number,
                    max_tries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying"
                );
                tokio::time::sleep(delay).await;
                try_number += 1;
            }
        }
    }
}
