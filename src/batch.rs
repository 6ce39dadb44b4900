//! Rate-limited batch execution of external API calls.
//!
//! Runs a queue of independent async tasks in fixed-size groups: every
//! task in a group runs concurrently, the whole group is awaited before
//! the next starts, and a fixed delay separates groups. Tasks that signal
//! throttling ([`ApiError::RateLimited`]) are retried individually with a
//! linear backoff, without disturbing their siblings.
//!
//! Guarantees:
//! - at most `batch_size` tasks from one queue run concurrently;
//! - per-task retries never restart sibling tasks;
//! - result ordering matches input ordering.

use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::ApiError;

/// Tuning for [`run_batched`] and [`with_retry`].
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Number of tasks per concurrent group.
    pub batch_size: usize,
    /// Sleep between groups.
    pub batch_delay: Duration,
    /// Total attempts per task before a throttle is propagated.
    pub max_attempts: u32,
    /// Backoff grows linearly: `backoff_step × attempt`.
    pub backoff_step: Duration,
    /// Ceiling on a single backoff sleep.
    pub backoff_cap: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 3,
            batch_delay: Duration::from_secs(2),
            max_attempts: 5,
            backoff_step: Duration::from_secs(15),
            backoff_cap: Duration::from_secs(60),
        }
    }
}

/// Execute `tasks` in groups of `batch_size`, preserving input order.
///
/// Each task is a factory returning a fresh future, so a throttled task
/// can be re-invoked. A task failing with anything other than
/// [`ApiError::RateLimited`], or exhausting its retries, fails the
/// whole queue; the error surfaces after the task's group completes.
pub async fn run_batched<T, F, Fut>(tasks: Vec<F>, opts: &BatchOptions) -> Result<Vec<T>, ApiError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let batch_size = opts.batch_size.max(1);
    let mut results = Vec::with_capacity(tasks.len());
    let group_count = tasks.len().div_ceil(batch_size);

    for (group_index, group) in tasks.chunks(batch_size).enumerate() {
        debug!(
            "running batch {}/{} ({} tasks)",
            group_index + 1,
            group_count,
            group.len()
        );

        let outcomes = join_all(group.iter().map(|task| with_retry(task, opts))).await;
        for outcome in outcomes {
            results.push(outcome?);
        }

        if group_index + 1 < group_count && !opts.batch_delay.is_zero() {
            tokio::time::sleep(opts.batch_delay).await;
        }
    }

    Ok(results)
}

/// Invoke one retryable task, backing off on throttling.
///
/// The n-th throttle sleeps `backoff_step × n` (capped at `backoff_cap`)
/// before re-invoking; after `max_attempts` consecutive throttles the
/// rate-limit error is returned to the caller.
pub async fn with_retry<T, F, Fut>(task: &F, opts: &BatchOptions) -> Result<T, ApiError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match task().await {
            Ok(value) => return Ok(value),
            Err(ApiError::RateLimited) => {
                attempt += 1;
                if attempt >= opts.max_attempts {
                    warn!("rate limited {attempt} times, giving up");
                    return Err(ApiError::RateLimited);
                }
                let backoff = (opts.backoff_step * attempt).min(opts.backoff_cap);
                warn!("rate limited (attempt {attempt}), backing off {backoff:?}");
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}
