// src/retry/mod.rs

//! Bounded retry with backoff, used for everything that talks to the
//! distributed store or performs discovery against the cluster.
//!
//! Each attempt returns an explicit [`Attempt`] instead of an error that
//! has to be inspected for a "retryable" marker:
//!
//! - [`Attempt::Done`]: success, the value is returned.
//! - [`Attempt::Expected`]: transient failure, retried while budget remains.
//! - [`Attempt::Fatal`]: aborts immediately, regardless of remaining budget.
//!
//! All sleeps are cancellable through the shared shutdown token.

pub mod backoff;

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub use backoff::{BackoffKind, RetryPolicy};

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    Expected(anyhow::Error),
    Fatal(anyhow::Error),
}

impl<T> Attempt<T> {
    pub fn expected(err: impl Into<anyhow::Error>) -> Self {
        Attempt::Expected(err.into())
    }

    pub fn fatal(err: impl Into<anyhow::Error>) -> Self {
        Attempt::Fatal(err.into())
    }
}

#[derive(Error, Debug)]
pub enum RetryError {
    /// The budget elapsed; carries the last expected error.
    #[error("retry budget of {budget:?} exhausted after {attempts} attempts: {last}")]
    Exhausted {
        budget: Duration,
        attempts: u32,
        #[source]
        last: anyhow::Error,
    },

    /// An attempt reported a non-retryable error.
    #[error(transparent)]
    Fatal(anyhow::Error),

    /// Shutdown was requested while retrying.
    #[error("retry cancelled by shutdown")]
    Cancelled,
}

impl RetryError {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, RetryError::Fatal(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled)
    }
}

/// Invoke `op` until it succeeds, fails fatally, the budget runs out, or
/// `cancel` fires.
///
/// Exhaustion is reported no earlier than `policy.budget` after the first
/// attempt started: if the next backoff would overshoot the deadline, the
/// loop sleeps until the deadline instead and gives up there.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let deadline = Instant::now() + policy.budget;
    let mut attempts: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let outcome = op().await;
        attempts += 1;

        let last = match outcome {
            Attempt::Done(value) => {
                if attempts > 1 {
                    debug!(attempts, "retry succeeded");
                }
                return Ok(value);
            }
            Attempt::Fatal(err) => {
                debug!(attempts, error = %err, "retry aborted by fatal error");
                return Err(RetryError::Fatal(err));
            }
            Attempt::Expected(err) => err,
        };

        let now = Instant::now();
        if now >= deadline {
            return Err(exhausted(policy, attempts, last));
        }

        let delay = policy.delay(attempts - 1);
        trace!(attempts, ?delay, error = %last, "expected error; backing off");

        if now + delay >= deadline {
            tokio::select! {
                _ = sleep_until(deadline) => return Err(exhausted(policy, attempts, last)),
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            }
        }

        tokio::select! {
            _ = sleep(delay) => {}
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
        }
    }
}

fn exhausted(policy: &RetryPolicy, attempts: u32, last: anyhow::Error) -> RetryError {
    debug!(attempts, budget = ?policy.budget, error = %last, "retry budget exhausted");
    RetryError::Exhausted {
        budget: policy.budget,
        attempts,
        last,
    }
}
