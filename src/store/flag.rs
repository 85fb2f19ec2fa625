// src/store/flag.rs

//! Persisted boolean flags marking one-time actions as done.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::retry::{retry, Attempt, RetryError, RetryPolicy};

use super::{KvStore, StoreError};

const SET_VALUE: &str = "true";

/// A named flag in the store, read and written through the retry policy.
#[derive(Debug, Clone)]
pub struct IdempotencyFlag {
    key: String,
    store: Arc<dyn KvStore>,
    policy: RetryPolicy,
}

impl IdempotencyFlag {
    pub fn new(key: impl Into<String>, store: Arc<dyn KvStore>, policy: RetryPolicy) -> Self {
        Self {
            key: key.into(),
            store,
            policy,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the flag.
    ///
    /// A missing key is a definitive `false`. Transient store errors are
    /// retried; if the budget runs out the error is returned and the caller
    /// must not assume either value.
    pub async fn is_set(&self, cancel: &CancellationToken) -> Result<bool, RetryError> {
        let value = retry(&self.policy, cancel, || async move {
            match self.store.get(&self.key).await {
                Ok(v) => Attempt::Done(v),
                Err(e) => classify(e),
            }
        })
        .await?;

        let set = value.as_deref() == Some(SET_VALUE);
        debug!(key = %self.key, set, "read idempotency flag");
        Ok(set)
    }

    /// Mark the flag as set.
    pub async fn set(&self, cancel: &CancellationToken) -> Result<(), RetryError> {
        retry(&self.policy, cancel, || async move {
            match self.store.put(&self.key, SET_VALUE).await {
                Ok(()) => Attempt::Done(()),
                Err(e) => classify(e),
            }
        })
        .await?;

        debug!(key = %self.key, "idempotency flag set");
        Ok(())
    }
}

fn classify<T>(err: StoreError) -> Attempt<T> {
    if err.is_transient() {
        Attempt::expected(err)
    } else {
        Attempt::fatal(err)
    }
}
