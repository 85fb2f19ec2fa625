// src/service/provision.rs

//! "Check the persisted flag before doing expensive one-time work."
//!
//! A pre hook calls [`ProvisionGuard::check`] and skips its work when the
//! flag is set; the post hook calls [`ProvisionGuard::mark`] once the work
//! has demonstrably succeeded. This turns "run once ever" into "run at most
//! once per unset-flag epoch".

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::retry::RetryPolicy;
use crate::store::{IdempotencyFlag, KvStore};

#[derive(Debug, Clone)]
pub struct ProvisionGuard {
    flag: IdempotencyFlag,
}

impl ProvisionGuard {
    pub fn new(key: impl Into<String>, store: Arc<dyn KvStore>, policy: RetryPolicy) -> Self {
        Self {
            flag: IdempotencyFlag::new(key, store, policy),
        }
    }

    pub fn key(&self) -> &str {
        self.flag.key()
    }

    /// Whether the action already happened.
    ///
    /// Fails closed: if the store cannot be read within the retry budget
    /// the error is returned, never a guessed `false`.
    pub async fn check(&self, cancel: &CancellationToken) -> anyhow::Result<bool> {
        let done = self
            .flag
            .is_set(cancel)
            .await
            .with_context(|| format!("reading provisioning flag '{}'", self.key()))?;

        if done {
            info!(key = %self.key(), "already provisioned; skipping");
        }
        Ok(done)
    }

    pub async fn mark(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        self.flag
            .set(cancel)
            .await
            .with_context(|| format!("recording provisioning flag '{}'", self.key()))?;
        info!(key = %self.key(), "marked as provisioned");
        Ok(())
    }
}
