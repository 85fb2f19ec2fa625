// src/runner/inline.rs

//! Runner for services implemented as an async function in this process.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{ProcessHandle, ProcessOutcome, Runner};

type BoxedBody = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Each launch spawns `body` as a Tokio task.
///
/// The body receives a token that is cancelled on stop; a body that ignores
/// it is aborted instead. `Ok(())` maps to a clean exit and `Err` to exit
/// code 1.
#[derive(Clone)]
pub struct InlineRunner {
    service: String,
    body: Arc<dyn Fn(CancellationToken) -> BoxedBody + Send + Sync>,
}

impl InlineRunner {
    pub fn new<F, Fut>(service: impl Into<String>, body: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            service: service.into(),
            body: Arc::new(move |cancel| Box::pin(body(cancel))),
        }
    }
}

#[async_trait]
impl Runner for InlineRunner {
    async fn start(&self) -> Result<Box<dyn ProcessHandle>> {
        let cancel = CancellationToken::new();
        let task = tokio::spawn((self.body)(cancel.clone()));

        Ok(Box::new(InlineTask {
            service: self.service.clone(),
            cancel,
            task: Some(task),
            exited: None,
        }))
    }
}

struct InlineTask {
    service: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<()>>>,
    exited: Option<ProcessOutcome>,
}

impl InlineTask {
    fn outcome_of(&self, joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> ProcessOutcome {
        match joined {
            Ok(Ok(())) => ProcessOutcome::Success,
            Ok(Err(e)) => {
                warn!(service = %self.service, error = %e, "inline service returned an error");
                ProcessOutcome::Failed(1)
            }
            Err(e) if e.is_cancelled() => ProcessOutcome::Failed(-1),
            Err(e) => {
                warn!(service = %self.service, error = %e, "inline service panicked");
                ProcessOutcome::Failed(-1)
            }
        }
    }
}

#[async_trait]
impl ProcessHandle for InlineTask {
    async fn wait(&mut self) -> Result<ProcessOutcome> {
        if let Some(outcome) = self.exited {
            return Ok(outcome);
        }
        let Some(task) = self.task.as_mut() else {
            return Ok(ProcessOutcome::Failed(-1));
        };

        // `&mut JoinHandle` keeps this cancel-safe.
        let joined = task.await;
        self.task = None;
        let outcome = self.outcome_of(joined);
        self.exited = Some(outcome);
        Ok(outcome)
    }

    async fn stop(&mut self) -> Result<()> {
        if self.exited.is_some() {
            return Ok(());
        }
        let Some(mut task) = self.task.take() else {
            return Ok(());
        };

        self.cancel.cancel();
        tokio::select! {
            joined = &mut task => {
                let outcome = self.outcome_of(joined);
                self.exited = Some(outcome);
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {
                warn!(service = %self.service, "inline service ignored cancellation; aborting");
                task.abort();
                self.exited = Some(ProcessOutcome::Failed(-1));
            }
        }
        Ok(())
    }
}
