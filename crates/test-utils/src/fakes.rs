#![allow(dead_code)]

//! Fakes for the collaborators the supervisor talks to.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use tokio::time::{sleep_until, Instant};

use nodevisor::condition::Condition;
use nodevisor::health::{HealthBoard, HealthProbe, HealthSettings};
use nodevisor::runner::{ProcessHandle, ProcessOutcome, RestartSettings, Runner};
use nodevisor::service::{HookContext, Prepared, Service};
use nodevisor::store::{KvStore, MemoryStore, StoreError};

/// Shared, ordered record of what the fakes did, e.g. `"etcd:launch"`.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    inner: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.inner.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.inner.lock().unwrap().clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.inner.lock().unwrap().iter().any(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.inner.lock().unwrap().iter().filter(|e| *e == entry).count()
    }

    /// Index of the first occurrence of `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.inner.lock().unwrap().iter().position(|e| e == entry)
    }
}

/// How one launch of a [`ScriptedRunner`] behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Run for `after`, then exit with `outcome`.
    Exit {
        after: Duration,
        outcome: ProcessOutcome,
    },
    /// Run until stopped.
    Block,
    /// `start` itself fails.
    LaunchError,
}

impl Script {
    pub fn succeed_after(after: Duration) -> Self {
        Script::Exit {
            after,
            outcome: ProcessOutcome::Success,
        }
    }

    pub fn fail_after(after: Duration) -> Self {
        Script::Exit {
            after,
            outcome: ProcessOutcome::Failed(1),
        }
    }
}

/// A runner whose launches follow a script. Clones share all state.
#[derive(Debug, Clone)]
pub struct ScriptedRunner {
    name: String,
    steps: Arc<Mutex<VecDeque<Script>>>,
    fallback: Script,
    launches: Arc<Mutex<Vec<Instant>>>,
    stops: Arc<AtomicUsize>,
    log: EventLog,
}

impl ScriptedRunner {
    /// Every launch behaves like `script`.
    pub fn always(script: Script) -> Self {
        Self {
            name: "runner".to_string(),
            steps: Arc::new(Mutex::new(VecDeque::new())),
            fallback: script,
            launches: Arc::new(Mutex::new(Vec::new())),
            stops: Arc::new(AtomicUsize::new(0)),
            log: EventLog::new(),
        }
    }

    /// Runs until stopped.
    pub fn blocking() -> Self {
        Self::always(Script::Block)
    }

    /// Use `script` for the next unscripted launch, before the fallback.
    pub fn then(self, script: Script) -> Self {
        self.steps.lock().unwrap().push_back(script);
        self
    }

    /// Name used in log entries (`"<name>:launch"`, `"<name>:stop"`).
    pub fn attach(mut self, name: &str, log: &EventLog) -> Self {
        self.name = name.to_string();
        self.log = log.clone();
        self
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    pub fn launch_times(&self) -> Vec<Instant> {
        self.launches.lock().unwrap().clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Runner for ScriptedRunner {
    async fn start(&self) -> anyhow::Result<Box<dyn ProcessHandle>> {
        let script = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);

        self.launches.lock().unwrap().push(Instant::now());
        if script == Script::LaunchError {
            self.log.push(format!("{}:launch-error", self.name));
            bail!("scripted launch failure");
        }
        self.log.push(format!("{}:launch", self.name));

        let exit = match script {
            Script::Exit { after, outcome } => Some((Instant::now() + after, outcome)),
            _ => None,
        };
        Ok(Box::new(ScriptedHandle {
            name: self.name.clone(),
            exit,
            stops: self.stops.clone(),
            log: self.log.clone(),
        }))
    }
}

struct ScriptedHandle {
    name: String,
    exit: Option<(Instant, ProcessOutcome)>,
    stops: Arc<AtomicUsize>,
    log: EventLog,
}

#[async_trait]
impl ProcessHandle for ScriptedHandle {
    async fn wait(&mut self) -> anyhow::Result<ProcessOutcome> {
        match self.exit {
            Some((at, outcome)) => {
                sleep_until(at).await;
                Ok(outcome)
            }
            None => std::future::pending().await,
        }
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("{}:stop", self.name));
        Ok(())
    }
}

/// Store that fails with `NoLeader` a set number of times, and counts calls.
#[derive(Debug, Clone, Default)]
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    failures_left: Arc<AtomicUsize>,
    always_fail: Arc<AtomicBool>,
    gets: Arc<AtomicUsize>,
    puts: Arc<AtomicUsize>,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner: Arc::new(inner),
            ..Self::default()
        }
    }

    /// The next `n` calls fail with a transient error.
    pub fn failing_first(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Every call fails with a transient error.
    pub fn without_leader(self) -> Self {
        self.always_fail.store(true, Ordering::SeqCst);
        self
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn value_of(&self, key: &str) -> Option<String> {
        self.inner.value_of(key)
    }

    fn trip(&self) -> Result<(), StoreError> {
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(StoreError::NoLeader);
        }
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::NoLeader);
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.trip()?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.trip()?;
        self.inner.put(key, value).await
    }
}

/// Condition flipped by the test.
#[derive(Debug, Clone, Default)]
pub struct ToggleCondition {
    ready: Arc<AtomicBool>,
    checks: Arc<AtomicUsize>,
}

impl ToggleCondition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn check_count(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

impl fmt::Display for ToggleCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("toggle to be set")
    }
}

#[async_trait]
impl Condition for ToggleCondition {
    async fn check(&self) -> anyhow::Result<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.ready.load(Ordering::SeqCst))
    }
}

/// Probe that replays a list of results, then repeats the last one.
#[derive(Debug, Clone)]
pub struct ScriptedProbe {
    results: Arc<Mutex<VecDeque<bool>>>,
    last: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProbe {
    pub fn new(results: impl IntoIterator<Item = bool>) -> Self {
        Self {
            results: Arc::new(Mutex::new(results.into_iter().collect())),
            last: Arc::new(AtomicBool::new(true)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn check(&self) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let ok = match self.results.lock().unwrap().pop_front() {
            Some(ok) => {
                self.last.store(ok, Ordering::SeqCst);
                ok
            }
            None => self.last.load(Ordering::SeqCst),
        };
        if ok { Ok(()) } else { bail!("scripted probe failure") }
    }
}

/// A service assembled from fakes. Hooks and the runner factory append to
/// the shared [`EventLog`] (`"<id>:pre"`, `"<id>:runner"`, `"<id>:post"`,
/// `"<id>:provision"`).
pub struct FakeService {
    id: String,
    deps: Vec<String>,
    log: EventLog,
    runner: Option<ScriptedRunner>,
    runner_error: bool,
    pre_error: Option<String>,
    post_error: Option<String>,
    provision_key: Option<String>,
    condition: Option<ToggleCondition>,
    restart: RestartSettings,
    health: Option<(Arc<dyn HealthProbe>, HealthSettings)>,
    address: Option<String>,
}

impl FakeService {
    /// A service whose process runs until stopped.
    pub fn new(id: &str, log: &EventLog) -> Self {
        Self {
            id: id.to_string(),
            deps: Vec::new(),
            log: log.clone(),
            runner: Some(ScriptedRunner::blocking().attach(id, log)),
            runner_error: false,
            pre_error: None,
            post_error: None,
            provision_key: None,
            condition: None,
            restart: RestartSettings::default(),
            health: None,
            address: None,
        }
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.deps = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_runner(mut self, runner: ScriptedRunner) -> Self {
        self.runner = Some(runner.attach(&self.id, &self.log));
        self
    }

    /// The runner factory returns "nothing to run".
    pub fn without_runner(mut self) -> Self {
        self.runner = None;
        self
    }

    pub fn failing_runner_factory(mut self) -> Self {
        self.runner_error = true;
        self
    }

    pub fn failing_pre(mut self, msg: &str) -> Self {
        self.pre_error = Some(msg.to_string());
        self
    }

    pub fn failing_post(mut self, msg: &str) -> Self {
        self.post_error = Some(msg.to_string());
        self
    }

    /// Guard an expensive one-time action with the flag `key`.
    pub fn provisioned_by(mut self, key: &str) -> Self {
        self.provision_key = Some(key.to_string());
        self
    }

    pub fn with_condition(mut self, condition: ToggleCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_restart(mut self, restart: RestartSettings) -> Self {
        self.restart = restart;
        self
    }

    pub fn with_health(mut self, probe: impl HealthProbe + 'static, settings: HealthSettings) -> Self {
        self.health = Some((Arc::new(probe), settings));
        self
    }

    pub fn with_address(mut self, address: &str) -> Self {
        self.address = Some(address.to_string());
        self
    }
}

#[async_trait]
impl Service for FakeService {
    fn id(&self) -> &str {
        &self.id
    }

    fn depends_on(&self) -> Vec<String> {
        self.deps.clone()
    }

    fn condition(&self, _health: &HealthBoard) -> Option<Box<dyn Condition>> {
        self.condition
            .clone()
            .map(|c| Box::new(c) as Box<dyn Condition>)
    }

    async fn pre(&self, ctx: &HookContext) -> anyhow::Result<Prepared> {
        self.log.push(format!("{}:pre", self.id));
        if let Some(msg) = &self.pre_error {
            bail!("{msg}");
        }

        if let Some(key) = &self.provision_key {
            if ctx.guard(key.clone()).check(&ctx.cancel).await? {
                return Ok(Prepared::AlreadyProvisioned);
            }
            self.log.push(format!("{}:provision", self.id));
        }
        Ok(Prepared::Fresh)
    }

    async fn post(&self, ctx: &HookContext) -> anyhow::Result<()> {
        self.log.push(format!("{}:post", self.id));
        if let Some(msg) = &self.post_error {
            bail!("{msg}");
        }

        if let Some(key) = &self.provision_key {
            if ctx.prepared == Some(Prepared::Fresh) {
                ctx.guard(key.clone()).mark(&ctx.cancel).await?;
            }
        }
        Ok(())
    }

    async fn runner(&self, _ctx: &HookContext) -> anyhow::Result<Option<Box<dyn Runner>>> {
        self.log.push(format!("{}:runner", self.id));
        if self.runner_error {
            bail!("scripted runner factory failure");
        }
        Ok(self
            .runner
            .clone()
            .map(|r| Box::new(r) as Box<dyn Runner>))
    }

    fn restart(&self) -> RestartSettings {
        self.restart
    }

    fn health(&self) -> Option<(Arc<dyn HealthProbe>, HealthSettings)> {
        self.health.clone()
    }

    fn address(&self) -> Option<String> {
        self.address.clone()
    }
}
