// src/lib.rs

pub mod cli;
pub mod condition;
pub mod config;
pub mod dag;
pub mod errors;
pub mod health;
pub mod logging;
pub mod phase;
pub mod registrar;
pub mod retry;
pub mod runner;
pub mod service;
pub mod services;
pub mod store;
pub mod types;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::{Scheduler, ServiceGraph};
use crate::errors::Result;
use crate::phase::{CommandTask, ModeFilter, PhaseContext, PhaseRunner};
use crate::runner::ProcessSpec;
use crate::service::{ServiceState, SupervisorContext};
use crate::store::{FileStore, KvStore, MemoryStore};

/// High-level entry point used by `main.rs`.
///
/// Boot sequence:
/// - load and validate config, finalize the service graph
/// - run the phase tasks in order
/// - start the scheduler and wait for SIGINT/SIGTERM
/// - stop every service in reverse dependency order
pub async fn run(args: CliArgs) -> Result<()> {
    let mut cfg = load_and_validate(&args.config)?;
    if let Some(mode) = args.mode {
        cfg.node.mode = mode;
    }

    let graph = services::graph_from_config(&cfg).finalize()?;

    if args.dry_run {
        print_dry_run(&cfg, &graph);
        return Ok(());
    }

    let store: Arc<dyn KvStore> = match &cfg.node.store {
        Some(path) => Arc::new(FileStore::new(path.clone())),
        None => Arc::new(MemoryStore::new()),
    };

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    info!(mode = %cfg.node.mode, "starting boot sequence");
    let phases = phase_runner(&cfg);
    let report = phases
        .run(&PhaseContext {
            mode: cfg.node.mode,
            store: store.clone(),
            retry: cfg.retry,
            cancel: shutdown.clone(),
        })
        .await?;
    if report.interrupted {
        warn!("shutdown requested during boot; not starting services");
        return Ok(());
    }

    let ctx = SupervisorContext::new(cfg.node.mode)
        .with_store(store)
        .with_retry(cfg.retry)
        .with_condition_interval(cfg.node.condition_interval);

    let mut scheduler = Scheduler::new(graph, ctx);
    scheduler.start();

    shutdown.cancelled().await;

    let final_state = scheduler.stop().await;
    for snapshot in &final_state {
        if snapshot.state == ServiceState::Failed {
            error!(service = %snapshot.id, "{snapshot}");
        } else {
            info!(service = %snapshot.id, "{snapshot}");
        }
    }
    info!("all services stopped");
    Ok(())
}

fn phase_runner(cfg: &ConfigFile) -> PhaseRunner {
    let mut runner = PhaseRunner::new();
    for phase in &cfg.phases {
        let mut spec = ProcessSpec::shell(phase.cmd.clone());
        spec.env = cfg.node.env.clone();
        runner.push(CommandTask::new(phase.id.clone(), spec).with_modes(ModeFilter {
            only: phase.only_in.clone(),
            skip: phase.skip_in.clone(),
        }));
    }
    runner
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM.
fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => info!("received Ctrl-C"),
                        _ = term.recv() => info!("received SIGTERM"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to listen for SIGTERM; only Ctrl-C will stop");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        shutdown.cancel();
    });
}

/// Print phases, services and the release order without executing anything.
fn print_dry_run(cfg: &ConfigFile, graph: &ServiceGraph) {
    println!("nodevisor dry-run");
    println!("  node.mode = {}", cfg.node.mode);
    match &cfg.node.store {
        Some(path) => println!("  node.store = {}", path.display()),
        None => println!("  node.store = (memory)"),
    }
    println!();

    println!("phases ({}):", cfg.phases.len());
    for phase in &cfg.phases {
        let modes = ModeFilter {
            only: phase.only_in.clone(),
            skip: phase.skip_in.clone(),
        };
        let marker = if modes.allows(cfg.node.mode) { "run" } else { "skip" };
        println!("  - {} [{marker}]", phase.id);
        println!("      cmd: {}", phase.cmd);
    }
    println!();

    println!("services ({}), in release order:", graph.len());
    for id in graph.release_order() {
        println!("  - {id}");
        let Some(svc) = cfg.services.get(id) else {
            continue;
        };
        match &svc.cmd {
            Some(cmd) => println!("      cmd: {cmd} (restart: {:?})", svc.restart.policy),
            None => println!("      cmd: (none)"),
        }
        if !svc.depends_on.is_empty() {
            println!("      depends_on: {:?}", svc.depends_on);
        }
        if let Some(p) = &svc.provision {
            println!("      provision: {}", p.key);
        }
        if let Some(h) = &svc.health {
            println!("      health: {:?} every {:?}", h.probe, h.settings.interval);
        }
        if let Some(addr) = &svc.address {
            println!("      address: {addr}");
        }
    }
}
