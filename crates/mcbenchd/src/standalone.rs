//! Standalone mode — every subsystem in one process.
//!
//! In this mode, the daemon:
//! 1. Opens the task store and an in-process broker
//! 2. Runs the admission loop and the reconciliation sweep
//! 3. Runs one build worker against the local Docker daemon, with
//!    periodic orphan container sweeps
//! 4. Appends operator alerts to `<data-dir>/alerts.jsonl`
//! 5. On Ctrl-C, stops claiming, drains in-flight builds and exits

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use mcbench_broker::MemoryBroker;
use mcbench_core::Settings;
use mcbench_scheduler::{
    AdmissionScheduler, OperatorAlert, Reconciler, SchedulerState, alert_channel,
    run_admission_loop, run_reconcile_loop,
};
use mcbench_worker::{BuildOrchestrator, BuildWorker, DockerCli, Lifecycle, LocalObjectStore};

use crate::ops;

const ALERTS_FILE: &str = "alerts.jsonl";

pub struct Options {
    pub settings: Settings,
    pub data_dir: PathBuf,
    pub worker_id: String,
    pub objects_dir: Option<PathBuf>,
    pub docker: String,
}

/// Run until Ctrl-C.
pub async fn run_standalone(options: Options) -> anyhow::Result<()> {
    let Options {
        settings,
        data_dir,
        worker_id,
        objects_dir,
        docker,
    } = options;
    info!("MC-Bench daemon starting in standalone mode");

    // ── Task store + broker ──────────────────────────────────────
    let store = Arc::new(ops::open_store(&data_dir)?);
    info!(path = ?ops::db_path(&data_dir), "task store opened");
    let broker = Arc::new(MemoryBroker::new());

    // ── Scheduler ────────────────────────────────────────────────
    let (alerts, alert_rx) = alert_channel();
    let scheduler = AdmissionScheduler::new(store.clone(), broker.clone(), alerts.clone());
    let scheduler_state = SchedulerState::from_settings(&settings);
    let tick_interval = settings.scheduler.tick_interval();
    info!(
        interval_secs = tick_interval.as_secs(),
        order = ?scheduler_state.order,
        default_max = settings.queues.default_max,
        "admission scheduler initialized"
    );

    let reconcile_interval = settings.reconcile.interval();
    let reconciler = Reconciler::new(
        store.clone(),
        broker.clone(),
        settings.reconcile.clone(),
        alerts,
    );
    info!(
        stale_after_secs = settings.reconcile.stale_after_secs,
        max_attempts = settings.reconcile.max_attempts,
        "reconciler initialized"
    );

    // ── Build worker ─────────────────────────────────────────────
    let runtime = Arc::new(DockerCli::new().with_binary(docker));
    let objects_root = objects_dir.unwrap_or_else(|| data_dir.join("objects"));
    info!(root = ?objects_root, export = settings.build.export_enabled, "snapshot store ready");
    let objects = Arc::new(LocalObjectStore::new(objects_root));
    let orchestrator = Arc::new(BuildOrchestrator::new(
        runtime,
        objects,
        store.clone(),
        settings.build.clone(),
        worker_id.clone(),
    ));
    let lifecycle = Lifecycle::new(
        store.clone(),
        broker.clone(),
        worker_id.clone(),
        settings.reconcile.max_attempts,
    );
    let worker = BuildWorker::new(lifecycle, broker.clone(), orchestrator, &settings.worker);
    info!(%worker_id, max_build_jobs = settings.worker.max_build_jobs, "build worker initialized");

    // ── Shutdown signal ──────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ─────────────────────────────────────────
    let alerts_handle = tokio::spawn(record_alerts(alert_rx, data_dir.join(ALERTS_FILE)));

    let admission_shutdown = shutdown_rx.clone();
    let admission_handle = tokio::spawn(async move {
        run_admission_loop(scheduler, scheduler_state, tick_interval, admission_shutdown).await
    });

    let reconcile_shutdown = shutdown_rx.clone();
    let reconcile_handle = tokio::spawn(async move {
        run_reconcile_loop(reconciler, reconcile_shutdown).await;
    });

    let sweeper = worker.clone();
    let sweep_shutdown = shutdown_rx.clone();
    let sweep_handle = tokio::spawn(async move {
        sweeper.run_sweeps(reconcile_interval, sweep_shutdown).await;
    });

    let worker_shutdown = shutdown_rx;
    let worker_handle = tokio::spawn(async move {
        worker.run(worker_shutdown).await;
    });

    // ── Wait for shutdown ────────────────────────────────────────
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C, shutting down");
    }
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    match admission_handle.await {
        Ok(state) => info!(ticks = state.ticks, "admission loop stopped"),
        Err(e) => error!(error = %e, "admission loop panicked"),
    }
    let _ = reconcile_handle.await;
    let _ = sweep_handle.await;
    let _ = worker_handle.await;
    broker.close().await;
    let _ = alerts_handle.await;

    info!("MC-Bench daemon stopped");
    Ok(())
}

/// Append every alert as one JSON line. Ends when all senders are gone.
async fn record_alerts(mut rx: mpsc::UnboundedReceiver<OperatorAlert>, path: PathBuf) {
    while let Some(alert) = rx.recv().await {
        if let Err(e) = append_alert(&path, &alert).await {
            warn!(path = ?path, task_id = %alert.task_id, error = %e, "could not record operator alert");
        }
    }
}

async fn append_alert(path: &Path, alert: &OperatorAlert) -> anyhow::Result<()> {
    let mut line = serde_json::to_vec(alert)?;
    line.push(b'\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&line).await?;
    Ok(())
}
