use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use syncwatch_core::{ConnectionConfig, Settings};
use syncwatch_sync::{
    run_cycle_until, CycleContext, CycleReport, FileStateStore, HttpSyncTrigger, PgChangeSource,
    StateStore, SyncError,
};

use crate::error::{io_err, DaemonError};
use crate::schedule::{CycleGuard, TickSchedule};

/// Start the scheduler and block the current thread until it exits.
pub fn start_blocking(
    settings: Settings,
    connections: Vec<ConnectionConfig>,
) -> Result<(), DaemonError> {
    init_tracing(&settings.log_level);
    build_runtime()?.block_on(run(settings, connections))
}

/// Run a single cycle on a fresh runtime and return its report.
pub fn run_once_blocking(
    settings: Settings,
    connections: Vec<ConnectionConfig>,
) -> Result<CycleReport, DaemonError> {
    init_tracing(&settings.log_level);
    build_runtime()?.block_on(run_once(&settings, &connections))
}

fn build_runtime() -> Result<tokio::runtime::Runtime, DaemonError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))
}

/// Process-wide clients shared by every cycle.
struct Services {
    ctx: CycleContext,
    changes: Arc<PgChangeSource>,
}

impl Services {
    /// Fails on a missing database host or on persisted state that cannot
    /// be read; neither is retried.
    fn connect(settings: &Settings) -> Result<Self, DaemonError> {
        let store = Arc::new(FileStateStore::new(&settings.state_dir));
        if let Err(err) = store.load() {
            tracing::error!(
                state_dir = %settings.state_dir.display(),
                error = %err,
                "persisted state is unreadable; refusing to start",
            );
            return Err(SyncError::from(err).into());
        }

        let changes = Arc::new(PgChangeSource::connect_lazy(&settings.source_db)?);
        let trigger = Arc::new(HttpSyncTrigger::new(&settings.job_api));
        let ctx = CycleContext::new(store, changes.clone(), trigger);
        Ok(Self { ctx, changes })
    }

    async fn close(self) {
        self.changes.close().await;
    }
}

/// One immediate cycle over `connections`. SIGINT/SIGTERM stops it at the
/// next connection boundary.
pub async fn run_once(
    settings: &Settings,
    connections: &[ConnectionConfig],
) -> Result<CycleReport, DaemonError> {
    let services = Services::connect(settings)?;
    tracing::info!(
        connections = connections.len(),
        state_dir = %settings.state_dir.display(),
        "running a single orchestration cycle",
    );
    let report = run_cycle_interruptible(&services.ctx, connections, signal_received()).await;
    services.close().await;
    Ok(report)
}

/// Run the periodic scheduler until SIGINT/SIGTERM.
///
/// On a signal the tick loop stops, the in-flight cycle finishes the
/// connection it is on, and the database pool is closed.
pub async fn run(settings: Settings, connections: Vec<ConnectionConfig>) -> Result<(), DaemonError> {
    let services = Services::connect(&settings)?;

    let schedule = match TickSchedule::parse(&settings.schedule) {
        Ok(schedule) => schedule,
        Err(err) => {
            tracing::error!(error = %err, "invalid schedule; orchestrator will not run periodically");
            tracing::info!("running orchestration once on startup instead");
            let report =
                run_cycle_interruptible(&services.ctx, &connections, signal_received()).await;
            log_report(&report);
            services.close().await;
            return Ok(());
        }
    };

    tracing::info!(
        schedule = schedule.expr(),
        connections = connections.len(),
        state_dir = %settings.state_dir.display(),
        "orchestrator started",
    );

    let ticker = Ticker::new(services.ctx.clone(), connections);
    let stop = ticker.stop_flag();
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let tick_handle = {
        let shutdown = shutdown_tx.clone();
        let rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = tick_task(ticker, schedule, rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = spawn_signal_task(&shutdown_tx, stop);

    let (tick_result, signal_result) = tokio::join!(tick_handle, signal_handle);
    handle_join("tick", tick_result)?;
    handle_join("signal_handler", signal_result)?;

    services.close().await;
    tracing::info!("orchestrator stopped");
    Ok(())
}

/// Waits for SIGINT/SIGTERM or a shutdown broadcast, whichever comes first.
/// The receiver is taken before the task starts so an early broadcast is
/// never missed.
fn spawn_signal_task(
    shutdown: &broadcast::Sender<()>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<Result<(), DaemonError>> {
    let shutdown = shutdown.clone();
    let mut shutdown_rx = shutdown.subscribe();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_rx.recv() => Ok(()),
            signal = wait_for_signal() => {
                match signal {
                    Ok(name) => {
                        tracing::info!(signal = name, "shutdown requested; finishing current connection");
                        stop.store(true, Ordering::SeqCst);
                        let _ = shutdown.send(());
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
        }
    })
}

/// Starts cycles on demand, refusing to overlap them.
#[derive(Clone)]
pub struct Ticker {
    ctx: CycleContext,
    connections: Arc<Vec<ConnectionConfig>>,
    guard: CycleGuard,
    stop: Arc<AtomicBool>,
}

impl Ticker {
    pub fn new(ctx: CycleContext, connections: Vec<ConnectionConfig>) -> Self {
        Self {
            ctx,
            connections: Arc::new(connections),
            guard: CycleGuard::default(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Ask a running cycle to stop before its next connection.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Spawn a cycle, or `None` when the previous one is still running.
    pub fn tick(&self) -> Option<JoinHandle<CycleReport>> {
        let Some(permit) = self.guard.try_acquire() else {
            tracing::warn!("previous orchestration cycle still running; skipping tick");
            return None;
        };

        let ctx = self.ctx.clone();
        let connections = self.connections.clone();
        let stop = self.stop.clone();
        Some(tokio::spawn(async move {
            let _permit = permit;
            let report = run_cycle_until(&ctx, &connections, &stop).await;
            log_report(&report);
            report
        }))
    }
}

async fn tick_task(
    ticker: Ticker,
    schedule: TickSchedule,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut in_flight: Option<JoinHandle<CycleReport>> = None;

    loop {
        let Some(next) = schedule.next_after(Utc::now()) else {
            tracing::warn!(schedule = schedule.expr(), "schedule has no upcoming ticks");
            break;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tracing::debug!(next = %next.to_rfc3339(), "waiting for next tick");

        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = tokio::time::sleep(wait) => {
                tracing::info!("orchestration tick");
                if let Some(handle) = ticker.tick() {
                    in_flight = Some(handle);
                }
            }
        }
    }

    ticker.request_stop();
    if let Some(handle) = in_flight {
        if !handle.is_finished() {
            tracing::info!("waiting for the running cycle to reach a connection boundary");
        }
        handle.await.map_err(|err| DaemonError::Join {
            task: "cycle",
            reason: err.to_string(),
        })?;
    }
    Ok(())
}

/// Run one cycle that stops at the next connection boundary once `shutdown`
/// resolves.
async fn run_cycle_interruptible<S>(
    ctx: &CycleContext,
    connections: &[ConnectionConfig],
    shutdown: S,
) -> CycleReport
where
    S: Future<Output = ()> + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let watcher = {
        let stop = stop.clone();
        tokio::spawn(async move {
            shutdown.await;
            stop.store(true, Ordering::SeqCst);
        })
    };
    let report = run_cycle_until(ctx, connections, &stop).await;
    watcher.abort();
    report
}

/// Resolves on SIGINT/SIGTERM; never resolves if no handler can be installed.
async fn signal_received() {
    match wait_for_signal().await {
        Ok(name) => {
            tracing::info!(signal = name, "shutdown requested; finishing current connection");
        }
        Err(err) => {
            tracing::warn!(error = %err, "signal handler unavailable; cycle cannot be interrupted");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<&'static str, DaemonError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).map_err(|e| DaemonError::Signal(e.to_string()))?;
    tokio::select! {
        ctrl_c = tokio::signal::ctrl_c() => {
            ctrl_c.map_err(|e| DaemonError::Signal(e.to_string()))?;
            Ok("SIGINT")
        }
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<&'static str, DaemonError> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| DaemonError::Signal(e.to_string()))?;
    Ok("ctrl-c")
}

fn log_report(report: &CycleReport) {
    for failed in &report.failed {
        tracing::error!(
            connection = %failed.connection_id,
            error = %failed.error,
            "connection failed during cycle",
        );
    }
    if !report.skipped.is_empty() {
        tracing::warn!(skipped = report.skipped.len(), "cycle stopped early");
    }
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Join {
            task,
            reason: err.to_string(),
        }),
    }
}

/// Install the global subscriber on stderr. `RUST_LOG` wins over
/// `default_level`; `SYNCWATCH_LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing(default_level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("SYNCWATCH_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        let _ = fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    }
}
