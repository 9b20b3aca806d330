use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use vaultsync_azure::AzureBackend;
use vaultsync_core::Settings;
use vaultsync_sync::{CycleOutcome, Reconciler, SyncError};

use crate::error::{io_err, DaemonError};

/// How long `serve` waits for an in-flight cycle after a stop signal.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(10);

/// What the loop does when a cycle fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Log the failure and try again on the next tick.
    #[default]
    Continue,
    /// Stop the loop and surface the error (exit status 1).
    Exit,
}

impl FailurePolicy {
    pub fn from_fail_fast(fail_fast: bool) -> Self {
        if fail_fast {
            FailurePolicy::Exit
        } else {
            FailurePolicy::Continue
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub interval: Duration,
    pub failure_policy: FailurePolicy,
    pub grace: Duration,
}

impl DaemonConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            failure_policy: FailurePolicy::default(),
            grace: DEFAULT_GRACE,
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

/// Start the sidecar and block the current thread until it stops.
pub fn start_blocking(settings: Settings, fail_fast: bool) -> Result<(), DaemonError> {
    init_tracing();
    build_runtime()?.block_on(run_daemon(settings, fail_fast))
}

/// Run exactly one cycle and return what it did, or `None` when a stop
/// signal interrupted it before the write.
pub fn sync_once(settings: Settings, dry_run: bool) -> Result<Option<CycleOutcome>, DaemonError> {
    init_tracing();
    build_runtime()?.block_on(run_once(settings, dry_run))
}

async fn run_daemon(settings: Settings, fail_fast: bool) -> Result<(), DaemonError> {
    let config = DaemonConfig::new(settings.interval)
        .with_failure_policy(FailurePolicy::from_fail_fast(fail_fast));
    let reconciler = Arc::new(build_reconciler(&settings, false)?);
    serve(reconciler, config, CancellationToken::new()).await
}

async fn run_once(
    settings: Settings,
    dry_run: bool,
) -> Result<Option<CycleOutcome>, DaemonError> {
    let reconciler = build_reconciler(&settings, dry_run)?;
    let cancel = CancellationToken::new();
    let signal_handle = tokio::spawn(signal_task(cancel.clone()));
    let outcome = sync_cycle(&reconciler, &cancel).await;
    cancel.cancel();
    handle_join("signal_handler", signal_handle.await)?;
    outcome
}

/// One cycle for the `sync` command. A stop request is a clean exit.
pub async fn sync_cycle(
    reconciler: &Reconciler,
    cancel: &CancellationToken,
) -> Result<Option<CycleOutcome>, DaemonError> {
    match reconciler.run_cycle(cancel).await {
        Ok(outcome) => Ok(Some(outcome)),
        Err(SyncError::Cancelled) => {
            tracing::info!("sync stopped before completing");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

/// Wire the Azure collaborators for `settings` into a reconciler.
pub fn build_reconciler(settings: &Settings, dry_run: bool) -> Result<Reconciler, DaemonError> {
    let backend = AzureBackend::from_settings(settings)
        .map_err(|err| DaemonError::Runtime(format!("failed to build Azure client: {err}")))?;
    Ok(Reconciler::new(
        settings.target.clone(),
        settings.file_mode,
        backend.tokens,
        backend.resolver,
        backend.reader,
    )
    .dry_run(dry_run))
}

fn build_runtime() -> Result<tokio::runtime::Runtime, DaemonError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))
}

/// Run the sync loop alongside the signal handler until either stops it.
///
/// After a stop signal the loop gets `config.grace` to finish an in-flight
/// write; past that it is aborted and `serve` still returns `Ok`.
pub async fn serve(
    reconciler: Arc<Reconciler>,
    config: DaemonConfig,
    cancel: CancellationToken,
) -> Result<(), DaemonError> {
    let grace = config.grace;

    let signal_handle = tokio::spawn(signal_task(cancel.clone()));

    let mut loop_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = run(reconciler, config, cancel.clone()).await;
            cancel.cancel();
            result
        })
    };

    let loop_result = tokio::select! {
        result = &mut loop_handle => Some(result),
        _ = cancel.cancelled() => {
            match tokio::time::timeout(grace, &mut loop_handle).await {
                Ok(result) => Some(result),
                Err(_) => {
                    tracing::warn!(grace_secs = grace.as_secs(), "sync loop did not stop in time, aborting");
                    loop_handle.abort();
                    None
                }
            }
        }
    };

    handle_join("signal_handler", signal_handle.await)?;
    match loop_result {
        Some(result) => handle_join("sync_loop", result),
        None => Ok(()),
    }
}

/// The reconciliation loop.
///
/// The first cycle runs immediately, then one per `config.interval`. Ticks
/// missed while a cycle runs are skipped, so cycles never overlap.
pub async fn run(
    reconciler: Arc<Reconciler>,
    config: DaemonConfig,
    cancel: CancellationToken,
) -> Result<(), DaemonError> {
    let target = reconciler.target();
    tracing::info!(
        vault = %target.vault_name,
        secret = target.secret_name.as_str(),
        path = %reconciler.store().path().display(),
        interval_secs = config.interval.as_secs(),
        policy = ?config.failure_policy,
        "sync loop started",
    );

    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut consecutive_failures: u32 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match reconciler.run_cycle(&cancel).await {
            Ok(outcome) => {
                if consecutive_failures > 0 {
                    tracing::info!(after_failures = consecutive_failures, "sync recovered");
                }
                consecutive_failures = 0;
                tracing::debug!(?outcome, "cycle complete");
            }
            Err(SyncError::Cancelled) => break,
            Err(err) => {
                consecutive_failures = consecutive_failures.saturating_add(1);
                tracing::error!(
                    kind = err.kind(),
                    consecutive_failures,
                    error = %err,
                    "sync cycle failed",
                );
                if config.failure_policy == FailurePolicy::Exit {
                    return Err(err.into());
                }
            }
        }
    }

    tracing::info!("sync loop stopped");
    Ok(())
}

async fn signal_task(cancel: CancellationToken) -> Result<(), DaemonError> {
    tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|err| DaemonError::Runtime(format!("ctrl-c handler failed: {err}")))?;
            tracing::info!("received ctrl-c, shutting down");
        }
        signal = terminate() => {
            signal?;
            tracing::info!("received SIGTERM, shutting down");
        }
    }
    cancel.cancel();
    Ok(())
}

#[cfg(unix)]
async fn terminate() -> Result<(), DaemonError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|err| DaemonError::Runtime(format!("SIGTERM handler failed: {err}")))?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn terminate() -> Result<(), DaemonError> {
    std::future::pending().await
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Runtime(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

/// Install the global `tracing` subscriber (`RUST_LOG`, default `info`).
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
