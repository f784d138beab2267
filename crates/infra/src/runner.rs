use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use modelforge_ai::lifecycle::ModelLifecycle;
use modelforge_ai::{
    EngineError, ModelStore, NumericBackend, RecordRepository, SweepReport, UpdateOutcome,
};
use modelforge_core::TenantId;

/// Config for the per-tenant lifecycle runner.
#[derive(Debug, Clone)]
pub struct LifecycleRunner {
    /// Time between freshness sweeps.
    pub check_interval: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for LifecycleRunner {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60 * 60),
            max_retries: 5,
            base_backoff: Duration::from_millis(250),
        }
    }
}

/// Handle of a running lifecycle task (trigger, reports, shutdown).
#[derive(Debug)]
pub struct LifecycleRunnerHandle {
    tenant_id: TenantId,
    shutdown: oneshot::Sender<()>,
    trigger: mpsc::Sender<()>,
    reports: watch::Receiver<Option<SweepReport>>,
    join: JoinHandle<()>,
}

impl LifecycleRunnerHandle {
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Request a sweep now (e.g. after a bulk data import).
    ///
    /// Triggers are coalesced: if one is already pending this is a no-op.
    pub fn trigger(&self) {
        let _ = self.trigger.try_send(());
    }

    /// Watch the report of every completed pass.
    pub fn reports(&self) -> watch::Receiver<Option<SweepReport>> {
        self.reports.clone()
    }

    /// Stop the runner and wait for the current pass to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.join.await;
    }
}

impl LifecycleRunner {
    pub fn new(check_interval: Duration) -> Self {
        Self {
            check_interval,
            ..Self::default()
        }
    }

    /// Spawn a tenant-scoped runner on the current tokio runtime.
    ///
    /// - Startup: initialises the session (restore + sweep)
    /// - Schedule: sweeps every `check_interval`
    /// - Trigger: `handle.trigger()` requests an extra sweep
    /// - Failures: a pass in which every attempted training failed is retried
    ///   with bounded exponential backoff, up to `max_retries` times; errors
    ///   never propagate
    pub fn spawn_for_tenant<B, S, R>(
        &self,
        name: &'static str,
        tenant_id: TenantId,
        session: Arc<ModelLifecycle<B, S, R>>,
    ) -> LifecycleRunnerHandle
    where
        B: NumericBackend,
        S: ModelStore,
        R: RecordRepository,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (report_tx, report_rx) = watch::channel(None);

        let join = tokio::spawn(runner_loop(
            name,
            tenant_id,
            self.clone(),
            session,
            shutdown_rx,
            trigger_rx,
            report_tx,
        ));

        LifecycleRunnerHandle {
            tenant_id,
            shutdown: shutdown_tx,
            trigger: trigger_tx,
            reports: report_rx,
            join,
        }
    }
}

async fn runner_loop<B, S, R>(
    name: &'static str,
    tenant_id: TenantId,
    cfg: LifecycleRunner,
    session: Arc<ModelLifecycle<B, S, R>>,
    mut shutdown_rx: oneshot::Receiver<()>,
    mut trigger_rx: mpsc::Receiver<()>,
    report_tx: watch::Sender<Option<SweepReport>>,
) where
    B: NumericBackend,
    S: ModelStore,
    R: RecordRepository,
{
    info!(runner = name, tenant = %tenant_id, "lifecycle runner started");

    let mut ticker =
        tokio::time::interval_at(Instant::now() + cfg.check_interval, cfg.check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut initialized = false;
    let mut pending = true; // run once on startup
    let mut failures: u32 = 0;

    loop {
        if pending {
            pending = false;
            let result = if initialized {
                session.sweep(tenant_id).await
            } else {
                session.initialize(tenant_id).await
            };

            let failed = match result {
                Ok(report) => {
                    initialized |= report.degraded.is_none();
                    log_report(name, tenant_id, &report);
                    let failed = pass_failed(&report);
                    let _ = report_tx.send(Some(report));
                    failed
                }
                Err(e) => {
                    // Only a foreign tenant fails a whole pass; it never recovers.
                    warn!(runner = name, tenant = %tenant_id, error = %e, "lifecycle pass rejected");
                    if matches!(e, EngineError::TenantScope { .. }) {
                        break;
                    }
                    true
                }
            };

            if !failed {
                failures = 0;
                continue;
            }
            failures += 1;
            if failures > cfg.max_retries {
                warn!(runner = name, tenant = %tenant_id, attempts = failures, "retries exhausted; waiting for next check");
                failures = 0;
                continue;
            }
            let delay = backoff(cfg.base_backoff, failures);
            warn!(runner = name, tenant = %tenant_id, attempt = failures, delay_ms = delay.as_millis() as u64, "retrying lifecycle pass");
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = tokio::time::sleep(delay) => pending = true,
            }
            continue;
        }

        // Shutdown has priority; a dropped handle counts as shutdown.
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            _ = ticker.tick() => pending = true,
            Some(()) = trigger_rx.recv() => pending = true,
        }
    }

    info!(runner = name, tenant = %tenant_id, "lifecycle runner stopped");
}

fn log_report(name: &'static str, tenant_id: TenantId, report: &SweepReport) {
    if let Some(reason) = &report.degraded {
        warn!(runner = name, tenant = %tenant_id, reason = %reason, "backend degraded; no models served");
        return;
    }

    let failed = report
        .outcomes
        .iter()
        .filter(|(_, o)| matches!(o, UpdateOutcome::Failed { .. }))
        .count();
    info!(
        runner = name,
        tenant = %tenant_id,
        loaded = report.loaded.len(),
        fresh = report.fresh.len(),
        trained = report.trained().count(),
        failed,
        "lifecycle pass complete"
    );
}

/// Every type that was attempted failed (fetch, backend or config errors).
///
/// Skipped and in-flight types do not count: retrying cannot help them.
fn pass_failed(report: &SweepReport) -> bool {
    !report.outcomes.is_empty()
        && report
            .outcomes
            .iter()
            .all(|(_, o)| matches!(o, UpdateOutcome::Failed { .. }))
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    // base * 2^(attempt-1), capped at 10s.
    let pow = 1u32 << attempt.saturating_sub(1).min(10);
    let ms = base.as_millis().saturating_mul(pow as u128);
    Duration::from_millis(ms.min(10_000) as u64)
}
