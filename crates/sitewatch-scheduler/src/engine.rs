use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::{
    error::{Result, SchedulerError},
    ledger::CycleLedger,
    reload::{ReloadCoordinator, ReloadTicket},
    timers::{FirstTick, TimerPool},
    types::{CycleOutcome, CycleReport, PollJob, StatusSnapshot},
};

/// How a poller lays out its timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerLayout {
    /// One timer per job, each on the job's own cadence.
    PerJob,
    /// One timer for the service; every tick polls all jobs concurrently.
    Shared,
}

/// Service-specific half of a poller: where jobs come from and what one
/// cycle does with a job.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    type Job: PollJob;

    /// Service name used in logs, result rows and routes.
    fn service(&self) -> &'static str;

    fn layout(&self) -> TimerLayout {
        TimerLayout::PerJob
    }

    /// Service cadence; also the cadence of the shared timer.
    fn default_interval(&self) -> Duration;

    /// Cadence of one job under [`TimerLayout::PerJob`].
    fn interval(&self, _job: &Self::Job) -> Duration {
        self.default_interval()
    }

    /// Read the active job rows.
    async fn load_jobs(&self) -> Result<Vec<Self::Job>>;

    /// One fetch → transform → persist cycle for `job`.
    async fn poll(&self, job: &Self::Job) -> Result<CycleOutcome>;
}

/// Object-safe control surface of a poller, used by the HTTP layer.
#[async_trait]
pub trait ManagedPoller: Send + Sync {
    fn service(&self) -> &'static str;

    /// Load jobs and (re)arm timers. Serialized with any reload in flight.
    async fn initialize(&self) -> Result<StatusSnapshot>;

    /// Initialize unless already initialized; propagates load failures.
    async fn ensure_initialized(&self) -> Result<StatusSnapshot>;

    /// Debounced, fire-and-forget reload.
    fn request_reload(&self) -> ReloadTicket;

    fn status(&self) -> StatusSnapshot;

    /// Newest cycle report per job.
    fn job_reports(&self) -> Vec<CycleReport>;

    /// Cancel pending reloads and clear every timer.
    async fn shutdown(&self);
}

struct PollerState<J> {
    initialized: bool,
    shut_down: bool,
    jobs: Vec<J>,
    timers: TimerPool,
    last_error: Option<String>,
    initializations: u64,
}

struct PollerInner<H: JobHandler> {
    handler: Arc<H>,
    ledger: Arc<CycleLedger>,
    /// Held for the whole of `initialize()`; reloads queue on it.
    init_lock: tokio::sync::Mutex<()>,
    state: Mutex<PollerState<H::Job>>,
}

/// Reload-aware poller: owns its jobs, its timers and its reload coordinator.
///
/// Built once at process start and shared by `Arc`.
pub struct ConfigurationPoller<H: JobHandler> {
    inner: Arc<PollerInner<H>>,
    reload: ReloadCoordinator,
}

impl<H: JobHandler> ConfigurationPoller<H> {
    /// Must be called inside a Tokio runtime: the reload coordinator task is
    /// spawned immediately.
    pub fn new(handler: H, reload_debounce: Duration) -> Self {
        let service = handler.service();
        let inner = Arc::new(PollerInner {
            handler: Arc::new(handler),
            ledger: Arc::new(CycleLedger::new(service)),
            init_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(PollerState {
                initialized: false,
                shut_down: false,
                jobs: Vec::new(),
                timers: TimerPool::new(),
                last_error: None,
                initializations: 0,
            }),
        });

        let target = Arc::clone(&inner);
        let reload = ReloadCoordinator::spawn(service, reload_debounce, move || {
            let target = Arc::clone(&target);
            async move {
                if let Err(e) = target.initialize().await {
                    warn!(service = target.handler.service(), error = %e, "reload failed");
                }
            }
        });

        Self { inner, reload }
    }

    pub fn handler(&self) -> &H {
        &self.inner.handler
    }

    /// Snapshot of the jobs armed by the last successful initialization.
    pub fn jobs(&self) -> Vec<H::Job> {
        self.inner.lock_state().jobs.clone()
    }
}

#[async_trait]
impl<H: JobHandler> ManagedPoller for ConfigurationPoller<H> {
    fn service(&self) -> &'static str {
        self.inner.handler.service()
    }

    async fn initialize(&self) -> Result<StatusSnapshot> {
        self.inner.initialize().await?;
        Ok(self.status())
    }

    async fn ensure_initialized(&self) -> Result<StatusSnapshot> {
        if !self.inner.lock_state().initialized {
            self.inner.ensure_initialized().await?;
        }
        Ok(self.status())
    }

    fn request_reload(&self) -> ReloadTicket {
        self.reload.request()
    }

    fn status(&self) -> StatusSnapshot {
        let handler = &self.inner.handler;
        let ledger = &self.inner.ledger;
        let state = self.inner.lock_state();
        StatusSnapshot {
            service: handler.service().to_string(),
            initialized: state.initialized,
            active_timers: state.timers.len(),
            configs: state.jobs.len(),
            interval_minutes: Some(handler.default_interval().as_secs() / 60),
            reload_pending: self.reload.is_pending(),
            initializations: state.initializations,
            last_error: state.last_error.clone(),
            cycles: ledger.totals(),
            last_cycle_at: ledger.last_cycle_at(),
        }
    }

    fn job_reports(&self) -> Vec<CycleReport> {
        self.inner.ledger.reports()
    }

    async fn shutdown(&self) {
        self.reload.shutdown();
        // Wait for an initialization in flight so it cannot re-arm afterwards.
        let _guard = self.inner.init_lock.lock().await;
        let mut state = self.inner.lock_state();
        state.shut_down = true;
        state.initialized = false;
        let cleared = state.timers.clear();
        info!(service = self.service(), cleared, "poller shut down");
    }
}

impl<H: JobHandler> PollerInner<H> {
    fn lock_state(&self) -> MutexGuard<'_, PollerState<H::Job>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn initialize(&self) -> Result<()> {
        let _guard = self.init_lock.lock().await;
        self.load_and_arm().await
    }

    /// Initialize unless a caller that held the lock before us already did.
    async fn ensure_initialized(&self) -> Result<()> {
        let _guard = self.init_lock.lock().await;
        if self.lock_state().initialized {
            return Ok(());
        }
        self.load_and_arm().await
    }

    /// Caller holds `init_lock`.
    async fn load_and_arm(&self) -> Result<()> {
        let service = self.handler.service();
        if self.lock_state().shut_down {
            return Err(SchedulerError::ShutDown);
        }

        info!(service, "initializing poller");
        let loaded = self.handler.load_jobs().await;

        let mut state = self.lock_state();
        state.initializations += 1;
        // Old timers go first in every branch: never two generations armed.
        let cleared = state.timers.clear();

        match loaded {
            Ok(jobs) => {
                self.arm(&mut state.timers, &jobs);
                let ids: HashSet<&str> = jobs.iter().map(|j| j.id()).collect();
                self.ledger.retain_jobs(&ids);

                info!(
                    service,
                    configs = jobs.len(),
                    active_timers = state.timers.len(),
                    cleared,
                    "poller initialized"
                );
                state.jobs = jobs;
                state.initialized = true;
                state.last_error = None;
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                error!(service, cleared, error = %reason, "poller initialization failed");
                state.jobs.clear();
                state.initialized = false;
                state.last_error = Some(reason.clone());
                Err(SchedulerError::InitializationFailure {
                    service: service.to_string(),
                    reason,
                })
            }
        }
    }

    fn arm(&self, timers: &mut TimerPool, jobs: &[H::Job]) {
        let service = self.handler.service();
        match self.handler.layout() {
            TimerLayout::PerJob => {
                for job in jobs {
                    let period = self.handler.interval(job);
                    let handler = Arc::clone(&self.handler);
                    let ledger = Arc::clone(&self.ledger);
                    let job = job.clone();
                    timers.arm(
                        format!("{service}:{}", job.id()),
                        period,
                        FirstTick::AfterPeriod,
                        move || run_cycle(Arc::clone(&handler), Arc::clone(&ledger), job.clone()),
                    );
                }
            }
            TimerLayout::Shared => {
                if jobs.is_empty() {
                    return;
                }
                let handler = Arc::clone(&self.handler);
                let ledger = Arc::clone(&self.ledger);
                let jobs: Arc<[H::Job]> = jobs.into();
                timers.arm(
                    service,
                    self.handler.default_interval(),
                    FirstTick::AfterPeriod,
                    move || run_all(Arc::clone(&handler), Arc::clone(&ledger), Arc::clone(&jobs)),
                );
            }
        }
    }
}

/// Run one cycle as its own task so a panic stays inside that cycle.
async fn run_cycle<H: JobHandler>(handler: Arc<H>, ledger: Arc<CycleLedger>, job: H::Job) {
    let started_at = Utc::now();
    let clock = Instant::now();
    let job_id = job.id().to_string();
    let service = handler.service().to_string();

    let outcome = match tokio::spawn(async move { handler.poll(&job).await }).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => CycleOutcome::Failed {
            error: SchedulerError::PollCycleFailure {
                job_id: job_id.clone(),
                reason: e.to_string(),
            }
            .to_string(),
        },
        Err(e) => CycleOutcome::Failed {
            error: format!("cycle task aborted: {e}"),
        },
    };

    ledger.record(CycleReport {
        service,
        job_id,
        outcome,
        started_at,
        elapsed_ms: clock.elapsed().as_millis() as u64,
    });
}

async fn run_all<H: JobHandler>(handler: Arc<H>, ledger: Arc<CycleLedger>, jobs: Arc<[H::Job]>) {
    let cycles = jobs
        .iter()
        .cloned()
        .map(|job| run_cycle(Arc::clone(&handler), Arc::clone(&ledger), job));
    futures_util::future::join_all(cycles).await;
}
