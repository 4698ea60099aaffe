//! Scheduler for periodic covers
//!
//! This module handles:
//! - The job table: one timer entry per enabled schedule
//! - At most one outstanding job per schedule (the `queued` set)
//! - Handing due covers to a [`JobExecutor`] and reacting to completions
//! - The background timer loop started by [`Scheduler::start`]

use super::cover::Cover;
use super::fetcher::build_http_client;
use super::persister::Persister;
use crate::config::{CrawlerConfig, SchedulerConfig};
use crate::storage::{Backend, News, Schedule};
use crate::{CoverError, Result};
use reqwest::Client;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub type StartHook = Arc<dyn Fn(&Schedule) + Send + Sync>;
pub type SuccessHook = Arc<dyn Fn(&Schedule, &[News]) + Send + Sync>;
pub type FailureHook = Arc<dyn Fn(&Schedule, &CoverError) + Send + Sync>;

/// Optional callbacks fired around every cover job
#[derive(Clone, Default)]
pub struct CoverHooks {
    on_start: Option<StartHook>,
    on_success: Option<SuccessHook>,
    on_failure: Option<FailureHook>,
}

impl CoverHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Schedule) + Send + Sync + 'static,
    {
        self.on_start = Some(Arc::new(hook));
        self
    }

    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Schedule, &[News]) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Schedule, &CoverError) + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for CoverHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoverHooks")
            .field("on_start", &self.on_start.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}

/// Identifies one submitted cover job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub id: u64,
    pub schedule_id: i64,
}

#[derive(Debug)]
struct JobEntry {
    schedule: Schedule,
    next_fire: Instant,
}

#[derive(Debug, Default)]
struct JobTable {
    jobs: HashMap<i64, JobEntry>,

    /// Schedules with a submitted, unfinished job
    queued: HashSet<i64>,
}

type SharedTable = Arc<Mutex<JobTable>>;

fn lock(table: &Mutex<JobTable>) -> MutexGuard<'_, JobTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Completion callback handed to the executor with every job
///
/// Consumed by [`succeeded`](Self::succeeded) or [`failed`](Self::failed).
/// Dropping it unresolved counts as a failure, so the schedule always leaves
/// the queued set and exactly one of the success/failure hooks fires.
pub struct JobCompletion {
    handle: JobHandle,
    schedule: Schedule,
    table: SharedTable,
    hooks: CoverHooks,
    resolved: bool,
}

impl JobCompletion {
    pub fn handle(&self) -> JobHandle {
        self.handle
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Reports that the cover began running
    pub fn started(&self) {
        tracing::info!(
            job_id = self.handle.id,
            schedule_id = self.schedule.id,
            "Cover job started"
        );
        if let Some(hook) = &self.hooks.on_start {
            hook(&self.schedule);
        }
    }

    pub fn succeeded(mut self, items: &[News]) {
        self.release();
        tracing::info!(
            job_id = self.handle.id,
            schedule_id = self.schedule.id,
            items = items.len(),
            "Cover job succeeded"
        );
        if let Some(hook) = &self.hooks.on_success {
            hook(&self.schedule, items);
        }
    }

    pub fn failed(mut self, error: CoverError) {
        self.fail(&error);
    }

    fn fail(&mut self, error: &CoverError) {
        self.release();
        tracing::error!(
            job_id = self.handle.id,
            schedule_id = self.schedule.id,
            error = %error,
            "Cover job failed"
        );
        if let Some(hook) = &self.hooks.on_failure {
            hook(&self.schedule, error);
        }
    }

    fn release(&mut self) {
        self.resolved = true;
        lock(&self.table).queued.remove(&self.schedule.id);
    }
}

impl Drop for JobCompletion {
    fn drop(&mut self) {
        if !self.resolved {
            let error = CoverError::JobDropped(self.schedule.id);
            self.fail(&error);
        }
    }
}

impl fmt::Debug for JobCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobCompletion")
            .field("handle", &self.handle)
            .field("resolved", &self.resolved)
            .finish()
    }
}

/// Runs cover jobs submitted by the scheduler
pub trait JobExecutor: Send + Sync {
    /// Starts a cover for `schedule`; `completion` must be resolved when it ends
    fn submit(&self, schedule: Schedule, completion: JobCompletion) -> JobHandle;
}

/// Executor running each cover as a task on the current tokio runtime
pub struct TokioExecutor {
    backend: Arc<dyn Backend>,
    config: CrawlerConfig,
    client: Client,
}

impl TokioExecutor {
    pub fn new(backend: Arc<dyn Backend>, config: CrawlerConfig) -> Result<Self> {
        let client = build_http_client(&config)?;
        Ok(Self {
            backend,
            config,
            client,
        })
    }
}

impl JobExecutor for TokioExecutor {
    fn submit(&self, schedule: Schedule, completion: JobCompletion) -> JobHandle {
        let handle = completion.handle();
        let bulk = self.config.bulk_report;
        let mut cover = Cover::new(schedule, Arc::clone(&self.backend), self.client.clone())
            .with_fetch_limit(self.config.fetch_limit())
            .with_deadline(self.config.run_deadline());

        tokio::spawn(async move {
            completion.started();
            match cover.run(bulk).await {
                Ok(items) => completion.succeeded(&items),
                Err(e) => completion.failed(e),
            }
        });
        handle
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    timer: JoinHandle<()>,
    persister: Option<JoinHandle<()>>,
}

struct Inner {
    backend: Arc<dyn Backend>,
    executor: Arc<dyn JobExecutor>,
    hooks: CoverHooks,
    tick: Duration,
    table: SharedTable,
    next_job_id: AtomicU64,
    running: Mutex<Option<Running>>,
}

/// Fires one cover per schedule cycle
///
/// Cheap to clone; clones share the same job table.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        backend: Arc<dyn Backend>,
        executor: Arc<dyn JobExecutor>,
        config: &SchedulerConfig,
        hooks: CoverHooks,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                executor,
                hooks,
                tick: config.tick_interval(),
                table: Arc::new(Mutex::new(JobTable::default())),
                next_job_id: AtomicU64::new(1),
                running: Mutex::new(None),
            }),
        }
    }

    fn table(&self) -> MutexGuard<'_, JobTable> {
        lock(&self.inner.table)
    }

    /// Registers a recurring entry for `schedule`, first firing one cycle from now
    ///
    /// Disabled schedules and zero cycles are not registered. Adding a
    /// schedule that is already registered replaces its entry.
    pub fn add(&self, schedule: &Schedule) -> bool {
        if !schedule.enabled {
            tracing::debug!(schedule_id = schedule.id, "Skipping disabled schedule");
            return false;
        }
        if schedule.cycle.is_zero() {
            tracing::warn!(schedule_id = schedule.id, "Skipping schedule with a zero cycle");
            return false;
        }

        let entry = JobEntry {
            schedule: schedule.clone(),
            next_fire: Instant::now() + schedule.cycle,
        };
        self.table().jobs.insert(schedule.id, entry);
        tracing::debug!(
            schedule_id = schedule.id,
            cycle_secs = schedule.cycle.as_secs(),
            "Schedule added"
        );
        true
    }

    /// Discards the entry for a schedule; unknown ids are ignored
    pub fn remove(&self, schedule_id: i64) -> bool {
        let removed = self.table().jobs.remove(&schedule_id).is_some();
        if removed {
            tracing::debug!(schedule_id, "Schedule removed");
        }
        removed
    }

    /// Removes the entry, then re-adds it if the schedule is enabled
    pub fn update(&self, schedule: &Schedule) {
        self.remove(schedule.id);
        self.add(schedule);
    }

    pub fn contains(&self, schedule_id: i64) -> bool {
        self.table().jobs.contains_key(&schedule_id)
    }

    pub fn job_count(&self) -> usize {
        self.table().jobs.len()
    }

    pub fn is_queued(&self, schedule_id: i64) -> bool {
        self.table().queued.contains(&schedule_id)
    }

    pub fn next_fire(&self, schedule_id: i64) -> Option<Instant> {
        self.table().jobs.get(&schedule_id).map(|e| e.next_fire)
    }

    /// Submits a job for a registered schedule unless one is outstanding
    pub fn fire(&self, schedule_id: i64) -> Option<JobHandle> {
        let schedule = self.table().jobs.get(&schedule_id)?.schedule.clone();
        self.submit(schedule)
    }

    /// Submits a job for a schedule right away, registered or not
    pub fn run_once(&self, schedule_id: i64) -> Result<Option<JobHandle>> {
        let registered = self
            .table()
            .jobs
            .get(&schedule_id)
            .map(|e| e.schedule.clone());
        let schedule = match registered {
            Some(schedule) => schedule,
            None => self
                .inner
                .backend
                .get_schedule(schedule_id)?
                .ok_or(CoverError::ScheduleNotFound(schedule_id))?,
        };
        Ok(self.submit(schedule))
    }

    fn submit(&self, schedule: Schedule) -> Option<JobHandle> {
        if !self.table().queued.insert(schedule.id) {
            tracing::debug!(
                schedule_id = schedule.id,
                "Previous cover still running, skipping"
            );
            return None;
        }

        let completion = JobCompletion {
            handle: JobHandle {
                id: self.inner.next_job_id.fetch_add(1, Ordering::SeqCst),
                schedule_id: schedule.id,
            },
            schedule: schedule.clone(),
            table: Arc::clone(&self.inner.table),
            hooks: self.inner.hooks.clone(),
            resolved: false,
        };
        Some(self.inner.executor.submit(schedule, completion))
    }

    /// Fires every entry due at `now` and advances it by one cycle
    pub fn run_pending(&self, now: Instant) -> Vec<JobHandle> {
        let due: Vec<i64> = {
            let mut table = self.table();
            table
                .jobs
                .iter_mut()
                .filter(|(_, entry)| entry.next_fire <= now)
                .map(|(id, entry)| {
                    entry.next_fire = now + entry.schedule.cycle;
                    *id
                })
                .collect()
        };

        due.into_iter().filter_map(|id| self.fire(id)).collect()
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Loads every schedule from the backend and starts the timer loop
    ///
    /// With a persister, its subscription loop runs alongside the timer loop
    /// and keeps the job table in sync with the store.
    pub async fn start(&self, persister: Option<Persister>) -> Result<()> {
        if self.is_running() {
            tracing::warn!("Scheduler already running");
            return Ok(());
        }

        let schedules = self.inner.backend.get_schedules(None, None)?;
        let added = schedules.iter().filter(|s| self.add(s)).count();
        tracing::info!(
            loaded = schedules.len(),
            added,
            tick_ms = self.inner.tick.as_millis() as u64,
            "Scheduler starting"
        );

        let (shutdown, mut stopped) = watch::channel(false);
        let this = self.clone();
        let timer = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.inner.tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        this.run_pending(Instant::now());
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Timer loop stopped");
        });

        let persister = match persister {
            Some(persister) => persister.listen(self.clone()).await,
            None => None,
        };

        *self
            .inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Running {
            shutdown,
            timer,
            persister,
        });
        Ok(())
    }

    /// Halts the timer loop and detaches the persister
    ///
    /// Jobs already submitted keep running.
    pub async fn stop(&self) {
        let running = self
            .inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(running) = running else {
            return;
        };

        let _ = running.shutdown.send(true);
        if let Err(e) = running.timer.await {
            tracing::warn!("Timer loop ended abnormally: {}", e);
        }
        if let Some(listener) = running.persister {
            listener.abort();
        }
        tracing::info!("Scheduler stopped");
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("tick", &self.inner.tick)
            .field("jobs", &self.job_count())
            .field("running", &self.is_running())
            .finish()
    }
}
