// src/scheduler/mod.rs
//! Recurring job scheduler.
//!
//! One timer task owns firing. The job table sits behind a single mutex that
//! is held only for table reads and writes, never while a job body runs.
//! Each job has at most one invocation in flight: a firing that comes due
//! while the previous one is still running is skipped, not queued. Missed
//! firings coalesce into one and run only if they are within the grace
//! window. On `stop()` in-flight invocations are abandoned (aborted).

pub mod cron;

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::future::BoxFuture;
use futures::FutureExt;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::{JoinError, JoinHandle, JoinSet};

use crate::config::Settings;
use crate::error::ScheduleError;
use self::cron::CronTrigger;

/// Upper bound on a single timer sleep so clock jumps are noticed.
const MAX_TICK: Duration = Duration::from_secs(60);

pub type JobFuture = BoxFuture<'static, anyhow::Result<()>>;
pub type JobCallback = Arc<dyn Fn() -> JobFuture + Send + Sync>;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_gauge!("scheduler_jobs", "Jobs in the scheduler table.");
        describe_counter!("scheduler_firings_total", "Job invocations started.");
        describe_counter!("scheduler_misfires_total", "Firings skipped for being past the grace window.");
        describe_counter!("scheduler_overlap_skips_total", "Firings skipped because the job was still running.");
        describe_counter!("scheduler_job_errors_total", "Job invocations that returned an error or panicked.");
    });
}

/// Read-only view of one job, as returned by `list_jobs()`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobInfo {
    pub next_run_time: Option<DateTime<Tz>>,
    pub trigger: String,
    /// Registered but not armed (scheduler stopped).
    pub pending: bool,
    pub running: bool,
}

struct JobEntry {
    trigger: CronTrigger,
    callback: JobCallback,
    next_run_time: Option<DateTime<Utc>>,
    running: Arc<AtomicBool>,
}

/// A firing selected by `take_due`; its `running` flag is already set.
pub struct DueJob {
    pub id: String,
    pub scheduled_for: DateTime<Utc>,
    callback: JobCallback,
    running: Arc<AtomicBool>,
}

impl DueJob {
    fn start(self) -> (String, InFlight, JobFuture) {
        let guard = InFlight(self.running);
        (self.id, guard, (self.callback)())
    }
}

/// Clears the job's running flag however the invocation ends.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct JobTable {
    jobs: HashMap<String, JobEntry>,
    /// Per-id running flags. They outlive table entries so an id that is
    /// removed and re-added while an invocation runs still sees it in flight.
    in_flight: HashMap<String, Arc<AtomicBool>>,
}

impl JobTable {
    /// Insert or replace. The id's in-flight flag is shared with any earlier
    /// definition, so the new one cannot overlap a still-running invocation.
    pub fn insert(&mut self, id: &str, trigger: CronTrigger, callback: JobCallback, now: DateTime<Utc>) {
        let running = self.in_flight.entry(id.to_string()).or_default().clone();
        let next_run_time = trigger.next_after(now);
        self.jobs.insert(
            id.to_string(),
            JobEntry {
                trigger,
                callback,
                next_run_time,
                running,
            },
        );
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let removed = self.jobs.remove(id).is_some();
        let jobs = &self.jobs;
        self.in_flight
            .retain(|id, flag| jobs.contains_key(id) || flag.load(Ordering::SeqCst));
        removed
    }

    /// True while an invocation of `id` is in flight, even if `id` was unscheduled.
    pub fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight
            .get(id)
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    pub fn force_due(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        match self.jobs.get_mut(id) {
            Some(job) => {
                job.next_run_time = Some(now);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.jobs.contains_key(id)
    }

    pub fn next_wake(&self) -> Option<DateTime<Utc>> {
        self.jobs.values().filter_map(|j| j.next_run_time).min()
    }

    /// Select jobs due at `now` and advance each one's cadence.
    ///
    /// Missed due times collapse into the latest one. It fires only if it is
    /// at most `grace` old and the job is not already running.
    pub fn take_due(&mut self, now: DateTime<Utc>, grace: Duration) -> Vec<DueJob> {
        let grace = chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let mut due = Vec::new();

        for (id, job) in self.jobs.iter_mut() {
            let Some(next) = job.next_run_time else { continue };
            if next > now {
                continue;
            }

            let latest = job
                .trigger
                .latest_between(next, now)
                .map_or(next, |t| t.max(next));
            job.next_run_time = job.trigger.next_after(now);

            if now - latest > grace {
                counter!("scheduler_misfires_total").increment(1);
                tracing::warn!(
                    target: "scheduler",
                    job_id = %id,
                    scheduled_for = %latest,
                    "run missed by more than the grace window; skipping"
                );
                continue;
            }

            if job
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                counter!("scheduler_overlap_skips_total").increment(1);
                tracing::warn!(
                    target: "scheduler",
                    job_id = %id,
                    "previous run still in progress; skipping this firing"
                );
                continue;
            }

            due.push(DueJob {
                id: id.clone(),
                scheduled_for: latest,
                callback: job.callback.clone(),
                running: job.running.clone(),
            });
        }
        due
    }

    fn snapshot(&self, tz: Tz, armed: bool) -> BTreeMap<String, JobInfo> {
        self.jobs
            .iter()
            .map(|(id, job)| {
                (
                    id.clone(),
                    JobInfo {
                        next_run_time: job.next_run_time.map(|t| t.with_timezone(&tz)),
                        trigger: job.trigger.description(),
                        pending: !armed,
                        running: job.running.load(Ordering::SeqCst),
                    },
                )
            })
            .collect()
    }
}

struct RunState {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    jobs: Mutex<JobTable>,
    tz: Tz,
    grace: Duration,
    wake: Notify,
    run: tokio::sync::Mutex<Option<RunState>>,
    armed: AtomicBool,
}

/// Cheap to clone; every clone drives the same job table.
#[derive(Clone)]
pub struct DigestScheduler {
    inner: Arc<Inner>,
}

impl DigestScheduler {
    pub fn new(tz: Tz, misfire_grace: Duration) -> Self {
        ensure_metrics_described();
        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(JobTable::default()),
                tz,
                grace: misfire_grace,
                wake: Notify::new(),
                run: tokio::sync::Mutex::new(None),
                armed: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Ok(Self::new(settings.tz()?, settings.misfire_grace()))
    }

    pub fn timezone(&self) -> Tz {
        self.inner.tz
    }

    pub fn is_running(&self) -> bool {
        self.inner.armed.load(Ordering::SeqCst)
    }

    /// Register `callback` under `id`, replacing any job with that id.
    /// Returns false (and logs) when the expression does not parse.
    pub fn schedule<F, Fut>(&self, id: &str, cron_expression: &str, callback: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let cb: JobCallback = Arc::new(move || callback().boxed());
        match self.try_schedule(id, cron_expression, cb) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(target: "scheduler", job_id = %id, error = %e, "could not schedule job");
                false
            }
        }
    }

    /// Like `schedule`, but hands the parse error back to the caller.
    pub fn try_schedule(&self, id: &str, cron_expression: &str, callback: JobCallback) -> Result<(), ScheduleError> {
        let trigger = CronTrigger::parse(cron_expression, self.inner.tz)?;
        let description = trigger.description();
        let jobs = {
            let mut table = self.inner.jobs.lock();
            table.insert(id, trigger, callback, Utc::now());
            table.len()
        };
        gauge!("scheduler_jobs").set(jobs as f64);
        self.inner.wake.notify_one();
        tracing::info!(target: "scheduler", job_id = %id, trigger = %description, "scheduled job");
        Ok(())
    }

    pub fn unschedule(&self, id: &str) -> bool {
        let (removed, jobs) = {
            let mut table = self.inner.jobs.lock();
            (table.remove(id), table.len())
        };
        if removed {
            gauge!("scheduler_jobs").set(jobs as f64);
            tracing::info!(target: "scheduler", job_id = %id, "unscheduled job");
        }
        removed
    }

    /// Make the job due now. Its recurring cadence is recomputed from the
    /// trigger after it fires, so the regular schedule is unchanged.
    ///
    /// Returns true whenever the job exists. If an invocation is already in
    /// flight the forced firing is dropped as an overlap; check
    /// `is_job_running` first to tell the two apart.
    pub fn trigger_now(&self, id: &str) -> bool {
        let found = self.inner.jobs.lock().force_due(id, Utc::now());
        if found {
            self.inner.wake.notify_one();
            tracing::info!(target: "scheduler", job_id = %id, "job triggered manually");
        }
        found
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.jobs.lock().contains(id)
    }

    pub fn is_job_running(&self, id: &str) -> bool {
        self.inner.jobs.lock().is_in_flight(id)
    }

    pub fn list_jobs(&self) -> BTreeMap<String, JobInfo> {
        let armed = self.is_running();
        self.inner.jobs.lock().snapshot(self.inner.tz, armed)
    }

    /// Spawn the timer task. No-op when already running.
    pub async fn start(&self) {
        let mut run = self.inner.run.lock().await;
        if run.is_some() {
            tracing::debug!(target: "scheduler", "start() while running; ignoring");
            return;
        }
        let (tx, rx) = watch::channel(false);
        self.inner.armed.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(run_loop(self.inner.clone(), rx));
        *run = Some(RunState { shutdown: tx, handle });
        tracing::info!(target: "scheduler", tz = %self.inner.tz, "scheduler started");
    }

    /// Stop the timer and abandon in-flight invocations. No-op when stopped.
    pub async fn stop(&self) {
        let mut run = self.inner.run.lock().await;
        let Some(state) = run.take() else {
            tracing::debug!(target: "scheduler", "stop() while stopped; ignoring");
            return;
        };
        self.inner.armed.store(false, Ordering::SeqCst);
        let _ = state.shutdown.send(true);
        if let Err(e) = state.handle.await {
            tracing::error!(target: "scheduler", error = %e, "scheduler loop ended abnormally");
        }
        tracing::info!(target: "scheduler", "scheduler stopped");
    }
}

fn reap(result: Result<(String, anyhow::Result<()>), JoinError>) {
    match result {
        Ok((id, Ok(()))) => {
            tracing::info!(target: "scheduler", job_id = %id, "job run finished");
        }
        Ok((id, Err(e))) => {
            counter!("scheduler_job_errors_total").increment(1);
            tracing::error!(target: "scheduler", job_id = %id, error = ?e, "job run failed; job stays scheduled");
        }
        Err(e) if e.is_cancelled() => {}
        Err(e) => {
            counter!("scheduler_job_errors_total").increment(1);
            tracing::error!(target: "scheduler", error = %e, "job run panicked; job stays scheduled");
        }
    }
}

async fn run_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let mut in_flight: JoinSet<(String, anyhow::Result<()>)> = JoinSet::new();

    loop {
        let now = Utc::now();
        let (due, next_wake) = {
            let mut table = inner.jobs.lock();
            let due = table.take_due(now, inner.grace);
            (due, table.next_wake())
        };

        for job in due {
            counter!("scheduler_firings_total").increment(1);
            tracing::info!(
                target: "scheduler",
                job_id = %job.id,
                scheduled_for = %job.scheduled_for.with_timezone(&inner.tz),
                "running job"
            );
            let (id, guard, fut) = job.start();
            in_flight.spawn(async move {
                let _guard = guard;
                let res = fut.await;
                (id, res)
            });
        }

        let sleep_for = next_wake
            .map(|t| (t - Utc::now()).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(MAX_TICK)
            .min(MAX_TICK);

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = inner.wake.notified() => {}
            Some(res) = in_flight.join_next(), if !in_flight.is_empty() => reap(res),
            _ = tokio::time::sleep(sleep_for) => {}
        }
        while let Some(res) = in_flight.try_join_next() {
            reap(res);
        }
    }

    let abandoned = in_flight.len();
    if abandoned > 0 {
        tracing::warn!(target: "scheduler", abandoned, "abandoning in-flight job runs on shutdown");
    }
    in_flight.shutdown().await;
}
