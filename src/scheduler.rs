// Time-triggered job scheduler.
// Each registered job gets its own trigger loop (cron in local time, or fixed interval).
// Executions run on a shared pool of `pool_size` permits. A job never overlaps itself inside
// one process: a fire that arrives while the previous run is still going is skipped, not queued.
// Cross-process exclusivity is not handled here (see store::lock).

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

pub type JobAction = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone)]
pub enum Trigger {
    /// Fixed rate; the first fire happens immediately.
    Interval(Duration),
    /// 6-field cron expression (with seconds), evaluated in local time.
    Cron(Box<cron::Schedule>),
}

impl Trigger {
    pub fn parse_cron(expr: &str) -> anyhow::Result<Self> {
        let schedule = cron::Schedule::from_str(expr)
            .with_context(|| format!("invalid cron expression {:?}", expr))?;
        Ok(Trigger::Cron(Box::new(schedule)))
    }

    /// Next cron fire strictly after `now`. None for interval triggers or exhausted schedules.
    pub fn next_cron_fire(
        &self,
        now: &chrono::DateTime<chrono::Local>,
    ) -> Option<chrono::DateTime<chrono::Local>> {
        match self {
            Trigger::Cron(schedule) => schedule.after(now).next(),
            Trigger::Interval(_) => None,
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Interval(d) => write!(f, "every {}s", d.as_secs_f64()),
            Trigger::Cron(s) => write!(f, "cron {}", s),
        }
    }
}

struct Job {
    name: String,
    trigger: Trigger,
    action: JobAction,
    running: Arc<AtomicBool>,
}

/// Clears the job's running flag on every exit path, including a panicking action.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    jobs: Vec<Job>,
    pool: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(pool_size: usize) -> Self {
        Self {
            jobs: Vec::new(),
            pool: Arc::new(Semaphore::new(pool_size.max(1))),
        }
    }

    pub fn register<F, Fut>(&mut self, name: impl Into<String>, trigger: Trigger, action: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        info!(job = %name, trigger = %trigger, "job registered");
        self.jobs.push(Job {
            name,
            trigger,
            action: Arc::new(move || action().boxed()),
            running: Arc::new(AtomicBool::new(false)),
        });
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name.as_str()).collect()
    }

    /// Starts every trigger loop. The returned handle completes after `shutdown` flips
    /// (or its sender is dropped) and all in-flight runs have finished.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let Scheduler { jobs, pool } = self;
        tokio::spawn(async move {
            let loops: Vec<_> = jobs
                .into_iter()
                .map(|job| tokio::spawn(trigger_loop(job, pool.clone(), shutdown.clone())))
                .collect();
            // Each loop returns only after its own runs have finished.
            for l in futures_util::future::join_all(loops).await {
                if let Err(e) = l {
                    warn!(error = %e, "trigger loop ended abnormally");
                }
            }
            info!("scheduler stopped");
        })
    }
}

async fn trigger_loop(job: Job, pool: Arc<Semaphore>, mut shutdown: watch::Receiver<bool>) {
    if *shutdown.borrow() {
        return;
    }
    let mut runs = JoinSet::new();
    match &job.trigger {
        Trigger::Interval(period) => {
            let mut tick = tokio::time::interval((*period).max(Duration::from_millis(1)));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick.tick() => fire(&job, &pool, &mut runs),
                    _ = shutdown.changed() => break,
                }
            }
        }
        Trigger::Cron(_) => loop {
            let now = chrono::Local::now();
            let Some(next) = job.trigger.next_cron_fire(&now) else {
                warn!(job = %job.name, "cron schedule has no upcoming fire; job will not run");
                let _ = shutdown.changed().await;
                break;
            };
            let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!(job = %job.name, next = %next, "next fire");
            tokio::select! {
                _ = tokio::time::sleep(delay) => fire(&job, &pool, &mut runs),
                _ = shutdown.changed() => break,
            }
        },
    }
    while let Some(res) = runs.join_next().await {
        reap(&job.name, res);
    }
    debug!(job = %job.name, "trigger loop stopped");
}

fn reap(name: &str, res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        warn!(job = %name, error = %e, "run ended abnormally");
    }
}

fn fire(job: &Job, pool: &Arc<Semaphore>, runs: &mut JoinSet<()>) {
    while let Some(res) = runs.try_join_next() {
        reap(&job.name, res);
    }
    if job.running.swap(true, Ordering::AcqRel) {
        debug!(job = %job.name, "previous run still in progress; skipping this fire");
        return;
    }
    let guard = RunningGuard(job.running.clone());
    let action = job.action.clone();
    let pool = pool.clone();
    let name = job.name.clone();
    runs.spawn(async move {
        let _guard = guard;
        let Ok(_permit) = pool.acquire_owned().await else {
            return;
        };
        let started = tokio::time::Instant::now();
        action().await;
        debug!(
            job = %name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run finished"
        );
    });
}
