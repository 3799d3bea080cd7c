// The three scheduled jobs and their correctness contract.
//
// collect   - every process, no lock: query both signals, upsert this node's sample.
// aggregate - lease-guarded: average the whole samples table, upsert one fleet row.
// prune     - every process, no lock: delete samples older than the retention window.
//
// Each job writes through exactly one transaction. Failures end the run for this cycle;
// the next trigger is the retry. `run` is the job boundary and never propagates errors.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{LockConfig, ScheduleConfig};
use crate::error::JobError;
use crate::metrics_source::{MetricsSource, SignalQueries};
use crate::models::{AggregatedSample, Sample, truncate_to_seconds};
use crate::scheduler::Scheduler;
use crate::store::{DistributedLock, SampleStore};

/// Lease name shared by every process running the aggregate job.
pub const AGGREGATE_LOCK: &str = "aggregate_statistics";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Collect,
    Aggregate,
    Prune,
}

impl JobKind {
    pub fn name(self) -> &'static str {
        match self {
            JobKind::Collect => "collect_statistics",
            JobKind::Aggregate => "aggregate_statistics",
            JobKind::Prune => "clean_old_entries",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    pub min_hold: Duration,
    pub max_hold: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self::from(&LockConfig::default())
    }
}

impl From<&LockConfig> for LockSettings {
    fn from(c: &LockConfig) -> Self {
        Self {
            min_hold: Duration::from_secs(c.min_hold_secs),
            max_hold: Duration::from_secs(c.max_hold_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregateOutcome {
    Written(AggregatedSample),
    /// Another holder's lease is live; this cycle belongs to them.
    Skipped,
}

/// Collaborators the runner drives.
pub struct RunnerDeps {
    pub metrics: Arc<dyn MetricsSource>,
    pub store: Arc<SampleStore>,
    pub lock: DistributedLock,
}

/// Runner identity and tuning.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub node_id: String,
    pub queries: SignalQueries,
    pub lock: LockSettings,
    pub retention: Duration,
}

pub struct JobRunner {
    metrics: Arc<dyn MetricsSource>,
    store: Arc<SampleStore>,
    lock: DistributedLock,
    config: RunnerConfig,
}

impl JobRunner {
    pub fn new(deps: RunnerDeps, config: RunnerConfig) -> Self {
        let RunnerDeps {
            metrics,
            store,
            lock,
        } = deps;
        Self {
            metrics,
            store,
            lock,
            config,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub async fn collect(&self) -> Result<Sample, JobError> {
        self.collect_at(Utc::now()).await
    }

    pub async fn aggregate(&self) -> Result<AggregateOutcome, JobError> {
        self.aggregate_at(Utc::now()).await
    }

    pub async fn prune(&self) -> Result<u64, JobError> {
        self.prune_at(truncate_to_seconds(Utc::now())).await
    }

    /// Both signals must succeed before anything is written.
    pub async fn collect_at(&self, now: DateTime<Utc>) -> Result<Sample, JobError> {
        let errors_last_hour = self.metrics.query(&self.config.queries.errors_last_hour).await?;
        let errors_last_3_days = self
            .metrics
            .query(&self.config.queries.errors_last_3_days)
            .await?;
        let sample = Sample::new(
            self.config.node_id.as_str(),
            now,
            errors_last_hour,
            errors_last_3_days,
        );

        let mut tx = self.store.begin().await?;
        tx.upsert_sample(
            &sample.node_id,
            sample.timestamp,
            sample.errors_last_hour,
            sample.errors_last_3_days,
        )
        .await?;
        tx.commit().await?;
        Ok(sample)
    }

    /// The lease is released after the transaction whether or not it committed;
    /// release keeps the min-hold floor, so early finish never reopens the window.
    pub async fn aggregate_at(&self, now: DateTime<Utc>) -> Result<AggregateOutcome, JobError> {
        let settings = self.config.lock;
        let Some(lease) = self
            .lock
            .try_acquire_at(AGGREGATE_LOCK, settings.min_hold, settings.max_hold, now)
            .await?
        else {
            return Ok(AggregateOutcome::Skipped);
        };
        let started = tokio::time::Instant::now();

        let result = self.write_aggregate(now).await;

        let elapsed = chrono::TimeDelta::from_std(started.elapsed())
            .unwrap_or(chrono::TimeDelta::zero());
        if let Err(e) = self.lock.release_at(&lease, now + elapsed).await {
            // Lease lapses on its own at max_hold.
            warn!(error = %e, lock = AGGREGATE_LOCK, "lease release failed");
        }
        result.map(AggregateOutcome::Written)
    }

    async fn write_aggregate(&self, now: DateTime<Utc>) -> Result<AggregatedSample, JobError> {
        let mut tx = self.store.begin().await?;
        let avg_errors_last_hour = tx.average_hour_rate().await?;
        let avg_errors_last_3_days = tx.average_three_day_rate().await?;
        let aggregate = AggregatedSample {
            timestamp: truncate_to_seconds(now),
            avg_errors_last_hour,
            avg_errors_last_3_days,
        };
        tx.upsert_aggregate(
            aggregate.timestamp,
            aggregate.avg_errors_last_hour,
            aggregate.avg_errors_last_3_days,
        )
        .await?;
        tx.commit().await?;
        Ok(aggregate)
    }

    /// Returns the number of samples removed.
    pub async fn prune_at(&self, now: DateTime<Utc>) -> Result<u64, JobError> {
        let retention = chrono::TimeDelta::from_std(self.config.retention)
            .unwrap_or(chrono::TimeDelta::MAX);
        let cutoff = now.checked_sub_signed(retention).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut tx = self.store.begin().await?;
        let removed = tx.delete_samples_older_than(cutoff).await?;
        tx.commit().await?;
        Ok(removed)
    }

    /// Job boundary: runs one job now and logs the outcome. Never fails.
    #[instrument(skip_all, fields(job = kind.name()))]
    pub async fn run(&self, kind: JobKind) {
        match kind {
            JobKind::Collect => match self.collect().await {
                Ok(sample) => info!(
                    node_id = %sample.node_id,
                    errors_last_hour = sample.errors_last_hour,
                    errors_last_3_days = sample.errors_last_3_days,
                    "sample stored"
                ),
                Err(e) => log_failure(kind, &e),
            },
            JobKind::Aggregate => match self.aggregate().await {
                Ok(AggregateOutcome::Written(agg)) => info!(
                    avg_errors_last_hour = ?agg.avg_errors_last_hour,
                    avg_errors_last_3_days = ?agg.avg_errors_last_3_days,
                    "aggregate stored"
                ),
                Ok(AggregateOutcome::Skipped) => {
                    debug!(lock = AGGREGATE_LOCK, "lease held elsewhere; skipping")
                }
                Err(e) => log_failure(kind, &e),
            },
            JobKind::Prune => match self.prune().await {
                Ok(removed) => info!(
                    removed,
                    retention_secs = self.config.retention.as_secs(),
                    "old samples pruned"
                ),
                Err(e) => log_failure(kind, &e),
            },
        }
    }
}

fn log_failure(kind: JobKind, e: &JobError) {
    match e {
        JobError::MalformedResponse(_) => error!(
            job = kind.name(),
            error = %e,
            kind = e.kind(),
            "job failed; retrying next cycle"
        ),
        JobError::BackendUnavailable(_) | JobError::StoreUnavailable(_) => warn!(
            job = kind.name(),
            error = %e,
            kind = e.kind(),
            "job failed; retrying next cycle"
        ),
    }
}

/// Registers collect, aggregate and prune on `scheduler` with their configured triggers.
pub fn register_jobs(
    runner: Arc<JobRunner>,
    scheduler: &mut Scheduler,
    schedule: &ScheduleConfig,
) -> anyhow::Result<()> {
    for (kind, trigger) in [
        (JobKind::Collect, &schedule.collect),
        (JobKind::Aggregate, &schedule.aggregate),
        (JobKind::Prune, &schedule.prune),
    ] {
        let runner = runner.clone();
        scheduler.register(kind.name(), trigger.to_trigger()?, move || {
            let runner = runner.clone();
            async move { runner.run(kind).await }
        });
    }
    Ok(())
}
