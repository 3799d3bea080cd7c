// SQLite store for per-node samples and fleet aggregates.
// All job writes go through StoreTx: commit() persists everything, drop without commit rolls back.
// Timestamps are unix seconds; the lock table (see lock.rs) lives in the same database.

pub mod lock;

use crate::models::{AggregatedSample, Sample, truncate_to_seconds};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

pub use lock::{DistributedLock, Lease, process_holder_id};

pub struct SampleStore {
    pool: SqlitePool,
}

impl SampleStore {
    /// Connect to SQLite at `path`, create parent dir and DB if missing, enable WAL + pragmas.
    pub async fn connect(
        path: &str,
        max_pool_size: u32,
        busy_timeout: Duration,
    ) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS samples (
                node_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                errors_last_hour REAL NOT NULL,
                errors_last_3_days REAL NOT NULL,
                UNIQUE (node_id, timestamp)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_samples_timestamp ON samples(timestamp)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS aggregates (
                timestamp INTEGER NOT NULL UNIQUE,
                avg_errors_last_hour REAL,
                avg_errors_last_3_days REAL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        lock::init_lock_table(&self.pool).await?;

        Ok(())
    }

    /// Opens the transaction scope one job execution writes through.
    /// IMMEDIATE takes the write lock up front so reads and writes see one snapshot.
    pub async fn begin(&self) -> Result<StoreTx, sqlx::Error> {
        Ok(StoreTx {
            tx: self.pool.begin_with("BEGIN IMMEDIATE").await?,
        })
    }

    /// Lease provider sharing this store's database.
    pub fn distributed_lock(&self, holder: impl Into<String>) -> DistributedLock {
        DistributedLock::new(self.pool.clone(), holder)
    }

    pub async fn list_samples(&self) -> anyhow::Result<Vec<Sample>> {
        let rows = sqlx::query(
            "SELECT node_id, timestamp, errors_last_hour, errors_last_3_days
             FROM samples ORDER BY timestamp ASC, node_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_sample_row).collect()
    }

    pub async fn list_aggregates(&self) -> anyhow::Result<Vec<AggregatedSample>> {
        let rows = sqlx::query(
            "SELECT timestamp, avg_errors_last_hour, avg_errors_last_3_days
             FROM aggregates ORDER BY timestamp ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_aggregate_row).collect()
    }

    /// Newest `limit` aggregates, oldest first.
    pub async fn recent_aggregates(&self, limit: u32) -> anyhow::Result<Vec<AggregatedSample>> {
        let rows = sqlx::query(
            "SELECT timestamp, avg_errors_last_hour, avg_errors_last_3_days
             FROM aggregates ORDER BY timestamp DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        let mut out = rows
            .iter()
            .map(parse_aggregate_row)
            .collect::<anyhow::Result<Vec<_>>>()?;
        out.reverse();
        Ok(out)
    }
}

/// One job's transaction. Every store write of a job run goes through a single StoreTx.
pub struct StoreTx {
    tx: Transaction<'static, Sqlite>,
}

impl StoreTx {
    /// Insert-or-update keyed by (node_id, timestamp); last write wins.
    #[instrument(skip(self), fields(repo = "samples", operation = "upsert_sample"))]
    pub async fn upsert_sample(
        &mut self,
        node_id: &str,
        timestamp: DateTime<Utc>,
        errors_last_hour: f64,
        errors_last_3_days: f64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO samples (node_id, timestamp, errors_last_hour, errors_last_3_days)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (node_id, timestamp) DO UPDATE
            SET errors_last_hour = excluded.errors_last_hour,
                errors_last_3_days = excluded.errors_last_3_days
            "#,
        )
        .bind(node_id)
        .bind(truncate_to_seconds(timestamp).timestamp())
        .bind(errors_last_hour)
        .bind(errors_last_3_days)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Mean over every stored sample; None when the table is empty.
    pub async fn average_hour_rate(&mut self) -> Result<Option<f64>, sqlx::Error> {
        sqlx::query_scalar::<_, Option<f64>>("SELECT AVG(errors_last_hour) FROM samples")
            .fetch_one(&mut *self.tx)
            .await
    }

    /// Mean over every stored sample; None when the table is empty.
    pub async fn average_three_day_rate(&mut self) -> Result<Option<f64>, sqlx::Error> {
        sqlx::query_scalar::<_, Option<f64>>("SELECT AVG(errors_last_3_days) FROM samples")
            .fetch_one(&mut *self.tx)
            .await
    }

    /// Insert-or-update keyed by timestamp.
    #[instrument(skip(self), fields(repo = "aggregates", operation = "upsert_aggregate"))]
    pub async fn upsert_aggregate(
        &mut self,
        timestamp: DateTime<Utc>,
        avg_errors_last_hour: Option<f64>,
        avg_errors_last_3_days: Option<f64>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO aggregates (timestamp, avg_errors_last_hour, avg_errors_last_3_days)
            VALUES ($1, $2, $3)
            ON CONFLICT (timestamp) DO UPDATE
            SET avg_errors_last_hour = excluded.avg_errors_last_hour,
                avg_errors_last_3_days = excluded.avg_errors_last_3_days
            "#,
        )
        .bind(truncate_to_seconds(timestamp).timestamp())
        .bind(avg_errors_last_hour)
        .bind(avg_errors_last_3_days)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Deletes samples with timestamp strictly before `cutoff`. Returns rows removed.
    #[instrument(skip(self), fields(repo = "samples", operation = "delete_samples_older_than"))]
    pub async fn delete_samples_older_than(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let r = sqlx::query("DELETE FROM samples WHERE timestamp < $1")
            .bind(ceil_to_unix_secs(cutoff))
            .execute(&mut *self.tx)
            .await?;
        Ok(r.rows_affected())
    }

    pub async fn commit(self) -> Result<(), sqlx::Error> {
        self.tx.commit().await
    }
}

/// Stored second S is strictly before a fractional cutoff whenever S <= floor(cutoff).
fn ceil_to_unix_secs(t: DateTime<Utc>) -> i64 {
    if t.timestamp_subsec_nanos() > 0 {
        t.timestamp().saturating_add(1)
    } else {
        t.timestamp()
    }
}

fn from_unix_secs(secs: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| anyhow::anyhow!("timestamp out of range: {}", secs))
}

fn parse_sample_row(row: &SqliteRow) -> anyhow::Result<Sample> {
    Ok(Sample {
        node_id: row.try_get("node_id")?,
        timestamp: from_unix_secs(row.try_get("timestamp")?)?,
        errors_last_hour: row.try_get("errors_last_hour")?,
        errors_last_3_days: row.try_get("errors_last_3_days")?,
    })
}

fn parse_aggregate_row(row: &SqliteRow) -> anyhow::Result<AggregatedSample> {
    Ok(AggregatedSample {
        timestamp: from_unix_secs(row.try_get("timestamp")?)?,
        avg_errors_last_hour: row.try_get("avg_errors_last_hour")?,
        avg_errors_last_3_days: row.try_get("avg_errors_last_3_days")?,
    })
}
