// Cross-process lease keyed by task name, stored in scheduler_locks.
//
// Acquire is a single conditional upsert: a row is (re)written only when the current lease has
// expired (lock_until <= now), so at most one holder per name at any instant.
// max_hold: lock_until set at acquire; a crashed holder's lease simply lapses.
// min_hold: release never moves lock_until earlier than locked_at + min_hold.
// All times are ms since epoch.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, instrument};

pub async fn init_lock_table(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scheduler_locks (
            name TEXT PRIMARY KEY,
            lock_until INTEGER NOT NULL,
            locked_at INTEGER NOT NULL,
            locked_by TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// A held lock. Dropping it does nothing; the lease runs until `lock_until` unless released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub name: String,
    pub holder: String,
    pub locked_at_ms: i64,
    pub lock_until_ms: i64,
    pub min_hold: Duration,
}

pub struct DistributedLock {
    pool: SqlitePool,
    holder: String,
}

impl DistributedLock {
    pub fn new(pool: SqlitePool, holder: impl Into<String>) -> Self {
        Self {
            pool,
            holder: holder.into(),
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Never blocks: Ok(None) means another holder's lease is live.
    pub async fn try_acquire(
        &self,
        name: &str,
        min_hold: Duration,
        max_hold: Duration,
    ) -> Result<Option<Lease>, sqlx::Error> {
        self.try_acquire_at(name, min_hold, max_hold, Utc::now()).await
    }

    /// `min_hold` above `max_hold` is clamped to `max_hold`.
    #[instrument(
        skip(self),
        fields(holder = %self.holder, operation = "try_acquire")
    )]
    pub async fn try_acquire_at(
        &self,
        name: &str,
        min_hold: Duration,
        max_hold: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>, sqlx::Error> {
        let now_ms = now.timestamp_millis();
        let lock_until_ms = now_ms.saturating_add(duration_ms(max_hold));

        let r = sqlx::query(
            r#"
            INSERT INTO scheduler_locks (name, lock_until, locked_at, locked_by)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE
            SET lock_until = excluded.lock_until,
                locked_at = excluded.locked_at,
                locked_by = excluded.locked_by
            WHERE scheduler_locks.lock_until <= excluded.locked_at
            "#,
        )
        .bind(name)
        .bind(lock_until_ms)
        .bind(now_ms)
        .bind(&self.holder)
        .execute(&self.pool)
        .await?;

        if r.rows_affected() == 0 {
            debug!("lock held elsewhere");
            return Ok(None);
        }
        Ok(Some(Lease {
            name: name.to_string(),
            holder: self.holder.clone(),
            locked_at_ms: now_ms,
            lock_until_ms,
            min_hold: min_hold.min(max_hold),
        }))
    }

    /// Ends the lease early, but not before `locked_at + min_hold`.
    /// Returns false when the lease had already lapsed and was taken by someone else.
    pub async fn release(&self, lease: &Lease) -> Result<bool, sqlx::Error> {
        self.release_at(lease, Utc::now()).await
    }

    #[instrument(
        skip(self, lease),
        fields(lock = %lease.name, holder = %lease.holder, operation = "release")
    )]
    pub async fn release_at(
        &self,
        lease: &Lease,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let r = sqlx::query(
            r#"
            UPDATE scheduler_locks
            SET lock_until = MAX($1, locked_at + $2)
            WHERE name = $3 AND locked_by = $4 AND locked_at = $5
            "#,
        )
        .bind(now.timestamp_millis())
        .bind(duration_ms(lease.min_hold))
        .bind(&lease.name)
        .bind(&lease.holder)
        .bind(lease.locked_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() == 1)
    }
}

/// Holder identity for this process: node id plus a per-process suffix, so two processes
/// on one node never share a lease.
pub fn process_holder_id(node_id: &str) -> String {
    format!("{}-{}", node_id, uuid::Uuid::new_v4())
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
