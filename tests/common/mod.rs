// Shared test helpers
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use errstatsd::metrics_source::{MetricsError, MetricsSource, SignalQueries};
use errstatsd::runner::{JobRunner, LockSettings, RunnerConfig, RunnerDeps};
use errstatsd::store::SampleStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub async fn temp_store() -> (TempDir, Arc<SampleStore>) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("errstats.db");
    let store = SampleStore::connect(path.to_str().unwrap(), 5, Duration::from_secs(5))
        .await
        .unwrap();
    store.init().await.unwrap();
    (dir, Arc::new(store))
}

/// Second connection to the store's database file, for setting up failure conditions.
pub async fn side_connection(dir: &TempDir) -> sqlx::SqlitePool {
    let path = dir.path().join("errstats.db");
    sqlx::SqlitePool::connect(&format!("sqlite:{}", path.to_str().unwrap()))
        .await
        .unwrap()
}

/// A fixed instant with whole seconds.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Value(f64),
    Unavailable,
    Malformed,
}

/// Canned metrics backend keyed by query expression. Unknown queries answer 0.0.
#[derive(Default)]
pub struct FakeSource {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn rates(hour: f64, three_days: f64) -> Arc<Self> {
        let source = Self::default();
        let q = SignalQueries::default();
        source.set(&q.errors_last_hour, Reply::Value(hour));
        source.set(&q.errors_last_3_days, Reply::Value(three_days));
        Arc::new(source)
    }

    pub fn failing(reply: Reply) -> Arc<Self> {
        let source = Self::default();
        let q = SignalQueries::default();
        source.set(&q.errors_last_hour, reply);
        source.set(&q.errors_last_3_days, reply);
        Arc::new(source)
    }

    pub fn set(&self, expr: &str, reply: Reply) {
        self.replies.lock().unwrap().insert(expr.to_string(), reply);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricsSource for FakeSource {
    async fn query(&self, expr: &str) -> Result<f64, MetricsError> {
        self.calls.lock().unwrap().push(expr.to_string());
        let reply = self.replies.lock().unwrap().get(expr).copied();
        match reply.unwrap_or(Reply::Value(0.0)) {
            Reply::Value(v) => Ok(v),
            Reply::Unavailable => Err(MetricsError::BackendUnavailable(
                "connection refused".into(),
            )),
            Reply::Malformed => Err(MetricsError::MalformedResponse("bad payload".into())),
        }
    }
}

pub fn runner(
    store: &Arc<SampleStore>,
    node_id: &str,
    source: Arc<FakeSource>,
    lock: LockSettings,
) -> JobRunner {
    JobRunner::new(
        RunnerDeps {
            metrics: source,
            store: store.clone(),
            lock: store.distributed_lock(format!("{}-holder", node_id)),
        },
        RunnerConfig {
            node_id: node_id.to_string(),
            queries: SignalQueries::default(),
            lock,
            retention: Duration::from_secs(24 * 3600),
        },
    )
}

pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}
