use serde::Deserialize;
use std::time::Duration;

use crate::metrics_source::SignalQueries;
use crate::scheduler::Trigger;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub node: NodeConfig,
    pub metrics: MetricsConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Written as node_id on every sample this process collects.
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_hour_query")]
    pub errors_last_hour_query: String,
    #[serde(default = "default_three_day_query")]
    pub errors_last_3_days_query: String,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_hour_query() -> String {
    SignalQueries::default().errors_last_hour
}

fn default_three_day_query() -> String {
    SignalQueries::default().errors_last_3_days
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_max_pool_size() -> u32 {
    5
}

fn default_busy_timeout_secs() -> u64 {
    5
}

/// Hold bounds for the aggregate job's cross-process lease.
#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_min_hold_secs")]
    pub min_hold_secs: u64,
    #[serde(default = "default_max_hold_secs")]
    pub max_hold_secs: u64,
}

fn default_min_hold_secs() -> u64 {
    60
}

fn default_max_hold_secs() -> u64 {
    600
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            min_hold_secs: default_min_hold_secs(),
            max_hold_secs: default_max_hold_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Samples older than this are deleted by the prune job.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u32,
    #[serde(default = "default_collect_trigger")]
    pub collect: TriggerConfig,
    #[serde(default = "default_aggregate_trigger")]
    pub aggregate: TriggerConfig,
    #[serde(default = "default_prune_trigger")]
    pub prune: TriggerConfig,
}

fn default_pool_size() -> usize {
    2
}

fn default_retention_hours() -> u32 {
    24
}

fn default_collect_trigger() -> TriggerConfig {
    TriggerConfig::cron("0 0 * * * *")
}

/// Ten minutes after collect so the hour's samples have landed.
fn default_aggregate_trigger() -> TriggerConfig {
    TriggerConfig::cron("0 10 * * * *")
}

fn default_prune_trigger() -> TriggerConfig {
    TriggerConfig::cron("0 0 0 * * *")
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            retention_hours: default_retention_hours(),
            collect: default_collect_trigger(),
            aggregate: default_aggregate_trigger(),
            prune: default_prune_trigger(),
        }
    }
}

/// Exactly one of `cron` (6 fields, local time) or `interval_secs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerConfig {
    pub cron: Option<String>,
    pub interval_secs: Option<u64>,
}

impl TriggerConfig {
    fn cron(expr: &str) -> Self {
        Self {
            cron: Some(expr.to_string()),
            interval_secs: None,
        }
    }

    pub fn to_trigger(&self) -> anyhow::Result<Trigger> {
        match (&self.cron, self.interval_secs) {
            (Some(expr), None) => Trigger::parse_cron(expr),
            (None, Some(secs)) => {
                anyhow::ensure!(secs > 0, "interval_secs must be > 0, got {}", secs);
                Ok(Trigger::Interval(Duration::from_secs(secs)))
            }
            (Some(_), Some(_)) => anyhow::bail!("set either cron or interval_secs, not both"),
            (None, None) => anyhow::bail!("one of cron or interval_secs is required"),
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn signal_queries(&self) -> SignalQueries {
        SignalQueries {
            errors_last_hour: self.metrics.errors_last_hour_query.clone(),
            errors_last_3_days: self.metrics.errors_last_3_days_query.clone(),
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.node.id.trim().is_empty(), "node.id must be non-empty");
        anyhow::ensure!(
            self.metrics.base_url.starts_with("http://")
                || self.metrics.base_url.starts_with("https://"),
            "metrics.base_url must start with http:// or https://, got {:?}",
            self.metrics.base_url
        );
        anyhow::ensure!(
            self.metrics.timeout_secs > 0,
            "metrics.timeout_secs must be > 0, got {}",
            self.metrics.timeout_secs
        );
        anyhow::ensure!(
            !self.metrics.errors_last_hour_query.is_empty(),
            "metrics.errors_last_hour_query must be non-empty"
        );
        anyhow::ensure!(
            !self.metrics.errors_last_3_days_query.is_empty(),
            "metrics.errors_last_3_days_query must be non-empty"
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.lock.max_hold_secs > 0,
            "lock.max_hold_secs must be > 0, got {}",
            self.lock.max_hold_secs
        );
        anyhow::ensure!(
            self.lock.min_hold_secs <= self.lock.max_hold_secs,
            "lock.min_hold_secs ({}) must not exceed lock.max_hold_secs ({})",
            self.lock.min_hold_secs,
            self.lock.max_hold_secs
        );
        anyhow::ensure!(
            self.schedule.pool_size > 0,
            "schedule.pool_size must be > 0, got {}",
            self.schedule.pool_size
        );
        anyhow::ensure!(
            self.schedule.retention_hours > 0,
            "schedule.retention_hours must be > 0, got {}",
            self.schedule.retention_hours
        );
        for (name, trigger) in [
            ("collect", &self.schedule.collect),
            ("aggregate", &self.schedule.aggregate),
            ("prune", &self.schedule.prune),
        ] {
            trigger
                .to_trigger()
                .map_err(|e| anyhow::anyhow!("schedule.{}: {:#}", name, e))?;
        }
        Ok(())
    }
}
