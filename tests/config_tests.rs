// Config loading and validation tests

use errstatsd::config::AppConfig;
use errstatsd::scheduler::Trigger;
use std::time::Duration;

const MINIMAL_CONFIG: &str = r#"
[node]
id = "pod-a"

[metrics]
base_url = "http://prometheus:9090"

[database]
path = "data/errstats.db"
"#;

const FULL_CONFIG: &str = r#"
[node]
id = "pod-a"

[metrics]
base_url = "https://prometheus.internal"
timeout_secs = 3
errors_last_hour_query = "sum(rate(app_errors_total[1h]))"
errors_last_3_days_query = "sum(rate(app_errors_total[3d]))"

[database]
path = "data/errstats.db"
max_pool_size = 8
busy_timeout_secs = 2

[lock]
min_hold_secs = 30
max_hold_secs = 300

[schedule]
pool_size = 4
retention_hours = 48

[schedule.collect]
interval_secs = 3600

[schedule.aggregate]
cron = "0 10 * * * *"

[schedule.prune]
cron = "0 0 0 * * *"
"#;

#[test]
fn test_config_defaults_when_omitted() {
    let config = AppConfig::load_from_str(MINIMAL_CONFIG).expect("load_from_str");
    assert_eq!(config.node.id, "pod-a");
    assert_eq!(config.metrics.timeout_secs, 10);
    assert_eq!(config.metrics.errors_last_hour_query, "rate(log_errors[1h])");
    assert_eq!(config.metrics.errors_last_3_days_query, "rate(log_errors[3d])");
    assert_eq!(config.database.max_pool_size, 5);
    assert_eq!(config.lock.min_hold_secs, 60);
    assert_eq!(config.lock.max_hold_secs, 600);
    assert_eq!(config.schedule.pool_size, 2);
    assert_eq!(config.schedule.retention_hours, 24);
    assert_eq!(
        config.schedule.collect.cron.as_deref(),
        Some("0 0 * * * *")
    );
    assert_eq!(
        config.schedule.aggregate.cron.as_deref(),
        Some("0 10 * * * *")
    );
    assert_eq!(config.schedule.prune.cron.as_deref(), Some("0 0 0 * * *"));
}

#[test]
fn test_config_full_loads() {
    let config = AppConfig::load_from_str(FULL_CONFIG).expect("valid");
    assert_eq!(config.metrics.timeout_secs, 3);
    assert_eq!(config.database.max_pool_size, 8);
    assert_eq!(config.lock.min_hold_secs, 30);
    assert_eq!(config.schedule.pool_size, 4);
    assert_eq!(config.schedule.retention_hours, 48);

    let queries = config.signal_queries();
    assert_eq!(queries.errors_last_hour, "sum(rate(app_errors_total[1h]))");
    assert_eq!(queries.errors_last_3_days, "sum(rate(app_errors_total[3d]))");

    match config.schedule.collect.to_trigger().unwrap() {
        Trigger::Interval(d) => assert_eq!(d, Duration::from_secs(3600)),
        other => panic!("expected interval, got {}", other),
    }
    assert!(matches!(
        config.schedule.aggregate.to_trigger().unwrap(),
        Trigger::Cron(_)
    ));
}

#[test]
fn test_config_validation_rejects_empty_node_id() {
    let bad = MINIMAL_CONFIG.replace("id = \"pod-a\"", "id = \"  \"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("node.id"));
}

#[test]
fn test_config_validation_rejects_base_url_without_scheme() {
    let bad = MINIMAL_CONFIG.replace("http://prometheus:9090", "prometheus:9090");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("metrics.base_url"));
}

#[test]
fn test_config_validation_rejects_timeout_zero() {
    let bad = FULL_CONFIG.replace("timeout_secs = 3", "timeout_secs = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("timeout_secs"));
}

#[test]
fn test_config_validation_rejects_empty_db_path() {
    let bad = MINIMAL_CONFIG.replace("path = \"data/errstats.db\"", "path = \"\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("database.path"));
}

#[test]
fn test_config_validation_rejects_max_pool_size_zero() {
    let bad = FULL_CONFIG.replace("max_pool_size = 8", "max_pool_size = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("max_pool_size"));
}

#[test]
fn test_config_validation_rejects_min_hold_above_max_hold() {
    let bad = FULL_CONFIG.replace("min_hold_secs = 30", "min_hold_secs = 301");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("lock.min_hold_secs"));
}

#[test]
fn test_config_validation_rejects_max_hold_zero() {
    let bad = FULL_CONFIG
        .replace("max_hold_secs = 300", "max_hold_secs = 0")
        .replace("min_hold_secs = 30", "min_hold_secs = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("lock.max_hold_secs"));
}

#[test]
fn test_config_validation_rejects_pool_size_zero() {
    let bad = FULL_CONFIG.replace("pool_size = 4", "pool_size = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("schedule.pool_size"));
}

#[test]
fn test_config_validation_rejects_retention_zero() {
    let bad = FULL_CONFIG.replace("retention_hours = 48", "retention_hours = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("retention_hours"));
}

#[test]
fn test_config_validation_rejects_invalid_cron() {
    let bad = FULL_CONFIG.replace("cron = \"0 10 * * * *\"", "cron = \"at ten past\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("schedule.aggregate"));
}

#[test]
fn test_config_validation_rejects_interval_zero() {
    let bad = FULL_CONFIG.replace("interval_secs = 3600", "interval_secs = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("schedule.collect"));
}

#[test]
fn test_config_validation_rejects_both_cron_and_interval() {
    let bad = FULL_CONFIG.replace(
        "interval_secs = 3600",
        "interval_secs = 3600\ncron = \"0 0 * * * *\"",
    );
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("not both"));
}

#[test]
fn test_config_validation_rejects_empty_trigger_table() {
    let bad = FULL_CONFIG.replace("interval_secs = 3600", "");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("schedule.collect"));
}

#[test]
fn test_config_rejects_missing_node_section() {
    let bad = MINIMAL_CONFIG.replace("[node]\nid = \"pod-a\"\n", "");
    assert!(AppConfig::load_from_str(&bad).is_err());
}

#[test]
fn test_config_validation_rejects_invalid_toml() {
    let err = AppConfig::load_from_str("not valid toml [[[").unwrap_err();
    assert!(!err.to_string().is_empty());
}

#[test]
fn test_config_load_from_file_via_env() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, FULL_CONFIG).unwrap();
    unsafe { std::env::set_var("CONFIG_FILE", path.to_str().unwrap()) };
    let result = AppConfig::load();
    unsafe { std::env::remove_var("CONFIG_FILE") };
    let config = result.expect("load from CONFIG_FILE");
    assert_eq!(config.node.id, "pod-a");
    assert_eq!(config.database.path, "data/errstats.db");
}
