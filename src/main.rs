use anyhow::Result;
use errstatsd::*;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    tracing::info!(
        name = version::NAME,
        version = version::VERSION,
        node_id = %app_config.node.id,
        "starting"
    );

    let store = Arc::new(
        store::SampleStore::connect(
            &app_config.database.path,
            app_config.database.max_pool_size,
            Duration::from_secs(app_config.database.busy_timeout_secs),
        )
        .await?,
    );
    store.init().await?;

    let metrics = Arc::new(metrics_source::PrometheusSource::new(
        &app_config.metrics.base_url,
        Duration::from_secs(app_config.metrics.timeout_secs),
    )?);
    let holder = store::process_holder_id(&app_config.node.id);
    tracing::info!(holder = %holder, "lock holder identity");

    let runner = Arc::new(runner::JobRunner::new(
        runner::RunnerDeps {
            metrics,
            store: store.clone(),
            lock: store.distributed_lock(holder),
        },
        runner::RunnerConfig {
            node_id: app_config.node.id.clone(),
            queries: app_config.signal_queries(),
            lock: runner::LockSettings::from(&app_config.lock),
            retention: Duration::from_secs(app_config.schedule.retention_hours as u64 * 3600),
        },
    ));

    let mut scheduler = scheduler::Scheduler::new(app_config.schedule.pool_size);
    runner::register_jobs(runner, &mut scheduler, &app_config.schedule)?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let scheduler_handle = scheduler.spawn(shutdown_rx);

    shutdown_signal().await;
    tracing::info!("Received shutdown signal");
    let _ = shutdown_tx.send(true);
    let _ = scheduler_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
