//! Status Monitor - service monitoring and alerting daemon
//!
//! This binary loads the check catalog, evaluates checks on their
//! schedules and alerts on service status changes.

use anyhow::{Context, Result};
use monitor_lib::{
    aggregator::ServiceAggregator,
    api::{self, AppState},
    catalog::Catalog,
    debounce::DebounceEngine,
    dispatch::AlertDispatcher,
    evaluator::{CheckEvaluator, SurgePinger},
    health::HealthRegistry,
    observability::{MonitorMetrics, StructuredLogger},
    oncall::IcalFeedSource,
    scheduler::{SchedulerBuilder, SchedulerConfig},
    sources::{GraphiteSource, InfluxSource, JenkinsSource, MetricSource},
    store::{InMemoryStore, Store},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting status-monitor");

    let config = config::MonitorConfig::load()?;
    info!(instance = %config.instance_name, "Monitor configured");

    let health_registry = HealthRegistry::new();

    // Registers the metric families before the first scrape
    let _metrics = MonitorMetrics::new();
    let logger = StructuredLogger::new(&config.instance_name);

    let store = Arc::new(InMemoryStore::new());
    if config.catalog_path.exists() {
        Catalog::load(&config.catalog_path)
            .with_context(|| format!("Failed to load catalog {}", config.catalog_path.display()))?
            .apply(store.as_ref())
            .await
            .context("Failed to apply catalog")?;
    } else {
        warn!(path = %config.catalog_path.display(), "Catalog not found, starting empty");
    }

    // Metric backends serve both check evaluation and `/api/metrics`
    let mut metric_sources: Vec<(&str, Arc<dyn MetricSource>)> = Vec::new();
    let mut evaluator = CheckEvaluator::new(Arc::new(SurgePinger::new()));
    if let Some(settings) = config.influxdb.clone() {
        let source: Arc<dyn MetricSource> = Arc::new(InfluxSource::new(settings));
        evaluator = evaluator.with_influxdb(source.clone());
        metric_sources.push(("influxdb", source));
    }
    if let Some(settings) = config.graphite.clone() {
        let source: Arc<dyn MetricSource> =
            Arc::new(GraphiteSource::new(settings).context("Invalid graphite settings")?);
        evaluator = evaluator.with_graphite(source.clone());
        metric_sources.push(("graphite", source));
    }
    if let Some(settings) = config.jenkins.clone() {
        let source = JenkinsSource::new(settings).context("Invalid jenkins settings")?;
        evaluator = evaluator.with_jenkins(Arc::new(source));
    }

    let debounce = Arc::new(DebounceEngine::new());
    let (scheduler, changes) = SchedulerBuilder::new()
        .store(store.clone())
        .evaluator(Arc::new(evaluator))
        .debounce(debounce.clone())
        .config(SchedulerConfig::from(&config.scheduler))
        .logger(logger.clone())
        .build(1024)?;
    let scheduler = Arc::new(scheduler.with_health(health_registry.clone()));
    scheduler
        .restore_state()
        .await
        .context("Failed to restore check state")?;

    let sinks = config
        .sinks
        .iter()
        .map(|sink| sink.build())
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid sink configuration")?;
    let dispatcher = AlertDispatcher::new(sinks, logger.clone())
        .with_sink_timeout(Duration::from_secs(config.sink_timeout_secs))
        .with_health(health_registry.clone());

    let (alerts_tx, alerts_rx) = mpsc::channel(256);
    let oncall = IcalFeedSource::new(Duration::from_secs(config.oncall_timeout_secs))?;
    let aggregator = Arc::new(
        ServiceAggregator::new(store.clone(), debounce.clone(), alerts_tx, logger.clone())
            .with_oncall(Arc::new(oncall))
            .with_health(health_registry.clone()),
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));
    let aggregator_handle = tokio::spawn(aggregator.clone().run(
        changes,
        shutdown_tx.subscribe(),
        Duration::from_secs(config.aggregation_interval_secs.max(1)),
    ));
    let dispatcher_handle = tokio::spawn(dispatcher.run(alerts_rx, shutdown_tx.subscribe()));

    let app_state = metric_sources.into_iter().fold(
        AppState::new(health_registry.clone(), store.clone(), debounce, aggregator),
        |state, (name, source)| state.with_metric_source(name, source),
    );
    let app_state = Arc::new(app_state);
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let checks = store.list_checks().await?.len();
    let services = store.list_services().await?.len();
    logger.log_startup(MONITOR_VERSION, checks, services);
    health_registry.set_ready(true).await;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    let _ = shutdown_tx.send(());
    for (name, handle) in [
        ("scheduler", scheduler_handle),
        ("aggregator", aggregator_handle),
        ("dispatcher", dispatcher_handle),
    ] {
        if let Err(e) = handle.await {
            warn!(task = name, error = %e, "Task ended abnormally");
        }
    }
    api_handle.abort();
    info!("Shutdown complete");

    Ok(())
}
