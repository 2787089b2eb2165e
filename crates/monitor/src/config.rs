//! Monitor configuration

use anyhow::{Context, Result};
use monitor_lib::dispatch::SinkConfig;
use monitor_lib::scheduler::SchedulerConfig;
use monitor_lib::sources::graphite::GraphiteSettings;
use monitor_lib::sources::influx::InfluxSettings;
use monitor_lib::sources::jenkins::JenkinsSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "monitor.toml";

/// Monitor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Name attached to every structured log record
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// API server port for health/metrics/status
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// JSON catalog of checks, services, instances and schedules
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    /// Full service recompute interval in seconds
    #[serde(default = "default_aggregation_interval")]
    pub aggregation_interval_secs: u64,

    /// Per-sink delivery timeout in seconds
    #[serde(default = "default_sink_timeout")]
    pub sink_timeout_secs: u64,

    /// On-call calendar fetch timeout in seconds
    #[serde(default = "default_oncall_timeout")]
    pub oncall_timeout_secs: u64,

    #[serde(default)]
    pub influxdb: Option<InfluxSettings>,

    #[serde(default)]
    pub graphite: Option<GraphiteSettings>,

    #[serde(default)]
    pub jenkins: Option<JenkinsSettings>,

    #[serde(default = "default_sinks")]
    pub sinks: Vec<SinkConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_tick")]
    pub tick_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_checks: usize,
    #[serde(default = "default_evaluation_timeout")]
    pub evaluation_timeout_secs: u64,
    #[serde(default = "default_jitter")]
    pub jitter_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_secs: default_tick(),
            max_concurrent_checks: default_max_concurrent(),
            evaluation_timeout_secs: default_evaluation_timeout(),
            jitter_secs: default_jitter(),
        }
    }
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        SchedulerConfig {
            tick: Duration::from_secs(settings.tick_secs.max(1)),
            max_concurrent: settings.max_concurrent_checks,
            evaluation_timeout: Duration::from_secs(settings.evaluation_timeout_secs),
            jitter: Duration::from_secs(settings.jitter_secs),
        }
    }
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "status-monitor".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("catalog.json")
}

fn default_aggregation_interval() -> u64 {
    60
}

fn default_sink_timeout() -> u64 {
    10
}

fn default_oncall_timeout() -> u64 {
    10
}

fn default_tick() -> u64 {
    1
}

fn default_max_concurrent() -> usize {
    32
}

fn default_evaluation_timeout() -> u64 {
    30
}

fn default_jitter() -> u64 {
    10
}

fn default_sinks() -> Vec<SinkConfig> {
    vec![SinkConfig::Log {
        name: "log".to_string(),
    }]
}

impl MonitorConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("MONITOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    /// Load from `path` (optional) overlaid with `MONITOR__*` variables
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("MONITOR")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Invalid monitor configuration")
    }

    pub fn evaluation_timeout(&self) -> Duration {
        Duration::from_secs(self.scheduler.evaluation_timeout_secs)
    }
}
