//! Alert fan-out to notification sinks
//!
//! One failing sink never blocks or fails delivery to the others: every
//! sink runs concurrently under its own timeout and errors are logged.

use crate::error::DispatchError;
use crate::health::{Component, ComponentHealth, HealthRegistry};
use crate::models::{CheckId, Importance, OverallStatus, ServiceId};
use crate::observability::{MonitorMetrics, StructuredLogger};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub mod alertmanager;
pub mod log;
pub mod webhook;

pub use alertmanager::AlertmanagerSink;
pub use log::LogSink;
pub use webhook::WebhookSink;

const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailingCheck {
    pub check_id: CheckId,
    pub name: String,
    pub importance: Importance,
    pub message: String,
}

/// Notification emitted when a service's overall status changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub service_id: ServiceId,
    pub service_name: String,
    #[serde(default)]
    pub service_url: Option<String>,
    pub old_status: OverallStatus,
    pub new_status: OverallStatus,
    pub failing_checks: Vec<FailingCheck>,
    /// Checks failing at the previous notification that have since recovered
    #[serde(default)]
    pub recovered_checks: Vec<FailingCheck>,
    pub recipients: Vec<String>,
    /// Sink names to deliver through
    pub sinks: Vec<String>,
    pub time: DateTime<Utc>,
}

impl AlertEvent {
    pub fn summary(&self) -> String {
        format!(
            "Service {} is {} (was {})",
            self.service_name, self.new_status, self.old_status
        )
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, event: &AlertEvent) -> Result<(), DispatchError>;
}

/// Sink definitions as they appear in configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    Alertmanager {
        name: String,
        url: String,
    },
    Webhook {
        name: String,
        url: String,
        #[serde(default = "default_method")]
        method: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default)]
        body_template: Option<String>,
    },
    Log {
        name: String,
    },
}

fn default_method() -> String {
    "POST".to_string()
}

impl SinkConfig {
    pub fn build(&self) -> Result<Arc<dyn NotificationSink>, DispatchError> {
        Ok(match self {
            SinkConfig::Alertmanager { name, url } => {
                Arc::new(AlertmanagerSink::new(name.clone(), url.clone()))
            }
            SinkConfig::Webhook {
                name,
                url,
                method,
                headers,
                body_template,
            } => Arc::new(WebhookSink::new(
                name.clone(),
                url.clone(),
                method,
                headers.clone(),
                body_template.clone(),
            )?),
            SinkConfig::Log { name } => Arc::new(LogSink::new(name.clone())),
        })
    }
}

/// Per-event delivery outcome
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DispatchReport {
    pub delivered: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub unknown: Vec<String>,
}

pub struct AlertDispatcher {
    sinks: HashMap<String, Arc<dyn NotificationSink>>,
    sink_timeout: Duration,
    health: Option<HealthRegistry>,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl AlertDispatcher {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>, logger: StructuredLogger) -> Self {
        Self {
            sinks: sinks
                .into_iter()
                .map(|s| (s.name().to_string(), s))
                .collect(),
            sink_timeout: DEFAULT_SINK_TIMEOUT,
            health: None,
            metrics: MonitorMetrics::new(),
            logger,
        }
    }

    pub fn with_sink_timeout(mut self, timeout: Duration) -> Self {
        self.sink_timeout = timeout;
        self
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn sink_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.sinks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Deliver one event to every sink the service names
    pub async fn dispatch(&self, event: &AlertEvent) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut tasks = JoinSet::new();
        let event = Arc::new(event.clone());

        for name in &event.sinks {
            let Some(sink) = self.sinks.get(name) else {
                warn!(sink = %name, service_id = event.service_id, "Unknown notification sink");
                report.unknown.push(name.clone());
                continue;
            };

            let sink = Arc::clone(sink);
            let event = Arc::clone(&event);
            let timeout = self.sink_timeout;
            tasks.spawn(async move {
                let name = sink.name().to_string();
                let result = match tokio::time::timeout(timeout, sink.send(&event)).await {
                    Ok(result) => result,
                    Err(_) => Err(DispatchError::Timeout(name.clone())),
                };
                (name, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    self.metrics.inc_alerts_dispatched();
                    self.logger.log_alert_dispatched(event.service_id, &name);
                    report.delivered.push(name);
                }
                Ok((name, Err(err))) => {
                    self.metrics.inc_dispatch_errors();
                    self.logger
                        .log_alert_dispatch_failed(event.service_id, &name, &err.to_string());
                    report.failed.push((name, err.to_string()));
                }
                Err(join_err) => {
                    self.metrics.inc_dispatch_errors();
                    warn!(error = %join_err, "Sink task panicked");
                    report.failed.push(("<panicked>".to_string(), join_err.to_string()));
                }
            }
        }

        report.delivered.sort();
        report.failed.sort();
        report
    }

    /// Consume events until the channel closes or shutdown is signalled
    pub async fn run(
        self,
        mut events: mpsc::Receiver<AlertEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(sinks = ?self.sink_names(), "Starting alert dispatcher");

        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    let Some(event) = maybe_event else {
                        debug!("Alert channel closed");
                        break;
                    };
                    let report = self.dispatch(&event).await;
                    self.update_health(&report).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down alert dispatcher");
                    break;
                }
            }
        }
    }

    async fn update_health(&self, report: &DispatchReport) {
        let Some(health) = &self.health else {
            return;
        };
        if report.failed.is_empty() {
            health.set_healthy(Component::Dispatcher).await;
            return;
        }

        let names: Vec<_> = report.failed.iter().map(|(n, _)| n.as_str()).collect();
        let message = format!("delivery failed for {}", names.join(", "));
        // Nothing reached anyone
        let state = if report.delivered.is_empty() {
            ComponentHealth::unhealthy(message)
        } else {
            ComponentHealth::degraded(message)
        };
        health.report(Component::Dispatcher, state).await;
    }
}
