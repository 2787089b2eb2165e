//! Alertmanager sink
//!
//! Handles:
//! - One firing alert per failing check, labelled by service and check
//! - Resolved alerts for checks that recovered since the last event

use super::{AlertEvent, FailingCheck, NotificationSink};
use crate::error::DispatchError;
use crate::models::{Importance, OverallStatus};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Error,
    Critical,
}

impl From<Importance> for AlertSeverity {
    fn from(importance: Importance) -> Self {
        match importance {
            Importance::Warning => AlertSeverity::Warning,
            Importance::Error => AlertSeverity::Error,
            Importance::Critical => AlertSeverity::Critical,
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Error => write!(f, "error"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Alertmanager v2 alert
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerAlert {
    /// Alert labels for routing and grouping
    pub labels: HashMap<String, String>,
    /// Alert annotations with details
    pub annotations: HashMap<String, String>,
    /// Start time in RFC3339 format
    pub starts_at: String,
    /// Set for resolved alerts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<String>,
    /// Link back to the service
    #[serde(rename = "generatorURL", skip_serializing_if = "Option::is_none")]
    pub generator_url: Option<String>,
}

fn check_alert(event: &AlertEvent, check: &FailingCheck, resolved: bool) -> AlertmanagerAlert {
    let timestamp = event.time.to_rfc3339();

    let mut labels = HashMap::new();
    labels.insert("alertname".to_string(), "StatusCheckFailing".to_string());
    labels.insert(
        "severity".to_string(),
        AlertSeverity::from(check.importance).to_string(),
    );
    labels.insert("service".to_string(), event.service_name.clone());
    labels.insert("service_id".to_string(), event.service_id.to_string());
    labels.insert("check".to_string(), check.name.clone());
    labels.insert("check_id".to_string(), check.check_id.to_string());

    let mut annotations = HashMap::new();
    annotations.insert(
        "summary".to_string(),
        format!("Check {} on service {}", check.name, event.service_name),
    );
    annotations.insert("description".to_string(), check.message.clone());
    annotations.insert("service_status".to_string(), event.new_status.to_string());
    if !event.recipients.is_empty() {
        annotations.insert("recipients".to_string(), event.recipients.join(", "));
    }

    AlertmanagerAlert {
        labels,
        annotations,
        starts_at: timestamp.clone(),
        ends_at: resolved.then_some(timestamp),
        generator_url: event.service_url.clone(),
    }
}

/// Alerts describing an event
pub fn alerts_for_event(event: &AlertEvent) -> Vec<AlertmanagerAlert> {
    let firing = event
        .failing_checks
        .iter()
        .filter(|_| event.new_status != OverallStatus::Passing)
        .map(|check| check_alert(event, check, false));
    let resolved = event
        .recovered_checks
        .iter()
        .map(|check| check_alert(event, check, true));
    firing.chain(resolved).collect()
}

pub struct AlertmanagerSink {
    name: String,
    url: String,
    client: Client,
}

impl AlertmanagerSink {
    pub fn new(name: String, url: String) -> Self {
        Self {
            name,
            url,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl NotificationSink for AlertmanagerSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, event: &AlertEvent) -> Result<(), DispatchError> {
        let alerts = alerts_for_event(event);
        if alerts.is_empty() {
            return Ok(());
        }

        let endpoint = format!("{}/api/v2/alerts", self.url.trim_end_matches('/'));
        let response = self.client.post(&endpoint).json(&alerts).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(DispatchError::Delivery(format!(
                "Alertmanager returned {status}: {body}"
            )));
        }
        Ok(())
    }
}
