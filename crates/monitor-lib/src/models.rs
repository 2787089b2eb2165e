//! Core data models for the status monitor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type CheckId = u64;
pub type ServiceId = u64;
pub type InstanceId = u64;
pub type ScheduleId = u64;

/// Severity tier of a check. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Importance {
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Importance::Warning => write!(f, "WARNING"),
            Importance::Error => write!(f, "ERROR"),
            Importance::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Comparison applied between a metric value and the check threshold.
/// A value passes when `value <op> threshold` holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckType {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "==")]
    Eq,
}

impl CheckType {
    pub fn passes(&self, value: f64, threshold: f64) -> bool {
        match self {
            CheckType::Lt => value < threshold,
            CheckType::Le => value <= threshold,
            CheckType::Gt => value > threshold,
            CheckType::Ge => value >= threshold,
            CheckType::Eq => (value - threshold).abs() < f64::EPSILON,
        }
    }
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            CheckType::Lt => "<",
            CheckType::Le => "<=",
            CheckType::Gt => ">",
            CheckType::Ge => ">=",
            CheckType::Eq => "==",
        };
        f.write_str(op)
    }
}

/// Threshold check against a metric backend (Graphite or InfluxDB)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricCheck {
    pub metric: String,
    #[serde(default = "default_selector")]
    pub metric_selector: String,
    #[serde(default)]
    pub group_by: Option<String>,
    #[serde(default)]
    pub fill_empty: Option<i64>,
    #[serde(default)]
    pub where_clause: Option<String>,
    pub check_type: CheckType,
    pub value: f64,
    /// Number of trailing datapoints per series considered (minutes at 1/min resolution)
    #[serde(default = "default_interval")]
    pub interval_minutes: u32,
    #[serde(default)]
    pub expected_num_hosts: u32,
    #[serde(default)]
    pub expected_num_metrics: u32,
    #[serde(default)]
    pub fetch_all: bool,
}

fn default_selector() -> String {
    "value".to_string()
}

fn default_interval() -> u32 {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcmpCheck {
    pub host: String,
    #[serde(default = "default_icmp_timeout")]
    pub timeout_secs: u64,
}

fn default_icmp_timeout() -> u64 {
    2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpCheck {
    pub endpoint: String,
    #[serde(default)]
    pub http_method: HttpMethod,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub http_params: BTreeMap<String, String>,
    #[serde(default)]
    pub http_body: Option<String>,
    /// Exact code ("200") or class ("2xx")
    #[serde(default = "default_status_code")]
    pub status_code: String,
    #[serde(default)]
    pub text_match: Option<String>,
    /// Header name -> regex that the header value must match
    #[serde(default)]
    pub header_match: BTreeMap<String, String>,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub allow_http_redirects: bool,
    #[serde(default = "default_true")]
    pub verify_ssl_certificate: bool,
}

fn default_status_code() -> String {
    "200".to_string()
}

fn default_http_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JenkinsCheck {
    pub job_name: String,
    /// Minutes a build may sit blocked in the queue before the check fails
    #[serde(default)]
    pub max_queued_build_time: Option<u64>,
}

/// Kind-specific payload of a status check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckKind {
    Graphite(MetricCheck),
    Influxdb(MetricCheck),
    Icmp(IcmpCheck),
    Http(HttpCheck),
    Jenkins(JenkinsCheck),
}

impl CheckKind {
    pub fn label(&self) -> &'static str {
        match self {
            CheckKind::Graphite(_) => "graphite",
            CheckKind::Influxdb(_) => "influxdb",
            CheckKind::Icmp(_) => "icmp",
            CheckKind::Http(_) => "http",
            CheckKind::Jenkins(_) => "jenkins",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusCheck {
    pub id: CheckId,
    pub name: String,
    /// Minutes between runs
    #[serde(default = "default_frequency")]
    pub frequency: u32,
    #[serde(default = "default_importance")]
    pub importance: Importance,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Consecutive opposite results required to flip the effective status
    #[serde(default)]
    pub debounce: u32,
    #[serde(flatten)]
    pub kind: CheckKind,
}

fn default_frequency() -> u32 {
    5
}

fn default_importance() -> Importance {
    Importance::Error
}

impl StatusCheck {
    pub fn frequency_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.frequency.max(1)))
    }
}

/// One immutable evaluation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusCheckResult {
    pub check_id: CheckId,
    pub time: DateTime<Utc>,
    pub succeeded: bool,
    pub raw_data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message: String,
    pub duration_ms: u64,
}

/// Debounced, externally reported state of a check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectiveStatus {
    Passing,
    Failing,
}

impl EffectiveStatus {
    pub fn from_succeeded(succeeded: bool) -> Self {
        if succeeded {
            EffectiveStatus::Passing
        } else {
            EffectiveStatus::Failing
        }
    }
}

/// Aggregated status of a service or instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OverallStatus {
    Passing,
    Warning,
    Error,
    Critical,
}

impl From<Importance> for OverallStatus {
    fn from(importance: Importance) -> Self {
        match importance {
            Importance::Warning => OverallStatus::Warning,
            Importance::Error => OverallStatus::Error,
            Importance::Critical => OverallStatus::Critical,
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverallStatus::Passing => write!(f, "PASSING"),
            OverallStatus::Warning => write!(f, "WARNING"),
            OverallStatus::Error => write!(f, "ERROR"),
            OverallStatus::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    /// People notified on status change
    #[serde(default)]
    pub users_to_notify: Vec<String>,
    /// Names of the notification sinks this service alerts through
    #[serde(default)]
    pub alerts: Vec<String>,
    #[serde(default = "default_true")]
    pub alerts_enabled: bool,
    #[serde(default)]
    pub schedule: Option<ScheduleId>,
}

/// On-call calendar source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub name: String,
    pub feed_url: String,
}

/// A shift resolved from an on-call calendar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnCallShift {
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}
