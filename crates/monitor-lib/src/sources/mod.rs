//! Data sources consumed by check evaluation
//!
//! Metric backends are normalised to graphite-style series so the
//! evaluator never sees backend wire formats.

use crate::error::CheckError;
use crate::models::MetricCheck;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod graphite;
pub mod influx;
pub mod jenkins;

pub use graphite::GraphiteSource;
pub use influx::InfluxSource;
pub use jenkins::JenkinsSource;

/// A normalised series: dotted name plus `(value, unix_seconds)` points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub datapoints: Vec<(Option<f64>, i64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricQuery {
    pub pattern: String,
    pub selector: String,
    pub where_clause: Option<String>,
    pub group_by: Option<String>,
    pub fill_empty: Option<i64>,
    /// Lookback in minutes; the source default applies when unset
    pub time_window_minutes: Option<u32>,
    pub limit: Option<u32>,
    pub fetch_all: bool,
}

impl MetricQuery {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            selector: "value".to_string(),
            where_clause: None,
            group_by: None,
            fill_empty: None,
            time_window_minutes: None,
            limit: None,
            fetch_all: false,
        }
    }

    pub fn for_check(check: &MetricCheck) -> Self {
        Self {
            pattern: check.metric.clone(),
            selector: check.metric_selector.clone(),
            where_clause: check.where_clause.clone(),
            group_by: check.group_by.clone(),
            fill_empty: check.fill_empty,
            time_window_minutes: Some(check.interval_minutes.max(1)),
            limit: None,
            fetch_all: check.fetch_all,
        }
    }
}

/// Uniform capability over time-series backends
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn query(&self, query: &MetricQuery) -> Result<Vec<Series>, CheckError>;

    /// Metric paths matching a pattern
    async fn find_metrics(&self, pattern: &str) -> Result<Vec<String>, CheckError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub active: bool,
    pub succeeded: bool,
    /// Seconds the next build has been blocked in the queue
    pub blocked_build_time: Option<f64>,
    pub status_code: u16,
    pub job_number: Option<u64>,
}

#[async_trait]
pub trait JobStatusSource: Send + Sync {
    async fn get_job_status(&self, name: &str) -> Result<JobStatus, CheckError>;
}

/// Summary of fetched series over the trailing window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricSummary {
    pub num_series_with_data: usize,
    pub num_series_no_data: usize,
    pub num_hosts: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub average_value: Option<f64>,
    /// `(series, value)` pairs from the window, in series order
    pub values: Vec<(String, f64)>,
}

/// Reduce series to the last `window` datapoints each, dropping nulls.
///
/// Hosts are counted from the `host` tag when any series carries one,
/// otherwise each series with data counts as a host.
pub fn summarize(series: &[Series], window: usize) -> MetricSummary {
    let mut summary = MetricSummary::default();
    let mut hosts = std::collections::BTreeSet::new();
    let tagged = series.iter().any(|s| s.host.is_some());

    for s in series {
        let start = s.datapoints.len().saturating_sub(window);
        let before = summary.values.len();
        summary.values.extend(
            s.datapoints[start..]
                .iter()
                .filter_map(|(v, _)| v.filter(|v| v.is_finite()))
                .map(|v| (s.target.clone(), v)),
        );

        if summary.values.len() > before {
            summary.num_series_with_data += 1;
            if tagged {
                if let Some(host) = &s.host {
                    hosts.insert(host.clone());
                }
            } else {
                hosts.insert(s.target.clone());
            }
        } else {
            summary.num_series_no_data += 1;
        }
    }

    summary.num_hosts = hosts.len();
    if !summary.values.is_empty() {
        let values = summary.values.iter().map(|(_, v)| *v);
        summary.min = values.clone().reduce(f64::min);
        summary.max = values.clone().reduce(f64::max);
        summary.average_value = Some(values.sum::<f64>() / summary.values.len() as f64);
    }
    summary
}
