//! Graphite render API metric source

use super::{MetricQuery, MetricSource, Series};
use crate::error::CheckError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Upper bound on `/metrics/find` tree depth
const MAX_FIND_DEPTH: usize = 16;

#[derive(Debug, Clone, Deserialize)]
pub struct GraphiteSettings {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_from_minutes")]
    pub from_minutes: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_from_minutes() -> u32 {
    10
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for GraphiteSettings {
    fn default() -> Self {
        Self {
            url: default_url(),
            from_minutes: default_from_minutes(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RenderSeries {
    target: String,
    datapoints: Vec<(Option<f64>, i64)>,
}

#[derive(Debug, Deserialize)]
struct FindNode {
    id: String,
    leaf: u8,
}

pub struct GraphiteSource {
    client: Client,
    settings: GraphiteSettings,
}

impl GraphiteSource {
    pub fn new(settings: GraphiteSettings) -> Result<Self, CheckError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self { client, settings })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.settings.url.trim_end_matches('/'), path)
    }

    async fn find(&self, query: &str) -> Result<Vec<FindNode>, CheckError> {
        let response = self
            .client
            .get(self.endpoint("metrics/find"))
            .query(&[("query", query)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CheckError::SourceUnavailable(format!(
                "Graphite find returned status {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }
}

/// Render target for a query; null-filling is done server side
pub fn render_target(query: &MetricQuery) -> String {
    match query.fill_empty {
        Some(fill) => format!("transformNull({}, {})", query.pattern, fill),
        None => query.pattern.clone(),
    }
}

#[async_trait]
impl MetricSource for GraphiteSource {
    async fn query(&self, query: &MetricQuery) -> Result<Vec<Series>, CheckError> {
        let target = render_target(query);
        let window = query.time_window_minutes.unwrap_or(self.settings.from_minutes);
        let from = format!("-{window}min");
        debug!(target = %target, from = %from, "Fetching Graphite series");

        let response = self
            .client
            .get(self.endpoint("render"))
            .query(&[
                ("target", target.as_str()),
                ("format", "json"),
                ("from", from.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        if status.is_client_error() {
            return Err(CheckError::Configuration(format!(
                "Graphite rejected target {target}: status {status}"
            )));
        }
        if !status.is_success() {
            return Err(CheckError::SourceUnavailable(format!(
                "Graphite returned status {status}"
            )));
        }

        let rendered: Vec<RenderSeries> = response.json().await?;
        let mut series: Vec<Series> = rendered
            .into_iter()
            .map(|s| Series {
                target: s.target,
                host: None,
                datapoints: s.datapoints,
            })
            .collect();
        if let Some(limit) = query.limit {
            series.truncate(limit as usize);
        }
        Ok(series)
    }

    async fn find_metrics(&self, pattern: &str) -> Result<Vec<String>, CheckError> {
        let mut leaves = Vec::new();
        let mut pending = vec![(pattern.to_string(), 0usize)];

        while let Some((query, depth)) = pending.pop() {
            for node in self.find(&query).await? {
                if node.leaf == 1 {
                    leaves.push(node.id);
                } else if depth < MAX_FIND_DEPTH {
                    pending.push((format!("{}.*", node.id), depth + 1));
                }
            }
        }

        leaves.sort();
        Ok(leaves)
    }
}
