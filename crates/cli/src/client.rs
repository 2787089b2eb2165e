//! API client for communicating with the status monitor

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

/// API client for the status monitor daemon
#[derive(Debug)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            anyhow::bail!("API error ({}): {}", status, message);
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn services(&self) -> Result<Vec<ServiceSummary>> {
        self.get("api/services").await
    }

    pub async fn service(&self, id: u64) -> Result<ServiceSummary> {
        self.get(&format!("api/services/{}", id)).await
    }

    pub async fn instances(&self) -> Result<Vec<InstanceSummary>> {
        self.get("api/instances").await
    }

    pub async fn checks(&self) -> Result<Vec<CheckSummary>> {
        self.get("api/checks").await
    }

    pub async fn results(&self, check_id: u64, limit: usize) -> Result<Vec<CheckResult>> {
        self.get(&format!("api/checks/{}/results?limit={}", check_id, limit))
            .await
    }

    pub async fn find_metrics(&self, source: &str, pattern: &str) -> Result<MetricSearch> {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("source", source)
            .append_pair("pattern", pattern)
            .finish();
        self.get(&format!("api/metrics?{}", query)).await
    }

    pub async fn report(&self, check_id: u64, from: &str, to: &str) -> Result<CheckReport> {
        self.get(&format!(
            "api/checks/{}/report?from={}&to={}",
            check_id, from, to
        ))
        .await
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailingCheck {
    pub check_id: u64,
    pub name: String,
    pub importance: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub id: u64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub status: String,
    pub alerts_enabled: bool,
    pub failing_checks: Vec<FailingCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub id: u64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub status: String,
    pub failing_checks: Vec<FailingCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSummary {
    pub id: u64,
    pub name: String,
    pub kind: String,
    pub importance: String,
    pub frequency: u32,
    pub active: bool,
    pub effective_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result: Option<CheckResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub check_id: u64,
    pub time: String,
    pub succeeded: bool,
    pub message: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemInterval {
    pub start: String,
    pub end: Option<String>,
    pub duration_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckReport {
    pub check_id: u64,
    pub check_name: String,
    pub problems: Vec<ProblemInterval>,
    pub success_rate: Option<f64>,
    pub total_results: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSearch {
    pub source: String,
    pub pattern: String,
    pub metrics: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
