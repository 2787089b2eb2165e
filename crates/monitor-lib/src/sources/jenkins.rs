//! Jenkins job status source

use super::{JobStatus, JobStatusSource};
use crate::error::CheckError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct JenkinsSettings {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub pass: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    "http://localhost:8080/".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for JenkinsSettings {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            user: None,
            pass: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

pub struct JenkinsSource {
    client: Client,
    settings: JenkinsSettings,
}

impl JenkinsSource {
    pub fn new(settings: JenkinsSettings) -> Result<Self, CheckError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self { client, settings })
    }
}

#[async_trait]
impl JobStatusSource for JenkinsSource {
    async fn get_job_status(&self, name: &str) -> Result<JobStatus, CheckError> {
        let endpoint = format!(
            "{}/job/{}/api/json",
            self.settings.api_url.trim_end_matches('/'),
            name
        );

        let mut request = self.client.get(&endpoint);
        if let Some(user) = &self.settings.user {
            request = request.basic_auth(user, self.settings.pass.as_ref());
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CheckError::Configuration(format!("Jenkins job {name} not found")));
        }
        if !status.is_success() {
            return Err(CheckError::SourceUnavailable(format!(
                "Jenkins returned status {status}"
            )));
        }

        let body: serde_json::Value = response.json().await?;
        let mut job = job_status_from_json(&body, Utc::now())?;
        job.status_code = status.as_u16();
        Ok(job)
    }
}

/// Derive job status from a Jenkins `job/<name>/api/json` document.
///
/// `blue*` colours are successful builds, `disabled` means the job is
/// inactive. A blocked queue item reports how long it has waited.
pub fn job_status_from_json(
    body: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<JobStatus, CheckError> {
    let color = body
        .get("color")
        .and_then(|c| c.as_str())
        .ok_or_else(|| CheckError::SourceUnavailable("Jenkins response has no color".to_string()))?;

    let (active, succeeded) = if color.starts_with("blue") {
        (true, true)
    } else if color == "disabled" {
        (false, false)
    } else {
        (true, false)
    };

    let job_number = body
        .get("lastBuild")
        .and_then(|b| b.get("number"))
        .and_then(|n| n.as_u64());

    let blocked_build_time = body
        .get("queueItem")
        .filter(|q| q.get("blocked").and_then(|b| b.as_bool()).unwrap_or(false))
        .and_then(|q| q.get("inQueueSince"))
        .and_then(|since| since.as_i64())
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|since| (now - since).num_milliseconds() as f64 / 1000.0);

    Ok(JobStatus {
        active,
        succeeded,
        blocked_build_time,
        status_code: 200,
        job_number,
    })
}
