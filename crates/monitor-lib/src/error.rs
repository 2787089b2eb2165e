//! Error taxonomy for evaluation, dispatch and storage

use std::time::Duration;
use thiserror::Error;

/// Failure while evaluating a check. Every variant is recorded as a
/// failed result; none of them stop the scheduler.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("Evaluation timed out after {0:?}")]
    EvaluationTimeout(Duration),
    #[error("Evaluation panicked: {0}")]
    EvaluationPanicked(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for CheckError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CheckError::SourceUnavailable(format!("request timed out: {err}"))
        } else if err.is_builder() {
            CheckError::Configuration(err.to_string())
        } else {
            CheckError::SourceUnavailable(err.to_string())
        }
    }
}

impl From<regex::Error> for CheckError {
    fn from(err: regex::Error) -> Self {
        CheckError::Configuration(format!("invalid pattern: {err}"))
    }
}

/// Failure delivering an alert to one sink
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Failed to deliver notification: {0}")]
    Delivery(String),
    #[error("Invalid configuration for sink: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Templating error: {0}")]
    Template(#[from] tera::Error),
    #[error("Sink {0} timed out")]
    Timeout(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },
    #[error("{entity} {id} already exists")]
    Conflict { entity: &'static str, id: u64 },
    #[error("Cannot link {from} to missing {entity} {id}")]
    DanglingLink {
        from: &'static str,
        entity: &'static str,
        id: u64,
    },
}

#[derive(Error, Debug)]
pub enum OnCallError {
    #[error("Failed to fetch calendar feed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("Calendar feed returned status {0}")]
    Status(u16),
    #[error("Malformed calendar entry: {0}")]
    Parse(String),
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Catalog rejected by store: {0}")]
    Store(#[from] StoreError),
}
