//! Check evaluation
//!
//! Each check kind fetches its data through a source seam and then runs a
//! pure decision function over what came back. Adapter failures never
//! escape: they become failed outcomes carrying the error text.

use crate::error::CheckError;
use crate::models::{CheckKind, StatusCheck};
use crate::sources::{JobStatusSource, MetricSource};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub mod http;
pub mod icmp;
pub mod jenkins;
pub mod metric;

pub use icmp::{Pinger, SurgePinger};

/// Result of evaluating one check
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub succeeded: bool,
    pub message: String,
    pub raw: Value,
    /// Set when the evaluation failed because of an adapter error
    pub error: Option<String>,
}

impl CheckOutcome {
    pub fn success(message: impl Into<String>, raw: Value) -> Self {
        Self {
            succeeded: true,
            message: message.into(),
            raw,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>, raw: Value) -> Self {
        Self {
            succeeded: false,
            message: message.into(),
            raw,
            error: None,
        }
    }

    pub fn from_error(err: &CheckError) -> Self {
        let message = err.to_string();
        Self {
            succeeded: false,
            raw: Value::String(message.clone()),
            error: Some(message.clone()),
            message,
        }
    }
}

#[async_trait]
pub trait Evaluate: Send + Sync {
    async fn evaluate(&self, check: &StatusCheck) -> CheckOutcome;
}

/// Evaluator wired to the configured backends.
///
/// Kinds whose backend is not configured fail with a configuration error.
#[derive(Clone)]
pub struct CheckEvaluator {
    graphite: Option<Arc<dyn MetricSource>>,
    influxdb: Option<Arc<dyn MetricSource>>,
    jenkins: Option<Arc<dyn JobStatusSource>>,
    pinger: Arc<dyn Pinger>,
}

impl CheckEvaluator {
    pub fn new(pinger: Arc<dyn Pinger>) -> Self {
        Self {
            graphite: None,
            influxdb: None,
            jenkins: None,
            pinger,
        }
    }

    pub fn with_graphite(mut self, source: Arc<dyn MetricSource>) -> Self {
        self.graphite = Some(source);
        self
    }

    pub fn with_influxdb(mut self, source: Arc<dyn MetricSource>) -> Self {
        self.influxdb = Some(source);
        self
    }

    pub fn with_jenkins(mut self, source: Arc<dyn JobStatusSource>) -> Self {
        self.jenkins = Some(source);
        self
    }

    async fn try_evaluate(&self, check: &StatusCheck) -> Result<CheckOutcome, CheckError> {
        match &check.kind {
            CheckKind::Graphite(metric) => {
                let source = required(&self.graphite, "graphite")?;
                metric::run(source.as_ref(), metric).await
            }
            CheckKind::Influxdb(metric) => {
                let source = required(&self.influxdb, "influxdb")?;
                metric::run(source.as_ref(), metric).await
            }
            CheckKind::Icmp(icmp) => icmp::run(self.pinger.as_ref(), icmp).await,
            CheckKind::Http(http) => http::run(http).await,
            CheckKind::Jenkins(job) => {
                let source = required(&self.jenkins, "jenkins")?;
                jenkins::run(source.as_ref(), job).await
            }
        }
    }
}

fn required<'a, T: ?Sized>(
    source: &'a Option<Arc<T>>,
    name: &str,
) -> Result<&'a Arc<T>, CheckError> {
    source
        .as_ref()
        .ok_or_else(|| CheckError::Configuration(format!("no {name} backend configured")))
}

#[async_trait]
impl Evaluate for CheckEvaluator {
    async fn evaluate(&self, check: &StatusCheck) -> CheckOutcome {
        match self.try_evaluate(check).await {
            Ok(outcome) => outcome,
            Err(err) => CheckOutcome::from_error(&err),
        }
    }
}
