//! Monitoring engine library
//!
//! This crate provides the core functionality for:
//! - Evaluating metric, ping, HTTP and CI job checks
//! - Scheduling checks and debouncing their results
//! - Rolling check status up to services and dispatching alerts
//! - Outage reporting, health checks and observability

pub mod aggregator;
pub mod api;
pub mod catalog;
pub mod debounce;
pub mod dispatch;
pub mod error;
pub mod evaluator;
pub mod health;
pub mod models;
pub mod observability;
pub mod oncall;
pub mod report;
pub mod scheduler;
pub mod sources;
pub mod store;

pub use aggregator::ServiceAggregator;
pub use debounce::{DebounceEngine, StatusChange};
pub use dispatch::{AlertDispatcher, AlertEvent, NotificationSink, SinkConfig};
pub use error::{CatalogError, CheckError, DispatchError, OnCallError, StoreError};
pub use evaluator::{CheckEvaluator, CheckOutcome, Evaluate};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerConfig};
pub use store::{InMemoryStore, Store, TimeRange};
