//! Health of the monitor's own components
//!
//! Backs `/healthz` and `/readyz`. Only the monitor process is described
//! here; the services it watches are reported through the status API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Parts of the monitor that report their own health
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Scheduler,
    Aggregator,
    Dispatcher,
    Store,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Component::Scheduler,
        Component::Aggregator,
        Component::Dispatcher,
        Component::Store,
    ];

    /// Without these no check runs or no result is kept, so readiness
    /// follows them. A failing sink or a slow roll-up only degrades.
    pub fn is_critical(self) -> bool {
        matches!(self, Component::Scheduler | Component::Store)
    }

    pub fn name(self) -> &'static str {
        match self {
            Component::Scheduler => "scheduler",
            Component::Aggregator => "aggregator",
            Component::Dispatcher => "dispatcher",
            Component::Store => "store",
        }
    }
}

/// Ordered from best to worst, so the overall status is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the component entered its current status
    pub since: DateTime<Utc>,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            since: Utc::now(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Unhealthy, Some(message.into()))
    }

    /// Degraded when any counted problem is present, listing each one.
    ///
    /// `from_problems(&[(2, "evaluations timed out"), (0, "runs skipped")])`
    /// reads "2 evaluations timed out".
    pub fn from_problems(problems: &[(usize, &str)]) -> Self {
        let present: Vec<String> = problems
            .iter()
            .filter(|(count, _)| *count > 0)
            .map(|(count, what)| format!("{count} {what}"))
            .collect();

        if present.is_empty() {
            Self::healthy()
        } else {
            Self::degraded(present.join(", "))
        }
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<Component, ComponentHealth>,
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug)]
struct RegistryState {
    components: BTreeMap<Component, ComponentHealth>,
    started: bool,
}

/// Shared view of component health. Every component starts healthy.
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        let components = Component::ALL
            .into_iter()
            .map(|c| (c, ComponentHealth::healthy()))
            .collect();
        Self {
            state: Arc::new(RwLock::new(RegistryState {
                components,
                started: false,
            })),
        }
    }

    /// Record a component's health. Repeating the current status keeps
    /// its `since` time; a transition is logged.
    pub async fn report(&self, component: Component, health: ComponentHealth) {
        let mut state = self.state.write().await;
        let entry = state
            .components
            .entry(component)
            .or_insert_with(ComponentHealth::healthy);

        if entry.status == health.status {
            entry.message = health.message;
            return;
        }

        match health.status {
            ComponentStatus::Healthy => {
                info!(component = component.name(), "Component recovered")
            }
            _ => warn!(
                component = component.name(),
                status = ?health.status,
                detail = health.message.as_deref().unwrap_or_default(),
                "Component health changed"
            ),
        }
        *entry = health;
    }

    pub async fn set_healthy(&self, component: Component) {
        self.report(component, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, component: Component, message: impl Into<String>) {
        self.report(component, ComponentHealth::degraded(message))
            .await;
    }

    pub async fn set_unhealthy(&self, component: Component, message: impl Into<String>) {
        self.report(component, ComponentHealth::unhealthy(message))
            .await;
    }

    /// Mark startup finished (catalog applied, tasks spawned) or shutting down
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.started = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = state
            .components
            .values()
            .map(|h| h.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse {
            status,
            components: state.components.clone(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        if !state.started {
            return ReadinessResponse {
                ready: false,
                reason: Some("Monitor starting or shutting down".to_string()),
            };
        }

        let failed = state.components.iter().find(|(component, health)| {
            component.is_critical() && health.status == ComponentStatus::Unhealthy
        });
        match failed {
            Some((component, health)) => ReadinessResponse {
                ready: false,
                reason: Some(format!(
                    "{} unhealthy: {}",
                    component.name(),
                    health.message.as_deref().unwrap_or("no detail")
                )),
            },
            None => ReadinessResponse {
                ready: true,
                reason: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_all_components_start_healthy() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert_eq!(health.components.len(), Component::ALL.len());
    }

    #[tokio::test]
    async fn test_worst_component_wins() {
        let registry = HealthRegistry::new();
        registry
            .set_degraded(Component::Dispatcher, "1 of 2 sinks failed")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry
            .set_unhealthy(Component::Store, "result log unavailable")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_since_kept_while_status_unchanged() {
        let registry = HealthRegistry::new();
        registry.set_degraded(Component::Scheduler, "1 evaluations timed out").await;
        let first = registry.health().await.components[&Component::Scheduler].clone();

        registry.set_degraded(Component::Scheduler, "2 evaluations timed out").await;
        let second = registry.health().await.components[&Component::Scheduler].clone();

        assert_eq!(first.since, second.since);
        assert_eq!(second.message.as_deref(), Some("2 evaluations timed out"));
    }

    #[test]
    fn test_from_problems_lists_nonzero_counts() {
        let health = ComponentHealth::from_problems(&[
            (2, "evaluations timed out"),
            (0, "evaluations panicked"),
            (1, "checks skipping overlapping runs"),
        ]);
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            health.message.as_deref(),
            Some("2 evaluations timed out, 1 checks skipping overlapping runs")
        );

        let health = ComponentHealth::from_problems(&[(0, "evaluations timed out")]);
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.message.is_none());
    }

    #[tokio::test]
    async fn test_not_ready_before_start() {
        let readiness = HealthRegistry::new().readiness().await;

        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Monitor starting or shutting down"));
    }

    #[tokio::test]
    async fn test_only_critical_components_block_readiness() {
        let registry = HealthRegistry::new();
        registry.set_ready(true).await;

        registry
            .set_unhealthy(Component::Dispatcher, "every sink failing")
            .await;
        assert!(registry.readiness().await.ready);

        registry
            .set_unhealthy(Component::Store, "result log unavailable")
            .await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("store unhealthy: result log unavailable")
        );
    }

    #[test]
    fn test_components_serialize_as_names() {
        let mut components = BTreeMap::new();
        components.insert(Component::Store, ComponentHealth::healthy());
        let json = serde_json::to_value(HealthResponse {
            status: ComponentStatus::Healthy,
            components,
        })
        .unwrap();

        assert_eq!(json["status"], "healthy");
        assert_eq!(json["components"]["store"]["status"], "healthy");
    }
}
