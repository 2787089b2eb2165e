//! Service-level roll-up of check status
//!
//! A service's overall status is the highest importance among its
//! active, effectively failing checks, or passing when there are none.
//! An alert event is emitted only when that status changes.

use crate::debounce::{DebounceEngine, StatusChange};
use crate::dispatch::{AlertEvent, FailingCheck};
use crate::error::StoreError;
use crate::health::{Component, ComponentHealth, HealthRegistry};
use crate::models::{
    EffectiveStatus, InstanceId, OverallStatus, Service, ServiceId, StatusCheck,
};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::oncall::OnCallSource;
use crate::store::Store;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Results searched for the failure message of a failing check
const MESSAGE_LOOKBACK: usize = 100;

#[derive(Debug, Clone)]
struct ServiceState {
    status: OverallStatus,
    /// Failing checks as of the last status change
    notified_failing: Vec<FailingCheck>,
}

impl Default for ServiceState {
    fn default() -> Self {
        Self {
            status: OverallStatus::Passing,
            notified_failing: Vec::new(),
        }
    }
}

pub struct ServiceAggregator {
    store: Arc<dyn Store>,
    debounce: Arc<DebounceEngine>,
    oncall: Option<Arc<dyn OnCallSource>>,
    alerts: mpsc::Sender<AlertEvent>,
    states: DashMap<ServiceId, ServiceState>,
    health: Option<HealthRegistry>,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl ServiceAggregator {
    pub fn new(
        store: Arc<dyn Store>,
        debounce: Arc<DebounceEngine>,
        alerts: mpsc::Sender<AlertEvent>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            store,
            debounce,
            oncall: None,
            alerts,
            states: DashMap::new(),
            health: None,
            metrics: MonitorMetrics::new(),
            logger,
        }
    }

    pub fn with_oncall(mut self, oncall: Arc<dyn OnCallSource>) -> Self {
        self.oncall = Some(oncall);
        self
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Last computed overall status
    pub fn current(&self, service_id: ServiceId) -> OverallStatus {
        self.states
            .get(&service_id)
            .map(|s| s.status)
            .unwrap_or(OverallStatus::Passing)
    }

    /// Compute a service's status from its checks without recording it
    pub async fn evaluate(
        &self,
        service_id: ServiceId,
    ) -> Result<(OverallStatus, Vec<FailingCheck>), StoreError> {
        let checks = self.store.checks_for_service(service_id).await?;
        self.roll_up(checks).await
    }

    /// Status of an instance from its own checks
    pub async fn evaluate_instance(
        &self,
        instance_id: InstanceId,
    ) -> Result<(OverallStatus, Vec<FailingCheck>), StoreError> {
        let checks = self.store.checks_for_instance(instance_id).await?;
        self.roll_up(checks).await
    }

    async fn roll_up(
        &self,
        checks: Vec<StatusCheck>,
    ) -> Result<(OverallStatus, Vec<FailingCheck>), StoreError> {
        let mut status = OverallStatus::Passing;
        let mut failing = Vec::new();

        for check in checks.into_iter().filter(|c| c.active) {
            if self.debounce.effective(check.id) != EffectiveStatus::Failing {
                continue;
            }
            status = status.max(OverallStatus::from(check.importance));
            // A recovery still being debounced leaves passing results on top
            let message = self
                .store
                .recent_results(check.id, MESSAGE_LOOKBACK)
                .await?
                .into_iter()
                .rev()
                .find(|r| !r.succeeded)
                .map(|r| r.message)
                .unwrap_or_default();
            failing.push(FailingCheck {
                check_id: check.id,
                name: check.name,
                importance: check.importance,
                message,
            });
        }

        failing.sort_by(|a, b| b.importance.cmp(&a.importance).then(a.check_id.cmp(&b.check_id)));
        Ok((status, failing))
    }

    /// Recompute a service and emit an alert event if its status changed
    pub async fn recompute(&self, service_id: ServiceId) -> Result<OverallStatus, StoreError> {
        let service = self.store.get_service(service_id).await?;
        let (status, failing) = self.evaluate(service_id).await?;

        let previous = {
            let mut state = self.states.entry(service_id).or_default();
            if state.status == status {
                return Ok(status);
            }
            let previous = state.clone();
            state.status = status;
            state.notified_failing = failing.clone();
            previous
        };

        self.logger.log_service_status_changed(
            service_id,
            &service.name,
            previous.status,
            status,
            failing.len(),
        );
        self.update_failing_gauge();

        if !service.alerts_enabled {
            debug!(service_id, "Alerts disabled, not notifying");
            return Ok(status);
        }

        let recovered = previous
            .notified_failing
            .into_iter()
            .filter(|old| !failing.iter().any(|f| f.check_id == old.check_id))
            .collect();
        let event = AlertEvent {
            service_id,
            service_name: service.name.clone(),
            service_url: service.url.clone(),
            old_status: previous.status,
            new_status: status,
            failing_checks: failing,
            recovered_checks: recovered,
            recipients: self.recipients(&service).await,
            sinks: service.alerts.clone(),
            time: Utc::now(),
        };

        if self.alerts.send(event).await.is_err() {
            warn!(service_id, "Alert channel closed, event dropped");
        }
        Ok(status)
    }

    /// Recompute every service; unchanged services emit nothing.
    /// Returns how many services could not be recomputed.
    pub async fn recompute_all(&self) -> Result<usize, StoreError> {
        let mut failed = 0;
        for service in self.store.list_services().await? {
            if let Err(e) = self.recompute(service.id).await {
                warn!(service_id = service.id, error = %e, "Service recompute failed");
                failed += 1;
            }
        }
        Ok(failed)
    }

    async fn report_health(&self, recomputed: Result<usize, StoreError>) {
        let Some(health) = &self.health else {
            return;
        };
        let state = match recomputed {
            Ok(0) => ComponentHealth::healthy(),
            Ok(failed) => {
                ComponentHealth::degraded(format!("{failed} services failed to recompute"))
            }
            Err(e) => {
                health
                    .set_unhealthy(Component::Store, format!("cannot list services: {e}"))
                    .await;
                ComponentHealth::degraded("service roll-up skipped")
            }
        };
        health.report(Component::Aggregator, state).await;
    }

    /// Recompute the services linked to a check that flipped
    pub async fn handle_change(&self, change: &StatusChange) {
        let services = match self.store.services_for_check(change.check_id).await {
            Ok(services) => services,
            Err(e) => {
                warn!(check_id = change.check_id, error = %e, "Failed to load services for check");
                return;
            }
        };
        for service in services {
            if let Err(e) = self.recompute(service.id).await {
                warn!(service_id = service.id, error = %e, "Service recompute failed");
            }
        }
    }

    async fn recipients(&self, service: &Service) -> Vec<String> {
        let mut recipients = service.users_to_notify.clone();

        if let (Some(oncall), Some(schedule_id)) = (&self.oncall, service.schedule) {
            let shifts = match self.store.get_schedule(schedule_id).await {
                Ok(schedule) => oncall.current_oncall(&schedule, Utc::now()).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match shifts {
                Ok(shifts) => recipients.extend(shifts.into_iter().map(|s| s.name)),
                Err(e) => warn!(service_id = service.id, error = %e, "On-call lookup failed"),
            }
        }

        let mut seen = std::collections::HashSet::new();
        recipients.retain(|r| !r.is_empty() && seen.insert(r.clone()));
        recipients
    }

    fn update_failing_gauge(&self) {
        let failing = self
            .states
            .iter()
            .filter(|s| s.status != OverallStatus::Passing)
            .count();
        self.metrics.set_services_failing(failing as i64);
    }

    /// Process check changes as they arrive and recompute everything on
    /// every `interval` tick
    pub async fn run(
        self: Arc<Self>,
        mut changes: mpsc::Receiver<StatusChange>,
        mut shutdown: broadcast::Receiver<()>,
        interval: Duration,
    ) {
        info!(interval_secs = interval.as_secs(), "Starting service aggregator");
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                maybe_change = changes.recv() => {
                    let Some(change) = maybe_change else {
                        debug!("Status change channel closed");
                        break;
                    };
                    self.handle_change(&change).await;
                }
                _ = ticker.tick() => {
                    let recomputed = self.recompute_all().await;
                    if let Err(e) = &recomputed {
                        warn!(error = %e, "Failed to list services");
                    }
                    self.report_health(recomputed).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down service aggregator");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OnCallError;
    use crate::models::{Importance, OnCallShift, Schedule};
    use crate::store::fixtures::{icmp_check, result, service};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use chrono::DateTime;

    struct Harness {
        store: Arc<InMemoryStore>,
        debounce: Arc<DebounceEngine>,
        aggregator: ServiceAggregator,
        alerts: mpsc::Receiver<AlertEvent>,
    }

    async fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        store.insert_service(service(1)).await.unwrap();
        for (id, importance) in [
            (10, Importance::Warning),
            (11, Importance::Critical),
            (12, Importance::Error),
        ] {
            store.insert_check(icmp_check(id, importance)).await.unwrap();
            store.link_service_check(1, id).await.unwrap();
        }

        let debounce = Arc::new(DebounceEngine::new());
        let (tx, rx) = mpsc::channel(16);
        let aggregator = ServiceAggregator::new(
            store.clone(),
            debounce.clone(),
            tx,
            StructuredLogger::new("test"),
        );
        Harness {
            store,
            debounce,
            aggregator,
            alerts: rx,
        }
    }

    async fn fail(h: &Harness, check_id: u64) {
        let r = result(check_id, Utc::now(), false);
        h.store.append_result(r.clone()).await.unwrap();
        h.debounce.observe(0, &r);
    }

    async fn pass(h: &Harness, check_id: u64) {
        let r = result(check_id, Utc::now(), true);
        h.store.append_result(r.clone()).await.unwrap();
        h.debounce.observe(0, &r);
    }

    #[tokio::test]
    async fn test_worst_importance_wins() {
        let h = harness().await;
        fail(&h, 10).await;
        fail(&h, 12).await;

        assert_eq!(h.aggregator.recompute(1).await.unwrap(), OverallStatus::Error);

        fail(&h, 11).await;
        assert_eq!(h.aggregator.recompute(1).await.unwrap(), OverallStatus::Critical);
    }

    #[tokio::test]
    async fn test_event_on_change_only() {
        let mut h = harness().await;
        fail(&h, 11).await;

        h.aggregator.recompute(1).await.unwrap();
        let event = h.alerts.try_recv().unwrap();
        assert_eq!(event.old_status, OverallStatus::Passing);
        assert_eq!(event.new_status, OverallStatus::Critical);
        assert_eq!(event.failing_checks.len(), 1);
        assert_eq!(event.failing_checks[0].message, "failed");
        assert_eq!(event.sinks, vec!["log"]);

        // Unchanged failing set: no new event
        h.aggregator.recompute(1).await.unwrap();
        assert_eq!(h.aggregator.recompute_all().await.unwrap(), 0);
        assert!(h.alerts.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_recovery_event_lists_recovered_checks() {
        let mut h = harness().await;
        fail(&h, 12).await;
        h.aggregator.recompute(1).await.unwrap();
        h.alerts.try_recv().unwrap();

        pass(&h, 12).await;
        h.aggregator.recompute(1).await.unwrap();
        let event = h.alerts.try_recv().unwrap();
        assert_eq!(event.new_status, OverallStatus::Passing);
        assert!(event.failing_checks.is_empty());
        assert_eq!(event.recovered_checks[0].check_id, 12);
    }

    #[tokio::test]
    async fn test_failing_message_survives_pending_recovery() {
        let h = harness().await;
        fail(&h, 11).await;

        // One pass against a debounce of 2 leaves the check failing
        let r = result(11, Utc::now() + chrono::Duration::seconds(1), true);
        h.store.append_result(r.clone()).await.unwrap();
        assert!(h.debounce.observe(2, &r).is_none());

        let (status, failing) = h.aggregator.evaluate(1).await.unwrap();
        assert_eq!(status, OverallStatus::Critical);
        assert_eq!(failing[0].check_id, 11);
        assert_eq!(failing[0].message, "failed");
    }

    #[tokio::test]
    async fn test_alerts_disabled_tracks_status_silently() {
        let mut h = harness().await;
        let mut svc = service(1);
        svc.alerts_enabled = false;
        h.store.update_service(svc).await.unwrap();

        fail(&h, 10).await;
        assert_eq!(h.aggregator.recompute(1).await.unwrap(), OverallStatus::Warning);
        assert_eq!(h.aggregator.current(1), OverallStatus::Warning);
        assert!(h.alerts.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_inactive_checks_ignored() {
        let h = harness().await;
        fail(&h, 11).await;
        let mut check = icmp_check(11, Importance::Critical);
        check.active = false;
        h.store.update_check(check).await.unwrap();

        assert_eq!(h.aggregator.recompute(1).await.unwrap(), OverallStatus::Passing);
    }

    struct FixedOnCall;

    #[async_trait]
    impl OnCallSource for FixedOnCall {
        async fn current_oncall(
            &self,
            _schedule: &Schedule,
            now: DateTime<Utc>,
        ) -> Result<Vec<OnCallShift>, OnCallError> {
            Ok(vec![OnCallShift {
                name: "alice@example.com".to_string(),
                start: now,
                end: now,
            }])
        }
    }

    #[tokio::test]
    async fn test_oncall_added_to_recipients() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_schedule(Schedule {
                id: 5,
                name: "Main".to_string(),
                feed_url: "http://cal".to_string(),
            })
            .await
            .unwrap();
        let mut svc = service(1);
        svc.schedule = Some(5);
        store.insert_service(svc).await.unwrap();
        store.insert_check(icmp_check(1, Importance::Error)).await.unwrap();
        store.link_service_check(1, 1).await.unwrap();

        let debounce = Arc::new(DebounceEngine::new());
        let (tx, mut rx) = mpsc::channel(4);
        let aggregator = ServiceAggregator::new(
            store.clone(),
            debounce.clone(),
            tx,
            StructuredLogger::new("test"),
        )
        .with_oncall(Arc::new(FixedOnCall));

        debounce.observe(0, &result(1, Utc::now(), false));
        aggregator.recompute(1).await.unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(
            event.recipients,
            vec!["ops@example.com".to_string(), "alice@example.com".to_string()]
        );
    }

    #[tokio::test]
    async fn test_handle_change_recomputes_linked_services() {
        let mut h = harness().await;
        let r = result(11, Utc::now(), false);
        h.store.append_result(r.clone()).await.unwrap();
        let change = h.debounce.observe(0, &r).unwrap();

        h.aggregator.handle_change(&change).await;
        assert_eq!(h.alerts.try_recv().unwrap().new_status, OverallStatus::Critical);
    }
}
