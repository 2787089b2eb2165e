//! Durable-store interface and the in-memory implementation
//!
//! Entities are plain CRUD records; the service/instance/check relations
//! are explicit link tables with referential integrity enforced here.

use crate::error::StoreError;
use crate::models::{
    CheckId, Instance, InstanceId, Schedule, ScheduleId, Service, ServiceId, StatusCheck,
    StatusCheckResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

/// Results kept per check before the oldest are dropped
pub const DEFAULT_RESULT_RETENTION: usize = 10_000;

/// Half-open time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        time >= self.start && time < self.end
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn list_checks(&self) -> Result<Vec<StatusCheck>, StoreError>;
    async fn get_check(&self, id: CheckId) -> Result<StatusCheck, StoreError>;
    async fn insert_check(&self, check: StatusCheck) -> Result<(), StoreError>;
    async fn update_check(&self, check: StatusCheck) -> Result<(), StoreError>;
    async fn delete_check(&self, id: CheckId) -> Result<(), StoreError>;

    /// Append one result; results are kept ordered by time
    async fn append_result(&self, result: StatusCheckResult) -> Result<(), StoreError>;
    /// Results for a check ordered by time, optionally limited to a range
    async fn results(
        &self,
        check_id: CheckId,
        range: Option<TimeRange>,
    ) -> Result<Vec<StatusCheckResult>, StoreError>;
    /// The last `limit` results, oldest first
    async fn recent_results(
        &self,
        check_id: CheckId,
        limit: usize,
    ) -> Result<Vec<StatusCheckResult>, StoreError>;

    async fn list_services(&self) -> Result<Vec<Service>, StoreError>;
    async fn get_service(&self, id: ServiceId) -> Result<Service, StoreError>;
    async fn insert_service(&self, service: Service) -> Result<(), StoreError>;
    async fn update_service(&self, service: Service) -> Result<(), StoreError>;
    async fn delete_service(&self, id: ServiceId) -> Result<(), StoreError>;

    async fn list_instances(&self) -> Result<Vec<Instance>, StoreError>;
    async fn get_instance(&self, id: InstanceId) -> Result<Instance, StoreError>;
    async fn insert_instance(&self, instance: Instance) -> Result<(), StoreError>;
    async fn delete_instance(&self, id: InstanceId) -> Result<(), StoreError>;

    async fn list_schedules(&self) -> Result<Vec<Schedule>, StoreError>;
    async fn get_schedule(&self, id: ScheduleId) -> Result<Schedule, StoreError>;
    async fn insert_schedule(&self, schedule: Schedule) -> Result<(), StoreError>;

    async fn link_service_check(&self, service: ServiceId, check: CheckId)
        -> Result<(), StoreError>;
    async fn unlink_service_check(
        &self,
        service: ServiceId,
        check: CheckId,
    ) -> Result<(), StoreError>;
    async fn link_instance_check(
        &self,
        instance: InstanceId,
        check: CheckId,
    ) -> Result<(), StoreError>;
    async fn link_service_instance(
        &self,
        service: ServiceId,
        instance: InstanceId,
    ) -> Result<(), StoreError>;

    async fn checks_for_service(&self, service: ServiceId)
        -> Result<Vec<StatusCheck>, StoreError>;
    async fn checks_for_instance(
        &self,
        instance: InstanceId,
    ) -> Result<Vec<StatusCheck>, StoreError>;
    async fn services_for_check(&self, check: CheckId) -> Result<Vec<Service>, StoreError>;
    async fn instances_for_service(
        &self,
        service: ServiceId,
    ) -> Result<Vec<Instance>, StoreError>;
}

#[derive(Default)]
struct Tables {
    checks: BTreeMap<CheckId, StatusCheck>,
    results: HashMap<CheckId, Vec<StatusCheckResult>>,
    services: BTreeMap<ServiceId, Service>,
    instances: BTreeMap<InstanceId, Instance>,
    schedules: BTreeMap<ScheduleId, Schedule>,
    service_checks: BTreeSet<(ServiceId, CheckId)>,
    instance_checks: BTreeSet<(InstanceId, CheckId)>,
    service_instances: BTreeSet<(ServiceId, InstanceId)>,
}

impl Tables {
    fn require_check(&self, from: &'static str, id: CheckId) -> Result<(), StoreError> {
        if self.checks.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::DanglingLink {
                from,
                entity: "check",
                id,
            })
        }
    }
}

/// Store kept entirely in process memory
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    result_retention: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            result_retention: DEFAULT_RESULT_RETENTION,
        }
    }

    /// Set how many results are retained per check
    pub fn with_result_retention(mut self, retention: usize) -> Self {
        self.result_retention = retention.max(1);
        self
    }
}

fn not_found(entity: &'static str, id: u64) -> StoreError {
    StoreError::NotFound { entity, id }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn list_checks(&self) -> Result<Vec<StatusCheck>, StoreError> {
        Ok(self.tables.read().await.checks.values().cloned().collect())
    }

    async fn get_check(&self, id: CheckId) -> Result<StatusCheck, StoreError> {
        self.tables
            .read()
            .await
            .checks
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("check", id))
    }

    async fn insert_check(&self, check: StatusCheck) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.checks.contains_key(&check.id) {
            return Err(StoreError::Conflict {
                entity: "check",
                id: check.id,
            });
        }
        tables.checks.insert(check.id, check);
        Ok(())
    }

    async fn update_check(&self, check: StatusCheck) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        match tables.checks.get_mut(&check.id) {
            Some(existing) => {
                *existing = check;
                Ok(())
            }
            None => Err(not_found("check", check.id)),
        }
    }

    async fn delete_check(&self, id: CheckId) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.checks.remove(&id).ok_or_else(|| not_found("check", id))?;
        tables.results.remove(&id);
        tables.service_checks.retain(|(_, c)| *c != id);
        tables.instance_checks.retain(|(_, c)| *c != id);
        debug!(check_id = id, "Deleted check with its results and links");
        Ok(())
    }

    async fn append_result(&self, result: StatusCheckResult) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.checks.contains_key(&result.check_id) {
            return Err(not_found("check", result.check_id));
        }
        let retention = self.result_retention;
        let log = tables.results.entry(result.check_id).or_default();
        let position = log.partition_point(|r| r.time <= result.time);
        log.insert(position, result);
        if log.len() > retention {
            let excess = log.len() - retention;
            log.drain(0..excess);
        }
        Ok(())
    }

    async fn results(
        &self,
        check_id: CheckId,
        range: Option<TimeRange>,
    ) -> Result<Vec<StatusCheckResult>, StoreError> {
        let tables = self.tables.read().await;
        if !tables.checks.contains_key(&check_id) {
            return Err(not_found("check", check_id));
        }
        let log = tables.results.get(&check_id).map(Vec::as_slice).unwrap_or(&[]);
        Ok(match range {
            Some(range) => log.iter().filter(|r| range.contains(r.time)).cloned().collect(),
            None => log.to_vec(),
        })
    }

    async fn recent_results(
        &self,
        check_id: CheckId,
        limit: usize,
    ) -> Result<Vec<StatusCheckResult>, StoreError> {
        let tables = self.tables.read().await;
        if !tables.checks.contains_key(&check_id) {
            return Err(not_found("check", check_id));
        }
        let log = tables.results.get(&check_id).map(Vec::as_slice).unwrap_or(&[]);
        let start = log.len().saturating_sub(limit);
        Ok(log[start..].to_vec())
    }

    async fn list_services(&self) -> Result<Vec<Service>, StoreError> {
        Ok(self.tables.read().await.services.values().cloned().collect())
    }

    async fn get_service(&self, id: ServiceId) -> Result<Service, StoreError> {
        self.tables
            .read()
            .await
            .services
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("service", id))
    }

    async fn insert_service(&self, service: Service) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.services.contains_key(&service.id) {
            return Err(StoreError::Conflict {
                entity: "service",
                id: service.id,
            });
        }
        if let Some(schedule) = service.schedule {
            if !tables.schedules.contains_key(&schedule) {
                return Err(StoreError::DanglingLink {
                    from: "service",
                    entity: "schedule",
                    id: schedule,
                });
            }
        }
        tables.services.insert(service.id, service);
        Ok(())
    }

    async fn update_service(&self, service: Service) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        match tables.services.get_mut(&service.id) {
            Some(existing) => {
                *existing = service;
                Ok(())
            }
            None => Err(not_found("service", service.id)),
        }
    }

    async fn delete_service(&self, id: ServiceId) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.services.remove(&id).ok_or_else(|| not_found("service", id))?;
        tables.service_checks.retain(|(s, _)| *s != id);
        tables.service_instances.retain(|(s, _)| *s != id);
        Ok(())
    }

    async fn list_instances(&self) -> Result<Vec<Instance>, StoreError> {
        Ok(self.tables.read().await.instances.values().cloned().collect())
    }

    async fn get_instance(&self, id: InstanceId) -> Result<Instance, StoreError> {
        self.tables
            .read()
            .await
            .instances
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("instance", id))
    }

    async fn insert_instance(&self, instance: Instance) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.instances.contains_key(&instance.id) {
            return Err(StoreError::Conflict {
                entity: "instance",
                id: instance.id,
            });
        }
        tables.instances.insert(instance.id, instance);
        Ok(())
    }

    async fn delete_instance(&self, id: InstanceId) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.instances.remove(&id).ok_or_else(|| not_found("instance", id))?;
        tables.instance_checks.retain(|(i, _)| *i != id);
        tables.service_instances.retain(|(_, i)| *i != id);
        Ok(())
    }

    async fn list_schedules(&self) -> Result<Vec<Schedule>, StoreError> {
        Ok(self.tables.read().await.schedules.values().cloned().collect())
    }

    async fn get_schedule(&self, id: ScheduleId) -> Result<Schedule, StoreError> {
        self.tables
            .read()
            .await
            .schedules
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("schedule", id))
    }

    async fn insert_schedule(&self, schedule: Schedule) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.schedules.contains_key(&schedule.id) {
            return Err(StoreError::Conflict {
                entity: "schedule",
                id: schedule.id,
            });
        }
        tables.schedules.insert(schedule.id, schedule);
        Ok(())
    }

    async fn link_service_check(
        &self,
        service: ServiceId,
        check: CheckId,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.services.contains_key(&service) {
            return Err(not_found("service", service));
        }
        tables.require_check("service", check)?;
        tables.service_checks.insert((service, check));
        Ok(())
    }

    async fn unlink_service_check(
        &self,
        service: ServiceId,
        check: CheckId,
    ) -> Result<(), StoreError> {
        self.tables.write().await.service_checks.remove(&(service, check));
        Ok(())
    }

    async fn link_instance_check(
        &self,
        instance: InstanceId,
        check: CheckId,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.instances.contains_key(&instance) {
            return Err(not_found("instance", instance));
        }
        tables.require_check("instance", check)?;
        tables.instance_checks.insert((instance, check));
        Ok(())
    }

    async fn link_service_instance(
        &self,
        service: ServiceId,
        instance: InstanceId,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.services.contains_key(&service) {
            return Err(not_found("service", service));
        }
        if !tables.instances.contains_key(&instance) {
            return Err(StoreError::DanglingLink {
                from: "service",
                entity: "instance",
                id: instance,
            });
        }
        tables.service_instances.insert((service, instance));
        Ok(())
    }

    async fn checks_for_service(
        &self,
        service: ServiceId,
    ) -> Result<Vec<StatusCheck>, StoreError> {
        let tables = self.tables.read().await;
        if !tables.services.contains_key(&service) {
            return Err(not_found("service", service));
        }
        Ok(tables
            .service_checks
            .range((service, CheckId::MIN)..=(service, CheckId::MAX))
            .filter_map(|(_, c)| tables.checks.get(c).cloned())
            .collect())
    }

    async fn checks_for_instance(
        &self,
        instance: InstanceId,
    ) -> Result<Vec<StatusCheck>, StoreError> {
        let tables = self.tables.read().await;
        if !tables.instances.contains_key(&instance) {
            return Err(not_found("instance", instance));
        }
        Ok(tables
            .instance_checks
            .range((instance, CheckId::MIN)..=(instance, CheckId::MAX))
            .filter_map(|(_, c)| tables.checks.get(c).cloned())
            .collect())
    }

    async fn services_for_check(&self, check: CheckId) -> Result<Vec<Service>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .service_checks
            .iter()
            .filter(|(_, c)| *c == check)
            .filter_map(|(s, _)| tables.services.get(s).cloned())
            .collect())
    }

    async fn instances_for_service(
        &self,
        service: ServiceId,
    ) -> Result<Vec<Instance>, StoreError> {
        let tables = self.tables.read().await;
        if !tables.services.contains_key(&service) {
            return Err(not_found("service", service));
        }
        Ok(tables
            .service_instances
            .range((service, InstanceId::MIN)..=(service, InstanceId::MAX))
            .filter_map(|(_, i)| tables.instances.get(i).cloned())
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::models::*;
    use chrono::{DateTime, Utc};

    pub fn icmp_check(id: CheckId, importance: Importance) -> StatusCheck {
        StatusCheck {
            id,
            name: format!("check-{id}"),
            frequency: 1,
            importance,
            active: true,
            debounce: 0,
            kind: CheckKind::Icmp(IcmpCheck {
                host: "127.0.0.1".to_string(),
                timeout_secs: 1,
            }),
        }
    }

    pub fn service(id: ServiceId) -> Service {
        Service {
            id,
            name: format!("service-{id}"),
            url: None,
            users_to_notify: vec!["ops@example.com".to_string()],
            alerts: vec!["log".to_string()],
            alerts_enabled: true,
            schedule: None,
        }
    }

    pub fn result(check_id: CheckId, time: DateTime<Utc>, succeeded: bool) -> StatusCheckResult {
        StatusCheckResult {
            check_id,
            time,
            succeeded,
            raw_data: serde_json::Value::Null,
            error: (!succeeded).then(|| "failed".to_string()),
            message: if succeeded { "ok" } else { "failed" }.to_string(),
            duration_ms: 1,
        }
    }
}
