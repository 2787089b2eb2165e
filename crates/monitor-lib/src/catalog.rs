//! Declarative catalog of checks, services, instances and schedules

use crate::error::CatalogError;
use crate::models::{CheckId, Instance, InstanceId, Schedule, Service, StatusCheck};
use crate::store::Store;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogService {
    #[serde(flatten)]
    pub service: Service,
    #[serde(default)]
    pub status_checks: Vec<CheckId>,
    #[serde(default)]
    pub instances: Vec<InstanceId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogInstance {
    #[serde(flatten)]
    pub instance: Instance,
    #[serde(default)]
    pub status_checks: Vec<CheckId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub schedules: Vec<Schedule>,
    #[serde(default)]
    pub checks: Vec<StatusCheck>,
    #[serde(default)]
    pub instances: Vec<CatalogInstance>,
    #[serde(default)]
    pub services: Vec<CatalogService>,
}

impl Catalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Insert every entity and link into the store.
    ///
    /// Entities are inserted before links so link targets always exist.
    pub async fn apply(&self, store: &dyn Store) -> Result<(), CatalogError> {
        for schedule in &self.schedules {
            store.insert_schedule(schedule.clone()).await?;
        }
        for check in &self.checks {
            store.insert_check(check.clone()).await?;
        }
        for entry in &self.instances {
            store.insert_instance(entry.instance.clone()).await?;
        }
        for entry in &self.services {
            store.insert_service(entry.service.clone()).await?;
        }

        for entry in &self.instances {
            for &check in &entry.status_checks {
                store.link_instance_check(entry.instance.id, check).await?;
            }
        }
        for entry in &self.services {
            for &check in &entry.status_checks {
                store.link_service_check(entry.service.id, check).await?;
            }
            for &instance in &entry.instances {
                store.link_service_instance(entry.service.id, instance).await?;
            }
        }

        info!(
            checks = self.checks.len(),
            services = self.services.len(),
            instances = self.instances.len(),
            schedules = self.schedules.len(),
            "Catalog applied"
        );
        Ok(())
    }
}
