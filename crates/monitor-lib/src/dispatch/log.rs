//! Sink that writes alerts to the structured log

use super::{AlertEvent, NotificationSink};
use crate::error::DispatchError;
use crate::models::OverallStatus;
use async_trait::async_trait;
use tracing::{info, warn};

pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(name: String) -> Self {
        Self { name }
    }
}

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, event: &AlertEvent) -> Result<(), DispatchError> {
        let failing: Vec<String> = event
            .failing_checks
            .iter()
            .map(|c| format!("{}: {}", c.name, c.message))
            .collect();

        if event.new_status == OverallStatus::Passing {
            info!(
                event = "alert",
                sink = %self.name,
                service = %event.service_name,
                old = %event.old_status,
                new = %event.new_status,
                recipients = ?event.recipients,
                "{}",
                event.summary()
            );
        } else {
            warn!(
                event = "alert",
                sink = %self.name,
                service = %event.service_name,
                old = %event.old_status,
                new = %event.new_status,
                failing = ?failing,
                recipients = ?event.recipients,
                "{}",
                event.summary()
            );
        }
        Ok(())
    }
}
