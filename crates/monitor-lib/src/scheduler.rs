//! Check scheduling loop
//!
//! Runs every active check once per `frequency` minutes. Evaluations run
//! concurrently up to a global limit, each bounded by a timeout. A check
//! whose previous run is still in flight skips its turn instead of
//! queueing behind it. An evaluation that panics is recorded as a
//! failed result and the check stays scheduled.

use crate::debounce::{DebounceEngine, StatusChange};
use crate::error::CheckError;
use crate::evaluator::{CheckOutcome, Evaluate};
use crate::health::{Component, ComponentHealth, HealthRegistry};
use crate::models::{CheckId, StatusCheck, StatusCheckResult};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::store::Store;
use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};

/// Results replayed per check when rebuilding debounce state
const RESTORE_HISTORY: usize = 100;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often due checks are looked for (default: 1 second)
    pub tick: Duration,
    /// Maximum evaluations in flight (default: 32)
    pub max_concurrent: usize,
    /// Upper bound on a single evaluation (default: 30 seconds)
    pub evaluation_timeout: Duration,
    /// Maximum random delay before a newly seen check first runs
    pub jitter: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            max_concurrent: 32,
            evaluation_timeout: Duration::from_secs(30),
            jitter: Duration::from_secs(10),
        }
    }
}

/// What went wrong with a check's most recent turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunIssue {
    Overlap,
    TimedOut,
    Panicked,
}

#[derive(Debug)]
struct Slot {
    next_due: DateTime<Utc>,
    active: bool,
    running: Arc<AtomicBool>,
    last_issue: Option<RunIssue>,
}

/// Holds a slot's in-flight flag for one run and clears it on drop,
/// including when the run's task unwinds or is cancelled.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Scheduler {
    store: Arc<dyn Store>,
    evaluator: Arc<dyn Evaluate>,
    debounce: Arc<DebounceEngine>,
    changes: mpsc::Sender<StatusChange>,
    config: SchedulerConfig,
    permits: Arc<Semaphore>,
    slots: DashMap<CheckId, Slot>,
    health: Option<HealthRegistry>,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        evaluator: Arc<dyn Evaluate>,
        debounce: Arc<DebounceEngine>,
        changes: mpsc::Sender<StatusChange>,
        config: SchedulerConfig,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            store,
            evaluator,
            debounce,
            changes,
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
            slots: DashMap::new(),
            health: None,
            metrics: MonitorMetrics::new(),
            logger,
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Rebuild debounce state from stored results
    pub async fn restore_state(&self) -> Result<()> {
        for check in self.store.list_checks().await? {
            let history = self.store.recent_results(check.id, RESTORE_HISTORY).await?;
            if !history.is_empty() {
                self.debounce.restore(check.id, check.debounce, &history);
            }
        }
        Ok(())
    }

    /// Start every due check; returns handles of the spawned runs
    pub async fn tick(self: &Arc<Self>, now: DateTime<Utc>) -> Result<Vec<JoinHandle<()>>> {
        let checks = self.store.list_checks().await?;
        let seen: HashSet<CheckId> = checks.iter().map(|c| c.id).collect();
        self.slots.retain(|id, _| {
            let keep = seen.contains(id);
            if !keep {
                self.debounce.forget(*id);
            }
            keep
        });

        let active = checks.iter().filter(|c| c.active).count();
        self.metrics.set_checks_scheduled(active as i64);

        let mut handles = Vec::new();
        for check in checks {
            if let Some(in_flight) = self.claim(&check, now) {
                let scheduler = Arc::clone(self);
                handles.push(tokio::spawn(async move {
                    let _in_flight = in_flight;
                    scheduler.execute(check).await;
                }));
            }
        }
        Ok(handles)
    }

    /// Decide whether `check` runs now, updating its slot
    fn claim(&self, check: &StatusCheck, now: DateTime<Utc>) -> Option<InFlight> {
        let mut slot = self.slots.entry(check.id).or_insert_with(|| Slot {
            next_due: now + self.initial_delay(),
            active: check.active,
            running: Arc::new(AtomicBool::new(false)),
            last_issue: None,
        });

        if !check.active {
            slot.active = false;
            return None;
        }
        if !slot.active {
            // Reactivated: wait a full period before the next run
            slot.active = true;
            slot.next_due = now + check.frequency_duration();
            return None;
        }
        if now < slot.next_due {
            return None;
        }

        slot.next_due = now + check.frequency_duration();
        if slot.running.swap(true, Ordering::SeqCst) {
            debug!(check_id = check.id, "Previous run still in flight, skipping");
            self.metrics.inc_overlap_skips();
            slot.last_issue = Some(RunIssue::Overlap);
            return None;
        }
        Some(InFlight(Arc::clone(&slot.running)))
    }

    fn initial_delay(&self) -> chrono::Duration {
        let max_ms = self.config.jitter.as_millis() as i64;
        if max_ms == 0 {
            return chrono::Duration::zero();
        }
        chrono::Duration::milliseconds(rand::thread_rng().gen_range(0..max_ms))
    }

    /// Evaluate one check and record the result
    pub async fn execute(&self, check: StatusCheck) {
        let Ok(_permit) = self.permits.clone().acquire_owned().await else {
            return;
        };

        let time = Utc::now();
        let start = Instant::now();
        let (outcome, issue) = self.evaluate_isolated(&check).await;
        let elapsed = start.elapsed();
        if let Some(mut slot) = self.slots.get_mut(&check.id) {
            slot.last_issue = issue;
        }

        let result = StatusCheckResult {
            check_id: check.id,
            time,
            succeeded: outcome.succeeded,
            raw_data: outcome.raw,
            error: outcome.error,
            message: outcome.message,
            duration_ms: elapsed.as_millis() as u64,
        };

        self.metrics
            .observe_evaluation(check.kind.label(), result.succeeded, elapsed.as_secs_f64());
        self.logger.log_check_evaluated(
            check.id,
            &check.name,
            check.kind.label(),
            result.succeeded,
            result.duration_ms,
            &result.message,
        );

        if let Err(e) = self.store.append_result(result.clone()).await {
            warn!(check_id = check.id, error = %e, "Failed to store check result");
        }

        if let Some(change) = self.debounce.observe(check.debounce, &result) {
            self.logger
                .log_check_status_changed(check.id, &check.name, change.old, change.new);
            if self.changes.send(change).await.is_err() {
                warn!(check_id = check.id, "Status change channel closed");
            }
        }
    }

    /// Run the evaluator on its own task so a panic or a hang costs only
    /// this check's result
    async fn evaluate_isolated(&self, check: &StatusCheck) -> (CheckOutcome, Option<RunIssue>) {
        let evaluator = Arc::clone(&self.evaluator);
        let owned = check.clone();
        let mut task = tokio::spawn(async move { evaluator.evaluate(&owned).await });

        match tokio::time::timeout(self.config.evaluation_timeout, &mut task).await {
            Ok(Ok(outcome)) => (outcome, None),
            Ok(Err(err)) => {
                let reason = panic_reason(err);
                warn!(check_id = check.id, reason = %reason, "Evaluation panicked");
                (
                    CheckOutcome::from_error(&CheckError::EvaluationPanicked(reason)),
                    Some(RunIssue::Panicked),
                )
            }
            Err(_) => {
                task.abort();
                self.metrics.inc_evaluation_timeouts();
                (
                    CheckOutcome::from_error(&CheckError::EvaluationTimeout(
                        self.config.evaluation_timeout,
                    )),
                    Some(RunIssue::TimedOut),
                )
            }
        }
    }

    /// Scheduler health from each check's latest turn
    pub fn health_snapshot(&self) -> ComponentHealth {
        let (mut overlaps, mut timeouts, mut panics) = (0, 0, 0);
        for slot in self.slots.iter() {
            match slot.last_issue {
                Some(RunIssue::Overlap) => overlaps += 1,
                Some(RunIssue::TimedOut) => timeouts += 1,
                Some(RunIssue::Panicked) => panics += 1,
                None => {}
            }
        }
        ComponentHealth::from_problems(&[
            (timeouts, "evaluations timed out"),
            (panics, "evaluations panicked"),
            (overlaps, "checks skipping overlapping runs"),
        ])
    }

    /// Tick until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            tick_ms = self.config.tick.as_millis() as u64,
            max_concurrent = self.config.max_concurrent,
            "Starting check scheduler"
        );

        let mut ticker = interval(self.config.tick);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick(Utc::now()).await {
                        Ok(started) => {
                            if !started.is_empty() {
                                debug!(started = started.len(), "Checks dispatched");
                            }
                            if let Some(health) = &self.health {
                                health.set_healthy(Component::Store).await;
                                health.report(Component::Scheduler, self.health_snapshot()).await;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "Scheduler tick failed");
                            if let Some(health) = &self.health {
                                health
                                    .set_unhealthy(Component::Store, format!("cannot list checks: {e}"))
                                    .await;
                                health.set_degraded(Component::Scheduler, "tick failed").await;
                            }
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down check scheduler");
                    break;
                }
            }
        }
    }
}

fn panic_reason(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

/// Builder for the scheduler
pub struct SchedulerBuilder {
    store: Option<Arc<dyn Store>>,
    evaluator: Option<Arc<dyn Evaluate>>,
    debounce: Option<Arc<DebounceEngine>>,
    config: SchedulerConfig,
    logger: Option<StructuredLogger>,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            evaluator: None,
            debounce: None,
            config: SchedulerConfig::default(),
            logger: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn evaluator(mut self, evaluator: Arc<dyn Evaluate>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn debounce(mut self, debounce: Arc<DebounceEngine>) -> Self {
        self.debounce = Some(debounce);
        self
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn evaluation_timeout(mut self, timeout: Duration) -> Self {
        self.config.evaluation_timeout = timeout;
        self
    }

    pub fn max_concurrent(mut self, limit: usize) -> Self {
        self.config.max_concurrent = limit;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Build the scheduler and the channel its status changes arrive on
    pub fn build(self, buffer: usize) -> Result<(Scheduler, mpsc::Receiver<StatusChange>)> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("Store is required"))?;
        let evaluator = self
            .evaluator
            .ok_or_else(|| anyhow::anyhow!("Evaluator is required"))?;
        let debounce = self.debounce.unwrap_or_default();
        let logger = self
            .logger
            .unwrap_or_else(|| StructuredLogger::new("status-monitor"));

        let (tx, rx) = mpsc::channel(buffer.max(1));
        let scheduler = Scheduler::new(store, evaluator, debounce, tx, self.config, logger);
        Ok((scheduler, rx))
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EffectiveStatus, Importance};
    use crate::store::fixtures::{icmp_check, result};
    use crate::store::InMemoryStore;
    use crate::health::ComponentStatus;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    /// Evaluator that sleeps before answering
    struct SlowEvaluator {
        delay: Duration,
        succeed: bool,
        calls: AtomicUsize,
    }

    impl SlowEvaluator {
        fn new(delay: Duration, succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                delay,
                succeed,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Evaluate for SlowEvaluator {
        async fn evaluate(&self, _check: &StatusCheck) -> CheckOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.succeed {
                CheckOutcome::success("ok", serde_json::Value::Null)
            } else {
                CheckOutcome::failure("down", serde_json::Value::Null)
            }
        }
    }

    /// Panics on its first call, answers normally afterwards
    struct PanicOnce {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Evaluate for PanicOnce {
        async fn evaluate(&self, _check: &StatusCheck) -> CheckOutcome {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("backend client poisoned");
            }
            CheckOutcome::success("ok", serde_json::Value::Null)
        }
    }

    /// Per-check delays; tracks how many evaluations run at once
    struct TrackingEvaluator {
        delays: HashMap<CheckId, Duration>,
        default_delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl TrackingEvaluator {
        fn new(default_delay: Duration, delays: &[(CheckId, Duration)]) -> Arc<Self> {
            Arc::new(Self {
                delays: delays.iter().copied().collect(),
                default_delay,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Evaluate for TrackingEvaluator {
        async fn evaluate(&self, check: &StatusCheck) -> CheckOutcome {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let delay = self.delays.get(&check.id).copied().unwrap_or(self.default_delay);
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            CheckOutcome::success("ok", serde_json::Value::Null)
        }
    }

    async fn scheduler_for(
        evaluator: Arc<dyn Evaluate>,
        config: SchedulerConfig,
        check_ids: &[CheckId],
    ) -> (Arc<Scheduler>, Arc<InMemoryStore>, mpsc::Receiver<StatusChange>) {
        let store = Arc::new(InMemoryStore::new());
        for id in check_ids {
            store.insert_check(icmp_check(*id, Importance::Error)).await.unwrap();
        }

        let (scheduler, rx) = SchedulerBuilder::new()
            .store(store.clone())
            .evaluator(evaluator)
            .config(SchedulerConfig {
                jitter: Duration::ZERO,
                ..config
            })
            .build(16)
            .unwrap();
        (Arc::new(scheduler), store, rx)
    }

    async fn scheduler(
        evaluator: Arc<SlowEvaluator>,
        timeout: Duration,
    ) -> (Arc<Scheduler>, Arc<InMemoryStore>, mpsc::Receiver<StatusChange>) {
        let config = SchedulerConfig {
            evaluation_timeout: timeout,
            ..SchedulerConfig::default()
        };
        scheduler_for(evaluator, config, &[1]).await
    }

    async fn join(handles: Vec<JoinHandle<()>>) {
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.tick, Duration::from_secs(1));
        assert_eq!(config.max_concurrent, 32);
        assert_eq!(config.evaluation_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_builder_requires_evaluator() {
        let result = SchedulerBuilder::new()
            .store(Arc::new(InMemoryStore::new()))
            .build(1);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_due_check_runs_and_records_result() {
        let evaluator = SlowEvaluator::new(Duration::ZERO, false);
        let (scheduler, store, mut rx) = scheduler(evaluator.clone(), Duration::from_secs(5)).await;

        let now = Utc::now();
        join(scheduler.tick(now).await.unwrap()).await;

        let results = store.recent_results(1, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(!results[0].succeeded);
        assert_eq!(results[0].message, "down");

        let change = rx.try_recv().unwrap();
        assert_eq!(change.new, EffectiveStatus::Failing);

        // Not due again until a full period has passed
        assert!(scheduler.tick(now + chrono::Duration::seconds(30)).await.unwrap().is_empty());
        join(scheduler.tick(now + chrono::Duration::minutes(1)).await.unwrap()).await;
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_records_single_failure() {
        let evaluator = SlowEvaluator::new(Duration::from_secs(5), true);
        let (scheduler, store, _rx) = scheduler(evaluator, Duration::from_millis(50)).await;

        join(scheduler.tick(Utc::now()).await.unwrap()).await;

        let results = store.recent_results(1, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(!results[0].succeeded);
        assert_eq!(results[0].message, "Evaluation timed out after 50ms");
        assert!(results[0].error.is_some());

        let health = scheduler.health_snapshot();
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(health.message.as_deref(), Some("1 evaluations timed out"));
    }

    #[tokio::test]
    async fn test_panicking_evaluation_records_failure_and_stays_scheduled() {
        let evaluator = Arc::new(PanicOnce {
            calls: AtomicUsize::new(0),
        });
        let (scheduler, store, _rx) =
            scheduler_for(evaluator.clone(), SchedulerConfig::default(), &[1]).await;

        let now = Utc::now();
        join(scheduler.tick(now).await.unwrap()).await;

        let results = store.recent_results(1, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(!results[0].succeeded);
        assert_eq!(
            results[0].message,
            "Evaluation panicked: backend client poisoned"
        );
        assert_eq!(scheduler.health_snapshot().status, ComponentStatus::Degraded);

        // Next period runs normally
        join(scheduler.tick(now + chrono::Duration::minutes(1)).await.unwrap()).await;
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 2);

        let results = store.recent_results(1, 10).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[1].succeeded);
        assert_eq!(scheduler.health_snapshot().status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_hung_check_does_not_block_others() {
        let evaluator = TrackingEvaluator::new(Duration::ZERO, &[(1, Duration::from_secs(60))]);
        let config = SchedulerConfig {
            evaluation_timeout: Duration::from_secs(120),
            ..SchedulerConfig::default()
        };
        let (scheduler, store, _rx) = scheduler_for(evaluator, config, &[1, 2]).await;

        let now = Utc::now();
        let mut first = scheduler.tick(now).await.unwrap();
        assert_eq!(first.len(), 2);
        // Handles follow check id order
        let fast = first.pop().unwrap();
        tokio::time::timeout(Duration::from_secs(5), fast)
            .await
            .expect("fast check blocked behind the hung one")
            .unwrap();
        assert_eq!(store.recent_results(2, 1).await.unwrap().len(), 1);
        assert!(store.recent_results(1, 1).await.unwrap().is_empty());

        // Next period: the hung check skips its turn, the other runs again
        let next = scheduler.tick(now + chrono::Duration::minutes(1)).await.unwrap();
        assert_eq!(next.len(), 1);
        join(next).await;
        assert_eq!(store.recent_results(2, 10).await.unwrap().len(), 2);

        let health = scheduler.health_snapshot();
        assert_eq!(
            health.message.as_deref(),
            Some("1 checks skipping overlapping runs")
        );
    }

    #[tokio::test]
    async fn test_concurrent_evaluations_capped() {
        let evaluator = TrackingEvaluator::new(Duration::from_millis(50), &[]);
        let config = SchedulerConfig {
            max_concurrent: 2,
            ..SchedulerConfig::default()
        };
        let (scheduler, store, _rx) =
            scheduler_for(evaluator.clone(), config, &[1, 2, 3, 4, 5]).await;

        let handles = scheduler.tick(Utc::now()).await.unwrap();
        assert_eq!(handles.len(), 5);
        join(handles).await;

        assert_eq!(evaluator.peak.load(Ordering::SeqCst), 2);
        for id in 1..=5 {
            assert_eq!(store.recent_results(id, 10).await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_overlapping_run_is_skipped() {
        let evaluator = SlowEvaluator::new(Duration::from_millis(300), true);
        let (scheduler, store, _rx) = scheduler(evaluator.clone(), Duration::from_secs(5)).await;

        let now = Utc::now();
        let first = scheduler.tick(now).await.unwrap();
        assert_eq!(first.len(), 1);

        // Due again while the first run is still sleeping
        let second = scheduler.tick(now + chrono::Duration::minutes(5)).await.unwrap();
        assert!(second.is_empty());

        join(first).await;
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.recent_results(1, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_inactive_check_not_run_and_reactivation_waits() {
        let evaluator = SlowEvaluator::new(Duration::ZERO, true);
        let (scheduler, store, _rx) = scheduler(evaluator.clone(), Duration::from_secs(5)).await;

        let mut check = icmp_check(1, Importance::Error);
        check.active = false;
        store.update_check(check.clone()).await.unwrap();

        let now = Utc::now();
        assert!(scheduler.tick(now).await.unwrap().is_empty());

        check.active = true;
        store.update_check(check).await.unwrap();
        let later = now + chrono::Duration::minutes(1);
        assert!(scheduler.tick(later).await.unwrap().is_empty());
        assert!(scheduler
            .tick(later + chrono::Duration::seconds(30))
            .await
            .unwrap()
            .is_empty());

        join(scheduler.tick(later + chrono::Duration::minutes(1)).await.unwrap()).await;
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restore_state_from_history() {
        let evaluator = SlowEvaluator::new(Duration::ZERO, true);
        let (scheduler, store, _rx) = scheduler(evaluator, Duration::from_secs(5)).await;

        let now = Utc::now();
        store.append_result(result(1, now, false)).await.unwrap();
        scheduler.restore_state().await.unwrap();

        assert_eq!(scheduler.debounce.effective(1), EffectiveStatus::Failing);
    }
}
