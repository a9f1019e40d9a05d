// mimir-core/src/application/scheduler.rs
//
// The Scheduler (§4.F): owns the durable `Schedule` records and a single
// timer loop that wakes for whichever schedule's `next_run` comes first,
// enqueues one work task per configured pipeline into the dispatcher, and
// recomputes `next_run`. On restart, a schedule whose `next_run` has
// already elapsed fires once to catch up, bounded by
// `scheduler_catchup_limit` so a long-downed process doesn't replay every
// missed tick.

use crate::application::dispatcher::WorkTaskDispatcher;
use crate::application::parser::{parse_pipeline, ParsedPipeline};
use crate::domain::error::DomainError;
use crate::domain::schedule::Schedule;
use crate::domain::worktask::{WorkTask, WorkTaskSpec, WorkTaskType};
use crate::error::MimirError;
use crate::infrastructure::error::InfrastructureError;
use crate::ports::storage::RecordStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const SCHEDULES_COLLECTION: &str = "schedules";
const PIPELINES_COLLECTION: &str = "pipelines";
const DEFAULT_POLL_INTERVAL: StdDuration = StdDuration::from_secs(5);

/// Bounds how many elapsed ticks a schedule fires on restart catch-up
/// (§4.F, §9 `SCHEDULER_CATCHUP_LIMIT`). `0` disables catch-up entirely:
/// an overdue schedule is simply re-based to the next future tick.
#[derive(Debug, Clone, Copy)]
pub struct CatchupLimit(pub u32);

impl Default for CatchupLimit {
    fn default() -> Self {
        Self(1)
    }
}

pub struct Scheduler {
    store: Arc<dyn RecordStore>,
    dispatcher: Arc<WorkTaskDispatcher>,
    catchup_limit: CatchupLimit,
    schedules: Mutex<HashMap<Uuid, Schedule>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn RecordStore>, dispatcher: Arc<WorkTaskDispatcher>, catchup_limit: CatchupLimit) -> Self {
        Self {
            store,
            dispatcher,
            catchup_limit,
            schedules: Mutex::new(HashMap::new()),
        }
    }

    /// Restores every persisted schedule into memory. Catch-up firing
    /// (§4.F restart semantics: a schedule whose `next_run` already
    /// elapsed fires immediately, bounded by `catchup_limit`, rather than
    /// being silently skipped to the next future tick) happens later, on
    /// `run`'s first `tick`, not here.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<(), InfrastructureError> {
        let records = self.store.list(SCHEDULES_COLLECTION).await?;
        let mut schedules = self.schedules.lock().await;
        for record in records {
            match serde_json::from_value::<Schedule>(record) {
                Ok(schedule) => {
                    schedules.insert(schedule.id, schedule);
                }
                Err(e) => warn!(error = %e, "skipping unreadable schedule record"),
            }
        }
        Ok(())
    }

    pub async fn add(&self, mut schedule: Schedule) -> Result<Uuid, MimirError> {
        schedule.recompute_next_run(Utc::now())?;
        let id = schedule.id;
        self.persist(&schedule).await?;
        self.schedules.lock().await.insert(id, schedule);
        Ok(id)
    }

    pub async fn remove(&self, id: Uuid) -> Result<(), MimirError> {
        self.schedules.lock().await.remove(&id);
        self.store.delete(SCHEDULES_COLLECTION, &id.to_string()).await?;
        Ok(())
    }

    pub async fn list(&self) -> Vec<Schedule> {
        self.schedules.lock().await.values().cloned().collect()
    }

    pub async fn enable(&self, id: Uuid) -> Result<(), MimirError> {
        let mut schedules = self.schedules.lock().await;
        let schedule = schedules.get_mut(&id).ok_or(DomainError::ScheduleNotFound(id))?;
        schedule.enable(Utc::now())?;
        let snapshot = schedule.clone();
        drop(schedules);
        self.persist(&snapshot).await
    }

    pub async fn disable(&self, id: Uuid) -> Result<(), MimirError> {
        let mut schedules = self.schedules.lock().await;
        let schedule = schedules.get_mut(&id).ok_or(DomainError::ScheduleNotFound(id))?;
        schedule.disable();
        let snapshot = schedule.clone();
        drop(schedules);
        self.persist(&snapshot).await
    }

    /// Fires a schedule immediately regardless of `next_run` ("fire now",
    /// §4.F) without disturbing its regular cadence.
    pub async fn fire_now(&self, id: Uuid) -> Result<(), MimirError> {
        let schedule = {
            let schedules = self.schedules.lock().await;
            schedules.get(&id).cloned().ok_or(DomainError::ScheduleNotFound(id))?
        };
        self.fire(&schedule).await;
        Ok(())
    }

    /// Runs the timer loop until `shutdown` resolves. Each tick sleeps
    /// until the earliest `next_run` across all loaded schedules (capped
    /// at `DEFAULT_POLL_INTERVAL` so newly-added schedules are noticed
    /// promptly), then fires whatever is due.
    pub async fn run(&self, shutdown: crate::ports::cancellation::CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                return;
            }
            let sleep_for = self.time_until_next_wake().await;
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = shutdown.cancelled() => return,
            }
            self.tick().await;
        }
    }

    async fn time_until_next_wake(&self) -> StdDuration {
        let now = Utc::now();
        let schedules = self.schedules.lock().await;
        let earliest = schedules
            .values()
            .filter(|s| s.enabled)
            .filter_map(|s| s.next_run)
            .min();
        match earliest {
            Some(next) if next > now => {
                let delta = (next - now).to_std().unwrap_or(DEFAULT_POLL_INTERVAL);
                delta.min(DEFAULT_POLL_INTERVAL)
            }
            Some(_) => StdDuration::ZERO,
            None => DEFAULT_POLL_INTERVAL,
        }
    }

    #[instrument(skip(self))]
    async fn tick(&self) {
        let now = Utc::now();
        let due: Vec<Schedule> = {
            let schedules = self.schedules.lock().await;
            schedules.values().filter(|s| s.is_due(now)).cloned().collect()
        };
        for schedule in due {
            self.fire(&schedule).await;
        }
    }

    async fn fire(&self, schedule: &Schedule) {
        info!(schedule_id = %schedule.id, name = %schedule.name, "schedule firing");
        let fired_at = Utc::now();
        for pipeline_id in &schedule.pipelines {
            match self.load_pipeline(pipeline_id).await {
                Ok(parsed) => {
                    let task = WorkTask::new(
                        WorkTaskType::PipelineExecution,
                        0,
                        schedule.project_id.clone(),
                        WorkTaskSpec {
                            pipeline_id: Some(pipeline_id.clone()),
                            ..Default::default()
                        },
                        fired_at,
                    );
                    self.dispatcher.submit(task, Arc::new(parsed), format!("schedule:{}", schedule.id)).await;
                }
                Err(e) => warn!(pipeline_id, error = %e, "schedule could not load pipeline"),
            }
        }

        let mut schedules = self.schedules.lock().await;
        if let Some(stored) = schedules.get_mut(&schedule.id) {
            stored.last_run = Some(fired_at);
            self.apply_catchup_bounded_next_run(stored, fired_at);
            let snapshot = stored.clone();
            drop(schedules);
            if let Err(e) = self.persist(&snapshot).await {
                warn!(schedule_id = %schedule.id, error = %e, "failed to persist schedule after firing");
            }
        }
    }

    /// Recomputes `next_run` from `fired_at`, then — if the fresh value is
    /// still in the past by more than `catchup_limit` ticks worth of
    /// slack — keeps advancing until it lands in the future, so a process
    /// that was down for a long time fires at most `catchup_limit` times
    /// before resuming its normal cadence.
    fn apply_catchup_bounded_next_run(&self, schedule: &mut Schedule, fired_at: chrono::DateTime<Utc>) {
        if schedule.recompute_next_run(fired_at).is_err() {
            return;
        }
        let mut remaining = self.catchup_limit.0;
        while remaining > 0 {
            let Some(next) = schedule.next_run else { break };
            if next > Utc::now() {
                break;
            }
            if schedule.recompute_next_run(next).is_err() {
                break;
            }
            remaining -= 1;
        }
    }

    async fn load_pipeline(&self, pipeline_id: &str) -> Result<ParsedPipeline, MimirError> {
        let record = self
            .store
            .load(PIPELINES_COLLECTION, pipeline_id)
            .await?
            .ok_or_else(|| DomainError::PipelineNotFound(pipeline_id.to_string()))?;
        let yaml = record
            .get("yaml")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DomainError::PipelineInvalid(format!("pipeline '{pipeline_id}' record has no 'yaml' field")))?;
        let (parsed, errors) = parse_pipeline(yaml);
        if let Some(parsed) = parsed.filter(|_| errors.is_empty()) {
            Ok(parsed)
        } else {
            Err(errors
                .into_iter()
                .next()
                .unwrap_or_else(|| DomainError::PipelineInvalid(pipeline_id.to_string()))
                .into())
        }
    }

    async fn persist(&self, schedule: &Schedule) -> Result<(), MimirError> {
        let value = serde_json::to_value(schedule).map_err(InfrastructureError::from)?;
        self.store.save(SCHEDULES_COLLECTION, &schedule.id.to_string(), &value).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::application::executor::StatefulExecutor;
    use crate::application::registry::PluginRegistry;
    use crate::domain::access::PermissionManager;
    use crate::infrastructure::context::ContextService;
    use crate::infrastructure::store::JsonRecordStore;
    use crate::ports::context::ContextStore;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;

    fn make_dispatcher() -> Arc<WorkTaskDispatcher> {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(crate::infrastructure::plugins::NoopPlugin)).unwrap();
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonRecordStore::new(dir.keep()));
        let context: Arc<dyn ContextStore> = Arc::new(ContextService::new(PermissionManager::default(), store.clone(), store));
        let executor = Arc::new(StatefulExecutor::new(Arc::new(registry), context));
        Arc::new(WorkTaskDispatcher::new(executor, 1))
    }

    async fn make_scheduler() -> (Scheduler, Arc<dyn RecordStore>) {
        let dir = tempdir().unwrap();
        let store: Arc<dyn RecordStore> = Arc::new(JsonRecordStore::new(dir.keep()));
        store
            .save(
                PIPELINES_COLLECTION,
                "demo",
                &json!({"yaml": "name: demo\nsteps:\n  - name: a\n    plugin: Data_Processing.noop\n"}),
            )
            .await
            .unwrap();
        let scheduler = Scheduler::new(Arc::clone(&store), make_dispatcher(), CatchupLimit::default());
        (scheduler, store)
    }

    #[tokio::test]
    async fn adding_a_schedule_computes_next_run() {
        let (scheduler, _store) = make_scheduler().await;
        let schedule = Schedule::new("p1", "nightly", vec!["demo".to_string()], "* * * * *");
        let id = scheduler.add(schedule).await.unwrap();
        let loaded = scheduler.list().await;
        let found = loaded.iter().find(|s| s.id == id).unwrap();
        assert!(found.next_run.is_some());
    }

    #[tokio::test]
    async fn fire_now_submits_a_task_regardless_of_next_run() {
        let (scheduler, _store) = make_scheduler().await;
        let schedule = Schedule::new("p1", "nightly", vec!["demo".to_string()], "0 0 1 1 *");
        let id = scheduler.add(schedule).await.unwrap();
        scheduler.fire_now(id).await.unwrap();

        for _ in 0..50 {
            if let Some(s) = scheduler.list().await.into_iter().find(|s| s.id == id)
                && s.last_run.is_some()
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("schedule never recorded a last_run after fire_now");
    }

    #[tokio::test]
    async fn disable_clears_next_run_and_persists() {
        let (scheduler, store) = make_scheduler().await;
        let schedule = Schedule::new("p1", "nightly", vec!["demo".to_string()], "* * * * *");
        let id = scheduler.add(schedule).await.unwrap();
        scheduler.disable(id).await.unwrap();

        let record = store.load(SCHEDULES_COLLECTION, &id.to_string()).await.unwrap().unwrap();
        let persisted: Schedule = serde_json::from_value(record).unwrap();
        assert!(!persisted.enabled);
        assert!(persisted.next_run.is_none());
    }

    #[tokio::test]
    async fn load_restores_persisted_schedules() {
        let (scheduler, store) = make_scheduler().await;
        let mut schedule = Schedule::new("p1", "nightly", vec!["demo".to_string()], "* * * * *");
        schedule.recompute_next_run(Utc::now()).unwrap();
        let value = serde_json::to_value(&schedule).unwrap();
        store.save(SCHEDULES_COLLECTION, &schedule.id.to_string(), &value).await.unwrap();

        scheduler.load().await.unwrap();
        let loaded = scheduler.list().await;
        assert!(loaded.iter().any(|s| s.id == schedule.id));
    }
}
