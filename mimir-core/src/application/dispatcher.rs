// mimir-core/src/application/dispatcher.rs
//
// The Work-Task Dispatcher (§4.E): a single priority queue (higher
// `priority` first, FIFO tie-break) drained by a fixed-size worker pool.
// Each worker runs one task at a time, driving it through the executor
// and recording the terminal state.

use crate::application::executor::{ExecutionReport, StatefulExecutor, StepEvent, StepStatus};
use crate::application::parser::ParsedPipeline;
use crate::domain::error::DomainError;
use crate::domain::worktask::{WorkTask, WorkTaskStatus};
use crate::ports::cancellation::{CancellationSource, CancellationToken};
use chrono::Utc;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Step-level monitoring summary for one execution (§4.E): counts plus the
/// P95/P99 of per-step `duration_ms`, computed from the run's `StepEvent`s.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunMetrics {
    pub step_count: usize,
    pub successes: usize,
    pub failures: usize,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

impl RunMetrics {
    fn from_events(events: &[StepEvent]) -> Self {
        let step_count = events.len();
        let successes = events.iter().filter(|e| e.status == StepStatus::Completed).count();
        let failures = events
            .iter()
            .filter(|e| matches!(e.status, StepStatus::Failed | StepStatus::Timeout))
            .count();
        let mut durations: Vec<u64> = events.iter().map(|e| e.duration_ms).collect();
        durations.sort_unstable();
        Self {
            step_count,
            successes,
            failures,
            p95_ms: percentile(&durations, 0.95),
            p99_ms: percentile(&durations, 0.99),
        }
    }
}

/// Nearest-rank percentile over an already-sorted slice.
fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((sorted.len() as f64) * p).ceil() as usize;
    let index = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[index]
}

/// Orders the priority queue: higher `priority` first, then FIFO by
/// submission sequence (earlier `seq` first) to break ties.
struct QueueEntry {
    priority: i32,
    seq: u64,
    task: WorkTask,
    pipeline: Arc<ParsedPipeline>,
    namespace: String,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; higher priority should sort first, and
        // for equal priority the *earlier* seq should win, so we reverse
        // seq comparison.
        self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub task: WorkTask,
    pub error: Option<String>,
    pub events: Vec<StepEvent>,
    pub metrics: RunMetrics,
}

struct SharedState {
    queue: BinaryHeap<QueueEntry>,
    records: HashMap<Uuid, TaskRecord>,
    cancel_sources: HashMap<Uuid, CancellationSource>,
    next_seq: u64,
}

/// A fixed-size worker pool draining the priority queue (§4.E, §5).
pub struct WorkTaskDispatcher {
    state: Arc<Mutex<SharedState>>,
    executor: Arc<StatefulExecutor>,
    notify: mpsc::UnboundedSender<()>,
}

impl WorkTaskDispatcher {
    pub fn new(executor: Arc<StatefulExecutor>, worker_pool_size: usize) -> Self {
        let state = Arc::new(Mutex::new(SharedState {
            queue: BinaryHeap::new(),
            records: HashMap::new(),
            cancel_sources: HashMap::new(),
            next_seq: 0,
        }));
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            state: Arc::clone(&state),
            executor,
            notify: tx,
        };
        dispatcher.spawn_workers(worker_pool_size.max(1), rx);
        dispatcher
    }

    fn spawn_workers(&self, count: usize, rx: mpsc::UnboundedReceiver<()>) {
        let rx = Arc::new(Mutex::new(rx));
        for worker_id in 0..count {
            let state = Arc::clone(&self.state);
            let executor = Arc::clone(&self.executor);
            let rx = Arc::clone(&rx);
            let notify = self.notify.clone();
            tokio::spawn(async move {
                loop {
                    // Wake on every submission; workers race for the next
                    // queue entry, so a spurious wake that finds nothing
                    // to do is harmless.
                    if rx.lock().await.recv().await.is_none() {
                        return;
                    }
                    while let Some(entry) = pop_next(&state).await {
                        run_one(worker_id, &state, &executor, entry).await;
                    }
                    // Re-notify in case another worker's wake was consumed
                    // by this iteration while work remained.
                    let _ = notify.send(());
                }
            });
        }
    }

    /// Admits a task in `queued` state (§4.E).
    #[instrument(skip(self, pipeline))]
    pub async fn submit(&self, mut task: WorkTask, pipeline: Arc<ParsedPipeline>, namespace: impl Into<String>) -> Uuid {
        let id = task.id;
        task.status = WorkTaskStatus::Queued;
        let mut state = self.state.lock().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        let (source, _token) = CancellationSource::new();
        state.cancel_sources.insert(id, source);
        state.records.insert(
            id,
            TaskRecord {
                task: task.clone(),
                error: None,
                events: Vec::new(),
                metrics: RunMetrics::default(),
            },
        );
        state.queue.push(QueueEntry {
            priority: task.priority,
            seq,
            task,
            pipeline,
            namespace: namespace.into(),
        });
        drop(state);
        let _ = self.notify.send(());
        id
    }

    pub async fn get(&self, id: Uuid) -> Option<TaskRecord> {
        self.state.lock().await.records.get(&id).cloned()
    }

    pub async fn list(&self) -> Vec<TaskRecord> {
        self.state.lock().await.records.values().cloned().collect()
    }

    /// Cooperative: flips the task's cancellation token; a worker that has
    /// already claimed it observes the flag between steps (§5). A task
    /// still sitting in the queue is marked cancelled immediately.
    pub async fn cancel(&self, id: Uuid) -> Result<(), DomainError> {
        let mut state = self.state.lock().await;
        if let Some(source) = state.cancel_sources.get(&id) {
            source.cancel();
        }
        if let Some(record) = state.records.get_mut(&id)
            && !record.task.status.is_terminal()
            && record.task.status != WorkTaskStatus::Executing
        {
            record.task.transition(WorkTaskStatus::Cancelled, Utc::now());
        }
        Ok(())
    }

    /// Exports the full task history including step-level monitoring data
    /// (§4.E): start/end via `task`'s timestamps, step count, step-level
    /// successes/failures, and P95/P99 step latencies via `metrics`.
    pub async fn export_history(&self) -> Result<serde_json::Value, DomainError> {
        let state = self.state.lock().await;
        let records: Vec<_> = state.records.values().collect();
        serde_json::to_value(records).map_err(|e| DomainError::PluginFailed {
            plugin: "WorkTaskDispatcher.export_history".to_string(),
            reason: e.to_string(),
        })
    }
}

async fn pop_next(state: &Arc<Mutex<SharedState>>) -> Option<QueueEntry> {
    state.lock().await.queue.pop()
}

async fn run_one(
    worker_id: usize,
    state: &Arc<Mutex<SharedState>>,
    executor: &Arc<StatefulExecutor>,
    entry: QueueEntry,
) {
    let id = entry.task.id;
    let cancel_token = {
        let guard = state.lock().await;
        match guard.cancel_sources.get(&id) {
            Some(source) => source_token(source),
            None => CancellationSource::new().1,
        }
    };

    if cancel_token.is_cancelled() {
        finish(state, id, WorkTaskStatus::Cancelled, None, Vec::new()).await;
        return;
    }

    transition(state, id, WorkTaskStatus::Scheduled).await;
    transition(state, id, WorkTaskStatus::Spawned).await;
    transition(state, id, WorkTaskStatus::Executing).await;
    info!(worker_id, task_id = %id, "work task executing");

    let actor = "system";
    let report: ExecutionReport = executor.run(&entry.pipeline, &entry.namespace, actor, cancel_token).await;
    let events = report.events;

    if report.succeeded {
        finish(state, id, WorkTaskStatus::Completed, None, events).await;
    } else if report.error.as_deref() == Some("run cancelled") {
        finish(state, id, WorkTaskStatus::Cancelled, report.error, events).await;
    } else {
        warn!(task_id = %id, error = ?report.error, "work task failed");
        finish(state, id, WorkTaskStatus::Failed, report.error, events).await;
    }
}

/// `CancellationSource` has no public accessor for a fresh token beyond
/// its constructor pair, so worker lookups reconstruct one only on the
/// (unreachable in practice) miss path; the common path clones via the
/// watch channel this source already owns.
fn source_token(source: &CancellationSource) -> CancellationToken {
    source.token()
}

async fn transition(state: &Arc<Mutex<SharedState>>, id: Uuid, next: WorkTaskStatus) {
    let mut guard = state.lock().await;
    if let Some(record) = guard.records.get_mut(&id) {
        record.task.transition(next, Utc::now());
    }
}

async fn finish(
    state: &Arc<Mutex<SharedState>>,
    id: Uuid,
    status: WorkTaskStatus,
    error: Option<String>,
    events: Vec<StepEvent>,
) {
    let mut guard = state.lock().await;
    if let Some(record) = guard.records.get_mut(&id) {
        record.task.transition(status, Utc::now());
        record.task.error = error.clone();
        record.error = error;
        record.metrics = RunMetrics::from_events(&events);
        record.events = events;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::application::parser::parse_pipeline;
    use crate::application::registry::PluginRegistry;
    use crate::domain::access::PermissionManager;
    use crate::domain::worktask::{WorkTaskSpec, WorkTaskType};
    use crate::infrastructure::context::ContextService;
    use crate::infrastructure::plugins::NoopPlugin;
    use crate::infrastructure::store::JsonRecordStore;
    use crate::ports::context::ContextStore;
    use std::time::Duration;
    use tempfile::tempdir;

    fn make_executor() -> Arc<StatefulExecutor> {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(NoopPlugin)).unwrap();
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonRecordStore::new(dir.keep()));
        let context: Arc<dyn ContextStore> = Arc::new(ContextService::new(PermissionManager::default(), store.clone(), store));
        Arc::new(StatefulExecutor::new(Arc::new(registry), context))
    }

    fn task(priority: i32) -> WorkTask {
        WorkTask::new(
            WorkTaskType::PipelineExecution,
            priority,
            "proj-1",
            WorkTaskSpec::default(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn submitted_task_reaches_completed() {
        let dispatcher = WorkTaskDispatcher::new(make_executor(), 1);
        let yaml = "name: demo\nsteps:\n  - name: a\n    plugin: Data_Processing.noop\n";
        let (parsed, _) = parse_pipeline(yaml);
        let id = dispatcher.submit(task(1), Arc::new(parsed.unwrap()), "run").await;

        for _ in 0..50 {
            if let Some(record) = dispatcher.get(id).await
                && record.task.status.is_terminal()
            {
                assert_eq!(record.task.status, WorkTaskStatus::Completed);
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task did not reach a terminal state in time");
    }

    #[tokio::test]
    async fn higher_priority_task_is_recorded() {
        let dispatcher = WorkTaskDispatcher::new(make_executor(), 1);
        let yaml = "name: demo\nsteps:\n  - name: a\n    plugin: Data_Processing.noop\n";
        let (parsed, _) = parse_pipeline(yaml);
        let pipeline = Arc::new(parsed.unwrap());
        let low = dispatcher.submit(task(1), Arc::clone(&pipeline), "run").await;
        let high = dispatcher.submit(task(10), pipeline, "run").await;

        for _ in 0..50 {
            let low_done = dispatcher.get(low).await.is_some_and(|r| r.task.status.is_terminal());
            let high_done = dispatcher.get(high).await.is_some_and(|r| r.task.status.is_terminal());
            if low_done && high_done {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("tasks did not both reach a terminal state in time");
    }

    #[tokio::test]
    async fn completed_task_carries_step_events_and_metrics_into_export_history() {
        let dispatcher = WorkTaskDispatcher::new(make_executor(), 1);
        let yaml = "name: demo\nsteps:\n  - name: a\n    plugin: Data_Processing.noop\n";
        let (parsed, _) = parse_pipeline(yaml);
        let id = dispatcher.submit(task(1), Arc::new(parsed.unwrap()), "run").await;

        let record = loop {
            if let Some(record) = dispatcher.get(id).await
                && record.task.status.is_terminal()
            {
                break record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };

        assert_eq!(record.events.len(), 1);
        assert_eq!(record.metrics.step_count, 1);
        assert_eq!(record.metrics.successes, 1);
        assert_eq!(record.metrics.failures, 0);

        let exported = dispatcher.export_history().await.unwrap();
        let entries = exported.as_array().unwrap();
        let entry = entries.iter().find(|e| e["task"]["id"] == serde_json::json!(id)).unwrap();
        assert_eq!(entry["metrics"]["step_count"], serde_json::json!(1));
        assert_eq!(entry["events"].as_array().unwrap().len(), 1);
    }
}
