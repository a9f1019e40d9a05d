// mimir-core/src/application/executor.rs
//
// The Stateful Executor (§4.D): drives a `ControlGraph`, owning the
// per-run mutable machine state (`step_pointer`, `loop_stack`). Steps
// complete strictly in the order the executor advances them (§5); there
// is no intra-run parallelism.

use crate::application::parser::ParsedPipeline;
use crate::application::registry::PluginRegistry;
use crate::domain::error::DomainError;
use crate::domain::pipeline::ast::{Branch, ErrorPolicy, ItemsSource};
use crate::domain::pipeline::expr::{evaluate_bool, ExprContext};
use crate::domain::pipeline::graph::StepKind;
use crate::ports::cancellation::{CancellationSource, CancellationToken};
use crate::ports::context::ContextStore;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// The namespace loop bindings (`as_name`, `index`, and the `last` alias
/// used by §8 scenario 2) are written to, distinct from the pipeline's own
/// data namespace so a step's `output` key never collides with a loop
/// variable.
const LOOP_NAMESPACE: &str = "loop";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Started,
    Completed,
    Failed,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEvent {
    pub step_name: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub events: Vec<StepEvent>,
    pub succeeded: bool,
    pub error: Option<String>,
}

struct LoopFrame {
    items: Vec<Value>,
    index: usize,
    as_name: String,
    index_name: Option<String>,
    body_start: usize,
    body_end: usize,
}

struct SnapshotExprContext {
    values: HashMap<String, Value>,
}

impl ExprContext for SnapshotExprContext {
    fn resolve(&self, path: &str) -> Option<Value> {
        let rest = path.strip_prefix("ctx.")?;
        self.values.get(rest).cloned()
    }
}

pub struct StatefulExecutor {
    registry: Arc<PluginRegistry>,
    context: Arc<dyn ContextStore>,
}

impl StatefulExecutor {
    pub fn new(registry: Arc<PluginRegistry>, context: Arc<dyn ContextStore>) -> Self {
        Self { registry, context }
    }

    #[instrument(skip(self, parsed, cancel))]
    pub async fn run(
        &self,
        parsed: &ParsedPipeline,
        namespace: &str,
        actor: &str,
        cancel: CancellationToken,
    ) -> ExecutionReport {
        let graph = &parsed.graph;
        let mut events = Vec::new();
        let mut loop_stack: Vec<LoopFrame> = Vec::new();
        let mut pointer = 0usize;

        while pointer < graph.steps.len() {
            if cancel.is_cancelled() {
                return ExecutionReport {
                    events,
                    succeeded: false,
                    error: Some("run cancelled".to_string()),
                };
            }

            let step = &graph.steps[pointer];
            let mut jumped = false;

            if let Some(cond) = &step.condition {
                let snapshot = match self.expr_snapshot(namespace).await {
                    Ok(s) => s,
                    Err(e) => return self.failed_report(events, e),
                };
                let ctx = SnapshotExprContext { values: snapshot };
                let result = match evaluate_bool(&cond.expression, &ctx) {
                    Ok(r) => r,
                    Err(e) => return self.failed_report(events, e),
                };
                let branch = if result { cond.on_true } else { cond.on_false };
                if branch == Branch::Jump {
                    let target_label = cond
                        .jump_target
                        .as_ref()
                        .expect("ControlGraph::build rejects jump branches with no jump_target");
                    let target = match graph.label_index(target_label) {
                        Some(idx) => idx,
                        None => {
                            return self.failed_report(
                                events,
                                DomainError::JumpTargetUnknown(target_label.clone()),
                            );
                        }
                    };
                    while let Some(frame) = loop_stack.last() {
                        if target >= frame.body_start && target < frame.body_end {
                            break;
                        }
                        loop_stack.pop();
                    }
                    pointer = target;
                    jumped = true;
                    events.push(StepEvent {
                        step_name: step.name.clone(),
                        status: StepStatus::Completed,
                        started_at: Utc::now(),
                        duration_ms: 0,
                        error: None,
                    });
                }
            }

            if jumped {
                continue;
            }

            match &step.kind {
                StepKind::IterateStart {
                    items,
                    as_name,
                    index_name,
                    body_start,
                    body_end,
                } => {
                    let items_vec = match self.resolve_items(items, namespace, actor).await {
                        Ok(v) => v,
                        Err(e) => return self.failed_report(events, e),
                    };
                    if items_vec.is_empty() {
                        pointer = *body_end;
                    } else {
                        let frame = LoopFrame {
                            items: items_vec,
                            index: 0,
                            as_name: as_name.clone(),
                            index_name: index_name.clone(),
                            body_start: *body_start,
                            body_end: *body_end,
                        };
                        if let Err(e) = self.bind_loop_vars(&frame, actor).await {
                            return self.failed_report(events, e);
                        }
                        pointer = frame.body_start;
                        loop_stack.push(frame);
                    }
                }
                StepKind::Plugin { plugin, config, output } => {
                    let started_at = Utc::now();
                    let start = std::time::Instant::now();
                    info!(step = %step.name, plugin, "step started");

                    let (step_source, step_token) = CancellationSource::new();
                    // Caught at this boundary (§4.D) so one misbehaving
                    // plugin fails its own step rather than taking down the
                    // whole dispatcher worker.
                    let dispatch_fut = AssertUnwindSafe(self.registry.dispatch(
                        plugin,
                        config,
                        Arc::clone(&self.context),
                        namespace,
                        actor,
                        step_token,
                    ))
                    .catch_unwind();

                    let outcome = match step.timeout_seconds {
                        Some(secs) => {
                            tokio::select! {
                                result = dispatch_fut => flatten_plugin_panic(result, plugin),
                                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                                    step_source.cancel();
                                    Err(DomainError::Timeout(step.name.clone()))
                                }
                                _ = cancel.cancelled() => {
                                    step_source.cancel();
                                    Err(DomainError::Cancelled)
                                }
                            }
                        }
                        None => {
                            tokio::select! {
                                result = dispatch_fut => flatten_plugin_panic(result, plugin),
                                _ = cancel.cancelled() => {
                                    step_source.cancel();
                                    Err(DomainError::Cancelled)
                                }
                            }
                        }
                    };

                    let duration_ms = start.elapsed().as_millis() as u64;
                    match outcome {
                        Ok(value) => {
                            if let Some(output_key) = output
                                && let Err(e) = self.context.set(namespace, actor, output_key, value, None).await
                            {
                                events.push(StepEvent {
                                    step_name: step.name.clone(),
                                    status: StepStatus::Failed,
                                    started_at,
                                    duration_ms,
                                    error: Some(e.to_string()),
                                });
                                return self.failed_report(events, e);
                            }
                            events.push(StepEvent {
                                step_name: step.name.clone(),
                                status: StepStatus::Completed,
                                started_at,
                                duration_ms,
                                error: None,
                            });
                        }
                        Err(e) => {
                            let status = if matches!(e, DomainError::Timeout(_)) {
                                StepStatus::Timeout
                            } else {
                                StepStatus::Failed
                            };
                            warn!(step = %step.name, error = %e, "step did not complete");
                            events.push(StepEvent {
                                step_name: step.name.clone(),
                                status,
                                started_at,
                                duration_ms,
                                error: Some(e.to_string()),
                            });
                            if parsed.def.error_policy == ErrorPolicy::Abort {
                                return ExecutionReport {
                                    events,
                                    succeeded: false,
                                    error: Some(e.to_string()),
                                };
                            }
                        }
                    }
                    pointer += 1;
                }
            }

            // Loop back to the next item, or pop the frame on exhaustion,
            // every time the pointer lands exactly on a frame's body_end.
            while let Some(frame) = loop_stack.last_mut() {
                if pointer != frame.body_end {
                    break;
                }
                frame.index += 1;
                if frame.index < frame.items.len() {
                    if let Err(e) = self.bind_loop_vars(frame, actor).await {
                        return self.failed_report(events, e);
                    }
                    pointer = frame.body_start;
                } else {
                    loop_stack.pop();
                }
            }
        }

        debug!(steps = events.len(), "pipeline run finished");
        ExecutionReport {
            events,
            succeeded: true,
            error: None,
        }
    }

    fn failed_report(&self, events: Vec<StepEvent>, error: DomainError) -> ExecutionReport {
        ExecutionReport {
            events,
            succeeded: false,
            error: Some(error.to_string()),
        }
    }

    async fn resolve_items(
        &self,
        items: &ItemsSource,
        namespace: &str,
        actor: &str,
    ) -> Result<Vec<Value>, DomainError> {
        match items {
            ItemsSource::Literal(values) => Ok(values.clone()),
            ItemsSource::Reference(path) => {
                let key = path.strip_prefix("ctx.").unwrap_or(path);
                let key = key.strip_prefix(&format!("{namespace}.")).unwrap_or(key);
                let value = self.context.get(namespace, actor, key).await?;
                match value {
                    Some(Value::Array(items)) => Ok(items),
                    Some(other) => Err(DomainError::PipelineInvalid(format!(
                        "iterate items reference '{path}' did not resolve to a list, got {other}"
                    ))),
                    None => Err(DomainError::PipelineInvalid(format!(
                        "iterate items reference '{path}' not found"
                    ))),
                }
            }
        }
    }

    async fn bind_loop_vars(&self, frame: &LoopFrame, actor: &str) -> Result<(), DomainError> {
        let item = frame.items[frame.index].clone();
        self.context.set(LOOP_NAMESPACE, actor, &frame.as_name, item.clone(), None).await?;
        self.context.set(LOOP_NAMESPACE, actor, "last", item, None).await?;
        if let Some(index_name) = &frame.index_name {
            self.context
                .set(LOOP_NAMESPACE, actor, index_name, Value::from(frame.index), None)
                .await?;
        }
        Ok(())
    }

    async fn expr_snapshot(&self, namespace: &str) -> Result<HashMap<String, Value>, DomainError> {
        let mut values = HashMap::new();
        for ns in [namespace, LOOP_NAMESPACE] {
            for (key, value) in self.context.snapshot(ns).await? {
                values.insert(format!("{ns}.{key}"), value);
            }
        }
        Ok(values)
    }
}

/// Turns a caught plugin panic into an ordinary `DomainError`, extracting
/// the panic payload's message when it's a `&str`/`String` (the common
/// case for `panic!`/`unwrap`/`expect`).
fn flatten_plugin_panic(
    result: Result<Result<Value, DomainError>, Box<dyn std::any::Any + Send>>,
    plugin: &str,
) -> Result<Value, DomainError> {
    match result {
        Ok(inner) => inner,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "plugin panicked with a non-string payload".to_string());
            Err(DomainError::PluginPanicked {
                plugin: plugin.to_string(),
                message,
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::application::parser::parse_pipeline;
    use crate::domain::access::PermissionManager;
    use crate::infrastructure::context::ContextService;
    use crate::infrastructure::plugins::{JsonInputPlugin, MultiplyPlugin, NoopPlugin, StdoutOutputPlugin};
    use crate::infrastructure::store::JsonRecordStore;
    use tempfile::tempdir;

    fn executor() -> StatefulExecutor {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(JsonInputPlugin)).unwrap();
        registry.register(Arc::new(MultiplyPlugin)).unwrap();
        registry.register(Arc::new(StdoutOutputPlugin)).unwrap();
        registry.register(Arc::new(NoopPlugin)).unwrap();

        let dir = tempdir().unwrap();
        let store = Arc::new(JsonRecordStore::new(dir.keep()));
        let context: Arc<dyn ContextStore> = Arc::new(ContextService::new(PermissionManager::default(), store.clone(), store));
        StatefulExecutor::new(Arc::new(registry), context)
    }

    #[tokio::test]
    async fn linear_pipeline_produces_expected_result() {
        let yaml = r#"
name: demo
steps:
  - name: load
    plugin: Input.json
    config:
      json_string: '{"x": 2}'
    output: loaded
  - name: transform
    plugin: Data_Processing.multiply
    config:
      input_key: loaded
      field: x
    output: result
  - name: print
    plugin: Output.stdout
    config:
      value_key: result
"#;
        let (parsed, errors) = parse_pipeline(yaml);
        assert!(errors.is_empty(), "{errors:?}");
        let parsed = parsed.unwrap();
        let exec = executor();
        let (_source, token) = CancellationSource::new();
        let report = exec.run(&parsed, "run", "system", token).await;
        assert!(report.succeeded, "{:?}", report.error);
        assert_eq!(report.events.len(), 3);
        let result = exec.context.get("run", "system", "result").await.unwrap();
        assert_eq!(result, Some(serde_json::json!({"x": 4})));
    }

    #[tokio::test]
    async fn iterate_with_break_runs_three_times() {
        let yaml = r#"
name: demo
steps:
  - name: loop
    plugin: Data_Processing.noop
    iterate:
      items: [1, 2, 3, 4, 5]
      as: item
      steps:
        - name: check
          plugin: Data_Processing.noop
          condition:
            expression: "ctx.loop.last > 2"
            on_true: jump
            on_false: continue
            jump_target: "done"
  - name: finish
    plugin: Data_Processing.noop
    label: "done"
"#;
        let (parsed, errors) = parse_pipeline(yaml);
        assert!(errors.is_empty(), "{errors:?}");
        let parsed = parsed.unwrap();
        let exec = executor();
        let (_source, token) = CancellationSource::new();
        let report = exec.run(&parsed, "run", "system", token).await;
        assert!(report.succeeded, "{:?}", report.error);

        let check_events = report.events.iter().filter(|e| e.step_name == "check").count();
        assert_eq!(check_events, 3);
        let last = exec.context.get("loop", "system", "last").await.unwrap();
        assert_eq!(last, Some(serde_json::json!(3)));
    }

    #[tokio::test]
    async fn step_with_generous_timeout_still_completes() {
        let yaml = r#"
name: demo
steps:
  - name: quick
    plugin: Data_Processing.noop
    timeout_seconds: 5
"#;
        let (parsed, errors) = parse_pipeline(yaml);
        assert!(errors.is_empty(), "{errors:?}");
        let parsed = parsed.unwrap();
        let exec = executor();
        let (_source, token) = CancellationSource::new();
        let report = exec.run(&parsed, "run", "system", token).await;
        assert!(report.succeeded, "{:?}", report.error);
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].status, StepStatus::Completed);
    }

    /// A plugin that outlives its step's `timeout_seconds`, so the
    /// executor's `tokio::select!` race (§5) resolves on the timer branch
    /// rather than on the plugin's own completion.
    #[derive(Debug, Default, Clone, Copy)]
    struct SleepPlugin;

    #[async_trait::async_trait]
    impl crate::ports::plugin::Plugin for SleepPlugin {
        fn category(&self) -> crate::ports::plugin::PluginCategory {
            crate::ports::plugin::PluginCategory::DataProcessing
        }

        fn name(&self) -> &str {
            "sleep"
        }

        fn input_schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }

        fn validate_config(&self, _config: &HashMap<String, Value>) -> Result<(), DomainError> {
            Ok(())
        }

        async fn execute(
            &self,
            _config: &HashMap<String, Value>,
            _context: Arc<dyn ContextStore>,
            _namespace: &str,
            _actor: &str,
            _cancel: CancellationToken,
        ) -> Result<Value, DomainError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        }
    }

    fn executor_with_sleep_plugin() -> StatefulExecutor {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(SleepPlugin)).unwrap();
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonRecordStore::new(dir.keep()));
        let context: Arc<dyn ContextStore> = Arc::new(ContextService::new(PermissionManager::default(), store.clone(), store));
        StatefulExecutor::new(Arc::new(registry), context)
    }

    #[tokio::test(start_paused = true)]
    async fn step_exceeding_its_timeout_is_recorded_as_timed_out_and_aborts() {
        let yaml = r#"
name: demo
steps:
  - name: slow
    plugin: Data_Processing.sleep
    timeout_seconds: 1
  - name: never_reached
    plugin: Data_Processing.noop
"#;
        let (parsed, errors) = parse_pipeline(yaml);
        assert!(errors.is_empty(), "{errors:?}");
        let parsed = parsed.unwrap();
        let exec = executor_with_sleep_plugin();
        let (_source, token) = CancellationSource::new();

        // Paused time auto-advances to the next pending timer once every
        // other task is parked, so this resolves on the 1s step timeout
        // rather than actually waiting on the plugin's 60s sleep.
        let report = exec.run(&parsed, "run", "system", token).await;

        assert!(!report.succeeded);
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].status, StepStatus::Timeout);
        assert!(report.events[0].error.as_deref().unwrap_or_default().contains("slow"));
    }

    #[derive(Debug, Default, Clone, Copy)]
    struct PanicPlugin;

    #[async_trait::async_trait]
    impl crate::ports::plugin::Plugin for PanicPlugin {
        fn category(&self) -> crate::ports::plugin::PluginCategory {
            crate::ports::plugin::PluginCategory::DataProcessing
        }

        fn name(&self) -> &str {
            "boom"
        }

        fn input_schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }

        fn validate_config(&self, _config: &HashMap<String, Value>) -> Result<(), DomainError> {
            Ok(())
        }

        async fn execute(
            &self,
            _config: &HashMap<String, Value>,
            _context: Arc<dyn ContextStore>,
            _namespace: &str,
            _actor: &str,
            _cancel: CancellationToken,
        ) -> Result<Value, DomainError> {
            panic!("simulated plugin bug");
        }
    }

    #[tokio::test]
    async fn a_panicking_plugin_fails_its_step_instead_of_unwinding_the_run() {
        let yaml = r#"
name: demo
steps:
  - name: buggy
    plugin: Data_Processing.boom
"#;
        let (parsed, errors) = parse_pipeline(yaml);
        assert!(errors.is_empty(), "{errors:?}");
        let parsed = parsed.unwrap();

        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(PanicPlugin)).unwrap();
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonRecordStore::new(dir.keep()));
        let context: Arc<dyn ContextStore> = Arc::new(ContextService::new(PermissionManager::default(), store.clone(), store));
        let exec = StatefulExecutor::new(Arc::new(registry), context);
        let (_source, token) = CancellationSource::new();

        let report = exec.run(&parsed, "run", "system", token).await;

        assert!(!report.succeeded);
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].status, StepStatus::Failed);
        assert!(report.events[0].error.as_deref().unwrap_or_default().contains("simulated plugin bug"));
    }

    #[tokio::test]
    async fn external_cancellation_before_run_yields_failed_report() {
        let yaml = r#"
name: demo
steps:
  - name: a
    plugin: Data_Processing.noop
"#;
        let (parsed, errors) = parse_pipeline(yaml);
        assert!(errors.is_empty(), "{errors:?}");
        let parsed = parsed.unwrap();
        let exec = executor();
        let (source, token) = CancellationSource::new();
        source.cancel();
        let report = exec.run(&parsed, "run", "system", token).await;
        assert!(!report.succeeded);
        assert!(report.events.is_empty());
    }

    #[tokio::test]
    async fn unknown_plugin_aborts_under_default_error_policy() {
        let yaml = r#"
name: demo
steps:
  - name: bad
    plugin: Nope.missing
"#;
        let (parsed, errors) = parse_pipeline(yaml);
        assert!(errors.is_empty(), "{errors:?}");
        let parsed = parsed.unwrap();
        let exec = executor();
        let (_source, token) = CancellationSource::new();
        let report = exec.run(&parsed, "run", "system", token).await;
        assert!(!report.succeeded);
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].status, StepStatus::Failed);
    }
}
