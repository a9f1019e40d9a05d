// mimir-core/src/domain/worktask/mod.rs
//
// `WorkTask` is the durable unit of scheduled work materialised by the
// dispatcher for every pipeline run, whether manual, scheduled, or
// job-submitted (§4.E). Status transitions form a DAG; this module is the
// single place that DAG is enforced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkTaskType {
    PipelineExecution,
    MlTraining,
    MlInference,
    DigitalTwinUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkTaskStatus {
    #[default]
    Queued,
    Scheduled,
    Spawned,
    Executing,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl WorkTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled
        )
    }

    /// Enforces the DAG from §3: the happy path advances one step at a
    /// time, cancellation is legal from any non-terminal state, terminal
    /// states are immutable (only idempotent self-transitions allowed).
    pub fn can_transition_to(&self, next: &WorkTaskStatus) -> bool {
        match (self, next) {
            (s, n) if s == n => true,
            (s, _) if s.is_terminal() => false,
            (Self::Queued, Self::Scheduled) => true,
            (Self::Scheduled, Self::Spawned) => true,
            (Self::Spawned, Self::Executing) => true,
            (
                Self::Queued | Self::Scheduled | Self::Spawned | Self::Executing,
                Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled,
            ) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResourceRequirements {
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default)]
    pub memory: Option<u64>,
    #[serde(default)]
    pub gpu: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DataAccess {
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub output_location: Option<String>,
    #[serde(default)]
    pub credentials_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkTaskSpec {
    #[serde(default)]
    pub pipeline_id: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkTask {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub task_type: WorkTaskType,
    pub priority: i32,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: WorkTaskStatus,
    pub project_id: String,
    pub spec: WorkTaskSpec,
    pub resources: ResourceRequirements,
    pub data_access: DataAccess,
    #[serde(default)]
    pub error: Option<String>,
}

impl WorkTask {
    pub fn new(
        task_type: WorkTaskType,
        priority: i32,
        project_id: impl Into<String>,
        spec: WorkTaskSpec,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type,
            priority,
            submitted_at: now,
            started_at: None,
            completed_at: None,
            status: WorkTaskStatus::Queued,
            project_id: project_id.into(),
            spec,
            resources: ResourceRequirements::default(),
            data_access: DataAccess::default(),
            error: None,
        }
    }

    /// Applies a status transition, enforcing the DAG. Returns `false`
    /// (without mutating `self`) on an illegal transition; callers surface
    /// that as a domain error with context the bare bool can't carry.
    pub fn transition(&mut self, next: WorkTaskStatus, now: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(&next) {
            return false;
        }
        if next == WorkTaskStatus::Executing && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next;
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn task() -> WorkTask {
        WorkTask::new(
            WorkTaskType::PipelineExecution,
            5,
            "proj-1",
            WorkTaskSpec {
                pipeline_id: Some("p1".into()),
                ..Default::default()
            },
            Utc::now(),
        )
    }

    #[test]
    fn happy_path_transitions() {
        let mut t = task();
        assert!(t.transition(WorkTaskStatus::Scheduled, Utc::now()));
        assert!(t.transition(WorkTaskStatus::Spawned, Utc::now()));
        assert!(t.transition(WorkTaskStatus::Executing, Utc::now()));
        assert!(t.started_at.is_some());
        assert!(t.transition(WorkTaskStatus::Completed, Utc::now()));
        assert!(t.completed_at.is_some());
    }

    #[test]
    fn cancellation_legal_from_any_non_terminal_state() {
        let mut t = task();
        assert!(t.transition(WorkTaskStatus::Cancelled, Utc::now()));
        assert_eq!(t.status, WorkTaskStatus::Cancelled);
    }

    #[test]
    fn terminal_states_are_immutable() {
        let mut t = task();
        t.transition(WorkTaskStatus::Failed, Utc::now());
        assert!(!t.transition(WorkTaskStatus::Executing, Utc::now()));
        assert!(!t.transition(WorkTaskStatus::Completed, Utc::now()));
        assert_eq!(t.status, WorkTaskStatus::Failed);
    }

    #[test]
    fn skipping_a_state_is_rejected() {
        let mut t = task();
        assert!(!t.transition(WorkTaskStatus::Executing, Utc::now()));
        assert_eq!(t.status, WorkTaskStatus::Queued);
    }
}
