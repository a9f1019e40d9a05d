// mimir-core/src/domain/schedule/mod.rs
//
// `Schedule` and cron-expression evaluation (§4.F). Standard 5-field cron
// (`minute hour day-of-month month day-of-week`); no external cron crate —
// the grammar is small enough to hand-roll, matching the rest of the
// domain layer's preference for explicit, inspectable parsers over a
// dependency (cf. `pipeline::expr`).

mod cron;

pub use cron::CronExpression;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub project_id: String,
    pub name: String,
    pub pipelines: Vec<String>,
    pub cron_expression: String,
    pub enabled: bool,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run_error: Option<String>,
}

impl Schedule {
    pub fn new(
        project_id: impl Into<String>,
        name: impl Into<String>,
        pipelines: Vec<String>,
        cron_expression: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.into(),
            name: name.into(),
            pipelines,
            cron_expression: cron_expression.into(),
            enabled: true,
            last_run: None,
            next_run: None,
            last_run_error: None,
        }
    }

    /// Recomputes `next_run` as the smallest cron-matching instant strictly
    /// greater than `after`, or clears it when disabled (§3 invariant).
    pub fn recompute_next_run(&mut self, after: DateTime<Utc>) -> Result<(), crate::domain::error::DomainError> {
        if !self.enabled {
            self.next_run = None;
            return Ok(());
        }
        let cron = CronExpression::parse(&self.cron_expression)?;
        self.next_run = Some(cron.next_after(after)?);
        Ok(())
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.next_run = None;
    }

    pub fn enable(&mut self, now: DateTime<Utc>) -> Result<(), crate::domain::error::DomainError> {
        self.enabled = true;
        self.recompute_next_run(now)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run.is_some_and(|n| n <= now)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn disabling_clears_next_run() {
        let mut s = Schedule::new("p1", "nightly", vec!["pipe".into()], "0 0 * * *");
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        s.recompute_next_run(now).unwrap();
        assert!(s.next_run.is_some());
        s.disable();
        assert!(s.next_run.is_none());
    }

    #[test]
    fn is_due_respects_enabled_and_next_run() {
        let mut s = Schedule::new("p1", "nightly", vec!["pipe".into()], "0 0 * * *");
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        s.recompute_next_run(now).unwrap();
        let due_instant = s.next_run.unwrap();
        assert!(s.is_due(due_instant));
        assert!(!s.is_due(due_instant - chrono::Duration::seconds(1)));
        s.disable();
        assert!(!s.is_due(due_instant));
    }
}
