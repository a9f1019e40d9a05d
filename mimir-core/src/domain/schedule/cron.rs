// mimir-core/src/domain/schedule/cron.rs
//
// Standard 5-field cron (`minute hour day-of-month month day-of-week`).
// Each field accepts `*`, a single number, a comma-separated list, a
// range (`a-b`), and a step (`*/n` or `a-b/n`). Day-of-month and
// day-of-week are OR'd together when both are restricted, matching
// conventional cron semantics.

use crate::domain::error::DomainError;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

#[derive(Debug, Clone)]
pub struct CronExpression {
    minute: FieldSet,
    hour: FieldSet,
    day_of_month: FieldSet,
    month: FieldSet,
    day_of_week: FieldSet,
    dom_restricted: bool,
    dow_restricted: bool,
}

#[derive(Debug, Clone)]
struct FieldSet(Vec<u32>);

impl FieldSet {
    fn contains(&self, v: u32) -> bool {
        self.0.contains(&v)
    }
}

const MAX_SEARCH_MINUTES: i64 = 4 * 366 * 24 * 60;

impl CronExpression {
    pub fn parse(expr: &str) -> Result<Self, DomainError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(DomainError::PipelineInvalid(format!(
                "cron expression '{expr}' must have exactly 5 fields, got {}",
                fields.len()
            )));
        }
        let minute = parse_field(fields[0], 0, 59)?;
        let hour = parse_field(fields[1], 0, 23)?;
        let day_of_month = parse_field(fields[2], 1, 31)?;
        let month = parse_field(fields[3], 1, 12)?;
        let day_of_week = parse_field(fields[4], 0, 6)?;
        Ok(Self {
            dom_restricted: fields[2] != "*",
            dow_restricted: fields[4] != "*",
            minute,
            hour,
            day_of_month,
            month,
            day_of_week,
        })
    }

    fn matches(&self, dt: &DateTime<Utc>) -> bool {
        if !self.minute.contains(dt.minute())
            || !self.hour.contains(dt.hour())
            || !self.month.contains(dt.month())
        {
            return false;
        }
        let dom_ok = self.day_of_month.contains(dt.day());
        let dow = dt.weekday().num_days_from_sunday();
        let dow_ok = self.day_of_week.contains(dow);
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom_ok || dow_ok,
            (true, false) => dom_ok,
            (false, true) => dow_ok,
            (false, false) => true,
        }
    }

    /// Smallest minute-aligned instant strictly greater than `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, DomainError> {
        let mut candidate = after
            .with_second(0)
            .and_then(|d| d.with_nanosecond(0))
            .unwrap_or(after)
            + Duration::minutes(1);
        for _ in 0..MAX_SEARCH_MINUTES {
            if self.matches(&candidate) {
                return Ok(candidate);
            }
            candidate += Duration::minutes(1);
        }
        Err(DomainError::PipelineInvalid(format!(
            "cron expression has no matching instant within {} years",
            MAX_SEARCH_MINUTES / (366 * 24 * 60)
        )))
    }
}

fn parse_field(field: &str, min: u32, max: u32) -> Result<FieldSet, DomainError> {
    let mut values = std::collections::BTreeSet::new();
    for part in field.split(',') {
        let (range_part, step) = match part.split_once('/') {
            Some((r, s)) => (
                r,
                s.parse::<u32>()
                    .map_err(|_| DomainError::PipelineInvalid(format!("invalid cron step '{part}'")))?,
            ),
            None => (part, 1),
        };
        if step == 0 {
            return Err(DomainError::PipelineInvalid(format!(
                "cron step must be nonzero in '{part}'"
            )));
        }
        let (start, end) = if range_part == "*" {
            (min, max)
        } else if let Some((a, b)) = range_part.split_once('-') {
            let a: u32 = a
                .parse()
                .map_err(|_| DomainError::PipelineInvalid(format!("invalid cron range '{range_part}'")))?;
            let b: u32 = b
                .parse()
                .map_err(|_| DomainError::PipelineInvalid(format!("invalid cron range '{range_part}'")))?;
            (a, b)
        } else {
            let n: u32 = range_part
                .parse()
                .map_err(|_| DomainError::PipelineInvalid(format!("invalid cron value '{range_part}'")))?;
            (n, n)
        };
        if start < min || end > max || start > end {
            return Err(DomainError::PipelineInvalid(format!(
                "cron field '{part}' out of range [{min}, {max}]"
            )));
        }
        let mut v = start;
        while v <= end {
            values.insert(v);
            v += step;
        }
    }
    if values.is_empty() {
        return Err(DomainError::PipelineInvalid(format!(
            "cron field '{field}' matches no values"
        )));
    }
    Ok(FieldSet(values.into_iter().collect()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn every_minute() {
        let cron = CronExpression::parse("* * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 10, 30, 15).unwrap();
        let next = cron.next_after(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 10, 31, 0).unwrap());
    }

    #[test]
    fn daily_midnight() {
        let cron = CronExpression::parse("0 0 * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        let next = cron.next_after(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn step_values() {
        let cron = CronExpression::parse("*/15 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 10, 1, 0).unwrap();
        let next = cron.next_after(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 10, 15, 0).unwrap());
    }

    #[test]
    fn weekday_restriction() {
        // Every day at 9am on Monday (1).
        let cron = CronExpression::parse("0 9 * * 1").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(); // Thursday
        let next = cron.next_after(now).unwrap();
        assert_eq!(next.weekday().num_days_from_sunday(), 1);
        assert_eq!(next.hour(), 9);
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(CronExpression::parse("* * *").is_err());
    }

    #[test]
    fn rejects_out_of_range_value() {
        assert!(CronExpression::parse("60 * * * *").is_err());
    }
}
