//! Five-field cron triggers evaluated in a fixed timezone.
//!
//! The `cron` crate wants a leading seconds field and numbers weekdays
//! 1 = Sunday, so the day-of-week field is expanded and rewritten with
//! day names before handing it over.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use ::cron::Schedule;

use crate::error::ScheduleError;

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
const FIELD_NAMES: [&str; 5] = ["minute", "hour", "day", "month", "day_of_week"];

#[derive(Clone)]
pub struct CronTrigger {
    fields: [String; 5],
    schedule: Schedule,
    tz: Tz,
}

impl fmt::Debug for CronTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl CronTrigger {
    /// Parse `minute hour day month day_of_week`.
    pub fn parse(expression: &str, tz: Tz) -> Result<Self, ScheduleError> {
        let invalid = |reason: String| ScheduleError::InvalidExpression {
            expression: expression.to_string(),
            reason,
        };

        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(invalid(format!("expected 5 fields, got {}", parts.len())));
        }

        let dow = normalize_day_of_week(parts[4]).map_err(invalid)?;
        let full = format!("0 {} {} {} {} {}", parts[0], parts[1], parts[2], parts[3], dow);
        let schedule = Schedule::from_str(&full).map_err(|e| invalid(e.to_string()))?;

        let fields = [
            parts[0].to_string(),
            parts[1].to_string(),
            parts[2].to_string(),
            parts[3].to_string(),
            parts[4].to_string(),
        ];
        Ok(Self { fields, schedule, tz })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn expression(&self) -> String {
        self.fields.join(" ")
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.tz))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Latest fire time in `(after, until]`, if any.
    pub fn latest_between(&self, after: DateTime<Utc>, until: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.tz))
            .map(|t| t.with_timezone(&Utc))
            .take_while(|t| *t <= until)
            .last()
    }

    /// `cron[minute='0', hour='17', day='*', month='*', day_of_week='1-5']`
    pub fn description(&self) -> String {
        let inner = FIELD_NAMES
            .iter()
            .zip(self.fields.iter())
            .map(|(name, value)| format!("{name}='{value}'"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("cron[{inner}]")
    }
}

fn day_index(token: &str) -> Result<usize, String> {
    if let Ok(n) = token.parse::<usize>() {
        return match n {
            0..=6 => Ok(n),
            7 => Ok(0),
            _ => Err(format!("day of week {n} out of range 0-7")),
        };
    }
    DAY_NAMES
        .iter()
        .position(|d| d.eq_ignore_ascii_case(token))
        .ok_or_else(|| format!("unknown day of week '{token}'"))
}

/// Expand a standard day-of-week field (0-7, names, ranges, lists, steps)
/// into the name list the `cron` crate understands.
pub fn normalize_day_of_week(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut days = BTreeSet::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((r, s)) => {
                let step: usize = s.parse().map_err(|_| format!("bad step '{s}'"))?;
                if step == 0 {
                    return Err("step must be positive".to_string());
                }
                (r, step)
            }
            None => (item, 1),
        };

        // Ranges run over 0..=7 so that "5-7" keeps Sunday.
        let (start, end) = match range {
            "*" => (0, 6),
            r => match r.split_once('-') {
                Some((a, b)) => {
                    let a = raw_day(a)?;
                    let b = raw_day(b)?;
                    if a > b {
                        return Err(format!("descending range '{r}'"));
                    }
                    (a, b)
                }
                None if step > 1 => (raw_day(r)?, 6),
                None => {
                    let d = day_index(r)?;
                    (d, d)
                }
            },
        };
        for d in (start..=end).step_by(step) {
            days.insert(d % 7);
        }
    }

    if days.is_empty() {
        return Err(format!("empty day of week '{field}'"));
    }
    Ok(days.iter().map(|d| DAY_NAMES[*d]).collect::<Vec<_>>().join(","))
}

/// Like `day_index` but keeps 7 distinct from 0 for range arithmetic.
fn raw_day(token: &str) -> Result<usize, String> {
    match token.parse::<usize>() {
        Ok(7) => Ok(7),
        _ => day_index(token),
    }
}
