//! Cron schedule calculator
//!
//! Parses standard 5-field cron expressions and works out, for a parent that
//! last fired at some time (or was created at some time), the most recent fire
//! time that was missed and the next one to wait for.
//!
//! Catch-up is bounded: walking more than [`MAX_MISSED_RUNS`] missed fire
//! times is an error rather than a flood of children.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};

use crate::error::ScheduleError;

/// Upper bound on missed fire times walked in one evaluation
pub const MAX_MISSED_RUNS: usize = 100;

/// A parsed 5-field cron expression
///
/// When both day-of-month and day-of-week are restricted, a day matches if
/// either field matches, as in standard cron. The `cron` crate requires both
/// to match, so that case is held as two schedules whose fire times are
/// merged.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedules: Vec<cron::Schedule>,
}

impl CronSchedule {
    /// Parse a standard cron expression (`minute hour day-of-month month day-of-week`)
    ///
    /// Day-of-week uses the usual `0-7` numbering with both 0 and 7 meaning
    /// Sunday. The `@hourly`/`@daily`/`@weekly`/`@monthly`/`@yearly` shorthands
    /// are accepted too.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let invalid = |message: String| ScheduleError::Invalid {
            expression: expression.to_string(),
            message,
        };
        let trimmed = expression.trim();

        // The cron crate wants a leading seconds field and 1-7 weekdays
        let normalized = if trimmed.starts_with('@') {
            vec![trimmed.to_string()]
        } else {
            let fields: Vec<&str> = trimmed.split_whitespace().collect();
            if fields.len() != 5 {
                return Err(ScheduleError::FieldCount {
                    expression: expression.to_string(),
                    found: fields.len(),
                });
            }
            let (minute, hour, dom, month) = (fields[0], fields[1], fields[2], fields[3]);
            let dow = normalize_day_of_week(fields[4]).map_err(invalid)?;
            if is_unrestricted(dom) || is_unrestricted(fields[4]) {
                vec![format!("0 {} {} {} {} {}", minute, hour, dom, month, dow)]
            } else {
                vec![
                    format!("0 {} {} {} {} *", minute, hour, dom, month),
                    format!("0 {} {} * {} {}", minute, hour, month, dow),
                ]
            }
        };

        let schedules = normalized
            .iter()
            .map(|expr| cron::Schedule::from_str(expr).map_err(|e| invalid(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            expression: expression.to_string(),
            schedules,
        })
    }

    /// The expression as written
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `t`
    pub fn next_after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&t).next())
            .min()
    }
}

impl FromStr for CronSchedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn is_unrestricted(field: &str) -> bool {
    field == "*" || field == "?"
}

const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

fn weekday(value: &str) -> Result<u32, String> {
    if let Some(n) = WEEKDAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(value))
    {
        return Ok(n as u32);
    }
    match value.parse::<u32>() {
        Ok(n) if n <= 7 => Ok(n),
        _ => Err(format!("invalid day of week {:?}", value)),
    }
}

/// Expand a standard day-of-week field (0-7, Sunday = 0 or 7, names, ranges,
/// steps) into the cron crate's explicit 1-7 list (Sunday = 1)
///
/// Ranges are expanded before the step applies, so `5-7/2` is Friday and
/// Sunday.
fn normalize_day_of_week(field: &str) -> Result<String, String> {
    if is_unrestricted(field) {
        return Ok("*".to_string());
    }

    let mut days = [false; 7];
    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => match step.parse::<usize>() {
                Ok(step) if step > 0 => (base, step),
                _ => return Err(format!("invalid step in {:?}", item)),
            },
            None => (item, 1),
        };
        let stepped = item.contains('/');
        let (first, last) = match base.split_once('-') {
            _ if is_unrestricted(base) => (0, 6),
            Some((start, end)) => (weekday(start)?, weekday(end)?),
            None if stepped => (weekday(base)?, 6),
            None => {
                let day = weekday(base)?;
                (day, day)
            }
        };
        if first > last {
            return Err(format!("day of week range {:?} runs backwards", base));
        }
        for day in (first..=last).step_by(step) {
            days[(day % 7) as usize] = true;
        }
    }

    Ok(days
        .iter()
        .enumerate()
        .filter(|(_, on)| **on)
        .map(|(day, _)| (day + 1).to_string())
        .collect::<Vec<_>>()
        .join(","))
}

/// Result of evaluating a schedule at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextSchedule {
    /// Most recent fire time at or before now that has not run yet
    pub missed: Option<DateTime<Utc>>,
    /// First fire time after now
    pub next: Option<DateTime<Utc>>,
}

/// Compute the most recent missed fire time and the next fire time
///
/// The scan starts at `last_scheduled` (exclusive) when the parent has fired
/// before, otherwise at `created_at` (inclusive, so a fire time equal to the
/// creation instant counts). With a starting deadline, fire times older than
/// `now - deadline` are skipped without being walked.
pub fn next_schedule(
    schedule: &CronSchedule,
    last_scheduled: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    starting_deadline: Option<Duration>,
    now: DateTime<Utc>,
) -> Result<NextSchedule, ScheduleError> {
    let (mut earliest, mut inclusive) = match last_scheduled {
        Some(t) => (t, false),
        None => (created_at, true),
    };

    if let Some(deadline) = starting_deadline {
        let cutoff = now - deadline;
        if cutoff > earliest {
            earliest = cutoff;
            inclusive = false;
        }
    }

    let next = schedule.next_after(now);

    if earliest > now {
        return Ok(NextSchedule { missed: None, next });
    }

    let cursor = if inclusive {
        earliest - Duration::seconds(1)
    } else {
        earliest
    };

    let mut missed = None;
    let mut walked = 0usize;
    let mut cursor = cursor;
    while let Some(t) = schedule.next_after(cursor) {
        if t > now {
            break;
        }
        cursor = t;
        walked += 1;
        if walked > MAX_MISSED_RUNS {
            return Err(ScheduleError::TooManyMissed {
                limit: MAX_MISSED_RUNS,
            });
        }
        missed = Some(t);
    }

    Ok(NextSchedule { missed, next })
}
