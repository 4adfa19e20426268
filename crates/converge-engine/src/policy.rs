//! Concurrency and retention policy
//!
//! [`decide`] turns a schedule evaluation plus the active set into what the
//! scheduled controller should do this pass. [`select_for_cleanup`] picks
//! which finished children fall outside the history limit.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};

use converge_common::crd::ConcurrencyPolicy;

use crate::schedule::NextSchedule;

/// What a scheduled parent should do this pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleDecision {
    /// Nothing is due
    Idle,
    /// A run was missed but its starting deadline has passed
    TooLate {
        /// The fire time that was dropped
        missed: DateTime<Utc>,
    },
    /// A run is due but another is active and the policy is Forbid
    Skip {
        /// The fire time that was skipped
        missed: DateTime<Utc>,
    },
    /// Create one child for this fire time
    Run {
        /// The fire time to create a child for
        fire_time: DateTime<Utc>,
        /// Delete the active children first (Replace)
        replace_active: bool,
    },
}

/// Decide what to do with the most recent missed fire time
pub fn decide(
    next: &NextSchedule,
    starting_deadline: Option<Duration>,
    policy: ConcurrencyPolicy,
    active_count: usize,
    now: DateTime<Utc>,
) -> ScheduleDecision {
    let Some(missed) = next.missed else {
        return ScheduleDecision::Idle;
    };

    if let Some(deadline) = starting_deadline {
        if missed + deadline < now {
            return ScheduleDecision::TooLate { missed };
        }
    }

    match policy {
        ConcurrencyPolicy::Forbid if active_count > 0 => ScheduleDecision::Skip { missed },
        ConcurrencyPolicy::Replace => ScheduleDecision::Run {
            fire_time: missed,
            replace_active: active_count > 0,
        },
        _ => ScheduleDecision::Run {
            fire_time: missed,
            replace_active: false,
        },
    }
}

/// Delay until the next fire time; `None` when the schedule never fires again
pub fn requeue_after(next: &NextSchedule, now: DateTime<Utc>) -> Option<StdDuration> {
    next.next.map(|t| {
        (t - now)
            .to_std()
            .unwrap_or(StdDuration::ZERO)
            .max(StdDuration::from_secs(1))
    })
}

/// Pick the items to delete so at most `limit` of the newest remain
///
/// Items are ordered by start time ascending, with items that never started
/// treated as oldest. Protected items are never returned, even when they fall
/// outside the limit. With no limit nothing is deleted.
pub fn select_for_cleanup<T, S, P>(
    mut items: Vec<T>,
    limit: Option<u32>,
    start_time: S,
    is_protected: P,
) -> Vec<T>
where
    S: Fn(&T) -> Option<DateTime<Utc>>,
    P: Fn(&T) -> bool,
{
    let Some(limit) = limit else {
        return Vec::new();
    };
    let keep = limit as usize;
    if items.len() <= keep {
        return Vec::new();
    }

    items.sort_by_key(|item| start_time(item));
    let excess = items.len() - keep;
    items
        .into_iter()
        .take(excess)
        .filter(|item| !is_protected(item))
        .collect()
}
