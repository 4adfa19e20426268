//! Reconcile outcomes and the per-object retry policy
//!
//! Controllers return an [`Outcome`] from their pure-ish reconcile bodies and
//! an error otherwise. [`ErrorBackoff`] turns repeated retryable failures of
//! the same object into exponentially growing, jittered requeues and forgets
//! the object once a reconcile succeeds.

use std::future::Future;
use std::time::Duration;

use dashmap::DashMap;
use kube::runtime::controller::Action;
use rand::Rng;
use tracing::{debug, warn};

use converge_common::metrics::{ErrorType, ReconcileTimer};

use crate::error::ReconcileError;

/// Default first retry delay
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(5);

/// Default retry delay cap
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

/// What the controller runtime should do after a successful reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing pending; wait for the next watch event
    Done,
    /// Check again after the delay
    Requeue(Duration),
}

impl Outcome {
    /// The earlier of two outcomes
    pub fn min(self, other: Outcome) -> Outcome {
        match (self, other) {
            (Outcome::Done, o) | (o, Outcome::Done) => o,
            (Outcome::Requeue(a), Outcome::Requeue(b)) => Outcome::Requeue(a.min(b)),
        }
    }
}

impl From<Outcome> for Action {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Done => Action::await_change(),
            Outcome::Requeue(after) => Action::requeue(after),
        }
    }
}

/// Per-object exponential backoff with jitter
#[derive(Debug)]
pub struct ErrorBackoff {
    attempts: DashMap<String, u32>,
    base: Duration,
    max: Duration,
}

impl Default for ErrorBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl ErrorBackoff {
    /// Create a backoff starting at `base` and capped at `max`
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            attempts: DashMap::new(),
            base,
            max,
        }
    }

    /// Record a failure for `key` and return the delay before the next try
    pub fn next_delay(&self, key: &str) -> Duration {
        let attempt = {
            let mut entry = self.attempts.entry(key.to_string()).or_insert(0);
            *entry = entry.saturating_add(1);
            *entry
        };
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1).min(16)));
        let capped = exp.min(self.max);
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        capped.mul_f64(jitter).min(self.max)
    }

    /// Consecutive failures recorded for `key`
    pub fn attempts(&self, key: &str) -> u32 {
        self.attempts.get(key).map(|a| *a).unwrap_or(0)
    }

    /// Forget `key` after a success
    pub fn reset(&self, key: &str) {
        self.attempts.remove(key);
    }

    /// Action for a failed reconcile of `key`
    ///
    /// Permanent errors wait for the object to change; retryable errors back
    /// off.
    pub fn error_action(&self, key: &str, error: &ReconcileError) -> Action {
        if error.is_retryable() {
            let delay = self.next_delay(key);
            warn!(object = %key, %error, ?delay, "reconcile failed, retrying");
            Action::requeue(delay)
        } else {
            warn!(object = %key, %error, "reconcile failed permanently, waiting for a change");
            Action::await_change()
        }
    }
}

/// Run one reconcile body with timing, metrics and backoff bookkeeping
pub async fn instrumented<F>(
    controller: &'static str,
    key: &str,
    backoff: &ErrorBackoff,
    body: F,
) -> Result<Action, ReconcileError>
where
    F: Future<Output = Result<Outcome, ReconcileError>>,
{
    let timer = ReconcileTimer::start(controller);
    match body.await {
        Ok(outcome) => {
            backoff.reset(key);
            timer.success();
            debug!(controller, object = %key, ?outcome, "reconciled");
            Ok(outcome.into())
        }
        Err(e) => {
            timer.error(if e.is_retryable() {
                ErrorType::Transient
            } else {
                ErrorType::Permanent
            });
            Err(e)
        }
    }
}
