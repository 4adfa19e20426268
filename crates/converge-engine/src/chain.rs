//! Orchestration of two task stages separated by a readiness gate
//!
//! Stage A runs first. Once it completes, an external readiness check must
//! pass before stage B is synchronized. While the check fails the chain
//! re-polls on [`GATE_REQUEUE`] without touching stage B.

use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;

use converge_common::crd::{Phase, TaskStatus};

/// Poll interval while the readiness gate is closed
pub const GATE_REQUEUE: Duration = Duration::from_secs(10);

/// Result of the external readiness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The gate is open
    Ready,
    /// The target exists but is not ready yet
    NotReady,
    /// The target does not exist
    Missing,
}

/// What the chain does at the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStep {
    /// Synchronize stage B
    Proceed,
    /// Re-check after the delay
    Requeue(Duration),
    /// Stop without error and without touching stage B
    Abandon,
}

/// Map a readiness observation onto a gate step
///
/// A missing target ends the pass successfully and silently; it is not
/// treated as a failure of the chain.
pub fn gate(readiness: Readiness) -> GateStep {
    match readiness {
        Readiness::Ready => GateStep::Proceed,
        Readiness::NotReady => GateStep::Requeue(GATE_REQUEUE),
        Readiness::Missing => GateStep::Abandon,
    }
}

/// Readiness of a Deployment: every desired replica is available
pub fn deployment_readiness(deployment: Option<&Deployment>) -> Readiness {
    let Some(deployment) = deployment else {
        return Readiness::Missing;
    };
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let available = deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0);
    if available >= desired {
        Readiness::Ready
    } else {
        Readiness::NotReady
    }
}

/// Aggregated view of a two-stage chain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainStatus {
    /// Combined phase
    pub phase: Phase,
    /// Start of stage A
    pub start_time: Option<DateTime<Utc>>,
    /// Later of the stage completion times, once the chain is terminal
    pub completion_time: Option<DateTime<Utc>>,
}

/// Combine the stage statuses; `None` means the stage does not exist yet
pub fn aggregate(first: Option<&TaskStatus>, second: Option<&TaskStatus>) -> ChainStatus {
    let phase_of = |s: Option<&TaskStatus>| s.map(|s| s.phase);
    let phase = match (phase_of(first), phase_of(second)) {
        (Some(Phase::Failed), _) | (_, Some(Phase::Failed)) => Phase::Failed,
        (_, Some(Phase::Completed)) => Phase::Completed,
        (None, _) => Phase::Unknown,
        (Some(Phase::Unknown | Phase::New), None) => Phase::New,
        _ => Phase::InProgress,
    };

    let completion_time = if phase.is_terminal() {
        [first, second]
            .into_iter()
            .flatten()
            .filter_map(|s| s.completion_time)
            .max()
    } else {
        None
    };

    ChainStatus {
        phase,
        start_time: first.and_then(|s| s.start_time),
        completion_time,
    }
}
