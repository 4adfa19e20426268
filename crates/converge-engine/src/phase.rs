//! Phase state machine
//!
//! Maps a Job's counters (and, for kinds that need one, a result token found
//! in its log output) onto [`Phase`], and keeps stored phases monotonic.

use std::sync::LazyLock;
use std::time::Duration;

use k8s_openapi::api::batch::v1::Job;
use regex::Regex;

use converge_common::crd::Phase;

/// Requeue while an upstream object has not started
pub const UPSTREAM_NEW_REQUEUE: Duration = Duration::from_secs(15);

/// Requeue while an upstream object is running
pub const UPSTREAM_IN_PROGRESS_REQUEUE: Duration = Duration::from_secs(30);

static SNAPSHOT_SAVED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"snapshot ([0-9a-f]{8,64}) saved").expect("valid pattern"));

/// Counters from a Job's status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    /// Pods currently running
    pub active: i32,
    /// Pods that succeeded
    pub succeeded: i32,
    /// Pods that failed
    pub failed: i32,
}

impl TaskCounts {
    /// Read the counters of a Job, treating missing status as all zero
    pub fn from_job(job: &Job) -> Self {
        job.status
            .as_ref()
            .map(|s| Self {
                active: s.active.unwrap_or(0),
                succeeded: s.succeeded.unwrap_or(0),
                failed: s.failed.unwrap_or(0),
            })
            .unwrap_or_default()
    }
}

/// Result token requirement and what was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// This kind does not produce a token
    NotRequired,
    /// A token was found in the output
    Found(String),
    /// A token is required and none was found
    Missing,
}

/// Derive a phase from Job counters
///
/// A Job that succeeded without printing a required token counts as failed.
pub fn derive_phase(counts: TaskCounts, artifact: &Artifact) -> Phase {
    if counts.active > 0 {
        Phase::InProgress
    } else if counts.succeeded > 0 {
        match artifact {
            Artifact::Missing => Phase::Failed,
            Artifact::NotRequired | Artifact::Found(_) => Phase::Completed,
        }
    } else if counts.failed > 0 {
        Phase::Failed
    } else {
        Phase::New
    }
}

/// Combine the stored phase with a newly observed one without regressing
pub fn advance(current: Phase, observed: Phase) -> Phase {
    if current.is_terminal() || observed.rank() < current.rank() {
        current
    } else {
        observed
    }
}

/// Extract the snapshot id from backup tool output
///
/// When the output reports more than one snapshot the last one wins.
pub fn extract_snapshot_id(output: &str) -> Option<String> {
    SNAPSHOT_SAVED
        .captures_iter(output)
        .last()
        .map(|c| c[1].to_string())
}

/// What a chained object should do given its upstream's phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamGate {
    /// Upstream completed; continue
    Proceed,
    /// Upstream failed; fail too and stop
    Fail,
    /// Upstream not finished; check again later
    Wait(Duration),
}

/// Gate a downstream object on its upstream's phase
pub fn upstream_gate(phase: Phase) -> UpstreamGate {
    match phase {
        Phase::Completed => UpstreamGate::Proceed,
        Phase::Failed => UpstreamGate::Fail,
        Phase::InProgress => UpstreamGate::Wait(UPSTREAM_IN_PROGRESS_REQUEUE),
        Phase::New | Phase::Unknown => UpstreamGate::Wait(UPSTREAM_NEW_REQUEUE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::JobStatus;

    fn counts(active: i32, succeeded: i32, failed: i32) -> TaskCounts {
        TaskCounts {
            active,
            succeeded,
            failed,
        }
    }

    #[test]
    fn active_pods_mean_in_progress() {
        assert_eq!(derive_phase(counts(1, 1, 1), &Artifact::Missing), Phase::InProgress);
    }

    #[test]
    fn success_needs_the_token_when_one_is_required() {
        assert_eq!(
            derive_phase(counts(0, 1, 0), &Artifact::NotRequired),
            Phase::Completed
        );
        assert_eq!(
            derive_phase(counts(0, 1, 0), &Artifact::Found("4f2a9c1b".into())),
            Phase::Completed
        );
        // Succeeded without a result token is treated as a failure
        assert_eq!(derive_phase(counts(0, 1, 0), &Artifact::Missing), Phase::Failed);
    }

    #[test]
    fn failures_without_success_mean_failed() {
        assert_eq!(derive_phase(counts(0, 0, 3), &Artifact::NotRequired), Phase::Failed);
        assert_eq!(derive_phase(counts(0, 0, 0), &Artifact::NotRequired), Phase::New);
    }

    #[test]
    fn job_without_status_counts_as_zero() {
        assert_eq!(TaskCounts::from_job(&Job::default()), TaskCounts::default());
        let job = Job {
            status: Some(JobStatus {
                active: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(TaskCounts::from_job(&job), counts(1, 0, 0));
    }

    #[test]
    fn terminal_phases_never_regress() {
        let all = [
            Phase::Unknown,
            Phase::New,
            Phase::InProgress,
            Phase::Completed,
            Phase::Failed,
        ];
        for current in all {
            for observed in all {
                let next = advance(current, observed);
                if current.is_terminal() {
                    assert_eq!(next, current);
                }
                assert!(next.rank() >= current.rank());
            }
        }
    }

    #[test]
    fn snapshot_id_is_parsed_from_restic_output() {
        let output = "open repository\n\
                      Files: 12 new, 0 changed\n\
                      snapshot 4f2a9c1b saved\n";
        assert_eq!(extract_snapshot_id(output), Some("4f2a9c1b".to_string()));
        assert_eq!(extract_snapshot_id("no snapshot here"), None);
        assert_eq!(
            extract_snapshot_id("snapshot aaaaaaaa saved\nsnapshot bbbbbbbb saved"),
            Some("bbbbbbbb".to_string())
        );
    }

    #[test]
    fn upstream_gate_table() {
        assert_eq!(upstream_gate(Phase::Completed), UpstreamGate::Proceed);
        assert_eq!(upstream_gate(Phase::Failed), UpstreamGate::Fail);
        assert_eq!(
            upstream_gate(Phase::New),
            UpstreamGate::Wait(UPSTREAM_NEW_REQUEUE)
        );
        assert_eq!(
            upstream_gate(Phase::Unknown),
            UpstreamGate::Wait(UPSTREAM_NEW_REQUEUE)
        );
        assert_eq!(
            upstream_gate(Phase::InProgress),
            UpstreamGate::Wait(UPSTREAM_IN_PROGRESS_REQUEUE)
        );
    }
}
