//! Supporting types shared by the converge CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle phase of a task-like resource
///
/// Phases are ordered `Unknown < New < InProgress < {Completed, Failed}`.
/// Once terminal, a phase never regresses for the same object.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Nothing has been observed yet
    #[default]
    Unknown,
    /// Accepted, no work has started
    New,
    /// Work is running
    InProgress,
    /// Work finished successfully
    Completed,
    /// Work finished unsuccessfully
    Failed,
}

impl Phase {
    /// Whether this phase is final
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Position in the phase ordering; both terminal phases share the top rank
    pub fn rank(&self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::New => 1,
            Self::InProgress => 2,
            Self::Completed | Self::Failed => 3,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::New => write!(f, "New"),
            Self::InProgress => write!(f, "InProgress"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// How a schedule treats runs that overlap with still-active children
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConcurrencyPolicy {
    /// Start new runs regardless of active ones
    #[default]
    Allow,
    /// Skip a run while another is active
    Forbid,
    /// Delete active runs, then start the new one
    Replace,
}

/// Scheduling fields shared by every `*Scheduled` resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSpec {
    /// Standard 5-field cron expression (minute hour day-of-month month day-of-week)
    pub schedule: String,

    /// Seconds after a fire time during which a missed run may still start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_deadline_seconds: Option<i64>,

    /// Behavior when a run would overlap an active one
    #[serde(default)]
    pub concurrency_policy: ConcurrencyPolicy,

    /// Number of completed children to keep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful_history_limit: Option<u32>,

    /// Number of failed children to keep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_history_limit: Option<u32>,

    /// Stop starting new runs; status and history are still maintained
    #[serde(default)]
    pub suspend: bool,
}

impl ScheduleSpec {
    /// Starting deadline as a chrono duration, if one is set
    pub fn starting_deadline(&self) -> Option<chrono::Duration> {
        self.starting_deadline_seconds.map(chrono::Duration::seconds)
    }
}

/// Reference to a child that has not reached a terminal phase
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct ActiveReference {
    /// Name of the child
    pub name: String,

    /// UID of the child
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// Status of a `*Scheduled` resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledStatus {
    /// Fire time of the most recently created child
    #[serde(default)]
    pub last_schedule_time: Option<DateTime<Utc>>,

    /// Completion time of the most recent successful child
    #[serde(default)]
    pub last_successful_time: Option<DateTime<Utc>>,

    /// Children that are still running
    #[serde(default)]
    pub active: Vec<ActiveReference>,
}

/// Status of a task-like resource backed by a Job
///
/// Status types serialize unset fields as `null` so a merge patch clears them.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    /// Current phase
    #[serde(default)]
    pub phase: Phase,

    /// When the backing Job started
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,

    /// When the task reached a terminal phase
    #[serde(default)]
    pub completion_time: Option<DateTime<Utc>>,

    /// Result produced by the task (e.g. snapshot id)
    #[serde(default)]
    pub artifact: Option<String>,

    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_ordering_puts_terminal_phases_last() {
        assert!(Phase::Unknown.rank() < Phase::New.rank());
        assert!(Phase::New.rank() < Phase::InProgress.rank());
        assert!(Phase::InProgress.rank() < Phase::Completed.rank());
        assert_eq!(Phase::Completed.rank(), Phase::Failed.rank());
        assert!(Phase::Failed.is_terminal());
        assert!(!Phase::InProgress.is_terminal());
    }

    #[test]
    fn schedule_spec_defaults() {
        let spec: ScheduleSpec = serde_json::from_str(r#"{"schedule":"0 0 * * *"}"#).unwrap();
        assert_eq!(spec.concurrency_policy, ConcurrencyPolicy::Allow);
        assert!(!spec.suspend);
        assert!(spec.starting_deadline().is_none());
        assert!(spec.successful_history_limit.is_none());
    }

    #[test]
    fn starting_deadline_converts_seconds() {
        let spec = ScheduleSpec {
            schedule: "* * * * *".to_string(),
            starting_deadline_seconds: Some(60),
            ..Default::default()
        };
        assert_eq!(spec.starting_deadline(), Some(chrono::Duration::seconds(60)));
    }

    #[test]
    fn task_status_serializes_camel_case() {
        let status = TaskStatus {
            phase: Phase::Completed,
            artifact: Some("4f2a9c1b".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["phase"], "Completed");
        assert_eq!(json["artifact"], "4f2a9c1b");
        assert!(json["startTime"].is_null());
        assert!(json.as_object().unwrap().contains_key("message"));
    }
}
