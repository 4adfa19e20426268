//! Backup and BackupScheduled Custom Resource Definitions
//!
//! A Backup runs one backup Job and records the snapshot id it produced.
//! A BackupScheduled creates Backups from a template on a cron schedule.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ScheduleSpec, ScheduledStatus, TaskStatus};

/// Specification for a Backup
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "converge.dev",
    version = "v1alpha1",
    kind = "Backup",
    plural = "backups",
    shortname = "bk",
    namespaced,
    status = "TaskStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Snapshot","type":"string","jsonPath":".status.artifact"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    /// PersistentVolumeClaims whose contents are backed up
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,

    /// Database Secrets whose databases are dumped into the snapshot
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub databases: Vec<String>,

    /// Extra tags recorded on the snapshot
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Specification for a BackupScheduled
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "converge.dev",
    version = "v1alpha1",
    kind = "BackupScheduled",
    plural = "backupscheduleds",
    shortname = "bks",
    namespaced,
    status = "ScheduledStatus",
    printcolumn = r#"{"name":"Schedule","type":"string","jsonPath":".spec.schedule"}"#,
    printcolumn = r#"{"name":"Suspend","type":"boolean","jsonPath":".spec.suspend"}"#,
    printcolumn = r#"{"name":"Last Schedule","type":"date","jsonPath":".status.lastScheduleTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BackupScheduledSpec {
    /// Cron schedule, deadline, concurrency and history settings
    #[serde(flatten)]
    pub schedule: ScheduleSpec,

    /// Spec copied into every Backup this schedule creates
    pub template: BackupSpec,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ConcurrencyPolicy;

    #[test]
    fn scheduled_spec_parses_flat_schedule_fields() {
        let spec: BackupScheduledSpec = serde_yaml::from_str(
            r#"
schedule: "0 2 * * *"
startingDeadlineSeconds: 300
concurrencyPolicy: Forbid
successfulHistoryLimit: 3
template:
  volumes: [data]
  databases: [postgres-credentials]
"#,
        )
        .unwrap();

        assert_eq!(spec.schedule.schedule, "0 2 * * *");
        assert_eq!(spec.schedule.starting_deadline_seconds, Some(300));
        assert_eq!(spec.schedule.concurrency_policy, ConcurrencyPolicy::Forbid);
        assert_eq!(spec.schedule.successful_history_limit, Some(3));
        assert_eq!(spec.template.volumes, vec!["data".to_string()]);
        assert!(spec.template.tags.is_empty());
    }

    #[test]
    fn backup_crd_is_namespaced_in_converge_group() {
        use kube::CustomResourceExt;
        let crd = Backup::crd();
        assert_eq!(crd.spec.group, "converge.dev");
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(crd.spec.names.kind, "Backup");
    }
}
