//! DataSync Custom Resource Definition
//!
//! A DataSync chains a Backup, a readiness check on a target Deployment, and a
//! Restore of that Backup's snapshot into the target's volumes.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::backup::BackupSpec;
use super::types::Phase;

/// Status of a DataSync
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Aggregated phase of both stages
    #[serde(default)]
    pub phase: Phase,

    /// Name of the Backup stage
    #[serde(default)]
    pub backup: Option<String>,

    /// Name of the Restore stage
    #[serde(default)]
    pub restore: Option<String>,

    /// When the first stage started
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,

    /// Later of the two stage completion times
    #[serde(default)]
    pub completion_time: Option<DateTime<Utc>>,

    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

/// Specification for a DataSync
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "converge.dev",
    version = "v1alpha1",
    kind = "DataSync",
    plural = "datasyncs",
    shortname = "ds",
    namespaced,
    status = "SyncStatus",
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".spec.target"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SyncSpec {
    /// What to back up from the source
    pub backup: BackupSpec,

    /// Deployment that must be available before the restore runs
    pub target: String,

    /// Volumes to restore into; defaults to the backed-up volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,

    /// Database Secrets to restore into; defaults to the backed-up databases
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub databases: Vec<String>,
}
