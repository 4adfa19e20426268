//! Restore Custom Resource Definition
//!
//! A Restore waits for the referenced Backup to complete, then runs a restore
//! Job against the snapshot that Backup produced.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::TaskStatus;

/// Specification for a Restore
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "converge.dev",
    version = "v1alpha1",
    kind = "Restore",
    plural = "restores",
    shortname = "rs",
    namespaced,
    status = "TaskStatus",
    printcolumn = r#"{"name":"Backup","type":"string","jsonPath":".spec.backup"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSpec {
    /// Name of the Backup (same namespace) to restore from
    pub backup: String,

    /// PersistentVolumeClaims to restore into
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,

    /// Database Secrets whose databases are restored
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub databases: Vec<String>,
}
