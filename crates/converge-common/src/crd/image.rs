//! Image and ImageScheduled Custom Resource Definitions
//!
//! An Image builds a database image from live databases. It produces no
//! artifact beyond Job success.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ScheduleSpec, ScheduledStatus, TaskStatus};

/// Specification for an Image
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "converge.dev",
    version = "v1alpha1",
    kind = "Image",
    plural = "images",
    namespaced,
    status = "TaskStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    /// Database Secrets to dump into the image
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub databases: Vec<String>,

    /// Registry repository the image is pushed to
    pub repository: String,

    /// Image tag; the Image name is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Specification for an ImageScheduled
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "converge.dev",
    version = "v1alpha1",
    kind = "ImageScheduled",
    plural = "imagescheduleds",
    namespaced,
    status = "ScheduledStatus",
    printcolumn = r#"{"name":"Schedule","type":"string","jsonPath":".spec.schedule"}"#,
    printcolumn = r#"{"name":"Last Schedule","type":"date","jsonPath":".status.lastScheduleTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ImageScheduledSpec {
    /// Cron schedule, deadline, concurrency and history settings
    #[serde(flatten)]
    pub schedule: ScheduleSpec,

    /// Spec copied into every Image this schedule creates
    pub template: ImageSpec,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_tag_is_optional() {
        let spec: ImageSpec = serde_yaml::from_str("repository: registry.local/db\n").unwrap();
        assert_eq!(spec.repository, "registry.local/db");
        assert!(spec.tag.is_none());
        assert!(spec.databases.is_empty());
    }
}
