//! Common types for converge: CRDs, errors, events, telemetry and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod metrics;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group of every converge custom resource
pub const API_GROUP: &str = "converge.dev";

/// Prefix shared by every label and annotation the controllers own
///
/// Metadata under this prefix is treated as managed by the synchronizer;
/// everything else belongs to the user and is left untouched.
pub const MANAGED_PREFIX: &str = "converge.dev/";

/// Label carrying the name of the parent object on every child
pub const OWNER_LABEL: &str = "converge.dev/owner";

/// Label carrying the kind of the parent object on every child
pub const OWNER_KIND_LABEL: &str = "converge.dev/owner-kind";

/// Annotation recording the intended fire time of a scheduled child (RFC 3339, UTC)
pub const SCHEDULED_AT_ANNOTATION: &str = "converge.dev/scheduled-at";

/// Standard managed-by label key
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of the managed-by label on objects created by converge
pub const MANAGED_BY_VALUE: &str = "converge";

/// Label Kubernetes puts on pods created by a Job
pub const JOB_NAME_LABEL: &str = "job-name";
