//! Custom Resource Definitions for converge
//!
//! All kinds live in the `converge.dev/v1alpha1` API group and are namespaced.

mod backup;
mod certificate;
mod image;
mod restore;
mod sync;
mod types;

pub use backup::{Backup, BackupScheduled, BackupScheduledSpec, BackupSpec};
pub use certificate::{
    Certificate, CertificateRequest, CertificateRequestSpec, CertificateRequestStatus,
    CertificateSpec, CertificateStatus, IssuerState, ValidationRecord,
    DEFAULT_REQUEST_HISTORY_LIMIT,
};
pub use image::{Image, ImageScheduled, ImageScheduledSpec, ImageSpec};
pub use restore::{Restore, RestoreSpec};
pub use sync::{DataSync, SyncSpec, SyncStatus};
pub use types::{
    ActiveReference, ConcurrencyPolicy, Phase, ScheduleSpec, ScheduledStatus, TaskStatus,
};
