//! Backup, image, restore and sync controllers for converge
//!
//! - **task**: Backup, Image and Restore objects, each carried out by one Job
//! - **scheduled**: BackupScheduled and ImageScheduled, creating task
//!   children on a cron schedule with concurrency and retention policies
//! - **sync_controller**: DataSync, chaining a Backup, a readiness gate on a
//!   Deployment and a Restore
//! - **payload**: what runs inside the Jobs
//! - **logs**: reading task output

#![deny(missing_docs)]

pub mod context;
pub mod logs;
pub mod payload;
pub mod scheduled;
pub mod sync_controller;
pub mod task;

#[cfg(test)]
mod testing;

pub use context::{BackupContext, BackupContextBuilder, FIELD_MANAGER};
pub use payload::{JobPayload, ResticConfig, ResticPayload};
pub use scheduled::ScheduledKind;
pub use task::{JobPlan, TaskKind};
