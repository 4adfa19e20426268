//! Reconciliation engine shared by every converge controller
//!
//! The pieces are independent of any particular resource kind:
//!
//! - [`schedule`]: cron parsing and bounded catch-up of missed fire times
//! - [`policy`]: concurrency decisions and history retention
//! - [`sync`]: idempotent child synchronization over managed fields only
//! - [`phase`]: task phase derivation and upstream gating
//! - [`finalizer`]: lifecycle of objects that own an external resource
//! - [`chain`]: two-stage orchestration behind a readiness gate
//! - [`reconcile`]: outcomes, error policy and per-object backoff
//!
//! Controllers talk to the API server through [`store::ObjectStore`] and read
//! time through [`clock::Clock`], so everything here runs against
//! `MemoryStore` and `FixedClock` in tests.

#![deny(missing_docs)]

pub mod adapters;
pub mod chain;
pub mod clock;
pub mod error;
pub mod finalizer;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod phase;
pub mod policy;
pub mod reconcile;
pub mod schedule;
pub mod store;
pub mod sync;

pub use clock::{Clock, SystemClock};
pub use error::{ReconcileError, ScheduleError, StoreError};
pub use reconcile::{ErrorBackoff, Outcome};
pub use schedule::{next_schedule, CronSchedule, NextSchedule, MAX_MISSED_RUNS};
pub use store::{delete_if_present, KubeStore, LabelSelector, ObjectStore, StoreObject};
pub use sync::{sync_child, ManagedFields, ManagedMetadata, SyncOutcome};

#[cfg(any(test, feature = "testing"))]
pub use clock::FixedClock;
#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryStore;
