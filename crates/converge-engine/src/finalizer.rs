//! Finalizer lifecycle for objects that own an external resource
//!
//! The lifecycle is an explicit state machine over two observations: is the
//! object being deleted, and does it carry our finalizer.
//!
//! | deleting | finalizer | state      | step                          |
//! |----------|-----------|------------|-------------------------------|
//! | no       | no        | `Absent`   | add the finalizer and stop    |
//! | no       | yes       | `Active`   | reconcile the external side   |
//! | yes      | yes       | `Deleting` | delete externally, then release |
//! | yes      | no        | `Released` | nothing                       |

use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use converge_common::kube_utils::deterministic_hash;

use crate::error::ReconcileError;
use crate::reconcile::Outcome;
use crate::store::{ObjectStore, StoreObject};

/// Where an object is in its finalizer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizerState {
    /// Live object without our finalizer
    Absent,
    /// Live object carrying our finalizer
    Active,
    /// Deletion requested; our finalizer still blocks it
    Deleting,
    /// Deletion requested and our finalizer is gone
    Released,
}

/// Step taken for a [`FinalizerState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizerStep {
    /// Persist the finalizer before touching anything external
    AddFinalizer,
    /// Create or update the external resource
    Reconcile,
    /// Delete the external resource, then remove the finalizer
    Cleanup,
    /// Nothing left to do
    Nothing,
}

impl FinalizerState {
    /// Observe the state of an object
    pub fn of<K: Resource>(obj: &K, finalizer: &str) -> Self {
        let deleting = obj.meta().deletion_timestamp.is_some();
        let present = obj.finalizers().iter().any(|f| f == finalizer);
        match (deleting, present) {
            (false, false) => Self::Absent,
            (false, true) => Self::Active,
            (true, true) => Self::Deleting,
            (true, false) => Self::Released,
        }
    }

    /// Transition table
    pub fn step(self) -> FinalizerStep {
        match self {
            Self::Absent => FinalizerStep::AddFinalizer,
            Self::Active => FinalizerStep::Reconcile,
            Self::Deleting => FinalizerStep::Cleanup,
            Self::Released => FinalizerStep::Nothing,
        }
    }
}

/// Deterministic token for deduplicating external creation
///
/// Derived from the object's uid, so every retry for the same object presents
/// the same token and a recreated object with the same name does not.
pub fn idempotency_token<K: Resource>(obj: &K) -> Result<String, ReconcileError> {
    obj.meta()
        .uid
        .as_deref()
        .map(deterministic_hash)
        .ok_or_else(|| ReconcileError::internal(format!("{} has no uid", obj.name_any())))
}

/// The external side of a finalized object
#[async_trait]
pub trait ExternalResource<K>: Send + Sync {
    /// Create or update the external resource; must be idempotent for `token`
    async fn reconcile(&self, obj: &K, token: &str) -> Result<Outcome, ReconcileError>;

    /// Delete the external resource; an already-missing resource is success
    async fn cleanup(&self, obj: &K) -> Result<(), ReconcileError>;
}

/// Run one pass of the finalizer lifecycle for `obj`
pub async fn drive<K: StoreObject>(
    store: &dyn ObjectStore<K>,
    obj: &K,
    finalizer: &str,
    external: &dyn ExternalResource<K>,
) -> Result<Outcome, ReconcileError> {
    let name = obj.name_any();
    let state = FinalizerState::of(obj, finalizer);
    debug!(object = %name, ?state, "finalizer state");

    match state.step() {
        FinalizerStep::AddFinalizer => {
            let mut finalizers = obj.finalizers().to_vec();
            finalizers.push(finalizer.to_string());
            store.set_finalizers(obj, &finalizers).await?;
            info!(object = %name, finalizer, "added finalizer");
            Ok(Outcome::Done)
        }
        FinalizerStep::Reconcile => {
            let token = idempotency_token(obj)?;
            external.reconcile(obj, &token).await
        }
        FinalizerStep::Cleanup => {
            external.cleanup(obj).await?;
            let remaining: Vec<String> = obj
                .finalizers()
                .iter()
                .filter(|f| *f != finalizer)
                .cloned()
                .collect();
            match store.set_finalizers(obj, &remaining).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
            info!(object = %name, finalizer, "external resource removed, finalizer released");
            Ok(Outcome::Done)
        }
        FinalizerStep::Nothing => Ok(Outcome::Done),
    }
}
