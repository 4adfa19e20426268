//! Child-resource synchronizer
//!
//! `sync_child` is the idempotent "ensure this child exists and looks like
//! this" primitive. Each kind says which fields the controller owns through
//! [`ManagedFields`]; only those are compared and written, so user edits to
//! everything else survive and an unchanged child is never rewritten.

use std::collections::BTreeMap;
use std::fmt::Debug;

use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use converge_common::MANAGED_PREFIX;

use crate::error::{ReconcileError, StoreError};
use crate::store::{ObjectStore, StoreObject};

/// Adapter describing the controller-owned subset of a kind
pub trait ManagedFields: StoreObject {
    /// Comparable snapshot of the managed fields
    type Managed: PartialEq + Debug + Clone + Send;

    /// Extract the managed fields
    fn managed(&self) -> Self::Managed;

    /// Overwrite the managed fields, leaving everything else alone
    fn apply_managed(&mut self, managed: Self::Managed);
}

/// What `sync_child` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The child did not exist and was created
    Created,
    /// The child existed with different managed fields and was updated
    Updated,
    /// The child already matched
    Unchanged,
}

/// Labels and annotations under the managed prefix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedMetadata {
    /// Managed labels
    pub labels: BTreeMap<String, String>,
    /// Managed annotations
    pub annotations: BTreeMap<String, String>,
}

/// Keys the controllers own outside the prefix
const MANAGED_KEYS: &[&str] = &[converge_common::MANAGED_BY_LABEL];

fn is_managed_key(key: &str) -> bool {
    key.starts_with(MANAGED_PREFIX) || MANAGED_KEYS.contains(&key)
}

fn managed_subset(map: Option<&BTreeMap<String, String>>) -> BTreeMap<String, String> {
    map.map(|m| {
        m.iter()
            .filter(|(k, _)| is_managed_key(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    })
    .unwrap_or_default()
}

fn replace_managed(
    target: &mut Option<BTreeMap<String, String>>,
    managed: BTreeMap<String, String>,
) {
    let mut merged: BTreeMap<String, String> = target
        .take()
        .unwrap_or_default()
        .into_iter()
        .filter(|(k, _)| !is_managed_key(k))
        .collect();
    merged.extend(managed);
    *target = (!merged.is_empty()).then_some(merged);
}

impl ManagedMetadata {
    /// Read the managed labels and annotations of an object
    pub fn from_meta(meta: &ObjectMeta) -> Self {
        Self {
            labels: managed_subset(meta.labels.as_ref()),
            annotations: managed_subset(meta.annotations.as_ref()),
        }
    }

    /// Replace the managed labels and annotations, keeping user-owned keys
    pub fn apply_to(self, meta: &mut ObjectMeta) {
        replace_managed(&mut meta.labels, self.labels);
        replace_managed(&mut meta.annotations, self.annotations);
    }
}

fn has_owner<P: Resource<DynamicType = ()>, K: Resource>(child: &K, parent: &P) -> bool {
    let uid = parent.meta().uid.as_deref();
    uid.is_some()
        && child
            .owner_references()
            .iter()
            .any(|r| Some(r.uid.as_str()) == uid)
}

fn stamp_owner<P: Resource<DynamicType = ()>, K: Resource>(
    child: &mut K,
    parent: &P,
) -> Result<(), ReconcileError> {
    if has_owner(child, parent) {
        return Ok(());
    }
    let owner = parent.controller_owner_ref(&()).ok_or_else(|| {
        ReconcileError::internal(format!(
            "{} {} has no uid; cannot own children",
            P::kind(&()),
            parent.name_any()
        ))
    })?;
    child.owner_references_mut().push(owner);
    Ok(())
}

/// Ensure `desired` exists with its managed fields, owned by `parent`
///
/// Returns what was done and the child as stored afterwards.
pub async fn sync_child<P, K>(
    store: &dyn ObjectStore<K>,
    parent: &P,
    mut desired: K,
) -> Result<(SyncOutcome, K), ReconcileError>
where
    P: Resource<DynamicType = ()>,
    K: ManagedFields,
{
    let name = desired.name_any();
    let namespace = desired
        .namespace()
        .or_else(|| parent.namespace())
        .ok_or_else(|| ReconcileError::validation(format!("{} has no namespace", name)))?;
    desired.meta_mut().namespace = Some(namespace.clone());

    let existing = match store.get(&namespace, &name).await? {
        Some(existing) => existing,
        None => {
            stamp_owner(&mut desired, parent)?;
            match store.create(&desired).await {
                Ok(created) => {
                    info!(kind = %K::kind(&()), child = %name, "created child");
                    return Ok((SyncOutcome::Created, created));
                }
                // Lost a race with another reconcile; fall through to compare
                Err(StoreError::AlreadyExists { .. }) => store
                    .get(&namespace, &name)
                    .await?
                    .ok_or_else(|| ReconcileError::internal(format!("{} vanished", name)))?,
                Err(e) => return Err(e.into()),
            }
        }
    };

    let wanted = desired.managed();
    if existing.managed() == wanted && has_owner(&existing, parent) {
        debug!(kind = %K::kind(&()), child = %name, "child unchanged");
        return Ok((SyncOutcome::Unchanged, existing));
    }

    let mut updated = existing;
    updated.apply_managed(wanted);
    stamp_owner(&mut updated, parent)?;
    let stored = store.replace(&updated).await?;
    info!(kind = %K::kind(&()), child = %name, "updated child");
    Ok((SyncOutcome::Updated, stored))
}
