//! DataSync controller
//!
//! Chains three steps: a Backup of the source, a readiness gate on the target
//! Deployment, and a Restore of that Backup into the target. The stage
//! objects are ordinary Backup and Restore children, carried out by their own
//! controllers; this controller only creates them in order and folds their
//! phases into its own status.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument};

use converge_common::crd::{
    Backup, DataSync, Phase, Restore, RestoreSpec, SyncStatus, TaskStatus,
};
use converge_common::events::reasons;
use converge_common::kube_utils::{child_labels, object_key};
use converge_common::metrics::record_child_created;
use converge_engine::chain::{aggregate, deployment_readiness, gate, GateStep};
use converge_engine::phase::{upstream_gate, UpstreamGate};
use converge_engine::reconcile::instrumented;
use converge_engine::{sync_child, ObjectStore, Outcome, ReconcileError, SyncOutcome};

use crate::context::BackupContext;
use crate::task::publish;

const KIND: &str = "DataSync";

/// Name of the Backup stage of a DataSync
pub fn backup_stage_name(sync: &str) -> String {
    format!("{}-backup", sync)
}

/// Name of the Restore stage of a DataSync
pub fn restore_stage_name(sync: &str) -> String {
    format!("{}-restore", sync)
}

/// Reconcile a DataSync
#[instrument(skip(obj, ctx), fields(sync = %obj.name_any()))]
pub async fn reconcile(obj: Arc<DataSync>, ctx: Arc<BackupContext>) -> Result<Action, ReconcileError> {
    let key = object_key(obj.as_ref());
    instrumented(KIND, &key, &ctx.backoff, reconcile_sync(obj.as_ref(), &ctx)).await
}

/// Error policy for DataSync
pub fn error_policy(obj: Arc<DataSync>, error: &ReconcileError, ctx: Arc<BackupContext>) -> Action {
    ctx.backoff.error_action(&object_key(obj.as_ref()), error)
}

async fn reconcile_sync(obj: &DataSync, ctx: &BackupContext) -> Result<Outcome, ReconcileError> {
    let name = obj.name_any();
    let namespace = obj
        .namespace()
        .ok_or_else(|| ReconcileError::validation(format!("DataSync {} must be namespaced", name)))?;

    let Some(sync) = ctx.syncs.get(&namespace, &name).await? else {
        debug!("object no longer exists");
        return Ok(Outcome::Done);
    };
    if sync.meta().deletion_timestamp.is_some() {
        return Ok(Outcome::Done);
    }
    if sync.status.as_ref().is_some_and(|s| s.phase.is_terminal()) {
        return Ok(Outcome::Done);
    }

    // Stage A
    let backup_name = backup_stage_name(&name);
    let mut desired = Backup::new(&backup_name, sync.spec.backup.clone());
    desired.metadata.namespace = Some(namespace.clone());
    desired.metadata.labels = Some(child_labels(KIND, &name));
    let (outcome, backup) = sync_child(ctx.backups.as_ref(), &sync, desired).await?;
    if outcome == SyncOutcome::Created {
        record_child_created(KIND, "Backup");
        publish(ctx, &sync, EventType::Normal, reasons::CHILD_CREATED, Some(format!("created {}", backup_name))).await;
    }
    let backup_status = backup.status.clone().unwrap_or_default();

    match upstream_gate(backup_status.phase) {
        UpstreamGate::Proceed => {}
        UpstreamGate::Fail => {
            let status = chain_status(&sync, Some(&backup_status), None, &backup_name, None);
            write_status(ctx.syncs.as_ref(), &sync, status).await?;
            publish(
                ctx,
                &sync,
                EventType::Warning,
                reasons::UPSTREAM_FAILED,
                Some(format!("backup {} failed", backup_name)),
            )
            .await;
            return Ok(Outcome::Done);
        }
        UpstreamGate::Wait(after) => {
            let status = chain_status(&sync, Some(&backup_status), None, &backup_name, None);
            write_status(ctx.syncs.as_ref(), &sync, status).await?;
            return Ok(Outcome::Requeue(after));
        }
    }

    // Gate
    let target = ctx.deployments.get(&namespace, &sync.spec.target).await?;
    match gate(deployment_readiness(target.as_ref())) {
        GateStep::Proceed => {}
        GateStep::Requeue(after) => {
            debug!(target = %sync.spec.target, "target not ready");
            let mut status = chain_status(&sync, Some(&backup_status), None, &backup_name, None);
            status.message = Some(format!("waiting for deployment {} to become available", sync.spec.target));
            write_status(ctx.syncs.as_ref(), &sync, status).await?;
            return Ok(Outcome::Requeue(after));
        }
        GateStep::Abandon => {
            // A missing target ends the pass without error and without status changes
            info!(target = %sync.spec.target, "target deployment not found, nothing to restore into");
            return Ok(Outcome::Done);
        }
    }

    // Stage B
    let restore_name = restore_stage_name(&name);
    let mut desired = Restore::new(
        &restore_name,
        RestoreSpec {
            backup: backup_name.clone(),
            volumes: or_else(&sync.spec.volumes, &sync.spec.backup.volumes),
            databases: or_else(&sync.spec.databases, &sync.spec.backup.databases),
        },
    );
    desired.metadata.namespace = Some(namespace.clone());
    desired.metadata.labels = Some(child_labels(KIND, &name));
    let (outcome, restore) = sync_child(ctx.restores.as_ref(), &sync, desired).await?;
    if outcome == SyncOutcome::Created {
        record_child_created(KIND, "Restore");
        publish(ctx, &sync, EventType::Normal, reasons::CHILD_CREATED, Some(format!("created {}", restore_name))).await;
    }

    let restore_status = restore.status.clone().unwrap_or_default();
    let status = chain_status(
        &sync,
        Some(&backup_status),
        Some(&restore_status),
        &backup_name,
        Some(&restore_name),
    );
    let phase = status.phase;
    write_status(ctx.syncs.as_ref(), &sync, status).await?;

    Ok(match upstream_gate(phase) {
        UpstreamGate::Wait(after) => Outcome::Requeue(after),
        UpstreamGate::Proceed | UpstreamGate::Fail => {
            info!(%phase, "sync finished");
            Outcome::Done
        }
    })
}

fn or_else(preferred: &[String], fallback: &[String]) -> Vec<String> {
    if preferred.is_empty() {
        fallback.to_vec()
    } else {
        preferred.to_vec()
    }
}

fn chain_status(
    sync: &DataSync,
    backup: Option<&TaskStatus>,
    restore: Option<&TaskStatus>,
    backup_name: &str,
    restore_name: Option<&str>,
) -> SyncStatus {
    let chain = aggregate(backup, restore);
    let message = match chain.phase {
        Phase::Failed => restore
            .filter(|r| r.phase == Phase::Failed)
            .and_then(|r| r.message.clone())
            .or_else(|| backup.and_then(|b| b.message.clone())),
        _ => None,
    };
    SyncStatus {
        phase: chain.phase,
        backup: Some(backup_name.to_string()),
        restore: restore_name
            .map(str::to_string)
            .or_else(|| sync.status.as_ref().and_then(|s| s.restore.clone())),
        start_time: chain.start_time,
        completion_time: chain.completion_time,
        message,
    }
}

async fn write_status(
    store: &dyn ObjectStore<DataSync>,
    sync: &DataSync,
    next: SyncStatus,
) -> Result<(), ReconcileError> {
    if sync.status.as_ref() == Some(&next) {
        return Ok(());
    }
    let value = serde_json::to_value(&next).map_err(converge_common::Error::from)?;
    store
        .patch_status(&sync.namespace().unwrap_or_default(), &sync.name_any(), &value)
        .await?;
    debug!(phase = %next.phase, "status updated");
    Ok(())
}
