//! Task controllers: Backup, Image and Restore
//!
//! Each task object runs exactly one Job named `<kind>-<name>` and controlled
//! by the task. The object's phase is derived from that Job's counters; a Backup additionally needs the
//! snapshot id printed by the backup tool, and a Restore waits for the Backup
//! it references to complete before its Job is created.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use kube::api::ObjectMeta;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use converge_common::crd::{Backup, Image, Phase, Restore, TaskStatus};
use converge_common::events::{actions, reasons};
use converge_common::kube_utils::{child_labels, object_key};
use converge_common::metrics::record_child_created;
use converge_common::JOB_NAME_LABEL;
use converge_engine::phase::{
    advance, derive_phase, extract_snapshot_id, upstream_gate, Artifact, TaskCounts, UpstreamGate,
    UPSTREAM_NEW_REQUEUE,
};
use converge_engine::reconcile::instrumented;
use converge_engine::{sync_child, ManagedFields, ObjectStore, Outcome, ReconcileError, SyncOutcome};

use crate::context::BackupContext;
use crate::payload::TASK_CONTAINER;

/// What to do about a task whose Job does not exist yet
#[derive(Debug, Clone, PartialEq)]
pub enum JobPlan {
    /// Create the Job with this spec
    Ready(JobSpec),
    /// Not yet; check again later
    Wait {
        /// Delay before the next check
        after: Duration,
        /// Shown in the task's status
        message: String,
    },
    /// The task can never run
    Fail(String),
}

/// A kind whose objects are carried out by a single Job
#[async_trait]
pub trait TaskKind: ManagedFields {
    /// Kind name for labels, metrics and logs
    const KIND: &'static str;

    /// Stored status
    fn task_status(&self) -> Option<&TaskStatus>;

    /// Store holding objects of this kind
    fn store(ctx: &BackupContext) -> &dyn ObjectStore<Self>;

    /// Whether success requires a snapshot id in the Job's output
    fn requires_artifact(&self) -> bool {
        false
    }

    /// Decide how to run this task
    async fn plan(&self, ctx: &BackupContext) -> Result<JobPlan, ReconcileError>;
}

#[async_trait]
impl TaskKind for Backup {
    const KIND: &'static str = "Backup";

    fn task_status(&self) -> Option<&TaskStatus> {
        self.status.as_ref()
    }

    fn store(ctx: &BackupContext) -> &dyn ObjectStore<Self> {
        ctx.backups.as_ref()
    }

    fn requires_artifact(&self) -> bool {
        true
    }

    async fn plan(&self, ctx: &BackupContext) -> Result<JobPlan, ReconcileError> {
        Ok(JobPlan::Ready(ctx.payload.backup(&self.name_any(), &self.spec)))
    }
}

#[async_trait]
impl TaskKind for Image {
    const KIND: &'static str = "Image";

    fn task_status(&self) -> Option<&TaskStatus> {
        self.status.as_ref()
    }

    fn store(ctx: &BackupContext) -> &dyn ObjectStore<Self> {
        ctx.images.as_ref()
    }

    async fn plan(&self, ctx: &BackupContext) -> Result<JobPlan, ReconcileError> {
        Ok(JobPlan::Ready(ctx.payload.image(&self.name_any(), &self.spec)))
    }
}

#[async_trait]
impl TaskKind for Restore {
    const KIND: &'static str = "Restore";

    fn task_status(&self) -> Option<&TaskStatus> {
        self.status.as_ref()
    }

    fn store(ctx: &BackupContext) -> &dyn ObjectStore<Self> {
        ctx.restores.as_ref()
    }

    async fn plan(&self, ctx: &BackupContext) -> Result<JobPlan, ReconcileError> {
        let namespace = self.namespace().unwrap_or_default();
        let source = &self.spec.backup;
        let Some(backup) = ctx.backups.get(&namespace, source).await? else {
            return Ok(JobPlan::Wait {
                after: UPSTREAM_NEW_REQUEUE,
                message: format!("waiting for backup {} to exist", source),
            });
        };
        let status = backup.status.unwrap_or_default();

        Ok(match upstream_gate(status.phase) {
            UpstreamGate::Proceed => match status.artifact {
                Some(snapshot) => {
                    JobPlan::Ready(ctx.payload.restore(&self.name_any(), &self.spec, &snapshot))
                }
                None => JobPlan::Fail(format!("backup {} completed without a snapshot", source)),
            },
            UpstreamGate::Fail => JobPlan::Fail(format!("backup {} failed", source)),
            UpstreamGate::Wait(after) => JobPlan::Wait {
                after,
                message: format!("waiting for backup {} ({})", source, status.phase),
            },
        })
    }
}

/// Name of the Job that carries out `task`
///
/// Prefixed with the kind so a Backup and an Image sharing a name (as the
/// children of same-named schedules always do) never share a Job.
pub fn job_name<K: TaskKind>(task: &K) -> String {
    format!("{}-{}", K::KIND.to_lowercase(), task.name_any())
}

/// Whether `job` is controlled by the object with `uid`
fn controlled_by(job: &Job, uid: Option<&str>) -> bool {
    job.owner_references()
        .iter()
        .any(|r| r.controller == Some(true) && Some(r.uid.as_str()) == uid)
}

/// Reconcile a task object
#[instrument(skip(obj, ctx), fields(kind = K::KIND, object = %obj.name_any()))]
pub async fn reconcile<K: TaskKind>(
    obj: Arc<K>,
    ctx: Arc<BackupContext>,
) -> Result<Action, ReconcileError> {
    let key = object_key(obj.as_ref());
    instrumented(K::KIND, &key, &ctx.backoff, reconcile_task(obj.as_ref(), &ctx)).await
}

/// Error policy for task objects
pub fn error_policy<K: TaskKind>(
    obj: Arc<K>,
    error: &ReconcileError,
    ctx: Arc<BackupContext>,
) -> Action {
    ctx.backoff.error_action(&object_key(obj.as_ref()), error)
}

async fn reconcile_task<K: TaskKind>(
    obj: &K,
    ctx: &BackupContext,
) -> Result<Outcome, ReconcileError> {
    let name = obj.name_any();
    let namespace = obj.namespace().ok_or_else(|| {
        ReconcileError::validation(format!("{} {} must be namespaced", K::KIND, name))
    })?;
    let store = K::store(ctx);

    let Some(current) = store.get(&namespace, &name).await? else {
        debug!("object no longer exists");
        return Ok(Outcome::Done);
    };
    if current.meta().deletion_timestamp.is_some() {
        return Ok(Outcome::Done);
    }
    let stored = current.task_status().cloned().unwrap_or_default();
    if stored.phase.is_terminal() {
        return Ok(Outcome::Done);
    }

    let job_name = job_name(&current);
    let job = match ctx.jobs.get(&namespace, &job_name).await? {
        Some(job) if controlled_by(&job, current.uid().as_deref()) => job,
        Some(_) => {
            return Err(ReconcileError::validation(format!(
                "job {} exists but is not controlled by {} {}",
                job_name,
                K::KIND,
                name
            )));
        }
        None => match current.plan(ctx).await? {
            JobPlan::Ready(spec) => create_job(&current, &namespace, &job_name, spec, ctx).await?,
            JobPlan::Wait { after, message } => {
                debug!(%message, "task is waiting");
                let next = TaskStatus {
                    phase: advance(stored.phase, Phase::New),
                    message: Some(message),
                    ..stored
                };
                write_status(store, &current, next).await?;
                return Ok(Outcome::Requeue(after));
            }
            JobPlan::Fail(message) => {
                warn!(%message, "task cannot run");
                let next = TaskStatus {
                    phase: Phase::Failed,
                    completion_time: Some(ctx.clock.now()),
                    message: Some(message.clone()),
                    ..stored
                };
                write_status(store, &current, next).await?;
                publish(
                    ctx,
                    &current,
                    EventType::Warning,
                    reasons::UPSTREAM_FAILED,
                    Some(message),
                )
                .await;
                return Ok(Outcome::Done);
            }
        },
    };

    let counts = TaskCounts::from_job(&job);
    let artifact = if current.requires_artifact() && counts.active == 0 && counts.succeeded > 0 {
        find_artifact(&namespace, &job_name, ctx).await?
    } else {
        Artifact::NotRequired
    };
    let phase = advance(stored.phase, derive_phase(counts, &artifact));

    let job_status = job.status.as_ref();
    let next = TaskStatus {
        phase,
        start_time: stored
            .start_time
            .or_else(|| job_status.and_then(|s| s.start_time.as_ref()).map(|t| t.0)),
        completion_time: phase.is_terminal().then(|| {
            stored
                .completion_time
                .or_else(|| job_status.and_then(|s| s.completion_time.as_ref()).map(|t| t.0))
                .unwrap_or_else(|| ctx.clock.now())
        }),
        artifact: match &artifact {
            Artifact::Found(id) => Some(id.clone()),
            _ => stored.artifact.clone(),
        },
        message: match (phase, &artifact) {
            (Phase::Failed, Artifact::Missing) => {
                Some("job succeeded but reported no snapshot id".to_string())
            }
            (Phase::Failed, _) => Some(format!("job {} failed", job_name)),
            _ => None,
        },
    };

    let changed = write_status(store, &current, next).await?;
    if changed && phase.is_terminal() {
        info!(%phase, "task finished");
        let (type_, reason) = match phase {
            Phase::Completed => (EventType::Normal, reasons::TASK_COMPLETED),
            _ => (EventType::Warning, reasons::TASK_FAILED),
        };
        publish(ctx, &current, type_, reason, None).await;
    }

    Ok(Outcome::Done)
}

async fn create_job<K: TaskKind>(
    task: &K,
    namespace: &str,
    name: &str,
    spec: JobSpec,
    ctx: &BackupContext,
) -> Result<Job, ReconcileError> {
    let job = Job {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(child_labels(K::KIND, &task.name_any())),
            ..Default::default()
        },
        spec: Some(spec),
        ..Default::default()
    };
    let (outcome, job) = sync_child(ctx.jobs.as_ref(), task, job).await?;
    if outcome == SyncOutcome::Created {
        record_child_created(K::KIND, "Job");
        info!(job = %name, "created job");
    }
    Ok(job)
}

/// Look for the snapshot id in the output of the Job's succeeded pod
async fn find_artifact(
    namespace: &str,
    job: &str,
    ctx: &BackupContext,
) -> Result<Artifact, ReconcileError> {
    let selector = BTreeMap::from([(JOB_NAME_LABEL.to_string(), job.to_string())]);
    let pods = ctx.pods.list(namespace, &selector).await?;
    let pod = pods
        .iter()
        .filter(|p| {
            p.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Succeeded")
        })
        .max_by_key(|p| p.creation_timestamp());
    let Some(pod) = pod else {
        warn!(job, "no succeeded pod left to read the snapshot id from");
        return Ok(Artifact::Missing);
    };

    let output = ctx
        .logs
        .fetch(namespace, &pod.name_any(), TASK_CONTAINER)
        .await?;
    Ok(match extract_snapshot_id(&output) {
        Some(id) => Artifact::Found(id),
        None => Artifact::Missing,
    })
}

/// Patch the task status when it differs from the stored one
async fn write_status<K: TaskKind>(
    store: &dyn ObjectStore<K>,
    obj: &K,
    next: TaskStatus,
) -> Result<bool, ReconcileError> {
    if obj.task_status() == Some(&next) {
        return Ok(false);
    }
    let value = serde_json::to_value(&next).map_err(converge_common::Error::from)?;
    store
        .patch_status(&obj.namespace().unwrap_or_default(), &obj.name_any(), &value)
        .await?;
    debug!(phase = %next.phase, "status updated");
    Ok(true)
}

pub(crate) async fn publish<K: Resource<DynamicType = ()>>(
    ctx: &BackupContext,
    obj: &K,
    type_: EventType,
    reason: &str,
    note: Option<String>,
) {
    ctx.events
        .publish(&obj.object_ref(&()), type_, reason, actions::RECONCILE, note)
        .await;
}
