//! Scheduled controllers: BackupScheduled and ImageScheduled
//!
//! Every pass recomputes the parent's status from the full list of its
//! children, trims finished children beyond the history limits, and then
//! creates at most one child for the most recent missed fire time.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::api::ObjectMeta;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use converge_common::crd::{
    ActiveReference, Backup, BackupScheduled, Image, ImageScheduled, Phase, ScheduleSpec,
    ScheduledStatus,
};
use converge_common::events::reasons;
use converge_common::kube_utils::{
    child_labels, format_scheduled_at, object_key, owner_selector, scheduled_at,
    scheduled_child_name,
};
use converge_common::metrics::record_child_created;
use converge_common::SCHEDULED_AT_ANNOTATION;
use converge_engine::policy::{decide, requeue_after, select_for_cleanup, ScheduleDecision};
use converge_engine::reconcile::instrumented;
use converge_engine::{
    delete_if_present, next_schedule, sync_child, CronSchedule, ObjectStore, Outcome,
    ReconcileError, ScheduleError, StoreObject, SyncOutcome,
};

use crate::context::BackupContext;
use crate::task::{publish, TaskKind};

/// A kind that creates task children on a cron schedule
pub trait ScheduledKind: StoreObject {
    /// Kind of the children
    type Child: TaskKind;

    /// Kind name for labels, metrics and logs
    const KIND: &'static str;

    /// Scheduling settings
    fn schedule(&self) -> &ScheduleSpec;

    /// Stored status
    fn scheduled_status(&self) -> Option<&ScheduledStatus>;

    /// Store holding objects of this kind
    fn store(ctx: &BackupContext) -> &dyn ObjectStore<Self>;

    /// A child carrying this parent's template, with empty metadata
    fn child_from_template(&self) -> Self::Child;
}

impl ScheduledKind for BackupScheduled {
    type Child = Backup;
    const KIND: &'static str = "BackupScheduled";

    fn schedule(&self) -> &ScheduleSpec {
        &self.spec.schedule
    }

    fn scheduled_status(&self) -> Option<&ScheduledStatus> {
        self.status.as_ref()
    }

    fn store(ctx: &BackupContext) -> &dyn ObjectStore<Self> {
        ctx.backup_schedules.as_ref()
    }

    fn child_from_template(&self) -> Backup {
        Backup {
            metadata: ObjectMeta::default(),
            spec: self.spec.template.clone(),
            status: None,
        }
    }
}

impl ScheduledKind for ImageScheduled {
    type Child = Image;
    const KIND: &'static str = "ImageScheduled";

    fn schedule(&self) -> &ScheduleSpec {
        &self.spec.schedule
    }

    fn scheduled_status(&self) -> Option<&ScheduledStatus> {
        self.status.as_ref()
    }

    fn store(ctx: &BackupContext) -> &dyn ObjectStore<Self> {
        ctx.image_schedules.as_ref()
    }

    fn child_from_template(&self) -> Image {
        Image {
            metadata: ObjectMeta::default(),
            spec: self.spec.template.clone(),
            status: None,
        }
    }
}

/// Children of one parent split by phase
#[derive(Debug)]
pub struct Children<C> {
    /// Not yet terminal
    pub active: Vec<C>,
    /// Completed
    pub successful: Vec<C>,
    /// Failed
    pub failed: Vec<C>,
}

impl<C: TaskKind> Children<C> {
    /// Partition children by phase
    pub fn partition(children: Vec<C>) -> Self {
        let mut split = Self {
            active: Vec::new(),
            successful: Vec::new(),
            failed: Vec::new(),
        };
        for child in children {
            match phase_of(&child) {
                Phase::Completed => split.successful.push(child),
                Phase::Failed => split.failed.push(child),
                _ => split.active.push(child),
            }
        }
        split
    }
}

fn phase_of<C: TaskKind>(child: &C) -> Phase {
    child.task_status().map(|s| s.phase).unwrap_or_default()
}

/// Ordering key for retention: task start, else fire time, else creation
fn started_at<C: TaskKind>(child: &C) -> Option<DateTime<Utc>> {
    child
        .task_status()
        .and_then(|s| s.start_time)
        .or_else(|| scheduled_at(child))
        .or_else(|| child.creation_timestamp().map(|t| t.0))
}

/// Recompute a parent's status from its children and its previous status
///
/// `lastScheduleTime` never moves backwards and is rebuilt from the children's
/// scheduling annotations when the stored status was lost.
pub fn observe<C: TaskKind>(previous: &ScheduledStatus, children: &Children<C>) -> ScheduledStatus {
    let mut active: Vec<ActiveReference> = children
        .active
        .iter()
        .map(|c| ActiveReference {
            name: c.name_any(),
            uid: c.uid(),
        })
        .collect();
    active.sort();

    let newest_fire = children
        .active
        .iter()
        .chain(&children.successful)
        .chain(&children.failed)
        .filter_map(|c| scheduled_at(c))
        .max();
    let newest_success = children
        .successful
        .iter()
        .filter_map(|c| c.task_status().and_then(|s| s.completion_time))
        .max();

    ScheduledStatus {
        last_schedule_time: previous.last_schedule_time.max(newest_fire),
        last_successful_time: previous.last_successful_time.max(newest_success),
        active,
    }
}

/// Reconcile a scheduled parent
#[instrument(skip(obj, ctx), fields(kind = S::KIND, object = %obj.name_any()))]
pub async fn reconcile<S: ScheduledKind>(
    obj: Arc<S>,
    ctx: Arc<BackupContext>,
) -> Result<Action, ReconcileError> {
    let key = object_key(obj.as_ref());
    instrumented(S::KIND, &key, &ctx.backoff, reconcile_scheduled(obj.as_ref(), &ctx)).await
}

/// Error policy for scheduled parents
pub fn error_policy<S: ScheduledKind>(
    obj: Arc<S>,
    error: &ReconcileError,
    ctx: Arc<BackupContext>,
) -> Action {
    ctx.backoff.error_action(&object_key(obj.as_ref()), error)
}

async fn reconcile_scheduled<S: ScheduledKind>(
    obj: &S,
    ctx: &BackupContext,
) -> Result<Outcome, ReconcileError> {
    let name = obj.name_any();
    let namespace = obj.namespace().ok_or_else(|| {
        ReconcileError::validation(format!("{} {} must be namespaced", S::KIND, name))
    })?;
    let store = S::store(ctx);
    let child_store = <S::Child as TaskKind>::store(ctx);

    let Some(parent) = store.get(&namespace, &name).await? else {
        debug!("object no longer exists");
        return Ok(Outcome::Done);
    };
    if parent.meta().deletion_timestamp.is_some() {
        return Ok(Outcome::Done);
    }
    let spec = parent.schedule().clone();
    let now = ctx.clock.now();

    let listed = child_store
        .list(&namespace, &owner_selector(S::KIND, &name))
        .await?;
    let children = Children::partition(listed);
    let previous = parent.scheduled_status().cloned().unwrap_or_default();
    let mut status = observe(&previous, &children);
    write_status(store, &parent, &status).await?;

    prune(&parent, &namespace, children, &status, ctx).await?;

    if spec.suspend {
        debug!("schedule suspended");
        return Ok(Outcome::Done);
    }

    let cron = match CronSchedule::parse(&spec.schedule) {
        Ok(cron) => cron,
        Err(e) => {
            publish(ctx, &parent, EventType::Warning, reasons::INVALID_SCHEDULE, Some(e.to_string()))
                .await;
            return Err(e.into());
        }
    };

    let created = parent
        .creation_timestamp()
        .map(|t| t.0)
        .unwrap_or(now);
    let next = match next_schedule(
        &cron,
        status.last_schedule_time,
        created,
        spec.starting_deadline(),
        now,
    ) {
        Ok(next) => next,
        Err(e @ ScheduleError::TooManyMissed { .. }) => {
            warn!(error = %e, "too many missed runs, set a starting deadline to bound catch-up");
            publish(ctx, &parent, EventType::Warning, reasons::TOO_MANY_MISSED, Some(e.to_string()))
                .await;
            let wait = cron
                .next_after(now)
                .and_then(|t| (t - now).to_std().ok())
                .map(Outcome::Requeue)
                .unwrap_or(Outcome::Done);
            return Ok(wait);
        }
        Err(e) => return Err(e.into()),
    };

    match decide(
        &next,
        spec.starting_deadline(),
        spec.concurrency_policy,
        status.active.len(),
        now,
    ) {
        ScheduleDecision::Idle => {}
        ScheduleDecision::TooLate { missed } => {
            info!(%missed, "missed run is past its starting deadline");
            publish(
                ctx,
                &parent,
                EventType::Normal,
                reasons::RUN_TOO_LATE,
                Some(format!("run for {} is past its starting deadline", missed)),
            )
            .await;
        }
        ScheduleDecision::Skip { missed } => {
            info!(%missed, active = status.active.len(), "run skipped, another is active");
            publish(
                ctx,
                &parent,
                EventType::Normal,
                reasons::RUN_SKIPPED,
                Some(format!("run for {} skipped: concurrency policy Forbid", missed)),
            )
            .await;
        }
        ScheduleDecision::Run {
            fire_time,
            replace_active,
        } => {
            if replace_active {
                for active in &status.active {
                    delete_if_present(child_store, &namespace, &active.name).await?;
                    info!(child = %active.name, "deleted active run to replace it");
                }
                publish(
                    ctx,
                    &parent,
                    EventType::Normal,
                    reasons::RUN_REPLACED,
                    Some(format!("replaced {} active run(s)", status.active.len())),
                )
                .await;
                status.active.clear();
            }

            let child = create_child(&parent, &namespace, fire_time, ctx).await?;
            status.last_schedule_time = Some(fire_time);
            let reference = ActiveReference {
                name: child.name_any(),
                uid: child.uid(),
            };
            if !status.active.iter().any(|a| a.name == reference.name) {
                status.active.push(reference);
                status.active.sort();
            }
            let parent = store.get(&namespace, &name).await?.unwrap_or(parent);
            write_status(store, &parent, &status).await?;
        }
    }

    Ok(requeue_after(&next, now)
        .map(Outcome::Requeue)
        .unwrap_or(Outcome::Done))
}

async fn create_child<S: ScheduledKind>(
    parent: &S,
    namespace: &str,
    fire_time: DateTime<Utc>,
    ctx: &BackupContext,
) -> Result<S::Child, ReconcileError> {
    let parent_name = parent.name_any();
    let child_name = scheduled_child_name(&parent_name, fire_time);

    let mut child = parent.child_from_template();
    let meta = child.meta_mut();
    meta.name = Some(child_name.clone());
    meta.namespace = Some(namespace.to_string());
    meta.labels = Some(child_labels(S::KIND, &parent_name));
    meta.annotations = Some(BTreeMap::from([(
        SCHEDULED_AT_ANNOTATION.to_string(),
        format_scheduled_at(fire_time),
    )]));

    let (outcome, child) =
        sync_child(<S::Child as TaskKind>::store(ctx), parent, child).await?;
    if outcome == SyncOutcome::Created {
        record_child_created(S::KIND, <S::Child as TaskKind>::KIND);
        info!(child = %child_name, %fire_time, "created scheduled run");
        publish(
            ctx,
            parent,
            EventType::Normal,
            reasons::CHILD_CREATED,
            Some(format!("created {}", child_name)),
        )
        .await;
    }
    Ok(child)
}

/// Delete finished children beyond the history limits
///
/// Active children are never deleted. A failed delete other than "already
/// gone" aborts the pass.
async fn prune<S: ScheduledKind>(
    parent: &S,
    namespace: &str,
    children: Children<S::Child>,
    status: &ScheduledStatus,
    ctx: &BackupContext,
) -> Result<(), ReconcileError> {
    let spec = parent.schedule();
    let is_active = |c: &S::Child| status.active.iter().any(|a| a.name == c.name_any());

    let mut doomed = select_for_cleanup(
        children.successful,
        spec.successful_history_limit,
        started_at::<S::Child>,
        is_active,
    );
    doomed.extend(select_for_cleanup(
        children.failed,
        spec.failed_history_limit,
        started_at::<S::Child>,
        is_active,
    ));
    if doomed.is_empty() {
        return Ok(());
    }

    let store = <S::Child as TaskKind>::store(ctx);
    for child in &doomed {
        delete_if_present(store, namespace, &child.name_any()).await?;
        debug!(child = %child.name_any(), "pruned finished run");
    }
    publish(
        ctx,
        parent,
        EventType::Normal,
        reasons::HISTORY_PRUNED,
        Some(format!("deleted {} finished run(s)", doomed.len())),
    )
    .await;
    Ok(())
}

async fn write_status<S: ScheduledKind>(
    store: &dyn ObjectStore<S>,
    parent: &S,
    status: &ScheduledStatus,
) -> Result<(), ReconcileError> {
    if parent.scheduled_status() == Some(status) {
        return Ok(());
    }
    let value = serde_json::to_value(status).map_err(converge_common::Error::from)?;
    store
        .patch_status(&parent.namespace().unwrap_or_default(), &parent.name_any(), &value)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{meta, Harness, NAMESPACE};
    use chrono::TimeZone;
    use converge_common::crd::{
        BackupScheduledSpec, BackupSpec, ConcurrencyPolicy, ImageScheduledSpec, ImageSpec,
        TaskStatus,
    };
    use converge_common::kube_utils::child_labels;
    use std::time::Duration;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn scheduled(name: &str, schedule: &str, created: DateTime<Utc>) -> BackupScheduled {
        BackupScheduled {
            metadata: meta(name, created),
            spec: BackupScheduledSpec {
                schedule: ScheduleSpec {
                    schedule: schedule.to_string(),
                    ..Default::default()
                },
                template: BackupSpec {
                    volumes: vec!["uploads".into()],
                    databases: vec![],
                    tags: vec!["nightly".into()],
                },
            },
            status: None,
        }
    }

    fn child(parent: &str, fire: DateTime<Utc>, phase: Phase, started_hour: u32) -> Backup {
        let mut m = meta(&scheduled_child_name(parent, fire), fire);
        m.labels = Some(child_labels("BackupScheduled", parent));
        m.annotations = Some(BTreeMap::from([(
            SCHEDULED_AT_ANNOTATION.to_string(),
            format_scheduled_at(fire),
        )]));
        Backup {
            metadata: m,
            spec: BackupSpec::default(),
            status: Some(TaskStatus {
                phase,
                start_time: Some(Utc.with_ymd_and_hms(2020, 4, 1, started_hour, 0, 0).unwrap()),
                completion_time: phase
                    .is_terminal()
                    .then(|| Utc.with_ymd_and_hms(2020, 4, 1, started_hour, 30, 0).unwrap()),
                ..Default::default()
            }),
        }
    }

    fn stored_status(h: &Harness, name: &str) -> ScheduledStatus {
        h.backup_schedules
            .snapshot(NAMESPACE, name)
            .unwrap()
            .status
            .unwrap_or_default()
    }

    /// Story: a daily schedule with a one minute deadline is created at
    /// midnight and reconciled 30 seconds later. The midnight run is still
    /// within its deadline, so exactly one child is created for it.
    #[tokio::test]
    async fn story_first_run_inside_the_deadline() {
        let h = Harness::new(at("2020-04-02T00:00:30Z"));
        let ctx = h.context();
        let mut parent = scheduled("nightly", "0 0 * * *", at("2020-04-02T00:00:00Z"));
        parent.spec.schedule.starting_deadline_seconds = Some(60);
        let parent = Arc::new(h.backup_schedules.insert(parent));

        let action = reconcile(parent.clone(), ctx.clone()).await.unwrap();

        let child = h
            .backups
            .snapshot(NAMESPACE, "nightly-1585785600")
            .expect("child for the midnight run");
        assert_eq!(
            child.annotations().get(SCHEDULED_AT_ANNOTATION).unwrap(),
            "2020-04-02T00:00:00Z"
        );
        assert_eq!(child.spec.tags, vec!["nightly".to_string()]);
        assert_eq!(child.owner_references()[0].name, "nightly");
        assert_eq!(child.owner_references()[0].controller, Some(true));

        let status = stored_status(&h, "nightly");
        assert_eq!(status.last_schedule_time, Some(at("2020-04-02T00:00:00Z")));
        assert_eq!(status.active.len(), 1);
        assert_eq!(status.active[0].name, "nightly-1585785600");

        // requeued until the next midnight
        let until_next = at("2020-04-03T00:00:00Z") - at("2020-04-02T00:00:30Z");
        assert_eq!(action, Action::requeue(until_next.to_std().unwrap()));
        assert_eq!(h.events.reasons(), vec![reasons::CHILD_CREATED.to_string()]);

        // a second pass at the same instant creates nothing new
        reconcile(parent, ctx).await.unwrap();
        assert_eq!(h.backups.all().len(), 1);
    }

    /// Story: the controller was down for a day. When it comes back two
    /// minutes after the next midnight, the deadline has passed and nothing
    /// runs; it just waits for the following fire time.
    #[tokio::test]
    async fn story_missed_run_past_deadline_only_requeues() {
        let h = Harness::new(at("2020-04-03T00:02:00Z"));
        let ctx = h.context();
        let mut parent = scheduled("nightly", "0 0 * * *", at("2020-04-02T00:00:00Z"));
        parent.spec.schedule.starting_deadline_seconds = Some(60);
        parent.status = Some(ScheduledStatus {
            last_schedule_time: Some(at("2020-04-02T00:00:00Z")),
            ..Default::default()
        });
        let parent = Arc::new(h.backup_schedules.insert(parent));

        let action = reconcile(parent, ctx).await.unwrap();
        assert!(h.backups.all().is_empty());
        let until_next = at("2020-04-04T00:00:00Z") - at("2020-04-03T00:02:00Z");
        assert_eq!(action, Action::requeue(until_next.to_std().unwrap()));
    }

    #[tokio::test]
    async fn forbid_never_creates_while_a_run_is_active() {
        let h = Harness::new(at("2020-04-02T01:00:10Z"));
        let ctx = h.context();
        let mut parent = scheduled("hourly", "0 * * * *", at("2020-04-02T00:00:00Z"));
        parent.spec.schedule.concurrency_policy = ConcurrencyPolicy::Forbid;
        parent.status = Some(ScheduledStatus {
            last_schedule_time: Some(at("2020-04-02T00:00:00Z")),
            ..Default::default()
        });
        let parent = Arc::new(h.backup_schedules.insert(parent));
        h.backups.insert(child(
            "hourly",
            at("2020-04-02T00:00:00Z"),
            Phase::InProgress,
            0,
        ));

        reconcile(parent, ctx).await.unwrap();
        assert_eq!(h.backups.all().len(), 1);
        assert_eq!(h.events.reasons(), vec![reasons::RUN_SKIPPED.to_string()]);
        assert_eq!(stored_status(&h, "hourly").active.len(), 1);
    }

    #[tokio::test]
    async fn replace_deletes_active_runs_before_creating() {
        let h = Harness::new(at("2020-04-02T01:00:10Z"));
        let ctx = h.context();
        let mut parent = scheduled("hourly", "0 * * * *", at("2020-04-02T00:00:00Z"));
        parent.spec.schedule.concurrency_policy = ConcurrencyPolicy::Replace;
        parent.status = Some(ScheduledStatus {
            last_schedule_time: Some(at("2020-04-02T00:00:00Z")),
            ..Default::default()
        });
        let parent = Arc::new(h.backup_schedules.insert(parent));
        h.backups.insert(child(
            "hourly",
            at("2020-04-02T00:00:00Z"),
            Phase::InProgress,
            0,
        ));

        reconcile(parent, ctx).await.unwrap();
        assert_eq!(h.backups.deleted(), vec!["hourly-1585785600".to_string()]);
        assert!(h.backups.snapshot(NAMESPACE, "hourly-1585789200").is_some());
        let status = stored_status(&h, "hourly");
        assert_eq!(status.active.len(), 1);
        assert_eq!(status.active[0].name, "hourly-1585789200");
    }

    /// Story: the active run is removed by someone else between the list and
    /// the replace. The delete finds nothing, which is fine, and the new run
    /// is still created.
    #[tokio::test]
    async fn story_replace_tolerates_an_active_run_that_is_already_gone() {
        let h = Harness::new(at("2020-04-02T01:00:10Z"));
        let ctx = h.context();
        let mut parent = scheduled("hourly", "0 * * * *", at("2020-04-02T00:00:00Z"));
        parent.spec.schedule.concurrency_policy = ConcurrencyPolicy::Replace;
        parent.status = Some(ScheduledStatus {
            last_schedule_time: Some(at("2020-04-02T00:00:00Z")),
            ..Default::default()
        });
        let parent = Arc::new(h.backup_schedules.insert(parent));
        h.backups.insert(child(
            "hourly",
            at("2020-04-02T00:00:00Z"),
            Phase::InProgress,
            0,
        ));
        h.backups.vanish_on_delete("hourly-1585785600");

        reconcile(parent, ctx).await.unwrap();

        assert!(h.backups.deleted().is_empty());
        assert!(h.backups.snapshot(NAMESPACE, "hourly-1585785600").is_none());
        assert!(h.backups.snapshot(NAMESPACE, "hourly-1585789200").is_some());
        let status = stored_status(&h, "hourly");
        assert_eq!(status.last_schedule_time, Some(at("2020-04-02T01:00:00Z")));
        assert_eq!(status.active.len(), 1);
        assert_eq!(status.active[0].name, "hourly-1585789200");
        assert_eq!(
            h.events.reasons(),
            vec![
                reasons::RUN_REPLACED.to_string(),
                reasons::CHILD_CREATED.to_string()
            ]
        );
    }

    /// Story: a nightly image schedule fires at midnight and stamps out one
    /// Image from its template, owned and labelled by the schedule.
    #[tokio::test]
    async fn story_image_schedule_creates_an_image_per_run() {
        let h = Harness::new(at("2020-04-02T00:00:30Z"));
        let ctx = h.context();
        let parent = ImageScheduled {
            metadata: meta("orders", at("2020-04-01T12:00:00Z")),
            spec: ImageScheduledSpec {
                schedule: ScheduleSpec {
                    schedule: "0 0 * * *".to_string(),
                    starting_deadline_seconds: Some(300),
                    ..Default::default()
                },
                template: ImageSpec {
                    databases: vec!["orders-db".into()],
                    repository: "registry.example.com/orders".into(),
                    tag: None,
                },
            },
            status: None,
        };
        let parent = Arc::new(h.image_schedules.insert(parent));

        reconcile(parent.clone(), ctx.clone()).await.unwrap();

        let image = h
            .images
            .snapshot(NAMESPACE, "orders-1585785600")
            .expect("image for the midnight run");
        assert_eq!(image.spec.repository, "registry.example.com/orders");
        assert_eq!(image.spec.databases, vec!["orders-db".to_string()]);
        assert_eq!(
            image.annotations().get(SCHEDULED_AT_ANNOTATION).unwrap(),
            "2020-04-02T00:00:00Z"
        );
        assert_eq!(
            image.labels(),
            &child_labels("ImageScheduled", "orders")
        );
        let owner = &image.owner_references()[0];
        assert_eq!(owner.kind, "ImageScheduled");
        assert_eq!(owner.name, "orders");
        assert_eq!(owner.controller, Some(true));
        assert!(h.backups.all().is_empty());

        let status = h
            .image_schedules
            .snapshot(NAMESPACE, "orders")
            .and_then(|p| p.status)
            .unwrap_or_default();
        assert_eq!(status.last_schedule_time, Some(at("2020-04-02T00:00:00Z")));
        assert_eq!(status.active.len(), 1);
        assert_eq!(status.active[0].name, "orders-1585785600");

        reconcile(parent, ctx).await.unwrap();
        assert_eq!(h.images.all().len(), 1);
    }

    #[tokio::test]
    async fn retention_deletes_oldest_successful_runs_beyond_limit() {
        let h = Harness::new(at("2020-04-01T09:10:00Z"));
        let ctx = h.context();
        let mut parent = scheduled("hourly", "0 * * * *", at("2020-04-01T00:00:00Z"));
        parent.spec.schedule.successful_history_limit = Some(2);
        parent.spec.schedule.suspend = true;
        let parent = Arc::new(h.backup_schedules.insert(parent));
        for hour in 1..=5 {
            let fire = Utc.with_ymd_and_hms(2020, 4, 1, hour, 0, 0).unwrap();
            h.backups
                .insert(child("hourly", fire, Phase::Completed, hour));
        }

        reconcile(parent, ctx).await.unwrap();

        // five successful, limit two: the three oldest go
        let mut deleted = h.backups.deleted();
        deleted.sort();
        assert_eq!(
            deleted,
            vec![
                "hourly-1585702800".to_string(),
                "hourly-1585706400".to_string(),
                "hourly-1585710000".to_string(),
            ]
        );
        assert_eq!(h.backups.all().len(), 2);
        assert!(h.events.reasons().contains(&reasons::HISTORY_PRUNED.to_string()));
    }

    #[tokio::test]
    async fn failed_delete_aborts_the_pass() {
        let h = Harness::new(at("2020-04-01T09:10:00Z"));
        let ctx = h.context();
        let mut parent = scheduled("hourly", "0 * * * *", at("2020-04-01T00:00:00Z"));
        parent.spec.schedule.failed_history_limit = Some(0);
        let parent = Arc::new(h.backup_schedules.insert(parent));
        let fire = Utc.with_ymd_and_hms(2020, 4, 1, 1, 0, 0).unwrap();
        h.backups.insert(child("hourly", fire, Phase::Failed, 1));
        h.backups.fail_deletes_of("hourly-1585702800");

        let err = reconcile(parent, ctx).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(h.backups.all().len(), 1);
    }

    #[tokio::test]
    async fn suspended_schedule_refreshes_status_but_creates_nothing() {
        let h = Harness::new(at("2020-04-01T09:10:00Z"));
        let ctx = h.context();
        let mut parent = scheduled("hourly", "0 * * * *", at("2020-04-01T00:00:00Z"));
        parent.spec.schedule.suspend = true;
        let parent = Arc::new(h.backup_schedules.insert(parent));
        let fire = Utc.with_ymd_and_hms(2020, 4, 1, 3, 0, 0).unwrap();
        h.backups.insert(child("hourly", fire, Phase::Completed, 3));

        let action = reconcile(parent, ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(h.backups.all().len(), 1);
        let status = stored_status(&h, "hourly");
        // rebuilt from the child's annotation
        assert_eq!(status.last_schedule_time, Some(fire));
        assert_eq!(
            status.last_successful_time,
            Some(Utc.with_ymd_and_hms(2020, 4, 1, 3, 30, 0).unwrap())
        );
        assert!(status.active.is_empty());
    }

    #[tokio::test]
    async fn malformed_cron_is_a_permanent_error() {
        let h = Harness::new(at("2020-04-01T09:10:00Z"));
        let ctx = h.context();
        let parent = Arc::new(h.backup_schedules.insert(scheduled(
            "broken",
            "a b * * * * *",
            at("2020-04-01T00:00:00Z"),
        )));

        let err = reconcile(parent.clone(), ctx.clone()).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("expected exactly 5 fields, found 7"));
        assert!(!err.is_retryable());
        assert_eq!(error_policy(parent, &err, ctx), Action::await_change());
        assert_eq!(h.events.reasons(), vec![reasons::INVALID_SCHEDULE.to_string()]);
    }

    #[tokio::test]
    async fn too_many_missed_runs_requeues_to_the_next_fire_time() {
        let h = Harness::new(at("2020-04-02T00:00:30Z"));
        let ctx = h.context();
        // every minute since the day before: far more than 100 missed runs
        let parent = Arc::new(h.backup_schedules.insert(scheduled(
            "minutely",
            "* * * * *",
            at("2020-04-01T00:00:00Z"),
        )));

        let action = reconcile(parent, ctx).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(30)));
        assert!(h.backups.all().is_empty());
        assert_eq!(h.events.reasons(), vec![reasons::TOO_MANY_MISSED.to_string()]);
    }

    #[test]
    fn observe_keeps_last_schedule_time_monotonic() {
        let previous = ScheduledStatus {
            last_schedule_time: Some(at("2020-04-01T05:00:00Z")),
            ..Default::default()
        };
        let older = child("hourly", at("2020-04-01T02:00:00Z"), Phase::InProgress, 2);
        let observed = observe(&previous, &Children::partition(vec![older]));
        assert_eq!(observed.last_schedule_time, Some(at("2020-04-01T05:00:00Z")));
        assert_eq!(observed.active.len(), 1);
    }
}
