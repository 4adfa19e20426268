//! In-memory wiring of [`BackupContext`] for controller tests

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{Job, JobStatus};
use k8s_openapi::api::core::v1::{ObjectReference, Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::ObjectMeta;
use kube::runtime::events::EventType;
use parking_lot::Mutex;

use converge_common::crd::{Backup, BackupScheduled, DataSync, Image, ImageScheduled, Restore};
use converge_common::events::EventPublisher;
use converge_engine::{ErrorBackoff, FixedClock, MemoryStore};

use crate::context::BackupContext;
use crate::logs::MockLogSource;
use crate::payload::{ResticConfig, ResticPayload};

pub(crate) const NAMESPACE: &str = "apps";

/// One published event
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Recorded {
    pub object: String,
    pub warning: bool,
    pub reason: String,
}

/// Event publisher that remembers what it was given
#[derive(Default)]
pub(crate) struct RecordingEvents {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingEvents {
    pub fn reasons(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.reason.clone()).collect()
    }

    pub fn all(&self) -> Vec<Recorded> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingEvents {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
        self.events.lock().push(Recorded {
            object: resource_ref.name.clone().unwrap_or_default(),
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
        });
    }
}

/// Stores, clock and event sink behind a test [`BackupContext`]
pub(crate) struct Harness {
    pub backups: Arc<MemoryStore<Backup>>,
    pub backup_schedules: Arc<MemoryStore<BackupScheduled>>,
    pub images: Arc<MemoryStore<Image>>,
    pub image_schedules: Arc<MemoryStore<ImageScheduled>>,
    pub restores: Arc<MemoryStore<Restore>>,
    pub syncs: Arc<MemoryStore<DataSync>>,
    pub jobs: Arc<MemoryStore<Job>>,
    pub pods: Arc<MemoryStore<Pod>>,
    pub deployments: Arc<MemoryStore<Deployment>>,
    pub clock: Arc<FixedClock>,
    pub events: Arc<RecordingEvents>,
}

impl Harness {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            backups: Arc::new(MemoryStore::new()),
            backup_schedules: Arc::new(MemoryStore::new()),
            images: Arc::new(MemoryStore::new()),
            image_schedules: Arc::new(MemoryStore::new()),
            restores: Arc::new(MemoryStore::new()),
            syncs: Arc::new(MemoryStore::new()),
            jobs: Arc::new(MemoryStore::new()),
            pods: Arc::new(MemoryStore::new()),
            deployments: Arc::new(MemoryStore::new()),
            clock: Arc::new(FixedClock::new(now)),
            events: Arc::new(RecordingEvents::default()),
        }
    }

    /// Context whose log source is `logs`
    pub fn context_with_logs(&self, logs: MockLogSource) -> Arc<BackupContext> {
        Arc::new(BackupContext {
            backups: self.backups.clone(),
            backup_schedules: self.backup_schedules.clone(),
            images: self.images.clone(),
            image_schedules: self.image_schedules.clone(),
            restores: self.restores.clone(),
            syncs: self.syncs.clone(),
            jobs: self.jobs.clone(),
            pods: self.pods.clone(),
            deployments: self.deployments.clone(),
            logs: Arc::new(logs),
            payload: Arc::new(ResticPayload::new(ResticConfig {
                image: "restic:test".to_string(),
                secret: "restic-repo".to_string(),
            })),
            clock: self.clock.clone(),
            events: self.events.clone(),
            backoff: ErrorBackoff::default(),
        })
    }

    /// Context that must never read logs
    pub fn context(&self) -> Arc<BackupContext> {
        self.context_with_logs(MockLogSource::new())
    }

    /// Overwrite the status of a stored Job
    pub fn set_job_status(&self, name: &str, active: i32, succeeded: i32, failed: i32) {
        let mut job = self.jobs.snapshot(NAMESPACE, name).expect("job exists");
        job.status = Some(JobStatus {
            active: Some(active),
            succeeded: Some(succeeded),
            failed: Some(failed),
            start_time: Some(Time(self.clock_now())),
            completion_time: (active == 0 && (succeeded > 0 || failed > 0))
                .then(|| Time(self.clock_now())),
            ..Default::default()
        });
        self.jobs.put(job);
    }

    /// Seed a finished pod belonging to Job `job`
    pub fn add_job_pod(&self, job: &str, pod: &str) {
        self.pods.insert(Pod {
            metadata: ObjectMeta {
                name: Some(pod.to_string()),
                namespace: Some(NAMESPACE.to_string()),
                labels: Some(
                    [(converge_common::JOB_NAME_LABEL.to_string(), job.to_string())].into(),
                ),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some("Succeeded".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    fn clock_now(&self) -> DateTime<Utc> {
        use converge_engine::Clock;
        self.clock.now()
    }
}

/// Metadata in the test namespace, created at `created`
pub(crate) fn meta(name: &str, created: DateTime<Utc>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        creation_timestamp: Some(Time(created)),
        ..Default::default()
    }
}
