//! Shared state for the backup family of controllers

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;

use converge_common::crd::{Backup, BackupScheduled, DataSync, Image, ImageScheduled, Restore};
use converge_common::events::{EventPublisher, KubeEventPublisher};
use converge_engine::{Clock, ErrorBackoff, KubeStore, ObjectStore, SystemClock};

use crate::logs::{KubeLogSource, LogSource};
use crate::payload::{JobPayload, ResticConfig, ResticPayload};

/// Field manager and event reporter name
pub const FIELD_MANAGER: &str = "converge-backup-controller";

/// Everything the backup, image, restore and sync controllers need
pub struct BackupContext {
    /// Backup objects
    pub backups: Arc<dyn ObjectStore<Backup>>,
    /// BackupScheduled objects
    pub backup_schedules: Arc<dyn ObjectStore<BackupScheduled>>,
    /// Image objects
    pub images: Arc<dyn ObjectStore<Image>>,
    /// ImageScheduled objects
    pub image_schedules: Arc<dyn ObjectStore<ImageScheduled>>,
    /// Restore objects
    pub restores: Arc<dyn ObjectStore<Restore>>,
    /// DataSync objects
    pub syncs: Arc<dyn ObjectStore<DataSync>>,
    /// Jobs running the tasks
    pub jobs: Arc<dyn ObjectStore<Job>>,
    /// Pods of those Jobs, for log lookup
    pub pods: Arc<dyn ObjectStore<Pod>>,
    /// Deployments gating DataSync restores
    pub deployments: Arc<dyn ObjectStore<Deployment>>,
    /// Task output
    pub logs: Arc<dyn LogSource>,
    /// Job contents
    pub payload: Arc<dyn JobPayload>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Kubernetes Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Per-object retry state
    pub backoff: ErrorBackoff,
}

impl BackupContext {
    /// Create a builder backed by the Kubernetes API
    pub fn builder(client: Client, restic: ResticConfig) -> BackupContextBuilder {
        BackupContextBuilder::new(client, restic)
    }
}

/// Builder for [`BackupContext`]
pub struct BackupContextBuilder {
    client: Client,
    restic: ResticConfig,
    clock: Option<Arc<dyn Clock>>,
    events: Option<Arc<dyn EventPublisher>>,
    backoff: Option<ErrorBackoff>,
}

impl BackupContextBuilder {
    fn new(client: Client, restic: ResticConfig) -> Self {
        Self {
            client,
            restic,
            clock: None,
            events: None,
            backoff: None,
        }
    }

    /// Override the time source
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Override the event publisher
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Override the retry policy
    pub fn backoff(mut self, backoff: ErrorBackoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Build the context
    pub fn build(self) -> BackupContext {
        let client = self.client;
        BackupContext {
            backups: Arc::new(KubeStore::new(client.clone(), FIELD_MANAGER)),
            backup_schedules: Arc::new(KubeStore::new(client.clone(), FIELD_MANAGER)),
            images: Arc::new(KubeStore::new(client.clone(), FIELD_MANAGER)),
            image_schedules: Arc::new(KubeStore::new(client.clone(), FIELD_MANAGER)),
            restores: Arc::new(KubeStore::new(client.clone(), FIELD_MANAGER)),
            syncs: Arc::new(KubeStore::new(client.clone(), FIELD_MANAGER)),
            jobs: Arc::new(KubeStore::new(client.clone(), FIELD_MANAGER)),
            pods: Arc::new(KubeStore::new(client.clone(), FIELD_MANAGER)),
            deployments: Arc::new(KubeStore::new(client.clone(), FIELD_MANAGER)),
            logs: Arc::new(KubeLogSource::new(client.clone())),
            payload: Arc::new(ResticPayload::new(self.restic)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            events: self
                .events
                .unwrap_or_else(|| Arc::new(KubeEventPublisher::new(client, FIELD_MANAGER))),
            backoff: self.backoff.unwrap_or_default(),
        }
    }
}
