//! Job payloads for the backup tool
//!
//! The controllers decide *when* a Job runs; a [`JobPayload`] decides *what*
//! runs in it. [`ResticPayload`] runs restic against a shared repository whose
//! location and password come from a Secret.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::JobSpec;
use k8s_openapi::api::core::v1::{
    Container, EnvFromSource, EnvVar, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec,
    SecretEnvSource, SecretVolumeSource, Volume, VolumeMount,
};
use kube::api::ObjectMeta;

#[cfg(test)]
use mockall::automock;

use converge_common::crd::{BackupSpec, ImageSpec, RestoreSpec};

/// Name of the container whose output the controllers parse
pub const TASK_CONTAINER: &str = "task";

/// Root under which volumes are mounted inside task pods
const DATA_ROOT: &str = "/data";

/// Root under which database credential Secrets are mounted
const DATABASE_ROOT: &str = "/databases";

/// Builds the Job spec for each kind of task
#[cfg_attr(test, automock)]
pub trait JobPayload: Send + Sync {
    /// Job that backs up volumes and databases
    fn backup(&self, owner: &str, spec: &BackupSpec) -> JobSpec;

    /// Job that builds a database image
    fn image(&self, owner: &str, spec: &ImageSpec) -> JobSpec;

    /// Job that restores `snapshot` into volumes and databases
    fn restore(&self, owner: &str, spec: &RestoreSpec, snapshot: &str) -> JobSpec;
}

/// Settings for [`ResticPayload`]
#[derive(Debug, Clone)]
pub struct ResticConfig {
    /// Container image carrying restic and the database dump tools
    pub image: String,
    /// Secret with `RESTIC_REPOSITORY`, `RESTIC_PASSWORD` and backend credentials
    pub secret: String,
}

/// [`JobPayload`] running restic
pub struct ResticPayload {
    config: ResticConfig,
}

impl ResticPayload {
    /// Create a payload builder
    pub fn new(config: ResticConfig) -> Self {
        Self { config }
    }

    fn job(&self, owner: &str, args: Vec<String>, volumes: &[String], databases: &[String]) -> JobSpec {
        let mut pod_volumes = Vec::new();
        let mut mounts = Vec::new();
        for volume in volumes {
            pod_volumes.push(Volume {
                name: format!("data-{}", volume),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: volume.clone(),
                    read_only: None,
                }),
                ..Default::default()
            });
            mounts.push(VolumeMount {
                name: format!("data-{}", volume),
                mount_path: format!("{}/{}", DATA_ROOT, volume),
                ..Default::default()
            });
        }
        for database in databases {
            pod_volumes.push(Volume {
                name: format!("db-{}", database),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(database.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            });
            mounts.push(VolumeMount {
                name: format!("db-{}", database),
                mount_path: format!("{}/{}", DATABASE_ROOT, database),
                read_only: Some(true),
                ..Default::default()
            });
        }

        let container = Container {
            name: TASK_CONTAINER.to_string(),
            image: Some(self.config.image.clone()),
            args: Some(args),
            env: Some(vec![EnvVar {
                name: "RESTIC_HOST".to_string(),
                value: Some(owner.to_string()),
                ..Default::default()
            }]),
            env_from: Some(vec![EnvFromSource {
                secret_ref: Some(SecretEnvSource {
                    name: self.config.secret.clone(),
                    optional: None,
                }),
                ..Default::default()
            }]),
            volume_mounts: Some(mounts),
            ..Default::default()
        };

        JobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(BTreeMap::from([(
                        converge_common::OWNER_LABEL.to_string(),
                        owner.to_string(),
                    )])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(pod_volumes),
                    restart_policy: Some("Never".to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }
    }
}

fn database_args(databases: &[String]) -> impl Iterator<Item = String> + '_ {
    databases
        .iter()
        .map(|db| format!("--database={}/{}", DATABASE_ROOT, db))
}

impl JobPayload for ResticPayload {
    fn backup(&self, owner: &str, spec: &BackupSpec) -> JobSpec {
        let mut args = vec!["backup".to_string()];
        args.extend(spec.tags.iter().map(|t| format!("--tag={}", t)));
        args.extend(database_args(&spec.databases));
        args.extend(spec.volumes.iter().map(|v| format!("{}/{}", DATA_ROOT, v)));
        self.job(owner, args, &spec.volumes, &spec.databases)
    }

    fn image(&self, owner: &str, spec: &ImageSpec) -> JobSpec {
        let tag = spec.tag.clone().unwrap_or_else(|| owner.to_string());
        let mut args = vec![
            "image".to_string(),
            format!("--repository={}", spec.repository),
            format!("--tag={}", tag),
        ];
        args.extend(database_args(&spec.databases));
        self.job(owner, args, &[], &spec.databases)
    }

    fn restore(&self, owner: &str, spec: &RestoreSpec, snapshot: &str) -> JobSpec {
        let mut args = vec!["restore".to_string(), format!("--snapshot={}", snapshot)];
        args.extend(database_args(&spec.databases));
        args.extend(spec.volumes.iter().map(|v| format!("{}/{}", DATA_ROOT, v)));
        self.job(owner, args, &spec.volumes, &spec.databases)
    }
}
