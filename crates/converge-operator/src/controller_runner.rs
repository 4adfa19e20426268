//! Controller runner - builds controller futures for each controller set
//!
//! Each `build_*` function returns a Vec of boxed futures that can be composed
//! by the caller. This keeps controller construction pure and testable.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource};

use converge_backup::{scheduled, sync_controller, task, BackupContext, ResticConfig};
use converge_certificate::{
    certificate_controller, request_controller, CertificateContext, CertificateIssuer,
};
use converge_common::crd::{
    Backup, BackupScheduled, Certificate, CertificateRequest, DataSync, Image, ImageScheduled,
    Restore,
};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Boxed controller future
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Where and how hard the controllers work
#[derive(Clone, Debug, Default)]
pub struct RunnerConfig {
    /// Restrict every watch to this namespace
    pub namespace: Option<String>,
    /// Objects reconciled concurrently per controller; 0 is unbounded
    pub concurrency: u16,
}

impl RunnerConfig {
    fn api<K>(&self, client: &Client) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        match &self.namespace {
            Some(ns) => Api::namespaced(client.clone(), ns),
            None => Api::all(client.clone()),
        }
    }

    fn controller(&self) -> ControllerConfig {
        ControllerConfig::default().concurrency(self.concurrency)
    }
}

fn watcher() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Build backup controller futures
/// (Backup, Image, Restore, BackupScheduled, ImageScheduled, DataSync)
pub fn build_backup_controllers(
    client: Client,
    config: &RunnerConfig,
    restic: ResticConfig,
) -> Vec<ControllerFuture> {
    let ctx = Arc::new(BackupContext::builder(client.clone(), restic).build());

    let backup_ctrl = Controller::new(config.api::<Backup>(&client), watcher())
        .owns(config.api::<Job>(&client), watcher())
        .with_config(config.controller())
        .shutdown_on_signal()
        .run(task::reconcile::<Backup>, task::error_policy::<Backup>, ctx.clone())
        .for_each(log_reconcile_result("Backup"));

    let image_ctrl = Controller::new(config.api::<Image>(&client), watcher())
        .owns(config.api::<Job>(&client), watcher())
        .with_config(config.controller())
        .shutdown_on_signal()
        .run(task::reconcile::<Image>, task::error_policy::<Image>, ctx.clone())
        .for_each(log_reconcile_result("Image"));

    let restore_ctrl = Controller::new(config.api::<Restore>(&client), watcher())
        .owns(config.api::<Job>(&client), watcher())
        .with_config(config.controller())
        .shutdown_on_signal()
        .run(task::reconcile::<Restore>, task::error_policy::<Restore>, ctx.clone())
        .for_each(log_reconcile_result("Restore"));

    let backup_schedule_ctrl = Controller::new(config.api::<BackupScheduled>(&client), watcher())
        .owns(config.api::<Backup>(&client), watcher())
        .with_config(config.controller())
        .shutdown_on_signal()
        .run(
            scheduled::reconcile::<BackupScheduled>,
            scheduled::error_policy::<BackupScheduled>,
            ctx.clone(),
        )
        .for_each(log_reconcile_result("BackupScheduled"));

    let image_schedule_ctrl = Controller::new(config.api::<ImageScheduled>(&client), watcher())
        .owns(config.api::<Image>(&client), watcher())
        .with_config(config.controller())
        .shutdown_on_signal()
        .run(
            scheduled::reconcile::<ImageScheduled>,
            scheduled::error_policy::<ImageScheduled>,
            ctx.clone(),
        )
        .for_each(log_reconcile_result("ImageScheduled"));

    let sync_ctrl = Controller::new(config.api::<DataSync>(&client), watcher())
        .owns(config.api::<Backup>(&client), watcher())
        .owns(config.api::<Restore>(&client), watcher())
        .with_config(config.controller())
        .shutdown_on_signal()
        .run(sync_controller::reconcile, sync_controller::error_policy, ctx)
        .for_each(log_reconcile_result("DataSync"));

    tracing::info!("- Backup controller");
    tracing::info!("- Image controller");
    tracing::info!("- Restore controller");
    tracing::info!("- BackupScheduled controller");
    tracing::info!("- ImageScheduled controller");
    tracing::info!("- DataSync controller");

    vec![
        Box::pin(backup_ctrl),
        Box::pin(image_ctrl),
        Box::pin(restore_ctrl),
        Box::pin(backup_schedule_ctrl),
        Box::pin(image_schedule_ctrl),
        Box::pin(sync_ctrl),
    ]
}

/// Build certificate controller futures (Certificate, CertificateRequest)
///
/// Library entry point only. The `converge` binary installs and prints the
/// certificate CRDs but never runs these controllers, because there is no
/// built-in issuer. An embedder supplies its own [`CertificateIssuer`] and
/// drives the returned futures, usually next to [`build_backup_controllers`].
///
/// ```no_run
/// use std::sync::Arc;
///
/// use converge_certificate::CertificateIssuer;
/// use converge_operator::controller_runner::{build_certificate_controllers, RunnerConfig};
///
/// async fn run(issuer: Arc<dyn CertificateIssuer>) -> anyhow::Result<()> {
///     let client = kube::Client::try_default().await?;
///     let config = RunnerConfig {
///         namespace: None,
///         concurrency: 4,
///     };
///     futures::future::join_all(build_certificate_controllers(client, &config, issuer)).await;
///     Ok(())
/// }
/// ```
pub fn build_certificate_controllers(
    client: Client,
    config: &RunnerConfig,
    issuer: Arc<dyn CertificateIssuer>,
) -> Vec<ControllerFuture> {
    let ctx = Arc::new(CertificateContext::new(client.clone(), issuer));

    let certificate_ctrl = Controller::new(config.api::<Certificate>(&client), watcher())
        .owns(config.api::<CertificateRequest>(&client), watcher())
        .with_config(config.controller())
        .shutdown_on_signal()
        .run(
            certificate_controller::reconcile,
            certificate_controller::error_policy,
            ctx.clone(),
        )
        .for_each(log_reconcile_result("Certificate"));

    let request_ctrl = Controller::new(config.api::<CertificateRequest>(&client), watcher())
        .with_config(config.controller())
        .shutdown_on_signal()
        .run(request_controller::reconcile, request_controller::error_policy, ctx)
        .for_each(log_reconcile_result("CertificateRequest"));

    tracing::info!("- Certificate controller");
    tracing::info!("- CertificateRequest controller");

    vec![Box::pin(certificate_ctrl), Box::pin(request_ctrl)]
}

fn log_reconcile_result<T: Debug, E: Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
