//! Kubernetes Event recording for converge controllers.
//!
//! Controllers emit Events through the [`EventPublisher`] trait so they show up
//! in `kubectl describe`. Publishing is fire-and-forget: a failed event is
//! logged and never fails a reconcile.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on the given resource.
    ///
    /// * `resource_ref` - The object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason (see [`reasons`])
    /// * `action` - What the controller was doing (see [`actions`])
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as the given controller
    /// (e.g. "converge-backup-controller").
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "failed to publish Kubernetes event");
        }
    }
}

/// Publisher that drops every event.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Well-known event reason strings.
pub mod reasons {
    /// A scheduled or chained child was created
    pub const CHILD_CREATED: &str = "ChildCreated";
    /// A run was skipped because another is still active (Forbid)
    pub const RUN_SKIPPED: &str = "RunSkipped";
    /// A missed run was dropped because its starting deadline passed
    pub const RUN_TOO_LATE: &str = "RunTooLate";
    /// Active children were deleted to make room (Replace)
    pub const RUN_REPLACED: &str = "RunReplaced";
    /// More than the allowed number of runs were missed
    pub const TOO_MANY_MISSED: &str = "TooManyMissedRuns";
    /// The cron expression could not be parsed
    pub const INVALID_SCHEDULE: &str = "InvalidSchedule";
    /// An upstream resource failed, so this one failed too
    pub const UPSTREAM_FAILED: &str = "UpstreamFailed";
    /// A task finished successfully
    pub const TASK_COMPLETED: &str = "TaskCompleted";
    /// A task failed
    pub const TASK_FAILED: &str = "TaskFailed";
    /// Old children were removed by history limits
    pub const HISTORY_PRUNED: &str = "HistoryPruned";
    /// The external certificate was issued
    pub const CERTIFICATE_ISSUED: &str = "CertificateIssued";
    /// The external certificate was deleted
    pub const CERTIFICATE_DELETED: &str = "CertificateDeleted";
}

/// Well-known event action strings.
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Creating a scheduled child
    pub const SCHEDULE: &str = "Schedule";
    /// Deleting children or external resources
    pub const DELETE: &str = "Delete";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_publisher_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopEventPublisher>();
    }

    #[test]
    fn reason_constants_are_pascal_case() {
        for reason in [
            reasons::CHILD_CREATED,
            reasons::RUN_SKIPPED,
            reasons::TOO_MANY_MISSED,
            reasons::CERTIFICATE_ISSUED,
        ] {
            assert!(reason.chars().next().is_some_and(|c| c.is_ascii_uppercase()));
            assert!(!reason.contains(' '));
        }
    }

    #[tokio::test]
    async fn noop_publisher_does_not_panic() {
        NoopEventPublisher
            .publish(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::INVALID_SCHEDULE,
                actions::RECONCILE,
                Some("expected exactly 5 fields, found 7".to_string()),
            )
            .await;
    }
}
