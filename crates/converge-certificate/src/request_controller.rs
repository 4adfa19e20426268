//! CertificateRequest controller
//!
//! Each CertificateRequest owns one certificate at the issuer. The request is
//! created with an idempotency token derived from the object's uid, polled
//! until the issuer issues or rejects it, and deleted at the issuer before the
//! object itself is allowed to go away.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use converge_common::crd::{CertificateRequest, CertificateRequestStatus, IssuerState, Phase};
use converge_common::events::{actions, reasons};
use converge_common::kube_utils::object_key;
use converge_engine::finalizer::{self, ExternalResource};
use converge_engine::reconcile::instrumented;
use converge_engine::{Outcome, ReconcileError};

use crate::context::CertificateContext;

/// Finalizer guarding the issuer-side certificate
pub const FINALIZER: &str = "converge.dev/certificate-request";

/// Poll interval while the issuer waits on validation
pub const VALIDATION_POLL: Duration = Duration::from_secs(30);

const KIND: &str = "CertificateRequest";

/// Reconcile a CertificateRequest
#[instrument(skip(obj, ctx), fields(request = %obj.name_any()))]
pub async fn reconcile(
    obj: Arc<CertificateRequest>,
    ctx: Arc<CertificateContext>,
) -> Result<Action, ReconcileError> {
    let key = object_key(obj.as_ref());
    instrumented(KIND, &key, &ctx.backoff, reconcile_request(obj.as_ref(), &ctx)).await
}

/// Error policy for CertificateRequest
pub fn error_policy(
    obj: Arc<CertificateRequest>,
    error: &ReconcileError,
    ctx: Arc<CertificateContext>,
) -> Action {
    ctx.backoff.error_action(&object_key(obj.as_ref()), error)
}

async fn reconcile_request(
    obj: &CertificateRequest,
    ctx: &CertificateContext,
) -> Result<Outcome, ReconcileError> {
    let namespace = obj.namespace().unwrap_or_default();
    let Some(current) = ctx.requests.get(&namespace, &obj.name_any()).await? else {
        debug!("object no longer exists");
        return Ok(Outcome::Done);
    };
    finalizer::drive(ctx.requests.as_ref(), &current, FINALIZER, &IssuerSide { ctx }).await
}

/// The issuer-side half of a CertificateRequest
struct IssuerSide<'a> {
    ctx: &'a CertificateContext,
}

#[async_trait]
impl ExternalResource<CertificateRequest> for IssuerSide<'_> {
    async fn reconcile(&self, obj: &CertificateRequest, token: &str) -> Result<Outcome, ReconcileError> {
        let stored = obj.status.clone().unwrap_or_default();
        if stored.phase.is_terminal() {
            return Ok(Outcome::Done);
        }

        let id = match &stored.request_id {
            Some(id) => id.clone(),
            None => {
                let id = self.ctx.issuer.request(&obj.spec.hosts, token).await?;
                info!(request_id = %id, hosts = ?obj.spec.hosts, "requested certificate");
                id
            }
        };

        let next = match self.ctx.issuer.describe(&id).await {
            Ok(described) => CertificateRequestStatus {
                phase: match described.state {
                    IssuerState::PendingValidation => Phase::InProgress,
                    IssuerState::Issued => Phase::Completed,
                    IssuerState::Failed => Phase::Failed,
                },
                request_id: Some(id.clone()),
                state: Some(described.state),
                validation: described.validation,
                message: None,
            },
            Err(e) if e.is_not_found() => {
                warn!(request_id = %id, "certificate disappeared from the issuer");
                CertificateRequestStatus {
                    phase: Phase::Failed,
                    request_id: Some(id.clone()),
                    state: Some(IssuerState::Failed),
                    validation: Vec::new(),
                    message: Some(format!("certificate {} no longer exists at the issuer", id)),
                }
            }
            Err(e) => return Err(e.into()),
        };

        let phase = next.phase;
        if obj.status.as_ref() != Some(&next) {
            let value = serde_json::to_value(&next).map_err(converge_common::Error::from)?;
            self.ctx
                .requests
                .patch_status(&obj.namespace().unwrap_or_default(), &obj.name_any(), &value)
                .await?;
            if phase == Phase::Completed {
                info!(request_id = %id, "certificate issued");
                self.ctx
                    .events
                    .publish(
                        &obj.object_ref(&()),
                        EventType::Normal,
                        reasons::CERTIFICATE_ISSUED,
                        actions::RECONCILE,
                        Some(format!("certificate {} issued", id)),
                    )
                    .await;
            }
        }

        Ok(match phase {
            Phase::Completed | Phase::Failed => Outcome::Done,
            _ => Outcome::Requeue(VALIDATION_POLL),
        })
    }

    async fn cleanup(&self, obj: &CertificateRequest) -> Result<(), ReconcileError> {
        let Some(id) = obj.status.as_ref().and_then(|s| s.request_id.clone()) else {
            return Ok(());
        };
        match self.ctx.issuer.delete(&id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!(request_id = %id, "certificate already gone"),
            Err(e) => return Err(e.into()),
        }
        info!(request_id = %id, "deleted certificate at the issuer");
        self.ctx
            .events
            .publish(
                &obj.object_ref(&()),
                EventType::Normal,
                reasons::CERTIFICATE_DELETED,
                actions::DELETE,
                Some(format!("certificate {} deleted", id)),
            )
            .await;
        Ok(())
    }
}
