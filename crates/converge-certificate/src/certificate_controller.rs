//! Certificate controller
//!
//! A Certificate's host set maps to one CertificateRequest named by a content
//! hash of the normalized hosts ("desired"). The most recently issued request
//! stays "active" until the desired one is issued, so changing the hosts never
//! takes a working certificate away. Older requests beyond the history limit
//! are deleted; the active and desired ones never are.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument};

use converge_common::crd::{
    Certificate, CertificateRequest, CertificateRequestSpec, CertificateStatus, IssuerState, Phase,
};
use converge_common::kube_utils::{child_labels, hashed_child_name, object_key, owner_selector};
use converge_common::metrics::record_child_created;
use converge_engine::policy::select_for_cleanup;
use converge_engine::reconcile::instrumented;
use converge_engine::{delete_if_present, sync_child, Outcome, ReconcileError, SyncOutcome};

use crate::context::CertificateContext;

const KIND: &str = "Certificate";

/// Name of the request for a certificate's current host set
pub fn desired_request_name(certificate: &Certificate) -> String {
    hashed_child_name(
        &certificate.name_any(),
        &certificate.spec.normalized_hosts().join(","),
    )
}

/// Pick the active request: the desired one once issued, else the newest issued
pub fn select_active<'a>(
    requests: &'a [CertificateRequest],
    desired: &str,
) -> Option<&'a CertificateRequest> {
    requests
        .iter()
        .filter(|r| {
            r.status.as_ref().and_then(|s| s.state) == Some(IssuerState::Issued)
                && r.meta().deletion_timestamp.is_none()
        })
        .max_by_key(|r| (r.name_any() == desired, r.creation_timestamp().map(|t| t.0)))
}

/// Reconcile a Certificate
#[instrument(skip(obj, ctx), fields(certificate = %obj.name_any()))]
pub async fn reconcile(
    obj: Arc<Certificate>,
    ctx: Arc<CertificateContext>,
) -> Result<Action, ReconcileError> {
    let key = object_key(obj.as_ref());
    instrumented(KIND, &key, &ctx.backoff, reconcile_certificate(obj.as_ref(), &ctx)).await
}

/// Error policy for Certificate
pub fn error_policy(
    obj: Arc<Certificate>,
    error: &ReconcileError,
    ctx: Arc<CertificateContext>,
) -> Action {
    ctx.backoff.error_action(&object_key(obj.as_ref()), error)
}

async fn reconcile_certificate(
    obj: &Certificate,
    ctx: &CertificateContext,
) -> Result<Outcome, ReconcileError> {
    let name = obj.name_any();
    let namespace = obj.namespace().ok_or_else(|| {
        ReconcileError::validation(format!("Certificate {} must be namespaced", name))
    })?;

    let Some(certificate) = ctx.certificates.get(&namespace, &name).await? else {
        debug!("object no longer exists");
        return Ok(Outcome::Done);
    };
    if certificate.meta().deletion_timestamp.is_some() {
        return Ok(Outcome::Done);
    }

    let hosts = certificate.spec.normalized_hosts();
    if hosts.is_empty() {
        return Err(ReconcileError::validation(format!(
            "Certificate {} lists no hosts",
            name
        )));
    }

    let desired_name = desired_request_name(&certificate);
    let mut desired = CertificateRequest::new(&desired_name, CertificateRequestSpec { hosts });
    desired.metadata.namespace = Some(namespace.clone());
    desired.metadata.labels = Some(child_labels(KIND, &name));
    let (outcome, desired) = sync_child(ctx.requests.as_ref(), &certificate, desired).await?;
    if outcome == SyncOutcome::Created {
        record_child_created(KIND, "CertificateRequest");
        info!(request = %desired_name, "created certificate request");
    }

    let requests = ctx
        .requests
        .list(&namespace, &owner_selector(KIND, &name))
        .await?;
    let active = select_active(&requests, &desired_name)
        .map(|r| r.name_any())
        .or_else(|| {
            // keep the previous active one while it still exists
            certificate
                .status
                .as_ref()
                .and_then(|s| s.active.clone())
                .filter(|a| requests.iter().any(|r| &r.name_any() == a))
        });

    let protected = |r: &CertificateRequest| {
        let n = r.name_any();
        n == desired_name || Some(&n) == active.as_ref()
    };
    let doomed = select_for_cleanup(
        requests.clone(),
        Some(certificate.spec.history_limit()),
        |r: &CertificateRequest| r.creation_timestamp().map(|t| t.0),
        protected,
    );
    for request in &doomed {
        if request.meta().deletion_timestamp.is_some() {
            continue;
        }
        delete_if_present(ctx.requests.as_ref(), &namespace, &request.name_any()).await?;
        info!(request = %request.name_any(), "deleted old certificate request");
    }

    let desired_phase = desired.status.as_ref().map(|s| s.phase).unwrap_or_default();
    let status = CertificateStatus {
        phase: match desired_phase {
            Phase::Unknown => Phase::New,
            p => p,
        },
        active,
        desired: Some(desired_name),
    };
    if certificate.status.as_ref() != Some(&status) {
        let value = serde_json::to_value(&status).map_err(converge_common::Error::from)?;
        ctx.certificates
            .patch_status(&namespace, &name, &value)
            .await?;
        debug!(phase = %status.phase, active = ?status.active, "status updated");
    }

    Ok(Outcome::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuer::MockCertificateIssuer;
    use crate::testing::{meta, now, Harness, NAMESPACE};
    use chrono::Duration;
    use converge_common::crd::{CertificateRequestStatus, CertificateSpec};

    fn certificate(hosts: &[&str]) -> Certificate {
        Certificate {
            metadata: meta("site", now()),
            spec: CertificateSpec {
                hosts: hosts.iter().map(|h| h.to_string()).collect(),
                request_history_limit: None,
            },
            status: None,
        }
    }

    fn issue(h: &Harness, name: &str) {
        let mut r = h.requests.snapshot(NAMESPACE, name).unwrap();
        r.status = Some(CertificateRequestStatus {
            phase: Phase::Completed,
            request_id: Some(format!("arn:{}", name)),
            state: Some(IssuerState::Issued),
            ..Default::default()
        });
        h.requests.put(r);
    }

    fn status(h: &Harness) -> CertificateStatus {
        h.certificates
            .snapshot(NAMESPACE, "site")
            .unwrap()
            .status
            .unwrap()
    }

    fn set_hosts(h: &Harness, hosts: &[&str]) {
        let mut c = h.certificates.snapshot(NAMESPACE, "site").unwrap();
        c.spec.hosts = hosts.iter().map(|h| h.to_string()).collect();
        h.certificates.put(c);
    }

    #[test]
    fn equivalent_host_lists_share_a_request() {
        let a = certificate(&["www.example.com", "example.com"]);
        let b = certificate(&["Example.com", "www.example.com", "example.com"]);
        assert_eq!(desired_request_name(&a), desired_request_name(&b));
        assert!(desired_request_name(&a).starts_with("site-"));
        assert_ne!(
            desired_request_name(&a),
            desired_request_name(&certificate(&["example.com"]))
        );
    }

    /// Story: the hosts of a live certificate change. The old request stays
    /// active while the new one validates and takes over once issued.
    #[tokio::test]
    async fn story_host_change_keeps_the_working_certificate() {
        let h = Harness::new();
        let ctx = h.context(MockCertificateIssuer::new());
        let obj = Arc::new(h.certificates.insert(certificate(&["example.com"])));

        reconcile(obj.clone(), ctx.clone()).await.unwrap();
        let first = desired_request_name(&certificate(&["example.com"]));
        let st = status(&h);
        assert_eq!(st.desired.as_deref(), Some(first.as_str()));
        assert_eq!(st.active, None);
        assert_eq!(st.phase, Phase::New);

        issue(&h, &first);
        reconcile(obj.clone(), ctx.clone()).await.unwrap();
        let st = status(&h);
        assert_eq!(st.active.as_deref(), Some(first.as_str()));
        assert_eq!(st.phase, Phase::Completed);

        set_hosts(&h, &["example.com", "www.example.com"]);
        reconcile(obj.clone(), ctx.clone()).await.unwrap();
        let second = desired_request_name(&certificate(&["example.com", "www.example.com"]));
        let st = status(&h);
        assert_eq!(st.desired.as_deref(), Some(second.as_str()));
        assert_eq!(st.active.as_deref(), Some(first.as_str()), "old one still serves");
        assert_eq!(st.phase, Phase::New);

        issue(&h, &second);
        reconcile(obj.clone(), ctx.clone()).await.unwrap();
        let st = status(&h);
        assert_eq!(st.active.as_deref(), Some(second.as_str()));
        assert_eq!(st.phase, Phase::Completed);
    }

    #[tokio::test]
    async fn retention_never_deletes_active_or_desired() {
        let h = Harness::new();
        let ctx = h.context(MockCertificateIssuer::new());
        let mut cert = certificate(&["d.example.com"]);
        cert.spec.request_history_limit = Some(1);
        h.certificates.insert(cert);

        // three older requests; the oldest is the issued one
        for (i, host) in ["a.example.com", "b.example.com", "c.example.com"]
            .iter()
            .enumerate()
        {
            let c = certificate(&[host]);
            let mut r = CertificateRequest::new(
                &desired_request_name(&c),
                CertificateRequestSpec {
                    hosts: vec![host.to_string()],
                },
            );
            r.metadata = meta(&desired_request_name(&c), now() + Duration::minutes(i as i64));
            r.metadata.labels = Some(child_labels(KIND, "site"));
            if i == 0 {
                r.status = Some(CertificateRequestStatus {
                    state: Some(IssuerState::Issued),
                    ..Default::default()
                });
            }
            h.requests.insert(r);
        }

        let obj = Arc::new(h.certificates.snapshot(NAMESPACE, "site").unwrap());
        reconcile(obj, ctx).await.unwrap();

        let active = desired_request_name(&certificate(&["a.example.com"]));
        let desired = desired_request_name(&certificate(&["d.example.com"]));
        let remaining: Vec<String> = h.requests.all().iter().map(|r| r.name_any()).collect();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.contains(&active));
        assert!(remaining.contains(&desired));
        assert_eq!(h.requests.deleted().len(), 2);
    }

    #[tokio::test]
    async fn empty_host_list_is_a_permanent_error() {
        let h = Harness::new();
        let ctx = h.context(MockCertificateIssuer::new());
        let obj = Arc::new(h.certificates.insert(certificate(&[])));
        let err = reconcile(obj, ctx).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(h.requests.all().is_empty());
    }
}
