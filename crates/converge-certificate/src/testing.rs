//! In-memory wiring of [`CertificateContext`] for controller tests

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use converge_common::crd::{Certificate, CertificateRequest};
use converge_common::events::NoopEventPublisher;
use converge_engine::{ErrorBackoff, FixedClock, MemoryStore};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::ObjectMeta;

use crate::context::CertificateContext;
use crate::issuer::MockCertificateIssuer;

pub(crate) const NAMESPACE: &str = "web";

pub(crate) struct Harness {
    pub certificates: Arc<MemoryStore<Certificate>>,
    pub requests: Arc<MemoryStore<CertificateRequest>>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            certificates: Arc::new(MemoryStore::new()),
            requests: Arc::new(MemoryStore::new()),
        }
    }

    pub fn context(&self, issuer: MockCertificateIssuer) -> Arc<CertificateContext> {
        Arc::new(CertificateContext {
            certificates: self.certificates.clone(),
            requests: self.requests.clone(),
            issuer: Arc::new(issuer),
            clock: Arc::new(FixedClock::new(now())),
            events: Arc::new(NoopEventPublisher),
            backoff: ErrorBackoff::default(),
        })
    }
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 1, 8, 0, 0).unwrap()
}

pub(crate) fn meta(name: &str, created: DateTime<Utc>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        creation_timestamp: Some(Time(created)),
        ..Default::default()
    }
}
