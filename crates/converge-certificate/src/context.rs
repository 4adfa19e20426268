//! Shared state for the certificate controllers

use std::sync::Arc;

use kube::Client;

use converge_common::crd::{Certificate, CertificateRequest};
use converge_common::events::{EventPublisher, KubeEventPublisher};
use converge_engine::{Clock, ErrorBackoff, KubeStore, ObjectStore, SystemClock};

use crate::issuer::CertificateIssuer;

/// Field manager and event reporter name
pub const FIELD_MANAGER: &str = "converge-certificate-controller";

/// Everything the Certificate and CertificateRequest controllers need
pub struct CertificateContext {
    /// Certificate objects
    pub certificates: Arc<dyn ObjectStore<Certificate>>,
    /// CertificateRequest objects
    pub requests: Arc<dyn ObjectStore<CertificateRequest>>,
    /// External issuer
    pub issuer: Arc<dyn CertificateIssuer>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Kubernetes Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Per-object retry state
    pub backoff: ErrorBackoff,
}

impl CertificateContext {
    /// Create a context backed by the Kubernetes API and `issuer`
    pub fn new(client: Client, issuer: Arc<dyn CertificateIssuer>) -> Self {
        Self {
            certificates: Arc::new(KubeStore::new(client.clone(), FIELD_MANAGER)),
            requests: Arc::new(KubeStore::new(client.clone(), FIELD_MANAGER)),
            issuer,
            clock: Arc::new(SystemClock),
            events: Arc::new(KubeEventPublisher::new(client, FIELD_MANAGER)),
            backoff: ErrorBackoff::default(),
        }
    }
}
