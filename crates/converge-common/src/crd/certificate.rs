//! Certificate and CertificateRequest Custom Resource Definitions
//!
//! A Certificate describes the hosts a TLS certificate must cover. For every
//! distinct host set the controller creates a CertificateRequest named from a
//! content hash, so identical requests resolve to the same object. Each
//! CertificateRequest owns one certificate in an external issuer.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Phase;

/// Default number of CertificateRequests kept per Certificate
pub const DEFAULT_REQUEST_HISTORY_LIMIT: u32 = 2;

/// State of a certificate in the external issuer
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum IssuerState {
    /// Waiting on validation
    #[default]
    PendingValidation,
    /// Issued and usable
    Issued,
    /// Validation timed out or the issuer rejected the request
    Failed,
}

/// One DNS record the issuer wants to see before it issues
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRecord {
    /// Host being validated
    pub host: String,
    /// Record name
    pub name: String,
    /// Record type (e.g. CNAME)
    #[serde(rename = "type")]
    pub record_type: String,
    /// Record value
    pub value: String,
}

/// Status of a CertificateRequest
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestStatus {
    /// Current phase
    #[serde(default)]
    pub phase: Phase,

    /// Identifier of the certificate in the issuer
    #[serde(default)]
    pub request_id: Option<String>,

    /// Issuer-side state
    #[serde(default)]
    pub state: Option<IssuerState>,

    /// DNS validation records
    #[serde(default)]
    pub validation: Vec<ValidationRecord>,

    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

/// Specification for a CertificateRequest
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "converge.dev",
    version = "v1alpha1",
    kind = "CertificateRequest",
    plural = "certificaterequests",
    shortname = "cr",
    namespaced,
    status = "CertificateRequestStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestSpec {
    /// Hosts covered by the certificate, sorted and deduplicated
    pub hosts: Vec<String>,
}

/// Status of a Certificate
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateStatus {
    /// Phase of the desired request
    #[serde(default)]
    pub phase: Phase,

    /// Most recent issued CertificateRequest
    #[serde(default)]
    pub active: Option<String>,

    /// CertificateRequest matching the current spec
    #[serde(default)]
    pub desired: Option<String>,
}

/// Specification for a Certificate
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "converge.dev",
    version = "v1alpha1",
    kind = "Certificate",
    plural = "certificates",
    shortname = "cert",
    namespaced,
    status = "CertificateStatus",
    printcolumn = r#"{"name":"Active","type":"string","jsonPath":".status.active"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    /// Hosts the certificate must cover
    pub hosts: Vec<String>,

    /// Number of CertificateRequests to keep, including active and desired
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_history_limit: Option<u32>,
}

impl CertificateSpec {
    /// Hosts sorted and deduplicated, so equivalent specs compare equal
    pub fn normalized_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.hosts.iter().map(|h| h.to_lowercase()).collect();
        hosts.sort();
        hosts.dedup();
        hosts
    }

    /// Configured history limit or the default
    pub fn history_limit(&self) -> u32 {
        self.request_history_limit.unwrap_or(DEFAULT_REQUEST_HISTORY_LIMIT)
    }
}
