//! Port to the external certificate issuer

use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use converge_common::crd::{IssuerState, ValidationRecord};
use converge_engine::ReconcileError;

/// Name used for the issuer in errors and logs
pub const ISSUER_SYSTEM: &str = "certificate-issuer";

/// Failure reported by the issuer
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IssuerError {
    /// The certificate does not exist at the issuer
    #[error("certificate {0} not found")]
    NotFound(String),

    /// The issuer rejected or failed the call
    #[error("issuer call failed: {message}")]
    Failed {
        /// Description from the issuer
        message: String,
        /// Whether a retry could succeed
        retryable: bool,
    },
}

impl IssuerError {
    /// Whether the certificate is already gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<IssuerError> for ReconcileError {
    fn from(e: IssuerError) -> Self {
        match e {
            IssuerError::NotFound(_) => ReconcileError::external_permanent(ISSUER_SYSTEM, e.to_string()),
            IssuerError::Failed { retryable: true, .. } => {
                ReconcileError::external(ISSUER_SYSTEM, e.to_string())
            }
            IssuerError::Failed { retryable: false, .. } => {
                ReconcileError::external_permanent(ISSUER_SYSTEM, e.to_string())
            }
        }
    }
}

/// What the issuer currently knows about a certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerCertificate {
    /// Issuance state
    pub state: IssuerState,
    /// DNS records the issuer wants to see before issuing
    pub validation: Vec<ValidationRecord>,
}

/// External certificate issuer
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    /// Request a certificate for `hosts`
    ///
    /// Repeating a call with the same `token` returns the same certificate id
    /// instead of requesting a second certificate.
    async fn request(&self, hosts: &[String], token: &str) -> Result<String, IssuerError>;

    /// Current state of a certificate
    async fn describe(&self, id: &str) -> Result<IssuerCertificate, IssuerError>;

    /// Delete a certificate
    async fn delete(&self, id: &str) -> Result<(), IssuerError>;
}
