//! Certificate controllers for converge
//!
//! - **certificate_controller**: Certificate, keeping one CertificateRequest
//!   per host set and switching over once the new one is issued
//! - **request_controller**: CertificateRequest, driving one certificate in
//!   an external issuer behind a finalizer
//! - **issuer**: the external issuer interface
//!
//! Nothing here ships an issuer. Callers implement [`CertificateIssuer`] and
//! hand it to `converge_operator::controller_runner::build_certificate_controllers`;
//! the `converge` binary on its own does not run these controllers.

#![deny(missing_docs)]

pub mod certificate_controller;
pub mod context;
pub mod issuer;
pub mod request_controller;

#[cfg(test)]
mod testing;

pub use context::{CertificateContext, FIELD_MANAGER};
pub use issuer::{CertificateIssuer, IssuerCertificate, IssuerError};
