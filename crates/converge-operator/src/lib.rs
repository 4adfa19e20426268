//! Converge operator: wiring for the backup and certificate controllers
//!
//! The binary in `main.rs` parses [`config::Cli`], installs CRDs and runs the
//! controller futures built by [`controller_runner`].
//!
//! Only the backup controllers run in the binary. The certificate controllers
//! need a caller-provided issuer, so they are started by embedding this crate
//! and calling [`controller_runner::build_certificate_controllers`].

pub mod config;
pub mod controller_runner;
pub mod startup;
