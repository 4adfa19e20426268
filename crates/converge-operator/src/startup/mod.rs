//! Startup tasks run before the controllers

pub mod crds;

pub use crds::{backup_crds, certificate_crds, ensure_crds, print_crds, CrdDef};
