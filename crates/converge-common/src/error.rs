//! Error types shared by the converge crates
//!
//! Controller-level failures live in `converge_engine::ReconcileError`; this
//! type covers the validation and serialization problems found while reading
//! or building resources.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for shared converge helpers
#[derive(Debug, Error)]
pub enum Error {
    /// Validation error for a resource spec
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.schedule")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "telemetry", "controller")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a named resource and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors need a spec change to go away.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: a bad schedule in a BackupScheduled surfaces as a validation error
    /// that points at the offending field and is never retried.
    #[test]
    fn story_validation_errors_point_at_the_field() {
        let err = Error::validation_for_field("nightly", "spec.schedule", "empty expression");
        assert!(err.to_string().contains("nightly"));
        assert!(err.to_string().contains("empty expression"));
        match &err {
            Error::Validation { field, .. } => assert_eq!(field.as_deref(), Some("spec.schedule")),
            _ => panic!("Expected Validation variant"),
        }
        assert!(!err.is_retryable());
    }

    #[test]
    fn serialization_errors_are_permanent() {
        let err = Error::serialization_for_kind("Backup", "missing field 'spec'");
        assert!(!err.is_retryable());
        match &err {
            Error::Serialization { kind, .. } => assert_eq!(kind.as_deref(), Some("Backup")),
            _ => panic!("Expected Serialization variant"),
        }
    }

    #[test]
    fn serde_errors_convert_to_serialization() {
        let parse: std::result::Result<u32, _> = serde_json::from_str("not json");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[test]
    fn internal_errors_carry_context_and_retry() {
        let err = Error::internal_with_context("telemetry", "exporter closed");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("[telemetry]"));
    }

    #[test]
    fn plain_validation_uses_unknown_context() {
        match Error::validation("x") {
            Error::Validation { resource, .. } => assert_eq!(resource, UNKNOWN_CONTEXT),
            _ => panic!("Expected Validation variant"),
        }
    }
}
