//! Error types for the reconciliation engine
//!
//! Three layers: [`StoreError`] for object-store calls, [`ScheduleError`] for
//! cron handling, and [`ReconcileError`] which every controller returns.
//! `ReconcileError::is_retryable` decides between backoff and waiting for the
//! object to change.

use thiserror::Error;

/// Failure of an object-store call
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of the object
        kind: String,
        /// Name of the object
        name: String,
    },

    /// Create of an object that already exists
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Kind of the object
        kind: String,
        /// Name of the object
        name: String,
    },

    /// Write with a stale resource version
    #[error("conflict writing {kind} {name}: object was modified")]
    Conflict {
        /// Kind of the object
        kind: String,
        /// Name of the object
        name: String,
    },

    /// Any other API failure
    #[error("api error ({code:?}): {message}")]
    Api {
        /// HTTP status code, when the failure came from the API server
        code: Option<u16>,
        /// Description of the failure
        message: String,
    },

    /// The object could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Classify a kube client error for an object of the given kind and name
    pub fn from_kube(kind: &str, name: &str, error: kube::Error) -> Self {
        match error {
            kube::Error::Api(ae) => match ae.code {
                404 => Self::NotFound {
                    kind: kind.to_string(),
                    name: name.to_string(),
                },
                409 if ae.reason == "AlreadyExists" => Self::AlreadyExists {
                    kind: kind.to_string(),
                    name: name.to_string(),
                },
                409 => Self::Conflict {
                    kind: kind.to_string(),
                    name: name.to_string(),
                },
                code => Self::Api {
                    code: Some(code),
                    message: ae.message,
                },
            },
            kube::Error::SerdeError(e) => Self::Serialization(e.to_string()),
            other => Self::Api {
                code: None,
                message: other.to_string(),
            },
        }
    }

    /// Whether this is a not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether a later attempt could succeed without the object changing
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotFound { .. } | Self::Serialization(_) => false,
            Self::AlreadyExists { .. } | Self::Conflict { .. } => true,
            Self::Api { code: None, .. } => true,
            Self::Api {
                code: Some(code), ..
            } => *code == 429 || *code >= 500,
        }
    }
}

/// Failure while parsing or evaluating a cron schedule
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    /// The expression does not have five fields
    #[error("unparseable schedule {expression:?}: expected exactly 5 fields, found {found}")]
    FieldCount {
        /// The expression as written
        expression: String,
        /// Number of fields found
        found: usize,
    },

    /// A field could not be parsed
    #[error("unparseable schedule {expression:?}: {message}")]
    Invalid {
        /// The expression as written
        expression: String,
        /// Parser message
        message: String,
    },

    /// More missed fire times than the catch-up bound allows
    #[error("too many missed start times (> {limit}); check clock skew or set a starting deadline")]
    TooManyMissed {
        /// The catch-up bound that was exceeded
        limit: usize,
    },
}

/// Error returned by every reconcile function
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Object-store failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Cron schedule failure
    #[error("schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    /// Shared helper failure (validation, serialization)
    #[error("{0}")]
    Common(#[from] converge_common::Error),

    /// Invalid spec; waits for the user to fix it
    #[error("validation error: {0}")]
    Validation(String),

    /// Failure in an external system (log retrieval, issuer)
    #[error("external error [{system}]: {message}")]
    External {
        /// Which system failed
        system: String,
        /// Description of the failure
        message: String,
        /// Whether a retry could succeed
        retryable: bool,
    },

    /// Unexpected internal state
    #[error("internal error: {0}")]
    Internal(String),
}

impl ReconcileError {
    /// Create a retryable external-system error
    pub fn external(system: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::External {
            system: system.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a permanent external-system error
    pub fn external_permanent(system: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::External {
            system: system.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the error policy should back off and retry
    ///
    /// Permanent errors wait for the object to change instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::Schedule(_) => false,
            Self::Common(e) => e.is_retryable(),
            Self::Validation(_) => false,
            Self::External { retryable, .. } => *retryable,
            Self::Internal(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} error", code),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn kube_errors_map_by_status_code() {
        assert!(StoreError::from_kube("Backup", "b", api_error(404, "NotFound")).is_not_found());
        assert!(matches!(
            StoreError::from_kube("Backup", "b", api_error(409, "AlreadyExists")),
            StoreError::AlreadyExists { .. }
        ));
        assert!(matches!(
            StoreError::from_kube("Backup", "b", api_error(409, "Conflict")),
            StoreError::Conflict { .. }
        ));
        assert!(matches!(
            StoreError::from_kube("Backup", "b", api_error(500, "InternalError")),
            StoreError::Api { code: Some(500), .. }
        ));
    }

    #[test]
    fn store_retryability() {
        let conflict = StoreError::Conflict {
            kind: "Backup".into(),
            name: "b".into(),
        };
        assert!(conflict.is_retryable());
        assert!(!StoreError::from_kube("Backup", "b", api_error(403, "Forbidden")).is_retryable());
        assert!(StoreError::from_kube("Backup", "b", api_error(429, "TooMany")).is_retryable());
        assert!(StoreError::from_kube("Backup", "b", api_error(503, "Unavailable")).is_retryable());
    }

    /// Story: a malformed cron expression is reported with the field count
    /// and is never retried, because only an edit can fix it.
    #[test]
    fn story_bad_schedule_waits_for_user_fix() {
        let err: ReconcileError = ScheduleError::FieldCount {
            expression: "a b * * * * *".to_string(),
            found: 7,
        }
        .into();
        assert!(err.to_string().contains("expected exactly 5 fields, found 7"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn external_errors_carry_retryability() {
        assert!(ReconcileError::external("logs", "timeout").is_retryable());
        assert!(!ReconcileError::external_permanent("issuer", "bad hosts").is_retryable());
        assert!(ReconcileError::internal("unexpected").is_retryable());
        assert!(!ReconcileError::validation("empty target").is_retryable());
    }
}
