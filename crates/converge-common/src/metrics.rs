//! Metrics registry for converge controllers
//!
//! OpenTelemetry instruments are created lazily from the global meter, which
//! telemetry initialization points at an OTLP exporter when one is configured.

use once_cell::sync::Lazy;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};

/// Global meter for converge metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("converge"));

/// Histogram of reconcile duration
///
/// Labels:
/// - `controller`: Backup, BackupScheduled, ...
/// - `result`: success, error
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("converge_reconcile_duration_seconds")
        .with_description("Duration of reconciliations in seconds")
        .with_unit("s")
        .build()
});

/// Counter of reconcile errors
///
/// Labels:
/// - `controller`: controller name
/// - `error_type`: transient, permanent
pub static RECONCILE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("converge_reconcile_errors_total")
        .with_description("Total number of reconciliation errors")
        .with_unit("{errors}")
        .build()
});

/// Counter of children created by schedules and chains
///
/// Labels:
/// - `controller`: controller name
/// - `kind`: kind of the created child
pub static CHILDREN_CREATED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("converge_children_created_total")
        .with_description("Total number of child resources created")
        .with_unit("{objects}")
        .build()
});

/// Classification of a reconcile error for the `error_type` label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// Will be retried with backoff
    Transient,
    /// Waits for the object to change
    Permanent,
}

impl ErrorType {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }
}

/// Times one reconcile and records it on completion
pub struct ReconcileTimer {
    controller: &'static str,
    start: std::time::Instant,
}

impl ReconcileTimer {
    /// Start timing a reconcile
    pub fn start(controller: &'static str) -> Self {
        Self {
            controller,
            start: std::time::Instant::now(),
        }
    }

    /// Record successful completion
    pub fn success(self) {
        RECONCILE_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[
                KeyValue::new("controller", self.controller),
                KeyValue::new("result", "success"),
            ],
        );
    }

    /// Record error completion
    pub fn error(self, error_type: ErrorType) {
        RECONCILE_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[
                KeyValue::new("controller", self.controller),
                KeyValue::new("result", "error"),
            ],
        );
        RECONCILE_ERRORS.add(
            1,
            &[
                KeyValue::new("controller", self.controller),
                KeyValue::new("error_type", error_type.as_str()),
            ],
        );
    }
}

/// Record the creation of a child object
pub fn record_child_created(controller: &'static str, kind: &'static str) {
    CHILDREN_CREATED.add(
        1,
        &[
            KeyValue::new("controller", controller),
            KeyValue::new("kind", kind),
        ],
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_type_labels() {
        assert_eq!(ErrorType::Transient.as_str(), "transient");
        assert_eq!(ErrorType::Permanent.as_str(), "permanent");
    }

    #[test]
    fn timers_record_without_a_configured_provider() {
        ReconcileTimer::start("Backup").success();
        ReconcileTimer::start("Backup").error(ErrorType::Permanent);
        record_child_created("BackupScheduled", "Backup");
    }
}
