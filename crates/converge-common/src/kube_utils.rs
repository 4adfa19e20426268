//! Kubernetes helpers shared by converge controllers
//!
//! Naming, labelling and annotation conventions for child objects live here so
//! every controller derives them the same way.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use kube::{Resource, ResourceExt};

use crate::{
    Error, MANAGED_BY_LABEL, MANAGED_BY_VALUE, OWNER_KIND_LABEL, OWNER_LABEL,
    SCHEDULED_AT_ANNOTATION,
};

/// Compute a deterministic hash of the input string, returning a 16-char hex digest.
///
/// Uses truncated SHA-256 so the value is stable across toolchains; it is
/// persisted in object names and finalizer tokens.
pub fn deterministic_hash(input: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

/// Name of a scheduled child: `<parent>-<unixFireTime>`
pub fn scheduled_child_name(parent: &str, fire_time: DateTime<Utc>) -> String {
    format!("{}-{}", parent, fire_time.timestamp())
}

/// Name of a content-addressed child: `<parent>-<contentHash>`
///
/// Identical content always resolves to the same name.
pub fn hashed_child_name(parent: &str, content: &str) -> String {
    format!("{}-{}", parent, deterministic_hash(content))
}

/// Format a fire time for the scheduling annotation
pub fn format_scheduled_at(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a scheduling annotation value
pub fn parse_scheduled_at(value: &str) -> crate::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            Error::validation_for_field(
                SCHEDULED_AT_ANNOTATION,
                "metadata.annotations",
                format!("invalid timestamp '{}': {}", value, e),
            )
        })
}

/// Fire time recorded on an object, if it carries a valid scheduling annotation
pub fn scheduled_at<K: Resource>(obj: &K) -> Option<DateTime<Utc>> {
    obj.annotations()
        .get(SCHEDULED_AT_ANNOTATION)
        .and_then(|v| parse_scheduled_at(v).ok())
}

/// Labels stamped on every child so it can be listed by its parent
pub fn child_labels(owner_kind: &str, owner_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (OWNER_LABEL.to_string(), owner_name.to_string()),
        (OWNER_KIND_LABEL.to_string(), owner_kind.to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
    ])
}

/// Label selector matching the children of one parent
pub fn owner_selector(owner_kind: &str, owner_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (OWNER_LABEL.to_string(), owner_name.to_string()),
        (OWNER_KIND_LABEL.to_string(), owner_kind.to_string()),
    ])
}

/// Render an equality label selector as a Kubernetes selector string
pub fn selector_string(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// `namespace/name` key of an object, used for logs and backoff tracking
pub fn object_key<K: Resource>(obj: &K) -> String {
    format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn deterministic_hash_is_stable_and_short() {
        let a = deterministic_hash("a.example.com,b.example.com");
        let b = deterministic_hash("a.example.com,b.example.com");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, deterministic_hash("a.example.com"));
    }

    #[test]
    fn scheduled_child_name_uses_unix_seconds() {
        let t = Utc.with_ymd_and_hms(2020, 4, 2, 0, 0, 0).unwrap();
        assert_eq!(scheduled_child_name("nightly", t), "nightly-1585785600");
    }

    #[test]
    fn scheduled_at_round_trips_through_annotation_format() {
        let t = Utc.with_ymd_and_hms(2020, 4, 2, 0, 0, 0).unwrap();
        let text = format_scheduled_at(t);
        assert_eq!(text, "2020-04-02T00:00:00Z");
        assert_eq!(parse_scheduled_at(&text).unwrap(), t);
    }

    #[test]
    fn bad_annotation_is_a_validation_error() {
        let err = parse_scheduled_at("yesterday").unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("yesterday"));
    }

    #[test]
    fn selector_string_joins_sorted_pairs() {
        let selector = owner_selector("BackupScheduled", "nightly");
        assert_eq!(
            selector_string(&selector),
            "converge.dev/owner=nightly,converge.dev/owner-kind=BackupScheduled"
        );
        let labels = child_labels("BackupScheduled", "nightly");
        assert!(selector.iter().all(|(k, v)| labels.get(k) == Some(v)));
    }
}
