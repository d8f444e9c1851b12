//! Canonical snapshots of the last-applied spec.
//!
//! The snapshot lives in one reserved annotation on the AppService itself,
//! the only persistent memory between reconcile passes. Drift is detected by
//! decoding the snapshot and comparing structurally, never by comparing raw
//! strings.

use appservice_core::{AppService, AppSpec};

use crate::error::{Error, Result};

/// Annotation key holding the last-applied spec snapshot.
///
/// The key and the JSON encoding behind it are a durable compatibility
/// surface: existing objects carry snapshots in this format, so changing
/// either invalidates them and needs a versioned migration.
pub const LAST_APPLIED_ANNOTATION: &str = "old/spec";

/// Encode a spec into its canonical snapshot form.
///
/// Canonical because struct fields serialize in declaration order and every
/// map in the data model is a `BTreeMap`: identical specs always produce
/// identical strings.
pub fn encode(spec: &AppSpec) -> Result<String> {
    serde_json::to_string(spec).map_err(|err| Error::snapshot_encoding(err.to_string()))
}

/// Decode a snapshot back into a spec.
///
/// Fails with `MalformedSnapshot` when the text does not parse or a
/// required field is absent.
pub fn decode(raw: &str) -> Result<AppSpec> {
    serde_json::from_str(raw).map_err(|err| Error::malformed_snapshot(err.to_string()))
}

/// Decode the snapshot recorded on the object.
///
/// An absent annotation is `MalformedSnapshot` too: callers only ask once
/// children exist, and children without a snapshot is an invariant
/// violation.
pub fn last_applied(app: &AppService) -> Result<AppSpec> {
    let raw = app
        .metadata
        .annotations
        .get(LAST_APPLIED_ANNOTATION)
        .ok_or_else(|| {
            Error::malformed_snapshot(format!("annotation {LAST_APPLIED_ANNOTATION:?} is missing"))
        })?;
    decode(raw)
}
