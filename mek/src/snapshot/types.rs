//! Execution snapshots.
//!
//! A snapshot is a frozen fingerprint of everything that made an execution
//! permissible, captured after the authority gates pass and re-validated
//! after the friction sleep. A world that changed in between fails the
//! comparison and the execution is refused.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock;
use crate::snapshot::canonical;

/// Discretized confidence band recorded in snapshots.
pub fn confidence_range(confidence: f64) -> &'static str {
    if confidence < 0.3 {
        "LOW"
    } else if confidence < 0.6 {
        "MEDIUM"
    } else if confidence < 0.8 {
        "HIGH"
    } else {
        "VERY_HIGH"
    }
}

/// Digest of a declared intent: `name:value` under the canonical hash.
pub fn intent_digest(intent_name: &str, intent_value: &str) -> String {
    canonical::hash_str(&format!("{}:{}", intent_name, intent_value))
}

/// Immutable execution snapshot. Append-only; retained indefinitely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: String,
    /// Monotonic ns at capture.
    pub captured_at: u64,
    /// ISO-8601 UTC capture time for the persisted form.
    pub captured_at_utc: String,

    pub principal_id: String,
    pub grant_id: String,

    pub capability_name: String,
    pub capability_scope_hash: String,

    pub context_hash: String,
    pub context_fields: BTreeMap<String, Value>,

    pub intent_hash: String,
    pub intent_name: String,
    pub intent_value: String,

    pub confidence_range: String,
    pub confidence_value: f64,

    pub authority_version: u64,
    pub grant_expires_at: u64,
    pub grant_remaining_uses: Option<i64>,
}

/// The live values a snapshot is compared against at re-validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RevalidationState {
    pub principal_id: String,
    pub grant_id: String,
    pub capability_name: String,
    pub capability_scope_hash: String,
    pub context_hash: String,
    pub intent_hash: String,
    pub authority_version: u64,
}

/// A single re-validation failure: the first field that differed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMismatch {
    pub field: String,
    pub expected: Value,
    pub actual: Value,
}

#[allow(clippy::too_many_arguments)]
impl Snapshot {
    pub(crate) fn capture(
        principal_id: &str,
        grant_id: &str,
        capability_name: &str,
        capability_scope_hash: String,
        context_fields: BTreeMap<String, Value>,
        intent_name: &str,
        intent_value: &str,
        confidence: f64,
        authority_version: u64,
        grant_expires_at: u64,
        grant_remaining_uses: Option<i64>,
    ) -> Self {
        let context_hash = canonical::hash_fields(&context_fields);
        let intent_hash = intent_digest(intent_name, intent_value);
        Self {
            snapshot_id: uuid::Uuid::new_v4().to_string(),
            captured_at: clock::now_monotonic_ns(),
            captured_at_utc: clock::now_utc_iso8601(),
            principal_id: principal_id.to_string(),
            grant_id: grant_id.to_string(),
            capability_name: capability_name.to_string(),
            capability_scope_hash,
            context_hash,
            context_fields,
            intent_hash,
            intent_name: intent_name.to_string(),
            intent_value: intent_value.to_string(),
            confidence_range: confidence_range(confidence).to_string(),
            confidence_value: confidence,
            authority_version,
            grant_expires_at,
            grant_remaining_uses,
        }
    }

    /// Compare the execution-relevant fields against the live state.
    ///
    /// Returns the first differing field, in a fixed comparison order.
    /// `grant_remaining_uses` is deliberately not compared: concurrent
    /// consumption of a multi-use grant must not poison sibling snapshots.
    pub fn first_mismatch(&self, current: &RevalidationState) -> Option<SnapshotMismatch> {
        let checks: [(&str, &str, &str); 6] = [
            ("principal_id", &self.principal_id, &current.principal_id),
            ("grant_id", &self.grant_id, &current.grant_id),
            (
                "capability_name",
                &self.capability_name,
                &current.capability_name,
            ),
            (
                "capability_scope_hash",
                &self.capability_scope_hash,
                &current.capability_scope_hash,
            ),
            ("context_hash", &self.context_hash, &current.context_hash),
            ("intent_hash", &self.intent_hash, &current.intent_hash),
        ];
        for (field, expected, actual) in checks {
            if expected != actual {
                return Some(SnapshotMismatch {
                    field: field.to_string(),
                    expected: Value::from(expected),
                    actual: Value::from(actual),
                });
            }
        }
        if self.authority_version != current.authority_version {
            return Some(SnapshotMismatch {
                field: "authority_version".to_string(),
                expected: Value::from(self.authority_version),
                actual: Value::from(current.authority_version),
            });
        }
        None
    }

    /// The re-validation view of this snapshot's own fields.
    pub fn revalidation_state(&self) -> RevalidationState {
        RevalidationState {
            principal_id: self.principal_id.clone(),
            grant_id: self.grant_id.clone(),
            capability_name: self.capability_name.clone(),
            capability_scope_hash: self.capability_scope_hash.clone(),
            context_hash: self.context_hash.clone(),
            intent_hash: self.intent_hash.clone(),
            authority_version: self.authority_version,
        }
    }
}
