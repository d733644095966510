//! Core kernel primitives.
//!
//! Immutable value types shared across the guard, the authority layer and
//! the snapshot layer: [`Context`], [`Intent`], [`ConsequenceLevel`], the
//! terminal [`Outcome`] union and its [`NonAction`] payload, and the
//! observation event record fanned out by the hub.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock;
use crate::error::ValidationError;

/// Coarse risk tier of a capability. Sets baseline friction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConsequenceLevel {
    Low,
    Medium,
    High,
}

impl ConsequenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsequenceLevel::Low => "LOW",
            ConsequenceLevel::Medium => "MEDIUM",
            ConsequenceLevel::High => "HIGH",
        }
    }
}

/// Immutable per-invocation context.
///
/// Constructed once at request ingress, destroyed when the result returns
/// to the adapter. Construction validates confidence and intent; there is
/// no mutation after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    context_id: String,
    confidence: f64,
    intent: String,
    fields: BTreeMap<String, Value>,
    profile_id: Option<String>,
    session_id: Option<String>,
}

impl Context {
    /// Build a context, rejecting out-of-range confidence and empty intent.
    ///
    /// Confidence must be a real in `[0, 1]`; `NaN` fails the range check,
    /// `-0.0` and the endpoints are valid.
    pub fn new(
        context_id: impl Into<String>,
        confidence: f64,
        intent: impl Into<String>,
        fields: BTreeMap<String, Value>,
    ) -> Result<Self, ValidationError> {
        let intent = intent.into();
        if !(confidence >= 0.0 && confidence <= 1.0) {
            return Err(ValidationError::Context(format!(
                "confidence must be 0.0-1.0, got {}",
                confidence
            )));
        }
        if intent.is_empty() {
            return Err(ValidationError::Context("intent is required".to_string()));
        }
        Ok(Self {
            context_id: context_id.into(),
            confidence,
            intent,
            fields,
            profile_id: None,
            session_id: None,
        })
    }

    pub fn with_profile_id(mut self, profile_id: impl Into<String>) -> Self {
        self.profile_id = Some(profile_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn intent(&self) -> &str {
        &self.intent
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn profile_id(&self) -> Option<&str> {
        self.profile_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

/// An explicitly declared intent. Declared, never inferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    name: String,
    description: String,
}

impl Intent {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ValidationError::Intent("name is required".to_string()));
        }
        Ok(Self {
            name,
            description: description.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Top-level refusal reason. Wire strings are load-bearing for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonActionReason {
    MissingContext,
    MissingConfidence,
    InvalidConfidence,
    RefusedByGuard,
    ExecutionFailed,
}

impl NonActionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NonActionReason::MissingContext => "missing_context",
            NonActionReason::MissingConfidence => "missing_confidence",
            NonActionReason::InvalidConfidence => "invalid_confidence",
            NonActionReason::RefusedByGuard => "refused_by_guard",
            NonActionReason::ExecutionFailed => "execution_failed",
        }
    }
}

/// Sub-reason carried by `refused_by_guard` refusals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardRefusalReason {
    UnknownCapability,
    MissingPrincipal,
    NoGrant,
    GrantPrincipalMismatch,
    GrantCapabilityMismatch,
    GrantExpired,
    GrantRevoked,
    GrantExhausted,
    SnapshotMismatch,
    SnapshotCaptureFailed,
}

impl GuardRefusalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardRefusalReason::UnknownCapability => "unknown_capability",
            GuardRefusalReason::MissingPrincipal => "missing_principal",
            GuardRefusalReason::NoGrant => "no_grant",
            GuardRefusalReason::GrantPrincipalMismatch => "grant_principal_mismatch",
            GuardRefusalReason::GrantCapabilityMismatch => "grant_capability_mismatch",
            GuardRefusalReason::GrantExpired => "grant_expired",
            GuardRefusalReason::GrantRevoked => "grant_revoked",
            GuardRefusalReason::GrantExhausted => "grant_exhausted",
            GuardRefusalReason::SnapshotMismatch => "snapshot_mismatch",
            GuardRefusalReason::SnapshotCaptureFailed => "snapshot_capture_failed",
        }
    }
}

/// A structured refusal. Terminal: no retry, no fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonAction {
    pub reason: NonActionReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_reason: Option<GuardRefusalReason>,
    pub details: BTreeMap<String, Value>,
    /// Monotonic ns at refusal time.
    pub timestamp_ns: u64,
}

impl NonAction {
    pub fn new(
        reason: NonActionReason,
        sub_reason: Option<GuardRefusalReason>,
        details: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            reason,
            sub_reason,
            details,
            timestamp_ns: clock::now_monotonic_ns(),
        }
    }
}

/// Terminal result of an invocation: success or Non-Action, nothing else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success(Value),
    NonAction(NonAction),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_non_action(&self) -> bool {
        matches!(self, Outcome::NonAction(_))
    }

    pub fn non_action(&self) -> Option<&NonAction> {
        match self {
            Outcome::NonAction(na) => Some(na),
            Outcome::Success(_) => None,
        }
    }

    pub fn success_value(&self) -> Option<&Value> {
        match self {
            Outcome::Success(v) => Some(v),
            Outcome::NonAction(_) => None,
        }
    }
}

/// Observation event type. Wire strings are load-bearing for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    GrantIssued,
    GrantRevoked,
    ExecutionSuccess,
    ExecutionFailed,
    NonAction,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::GrantIssued => "grant_issued",
            EventType::GrantRevoked => "grant_revoked",
            EventType::ExecutionSuccess => "execution_success",
            EventType::ExecutionFailed => "execution_failed",
            EventType::NonAction => "non_action",
        }
    }
}

/// A passive observation fanned out by the hub. Observers cannot return a
/// value the guard consults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationEvent {
    pub event_type: EventType,
    pub details: BTreeMap<String, Value>,
    pub emitted_at_ns: u64,
}

impl ObservationEvent {
    pub fn new(event_type: EventType, details: BTreeMap<String, Value>) -> Self {
        Self {
            event_type,
            details,
            emitted_at_ns: clock::now_monotonic_ns(),
        }
    }
}
