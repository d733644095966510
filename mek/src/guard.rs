//! Execution guard: the only door.
//!
//! Every privileged execution passes through one of the three entry points
//! below, which enforce the ordered gate sequence. Failure at any gate is a
//! terminal Non-Action with a distinct reason, an emitted observation and a
//! pattern-log record; success invokes the capability's crate-private
//! execution function under the global serialization lock.
//!
//! Gate order (snapshot form): context validity and intent declaration by
//! construction, principal presence, grant lookup and binding, expiry,
//! revocation, remaining uses, confidence, snapshot capture, friction,
//! post-friction revocation and expiry re-check, snapshot re-validation,
//! atomic use claim, execute. The snapshot is captured before the friction
//! sleep and compared after it — that is the TOCTOU window it closes.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::authority::{AuthorityStore, GrantEntry};
use crate::capability::{CapabilityContract, CapabilityRegistry};
use crate::clock;
use crate::friction::FrictionWindow;
use crate::negative::{block_auto_retry, block_path_optimization, ProhibitedBehaviorError};
use crate::observer::ObserverHub;
use crate::pattern_log::{PatternLog, PatternRecord, RecordedOutcome};
use crate::snapshot::types::intent_digest;
use crate::snapshot::{RevalidationState, Snapshot, SnapshotStore};
use crate::types::{
    Context, EventType, GuardRefusalReason, NonAction, NonActionReason, ObservationEvent, Outcome,
};

/// The sole execution gateway.
pub struct ExecutionGuard {
    registry: Arc<CapabilityRegistry>,
    authority: Arc<AuthorityStore>,
    snapshots: Arc<SnapshotStore>,
    pattern_log: Arc<PatternLog>,
    hub: Arc<ObserverHub>,
    exec_lock: Mutex<()>,
}

impl ExecutionGuard {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        authority: Arc<AuthorityStore>,
        snapshots: Arc<SnapshotStore>,
        pattern_log: Arc<PatternLog>,
        hub: Arc<ObserverHub>,
    ) -> Self {
        Self {
            registry,
            authority,
            snapshots,
            pattern_log,
            hub,
            exec_lock: Mutex::new(()),
        }
    }

    /// Build, log and emit a refusal. Every Non-Action leaves through here,
    /// so silence is impossible by construction.
    #[allow(clippy::too_many_arguments)]
    fn refuse(
        &self,
        event_type: EventType,
        reason: NonActionReason,
        sub_reason: Option<GuardRefusalReason>,
        capability: Option<&str>,
        principal: Option<&str>,
        context: &Context,
        mut details: BTreeMap<String, Value>,
    ) -> Outcome {
        details.insert(
            "timestamp_utc".to_string(),
            Value::from(clock::now_utc_iso8601()),
        );
        if let Some(capability) = capability {
            details.insert("capability".to_string(), Value::from(capability));
        }
        details.insert(
            "context_id".to_string(),
            Value::from(context.context_id()),
        );
        let non_action = NonAction::new(reason, sub_reason, details);

        let record = PatternRecord::new(
            event_type,
            capability.map(str::to_string),
            Some(context.context_id().to_string()),
            principal.map(str::to_string),
            RecordedOutcome::NonAction { reason, sub_reason },
            non_action.details.clone(),
        );
        if let Err(e) = self.pattern_log.append(record) {
            log::warn!(target: "mek::guard", "pattern log append failed: {}", e);
        }

        let mut event_details = non_action.details.clone();
        event_details.insert("reason".to_string(), Value::from(reason.as_str()));
        if let Some(sub) = sub_reason {
            event_details.insert("sub_reason".to_string(), Value::from(sub.as_str()));
        }
        self.hub
            .emit(&ObservationEvent::new(event_type, event_details));

        Outcome::NonAction(non_action)
    }

    /// Final gate: invoke the capability under the serialization lock.
    /// Capability errors and panics become Non-Action `execution_failed`;
    /// there is no retry and no fallback capability.
    fn run_capability(
        &self,
        contract: &CapabilityContract,
        context: &Context,
        principal: Option<&str>,
    ) -> Outcome {
        let invoked = {
            let _serialized = self.exec_lock.lock().expect("execution lock poisoned");
            catch_unwind(AssertUnwindSafe(|| contract.invoke(context)))
        };

        match invoked {
            Ok(Ok(value)) => {
                let mut details = BTreeMap::new();
                details.insert("intent".to_string(), Value::from(context.intent()));
                details.insert(
                    "context_id".to_string(),
                    Value::from(context.context_id()),
                );
                details.insert(
                    "consequence_level".to_string(),
                    Value::from(contract.consequence_level().as_str()),
                );
                let record = PatternRecord::new(
                    EventType::ExecutionSuccess,
                    Some(contract.name().to_string()),
                    Some(context.context_id().to_string()),
                    principal.map(str::to_string),
                    RecordedOutcome::Success,
                    details.clone(),
                );
                if let Err(e) = self.pattern_log.append(record) {
                    log::warn!(target: "mek::guard", "pattern log append failed: {}", e);
                }
                self.hub
                    .emit(&ObservationEvent::new(EventType::ExecutionSuccess, details));
                Outcome::Success(value)
            }
            Ok(Err(capability_error)) => {
                let mut details = BTreeMap::new();
                details.insert(
                    "error".to_string(),
                    Value::from(capability_error.to_string()),
                );
                details.insert(
                    "refusal".to_string(),
                    Value::from(capability_error.refusal.as_str()),
                );
                self.refuse(
                    EventType::ExecutionFailed,
                    NonActionReason::ExecutionFailed,
                    None,
                    Some(contract.name()),
                    principal,
                    context,
                    details,
                )
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "capability panicked".to_string());
                let mut details = BTreeMap::new();
                details.insert("error".to_string(), Value::from(message));
                self.refuse(
                    EventType::ExecutionFailed,
                    NonActionReason::ExecutionFailed,
                    None,
                    Some(contract.name()),
                    principal,
                    context,
                    details,
                )
            }
        }
    }

    /// Confidence re-assertion (construction already validated it).
    fn confidence_gate(&self, intent: &str, context: &Context, confidence: f64) -> Option<Outcome> {
        if !(confidence >= 0.0 && confidence <= 1.0) {
            let mut details = BTreeMap::new();
            details.insert("intent".to_string(), Value::from(intent));
            details.insert("confidence".to_string(), Value::from(confidence));
            return Some(self.refuse(
                EventType::NonAction,
                NonActionReason::InvalidConfidence,
                None,
                None,
                None,
                context,
                details,
            ));
        }
        None
    }

    /// MEK-0 form: capability gate sequence with no authority checks.
    pub fn execute(&self, intent_name: &str, context: &Context) -> Outcome {
        if context.intent().is_empty() {
            let mut details = BTreeMap::new();
            details.insert("intent".to_string(), Value::from(intent_name));
            return self.refuse(
                EventType::NonAction,
                NonActionReason::MissingContext,
                None,
                None,
                None,
                context,
                details,
            );
        }

        if let Some(refusal) = self.confidence_gate(intent_name, context, context.confidence()) {
            return refusal;
        }

        let contract = match self.registry.get(intent_name) {
            Some(contract) => contract,
            None => {
                let mut details = BTreeMap::new();
                details.insert("intent".to_string(), Value::from(intent_name));
                return self.refuse(
                    EventType::NonAction,
                    NonActionReason::RefusedByGuard,
                    Some(GuardRefusalReason::UnknownCapability),
                    None,
                    None,
                    context,
                    details,
                );
            }
        };

        let missing = contract.validate_context(context);
        if !missing.is_empty() {
            let mut details = BTreeMap::new();
            details.insert("intent".to_string(), Value::from(intent_name));
            details.insert(
                "missing_fields".to_string(),
                Value::from(missing),
            );
            return self.refuse(
                EventType::NonAction,
                NonActionReason::MissingContext,
                None,
                Some(contract.name()),
                None,
                context,
                details,
            );
        }

        FrictionWindow::new(contract.consequence_level(), context.confidence()).wait();

        self.run_capability(&contract, context, None)
    }

    /// MEK-2 form: authority gates before the capability gates.
    pub fn execute_with_authority(
        &self,
        principal_id: &str,
        capability_name: &str,
        context: &Context,
        grant_id: &str,
    ) -> Outcome {
        let (contract, entry) = match self.authority_gates(
            principal_id,
            capability_name,
            context,
            grant_id,
            context.confidence(),
        ) {
            Ok(passed) => passed,
            Err(refusal) => return refusal,
        };

        FrictionWindow::new(contract.consequence_level(), context.confidence()).wait();

        if let Some(refusal) =
            self.post_friction_authority_check(principal_id, capability_name, context, grant_id, &entry)
        {
            return refusal;
        }

        if !entry.try_consume() {
            return self.grant_exhausted(principal_id, capability_name, context, grant_id, &entry);
        }

        self.run_capability(&contract, context, Some(principal_id))
    }

    /// MEK-3 form: authority gates, snapshot capture before friction,
    /// re-validation after it.
    pub fn execute_with_snapshot(
        &self,
        principal_id: &str,
        grant_id: &str,
        capability_name: &str,
        context: &Context,
        confidence: f64,
    ) -> Outcome {
        let (contract, entry) = match self.authority_gates(
            principal_id,
            capability_name,
            context,
            grant_id,
            confidence,
        ) {
            Ok(passed) => passed,
            Err(refusal) => return refusal,
        };

        // The explicit confidence argument drives friction and the snapshot
        // record; it must agree with the context it claims to describe.
        if (confidence - context.confidence()).abs() > f64::EPSILON {
            let mut details = BTreeMap::new();
            details.insert("confidence".to_string(), Value::from(confidence));
            details.insert(
                "context_confidence".to_string(),
                Value::from(context.confidence()),
            );
            return self.refuse(
                EventType::NonAction,
                NonActionReason::InvalidConfidence,
                None,
                Some(capability_name),
                Some(principal_id),
                context,
                details,
            );
        }

        // Snapshot capture: freeze the authority state before the friction
        // sleep opens the TOCTOU window.
        let snapshot = Snapshot::capture(
            principal_id,
            grant_id,
            capability_name,
            contract.scope_hash(),
            context.fields().clone(),
            context.intent(),
            context.intent(),
            confidence,
            self.authority.authority_version(),
            entry.grant().expires_at(),
            entry.remaining_uses(),
        );
        let snapshot_id = snapshot.snapshot_id.clone();
        if let Err(e) = self.snapshots.append(snapshot.clone()) {
            let mut details = BTreeMap::new();
            details.insert("snapshot_id".to_string(), Value::from(snapshot_id));
            details.insert("error".to_string(), Value::from(e.to_string()));
            return self.refuse(
                EventType::NonAction,
                NonActionReason::RefusedByGuard,
                Some(GuardRefusalReason::SnapshotCaptureFailed),
                Some(capability_name),
                Some(principal_id),
                context,
                details,
            );
        }

        FrictionWindow::new(contract.consequence_level(), confidence).wait();

        if let Some(refusal) =
            self.post_friction_authority_check(principal_id, capability_name, context, grant_id, &entry)
        {
            return refusal;
        }

        // Re-validation: re-hash, re-read the authority version, compare
        // field by field. Any drift across the friction sleep is terminal.
        let current = RevalidationState {
            principal_id: principal_id.to_string(),
            grant_id: grant_id.to_string(),
            capability_name: capability_name.to_string(),
            capability_scope_hash: self
                .registry
                .get(capability_name)
                .map(|c| c.scope_hash())
                .unwrap_or_default(),
            context_hash: crate::snapshot::canonical::hash_fields(context.fields()),
            intent_hash: intent_digest(context.intent(), context.intent()),
            authority_version: self.authority.authority_version(),
        };
        if let Some(mismatch) = snapshot.first_mismatch(&current) {
            let mut details = BTreeMap::new();
            details.insert("snapshot_id".to_string(), Value::from(snapshot_id));
            details.insert("field".to_string(), Value::from(mismatch.field.as_str()));
            details.insert("expected".to_string(), mismatch.expected.clone());
            details.insert("actual".to_string(), mismatch.actual.clone());
            return self.refuse(
                EventType::NonAction,
                NonActionReason::RefusedByGuard,
                Some(GuardRefusalReason::SnapshotMismatch),
                Some(capability_name),
                Some(principal_id),
                context,
                details,
            );
        }

        if !entry.try_consume() {
            return self.grant_exhausted(principal_id, capability_name, context, grant_id, &entry);
        }

        self.run_capability(&contract, context, Some(principal_id))
    }

    /// Gates 2-8 shared by the authority and snapshot forms. Returns the
    /// resolved contract and grant entry, or the refusal that ended the
    /// sequence.
    fn authority_gates(
        &self,
        principal_id: &str,
        capability_name: &str,
        context: &Context,
        grant_id: &str,
        confidence: f64,
    ) -> Result<(Arc<CapabilityContract>, Arc<GrantEntry>), Outcome> {
        // Gate 2: intent declared (construction enforces; re-asserted).
        if context.intent().is_empty() {
            let mut details = BTreeMap::new();
            details.insert("capability".to_string(), Value::from(capability_name));
            return Err(self.refuse(
                EventType::NonAction,
                NonActionReason::MissingContext,
                None,
                Some(capability_name),
                Some(principal_id),
                context,
                details,
            ));
        }

        // Gate 3: principal presence.
        if principal_id.is_empty() {
            return Err(self.refuse(
                EventType::NonAction,
                NonActionReason::RefusedByGuard,
                Some(GuardRefusalReason::MissingPrincipal),
                Some(capability_name),
                None,
                context,
                BTreeMap::new(),
            ));
        }

        // Gate 4: grant lookup and binding.
        let entry = match self.authority.get(grant_id) {
            Some(entry) => entry,
            None => {
                let mut details = BTreeMap::new();
                details.insert("grant_id".to_string(), Value::from(grant_id));
                details.insert("principal_id".to_string(), Value::from(principal_id));
                return Err(self.refuse(
                    EventType::NonAction,
                    NonActionReason::RefusedByGuard,
                    Some(GuardRefusalReason::NoGrant),
                    Some(capability_name),
                    Some(principal_id),
                    context,
                    details,
                ));
            }
        };
        if entry.grant().principal_id() != principal_id {
            let mut details = BTreeMap::new();
            details.insert(
                "expected_principal".to_string(),
                Value::from(principal_id),
            );
            details.insert(
                "actual_principal".to_string(),
                Value::from(entry.grant().principal_id()),
            );
            return Err(self.refuse(
                EventType::NonAction,
                NonActionReason::RefusedByGuard,
                Some(GuardRefusalReason::GrantPrincipalMismatch),
                Some(capability_name),
                Some(principal_id),
                context,
                details,
            ));
        }
        if entry.grant().capability_name() != capability_name {
            let mut details = BTreeMap::new();
            details.insert(
                "expected_capability".to_string(),
                Value::from(capability_name),
            );
            details.insert(
                "actual_capability".to_string(),
                Value::from(entry.grant().capability_name()),
            );
            return Err(self.refuse(
                EventType::NonAction,
                NonActionReason::RefusedByGuard,
                Some(GuardRefusalReason::GrantCapabilityMismatch),
                Some(capability_name),
                Some(principal_id),
                context,
                details,
            ));
        }

        // Gate 5: grant not expired.
        let now = clock::now_monotonic_ns();
        if entry.grant().is_expired(now) {
            let mut details = BTreeMap::new();
            details.insert("grant_id".to_string(), Value::from(grant_id));
            details.insert(
                "expires_at".to_string(),
                Value::from(entry.grant().expires_at()),
            );
            details.insert("current_time".to_string(), Value::from(now));
            return Err(self.refuse(
                EventType::NonAction,
                NonActionReason::RefusedByGuard,
                Some(GuardRefusalReason::GrantExpired),
                Some(capability_name),
                Some(principal_id),
                context,
                details,
            ));
        }

        // Gate 6: grant not revoked.
        if self.authority.is_revoked(grant_id) {
            let mut details = BTreeMap::new();
            details.insert("grant_id".to_string(), Value::from(grant_id));
            return Err(self.refuse(
                EventType::NonAction,
                NonActionReason::RefusedByGuard,
                Some(GuardRefusalReason::GrantRevoked),
                Some(capability_name),
                Some(principal_id),
                context,
                details,
            ));
        }

        // Gate 7: uses remaining. This is the fast check; the authoritative
        // atomic claim lands after friction.
        if !entry.has_remaining_uses() {
            return Err(self.grant_exhausted(
                principal_id,
                capability_name,
                context,
                grant_id,
                &entry,
            ));
        }

        // Gate 8: confidence.
        if let Some(refusal) = self.confidence_gate(capability_name, context, confidence) {
            return Err(refusal);
        }

        // Resolve the contract and its required fields.
        let contract = match self.registry.get(capability_name) {
            Some(contract) => contract,
            None => {
                let mut details = BTreeMap::new();
                details.insert("intent".to_string(), Value::from(capability_name));
                return Err(self.refuse(
                    EventType::NonAction,
                    NonActionReason::RefusedByGuard,
                    Some(GuardRefusalReason::UnknownCapability),
                    None,
                    Some(principal_id),
                    context,
                    details,
                ));
            }
        };
        let missing = contract.validate_context(context);
        if !missing.is_empty() {
            let mut details = BTreeMap::new();
            details.insert("missing_fields".to_string(), Value::from(missing));
            return Err(self.refuse(
                EventType::NonAction,
                NonActionReason::MissingContext,
                None,
                Some(contract.name()),
                Some(principal_id),
                context,
                details,
            ));
        }

        Ok((contract, entry))
    }

    /// Revocation and expiry re-check after the friction sleep. A grant
    /// revoked while a doomed request slept still reports `grant_revoked`,
    /// and friction is never refunded.
    fn post_friction_authority_check(
        &self,
        principal_id: &str,
        capability_name: &str,
        context: &Context,
        grant_id: &str,
        entry: &Arc<GrantEntry>,
    ) -> Option<Outcome> {
        if self.authority.is_revoked(grant_id) {
            let mut details = BTreeMap::new();
            details.insert("grant_id".to_string(), Value::from(grant_id));
            return Some(self.refuse(
                EventType::NonAction,
                NonActionReason::RefusedByGuard,
                Some(GuardRefusalReason::GrantRevoked),
                Some(capability_name),
                Some(principal_id),
                context,
                details,
            ));
        }
        let now = clock::now_monotonic_ns();
        if entry.grant().is_expired(now) {
            let mut details = BTreeMap::new();
            details.insert("grant_id".to_string(), Value::from(grant_id));
            details.insert(
                "expires_at".to_string(),
                Value::from(entry.grant().expires_at()),
            );
            details.insert("current_time".to_string(), Value::from(now));
            return Some(self.refuse(
                EventType::NonAction,
                NonActionReason::RefusedByGuard,
                Some(GuardRefusalReason::GrantExpired),
                Some(capability_name),
                Some(principal_id),
                context,
                details,
            ));
        }
        None
    }

    fn grant_exhausted(
        &self,
        principal_id: &str,
        capability_name: &str,
        context: &Context,
        grant_id: &str,
        entry: &Arc<GrantEntry>,
    ) -> Outcome {
        let mut details = BTreeMap::new();
        details.insert("grant_id".to_string(), Value::from(grant_id));
        if let Some(max_uses) = entry.grant().max_uses() {
            details.insert("max_uses".to_string(), Value::from(max_uses));
        }
        self.refuse(
            EventType::NonAction,
            NonActionReason::RefusedByGuard,
            Some(GuardRefusalReason::GrantExhausted),
            Some(capability_name),
            Some(principal_id),
            context,
            details,
        )
    }

    /// Retrying a terminal refusal is structurally impossible.
    pub fn retry_refusal(
        &self,
        _refusal: &NonAction,
    ) -> Result<Outcome, ProhibitedBehaviorError> {
        Err(block_auto_retry("guard-level retry of a terminal refusal"))
    }

    /// Reordering or short-circuiting the gate sequence is structurally
    /// impossible.
    pub fn optimize_gate_order(&self) -> Result<(), ProhibitedBehaviorError> {
        Err(block_path_optimization("gate sequence reordering"))
    }
}
