use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use mek::observer::BufferObserver;
use mek::{
    CapabilityContract, ClientBinding, ConsequenceLevel, EventType, ExternalRequest, Kernel,
    NonActionReason,
};

fn kernel() -> Kernel {
    let kernel = Kernel::new();
    kernel
        .register_capability(
            CapabilityContract::new(
                "greet",
                ConsequenceLevel::Low,
                ["user_id".to_string()],
                |ctx| {
                    let user = ctx
                        .fields()
                        .get("user_id")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown");
                    Ok(json!(format!("hello {}", user)))
                },
            )
            .unwrap(),
        )
        .unwrap();
    kernel.lock_registry();
    kernel
}

fn greet_request() -> ExternalRequest {
    let mut fields = BTreeMap::new();
    fields.insert("user_id".to_string(), json!("A"));
    ExternalRequest {
        intent: Some("greet".to_string()),
        confidence: Some(0.9),
        fields,
        ..ExternalRequest::default()
    }
}

#[test]
fn bound_request_executes_through_the_guard() {
    let kernel = kernel();
    let outcome = ClientBinding::dispatch(&kernel, &greet_request());
    assert_eq!(outcome.success_value(), Some(&json!("hello A")));
}

#[test]
fn absent_confidence_is_refused_never_defaulted() {
    let kernel = kernel();
    let request = ExternalRequest {
        confidence: None,
        ..greet_request()
    };
    let outcome = ClientBinding::dispatch(&kernel, &request);
    assert_eq!(
        outcome.non_action().unwrap().reason,
        NonActionReason::MissingConfidence
    );
}

#[test]
fn absent_intent_is_refused() {
    let kernel = kernel();
    let request = ExternalRequest {
        intent: None,
        ..greet_request()
    };
    let outcome = ClientBinding::dispatch(&kernel, &request);
    assert_eq!(
        outcome.non_action().unwrap().reason,
        NonActionReason::MissingContext
    );
}

#[test]
fn out_of_range_confidence_is_refused_at_the_binding() {
    let kernel = kernel();
    let request = ExternalRequest {
        confidence: Some(1.5),
        ..greet_request()
    };
    let outcome = ClientBinding::dispatch(&kernel, &request);
    assert_eq!(
        outcome.non_action().unwrap().reason,
        NonActionReason::InvalidConfidence
    );
}

#[test]
fn binding_refusals_surface_like_any_other_non_action() {
    let kernel = kernel();
    let buffer = Arc::new(BufferObserver::new());
    kernel.register_observer(buffer.clone());

    let request = ExternalRequest {
        confidence: None,
        ..greet_request()
    };
    ClientBinding::dispatch(&kernel, &request);

    let events = buffer.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::NonAction);
    assert_eq!(
        events[0].details.get("reason"),
        Some(&json!("missing_confidence"))
    );
    assert_eq!(kernel.pattern_statistics().non_actions, 1);
}

#[test]
fn granted_request_takes_the_snapshot_path() {
    let kernel = kernel();
    let grant = kernel.issue_grant("p1", "greet", "default", 60.0, None).unwrap();
    let request = ExternalRequest {
        principal_id: Some("p1".to_string()),
        grant_id: Some(grant.grant_id().to_string()),
        ..greet_request()
    };
    let outcome = ClientBinding::dispatch(&kernel, &request);
    assert!(outcome.is_success());
    assert_eq!(kernel.list_snapshots(&mek::SnapshotQuery::new()).len(), 1);
}

#[test]
fn non_action_propagates_verbatim() {
    let kernel = kernel();
    let grant = kernel.issue_grant("p1", "greet", "default", 60.0, None).unwrap();
    kernel
        .revoke_grant(grant.grant_id(), "p1", mek::RevocationReason::GrantLeak)
        .unwrap();
    let request = ExternalRequest {
        principal_id: Some("p1".to_string()),
        grant_id: Some(grant.grant_id().to_string()),
        ..greet_request()
    };
    let outcome = ClientBinding::dispatch(&kernel, &request);
    let refusal = outcome.non_action().unwrap();
    // The structured refusal reaches the adapter untranslated.
    assert_eq!(refusal.reason, NonActionReason::RefusedByGuard);
    assert_eq!(
        refusal.sub_reason,
        Some(mek::GuardRefusalReason::GrantRevoked)
    );
}
