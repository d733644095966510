use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};

use mek::observer::{BufferObserver, Observer};
use mek::types::ObservationEvent;
use mek::{
    CapabilityContract, ConsequenceLevel, Context, EventType, GuardRefusalReason, Kernel,
    NonActionReason, Outcome, ValidationError,
};

fn context(intent: &str, confidence: f64, fields: BTreeMap<String, Value>) -> Context {
    Context::new(format!("ctx-{}", intent), confidence, intent, fields).unwrap()
}

fn greet_kernel() -> Kernel {
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

#[test]
fn low_consequence_execution_succeeds_quickly() {
    let kernel = greet_kernel();
    let mut fields = BTreeMap::new();
    fields.insert("user_id".to_string(), json!("A"));

    let start = Instant::now();
    let outcome = kernel.execute("greet", &context("greet", 0.9, fields));
    assert!(start.elapsed().as_millis() <= 100);

    assert_eq!(outcome, Outcome::Success(json!("hello A")));
}

#[test]
fn missing_required_fields_list_is_reported() {
    let kernel = Kernel::new();
    kernel
        .register_capability(
            CapabilityContract::new(
                "summarize",
                ConsequenceLevel::Low,
                ["data".to_string()],
                |_| Ok(Value::Null),
            )
            .unwrap(),
        )
        .unwrap();
    kernel.lock_registry();

    let outcome = kernel.execute("summarize", &context("summarize", 0.9, BTreeMap::new()));
    let refusal = outcome.non_action().expect("expected a refusal");
    assert_eq!(refusal.reason, NonActionReason::MissingContext);
    assert_eq!(refusal.details.get("missing_fields"), Some(&json!(["data"])));
}

#[test]
fn out_of_range_confidence_fails_at_construction() {
    let err = Context::new("c1", 1.5, "greet", BTreeMap::new()).unwrap_err();
    assert!(matches!(err, ValidationError::Context(_)));
}

#[test]
fn unknown_capability_is_refused_by_guard() {
    let kernel = greet_kernel();
    let outcome = kernel.execute("nonexistent", &context("nonexistent", 0.9, BTreeMap::new()));
    let refusal = outcome.non_action().unwrap();
    assert_eq!(refusal.reason, NonActionReason::RefusedByGuard);
    assert_eq!(
        refusal.sub_reason,
        Some(GuardRefusalReason::UnknownCapability)
    );
}

#[test]
fn capability_error_becomes_execution_failed_with_reason_preserved() {
    let kernel = Kernel::new();
    kernel
        .register_capability(
            CapabilityContract::new("broken", ConsequenceLevel::Low, [], |_| {
                Err(mek::CapabilityError::new("disk_full", "no space left"))
            })
            .unwrap(),
        )
        .unwrap();
    kernel.lock_registry();

    let outcome = kernel.execute("broken", &context("broken", 0.9, BTreeMap::new()));
    let refusal = outcome.non_action().unwrap();
    assert_eq!(refusal.reason, NonActionReason::ExecutionFailed);
    assert_eq!(refusal.details.get("refusal"), Some(&json!("disk_full")));
}

#[test]
fn capability_panic_becomes_execution_failed_not_a_crash() {
    let kernel = Kernel::new();
    kernel
        .register_capability(
            CapabilityContract::new("panicky", ConsequenceLevel::Low, [], |_| {
                panic!("handler exploded")
            })
            .unwrap(),
        )
        .unwrap();
    kernel.lock_registry();

    let outcome = kernel.execute("panicky", &context("panicky", 0.9, BTreeMap::new()));
    assert_eq!(
        outcome.non_action().unwrap().reason,
        NonActionReason::ExecutionFailed
    );

    // The guard is still usable afterwards: the serialization lock was not
    // poisoned by the caught panic.
    let outcome = kernel.execute("panicky", &context("panicky", 0.9, BTreeMap::new()));
    assert!(outcome.is_non_action());
}

#[test]
fn gate_failure_never_invokes_the_capability() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = invocations.clone();

    let kernel = Kernel::new();
    kernel
        .register_capability(
            CapabilityContract::new(
                "counted",
                ConsequenceLevel::Low,
                ["data".to_string()],
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Null)
                },
            )
            .unwrap(),
        )
        .unwrap();
    kernel.lock_registry();

    // Missing required field: refused before the capability runs.
    let outcome = kernel.execute("counted", &context("counted", 0.9, BTreeMap::new()));
    assert!(outcome.is_non_action());
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}

#[test]
fn raising_observer_does_not_affect_the_outcome() {
    struct RaisingObserver;
    impl Observer for RaisingObserver {
        fn on_event(&self, _event: &ObservationEvent) {
            panic!("observer always fails");
        }
    }

    let kernel = greet_kernel();
    kernel.register_observer(Arc::new(RaisingObserver));

    let mut fields = BTreeMap::new();
    fields.insert("user_id".to_string(), json!("A"));
    let outcome = kernel.execute("greet", &context("greet", 0.9, fields));
    assert!(outcome.is_success());
}

#[test]
fn removing_all_observers_changes_no_outcome() {
    let kernel = greet_kernel();
    let buffer = Arc::new(BufferObserver::new());
    kernel.register_observer(buffer);

    let mut fields = BTreeMap::new();
    fields.insert("user_id".to_string(), json!("A"));
    let with_observers = kernel.execute("greet", &context("greet", 0.9, fields.clone()));

    kernel.clear_observers();
    let without_observers = kernel.execute("greet", &context("greet", 0.9, fields));

    assert_eq!(
        with_observers.success_value(),
        without_observers.success_value()
    );
}

#[test]
fn every_refusal_emits_and_is_logged() {
    let kernel = greet_kernel();
    let buffer = Arc::new(BufferObserver::new());
    kernel.register_observer(buffer.clone());

    let outcome = kernel.execute("nonexistent", &context("nonexistent", 0.9, BTreeMap::new()));
    assert!(outcome.is_non_action());

    let events = buffer.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::NonAction);
    assert_eq!(
        events[0].details.get("reason"),
        Some(&json!("refused_by_guard"))
    );

    let stats = kernel.pattern_statistics();
    assert_eq!(stats.non_actions, 1);
    assert_eq!(stats.by_reason.get("refused_by_guard"), Some(&1));
    assert!(kernel.verify_pattern_log());

    let refusals = kernel.pattern_records(&mek::PatternQuery {
        reason: Some(NonActionReason::RefusedByGuard),
        ..mek::PatternQuery::new()
    });
    assert_eq!(refusals.len(), 1);
    assert_eq!(refusals[0].context_id.as_deref(), Some("ctx-nonexistent"));
}

#[test]
fn successful_execution_emits_execution_success() {
    let kernel = greet_kernel();
    let buffer = Arc::new(BufferObserver::new());
    kernel.register_observer(buffer.clone());

    let mut fields = BTreeMap::new();
    fields.insert("user_id".to_string(), json!("A"));
    kernel.execute("greet", &context("greet", 0.9, fields));

    let success_events: Vec<_> = buffer
        .events()
        .into_iter()
        .filter(|e| e.event_type == EventType::ExecutionSuccess)
        .collect();
    assert_eq!(success_events.len(), 1);
}

#[test]
fn direct_contract_execution_is_an_invariant_violation() {
    let contract =
        CapabilityContract::new("greet", ConsequenceLevel::Low, [], |_| Ok(Value::Null)).unwrap();
    let ctx = context("greet", 0.9, BTreeMap::new());
    let err = contract.execute(&ctx).unwrap_err();
    assert!(matches!(err, mek::KernelError::InvariantViolation(_)));
}

#[test]
fn registration_after_lock_fails_loudly() {
    let kernel = greet_kernel();
    let late =
        CapabilityContract::new("late", ConsequenceLevel::Low, [], |_| Ok(Value::Null)).unwrap();
    let err = kernel.register_capability(late).unwrap_err();
    assert!(matches!(err, mek::KernelError::InvariantViolation(_)));
}

#[test]
fn retrying_a_refusal_is_prohibited() {
    let kernel = greet_kernel();
    let outcome = kernel.execute("nonexistent", &context("nonexistent", 0.9, BTreeMap::new()));
    let refusal = outcome.non_action().unwrap();
    let err = kernel.retry_refusal(refusal).unwrap_err();
    assert_eq!(err.class, mek::ProhibitedClass::AutoRetry);
}
