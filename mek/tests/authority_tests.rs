use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use serde_json::{json, Value};

use mek::{
    CapabilityContract, ConsequenceLevel, Context, GuardRefusalReason, Kernel, NonActionReason,
    RevocationReason,
};

fn context(intent: &str, confidence: f64) -> Context {
    let mut fields = BTreeMap::new();
    fields.insert("user_id".to_string(), json!("A"));
    Context::new(format!("ctx-{}", intent), confidence, intent, fields).unwrap()
}

fn kernel_with(name: &str, level: ConsequenceLevel) -> Kernel {
    let kernel = Kernel::new();
    kernel
        .register_capability(
            CapabilityContract::new(name, level, ["user_id".to_string()], |_| Ok(json!("done")))
                .unwrap(),
        )
        .unwrap();
    kernel.lock_registry();
    kernel
}

#[test]
fn granted_execution_succeeds() {
    let kernel = kernel_with("greet", ConsequenceLevel::Low);
    let grant = kernel.issue_grant("p1", "greet", "default", 60.0, None).unwrap();
    let outcome =
        kernel.execute_with_authority("p1", "greet", &context("greet", 0.9), grant.grant_id());
    assert!(outcome.is_success());
}

#[test]
fn missing_principal_is_refused() {
    let kernel = kernel_with("greet", ConsequenceLevel::Low);
    let grant = kernel.issue_grant("p1", "greet", "default", 60.0, None).unwrap();
    let outcome =
        kernel.execute_with_authority("", "greet", &context("greet", 0.9), grant.grant_id());
    assert_eq!(
        outcome.non_action().unwrap().sub_reason,
        Some(GuardRefusalReason::MissingPrincipal)
    );
}

#[test]
fn unknown_grant_is_refused() {
    let kernel = kernel_with("greet", ConsequenceLevel::Low);
    let outcome =
        kernel.execute_with_authority("p1", "greet", &context("greet", 0.9), "no-such-grant");
    assert_eq!(
        outcome.non_action().unwrap().sub_reason,
        Some(GuardRefusalReason::NoGrant)
    );
}

#[test]
fn another_principals_grant_is_refused() {
    let kernel = kernel_with("greet", ConsequenceLevel::Low);
    let grant = kernel.issue_grant("P1", "greet", "default", 60.0, None).unwrap();
    let outcome =
        kernel.execute_with_authority("P2", "greet", &context("greet", 0.9), grant.grant_id());
    let refusal = outcome.non_action().unwrap();
    assert_eq!(
        refusal.sub_reason,
        Some(GuardRefusalReason::GrantPrincipalMismatch)
    );
    assert_eq!(refusal.details.get("actual_principal"), Some(&json!("P1")));
}

#[test]
fn grant_for_another_capability_is_refused() {
    let kernel = kernel_with("greet", ConsequenceLevel::Low);
    let grant = kernel
        .issue_grant("p1", "delete_db", "default", 60.0, None)
        .unwrap();
    let outcome =
        kernel.execute_with_authority("p1", "greet", &context("greet", 0.9), grant.grant_id());
    assert_eq!(
        outcome.non_action().unwrap().sub_reason,
        Some(GuardRefusalReason::GrantCapabilityMismatch)
    );
}

#[test]
fn zero_ttl_grant_is_born_expired() {
    let kernel = kernel_with("greet", ConsequenceLevel::Low);
    let grant = kernel.issue_grant("p1", "greet", "default", 0.0, None).unwrap();
    let outcome =
        kernel.execute_with_authority("p1", "greet", &context("greet", 0.9), grant.grant_id());
    assert_eq!(
        outcome.non_action().unwrap().sub_reason,
        Some(GuardRefusalReason::GrantExpired)
    );
}

#[test]
fn negative_ttl_grant_is_born_expired() {
    let kernel = kernel_with("greet", ConsequenceLevel::Low);
    let grant = kernel
        .issue_grant("p1", "greet", "default", -5.0, None)
        .unwrap();
    let outcome =
        kernel.execute_with_authority("p1", "greet", &context("greet", 0.9), grant.grant_id());
    assert_eq!(
        outcome.non_action().unwrap().sub_reason,
        Some(GuardRefusalReason::GrantExpired)
    );
}

#[test]
fn revoked_grant_refuses_every_subsequent_execution() {
    let kernel = kernel_with("greet", ConsequenceLevel::Low);
    let grant = kernel.issue_grant("p1", "greet", "default", 60.0, None).unwrap();
    kernel
        .revoke_grant(grant.grant_id(), "p1", RevocationReason::SecurityViolation)
        .unwrap();

    for _ in 0..3 {
        let outcome =
            kernel.execute_with_authority("p1", "greet", &context("greet", 0.9), grant.grant_id());
        assert_eq!(
            outcome.non_action().unwrap().sub_reason,
            Some(GuardRefusalReason::GrantRevoked)
        );
    }
}

#[test]
fn revocation_is_idempotent_and_returns_the_original_event() {
    let kernel = kernel_with("greet", ConsequenceLevel::Low);
    let grant = kernel.issue_grant("p1", "greet", "default", 60.0, None).unwrap();

    let first = kernel
        .revoke_grant(grant.grant_id(), "p1", RevocationReason::ExplicitRevocation)
        .unwrap();
    let second = kernel
        .revoke_grant(grant.grant_id(), "admin", RevocationReason::GrantLeak)
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(first.reason, RevocationReason::ExplicitRevocation);
}

#[test]
fn issuance_and_revocation_bump_the_authority_version() {
    let kernel = kernel_with("greet", ConsequenceLevel::Low);
    assert_eq!(kernel.authority_version(), 0);
    let grant = kernel.issue_grant("p1", "greet", "default", 60.0, None).unwrap();
    assert_eq!(kernel.authority_version(), 1);
    kernel
        .revoke_grant(grant.grant_id(), "p1", RevocationReason::ExplicitRevocation)
        .unwrap();
    assert_eq!(kernel.authority_version(), 2);
}

#[test]
fn issued_grants_list_in_issuance_order() {
    let kernel = kernel_with("greet", ConsequenceLevel::Low);
    let mut expected = Vec::new();
    for _ in 0..5 {
        let grant = kernel.issue_grant("p1", "greet", "default", 60.0, None).unwrap();
        expected.push(grant.grant_id().to_string());
    }
    let listed: Vec<String> = kernel
        .list_grants(Some("p1"))
        .iter()
        .map(|g| g.grant_id().to_string())
        .collect();
    assert_eq!(listed, expected);
}

#[test]
fn max_uses_is_exact_under_concurrency() {
    let kernel = Arc::new(kernel_with("greet", ConsequenceLevel::Low));
    let grant = kernel
        .issue_grant("p1", "greet", "default", 60.0, Some(3))
        .unwrap();
    let grant_id = grant.grant_id().to_string();

    let mut handles = Vec::new();
    for i in 0..5 {
        let kernel = kernel.clone();
        let grant_id = grant_id.clone();
        handles.push(thread::spawn(move || {
            kernel.execute_with_authority(
                "p1",
                "greet",
                &context(&format!("greet-{}", i), 0.9),
                &grant_id,
            )
        }));
    }

    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let successes = outcomes.iter().filter(|o| o.is_success()).count();
    let exhausted = outcomes
        .iter()
        .filter(|o| {
            o.non_action()
                .map(|na| na.sub_reason == Some(GuardRefusalReason::GrantExhausted))
                .unwrap_or(false)
        })
        .count();
    assert_eq!(successes, 3);
    assert_eq!(exhausted, 2);

    // The (n+1)-th sequential attempt is also exhausted.
    let outcome =
        kernel.execute_with_authority("p1", "greet", &context("greet-final", 0.9), &grant_id);
    assert_eq!(
        outcome.non_action().unwrap().sub_reason,
        Some(GuardRefusalReason::GrantExhausted)
    );
}

#[test]
fn missing_context_fields_refuse_before_consuming_a_use() {
    let kernel = kernel_with("greet", ConsequenceLevel::Low);
    let grant = kernel
        .issue_grant("p1", "greet", "default", 60.0, Some(1))
        .unwrap();

    let bare = Context::new("ctx-bare", 0.9, "greet", BTreeMap::new()).unwrap();
    let outcome = kernel.execute_with_authority("p1", "greet", &bare, grant.grant_id());
    assert_eq!(
        outcome.non_action().unwrap().reason,
        NonActionReason::MissingContext
    );

    // The refusal did not burn the single use.
    let outcome =
        kernel.execute_with_authority("p1", "greet", &context("greet", 0.9), grant.grant_id());
    assert!(outcome.is_success());
}

#[test]
fn grant_escalation_is_prohibited() {
    let kernel = kernel_with("greet", ConsequenceLevel::Low);
    let grant = kernel.issue_grant("p1", "greet", "default", 60.0, None).unwrap();
    let err = kernel.escalate_grant(grant.grant_id()).unwrap_err();
    assert_eq!(err.class, mek::ProhibitedClass::AutonomousEscalation);
}

#[test]
fn grants_cannot_be_fabricated_with_serde() {
    // A Grant deserialized from wire data is just data: the store never
    // accepted it, so execution with its id is refused.
    let kernel = kernel_with("greet", ConsequenceLevel::Low);
    let forged: mek::Grant = serde_json::from_value(json!({
        "grant_id": "forged-id",
        "principal_id": "p1",
        "capability_name": "greet",
        "scope": "default",
        "issued_at": 0u64,
        "expires_at": u64::MAX,
        "max_uses": Value::Null,
        "revocable": true,
    }))
    .unwrap();
    let outcome =
        kernel.execute_with_authority("p1", "greet", &context("greet", 0.9), forged.grant_id());
    assert_eq!(
        outcome.non_action().unwrap().sub_reason,
        Some(GuardRefusalReason::NoGrant)
    );
}
