use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;

use mek::{
    CapabilityContract, ConsequenceLevel, Context, GuardRefusalReason, Kernel, NonActionReason,
    RevocationReason, SnapshotQuery,
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
fn snapshot_guarded_execution_succeeds_and_records_a_snapshot() {
    let kernel = kernel_with("greet", ConsequenceLevel::Low);
    let grant = kernel.issue_grant("p1", "greet", "default", 60.0, None).unwrap();

    let outcome = kernel.execute_with_snapshot(
        "p1",
        grant.grant_id(),
        "greet",
        &context("greet", 0.9),
        0.9,
    );
    assert!(outcome.is_success());

    let snapshots = kernel.list_snapshots(&SnapshotQuery {
        principal_id: Some("p1".to_string()),
        ..SnapshotQuery::new()
    });
    assert_eq!(snapshots.len(), 1);
    let snapshot = &snapshots[0];
    assert_eq!(snapshot.capability_name, "greet");
    assert_eq!(snapshot.grant_id, grant.grant_id());
    assert_eq!(snapshot.confidence_range, "VERY_HIGH");
    // Version 1: the issuance bumped it before capture.
    assert_eq!(snapshot.authority_version, 1);
}

#[test]
fn confidence_argument_must_match_the_context() {
    let kernel = kernel_with("greet", ConsequenceLevel::Low);
    let grant = kernel.issue_grant("p1", "greet", "default", 60.0, None).unwrap();

    let outcome = kernel.execute_with_snapshot(
        "p1",
        grant.grant_id(),
        "greet",
        &context("greet", 0.9),
        0.4,
    );
    assert_eq!(
        outcome.non_action().unwrap().reason,
        NonActionReason::InvalidConfidence
    );
}

#[test]
fn unrelated_revocation_during_friction_fails_revalidation() {
    // MEDIUM consequence at confidence 0.9 gives a 3s friction window.
    let kernel = Arc::new(kernel_with("transfer", ConsequenceLevel::Medium));
    let grant = kernel
        .issue_grant("p1", "transfer", "default", 60.0, None)
        .unwrap();
    // A second, unrelated grant that will be revoked mid-friction.
    let unrelated = kernel
        .issue_grant("p2", "transfer", "default", 60.0, None)
        .unwrap();

    let bumper = {
        let kernel = kernel.clone();
        let unrelated_id = unrelated.grant_id().to_string();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(500));
            kernel
                .revoke_grant(&unrelated_id, "admin", RevocationReason::SecurityViolation)
                .unwrap();
        })
    };

    let outcome = kernel.execute_with_snapshot(
        "p1",
        grant.grant_id(),
        "transfer",
        &context("transfer", 0.9),
        0.9,
    );
    bumper.join().unwrap();

    let refusal = outcome.non_action().unwrap();
    assert_eq!(refusal.reason, NonActionReason::RefusedByGuard);
    assert_eq!(refusal.sub_reason, Some(GuardRefusalReason::SnapshotMismatch));
    assert_eq!(refusal.details.get("field"), Some(&json!("authority_version")));
}

#[test]
fn revoking_the_executing_grant_during_friction_reports_grant_revoked() {
    let kernel = Arc::new(kernel_with("transfer", ConsequenceLevel::Medium));
    let grant = kernel
        .issue_grant("p1", "transfer", "default", 60.0, None)
        .unwrap();

    let revoker = {
        let kernel = kernel.clone();
        let grant_id = grant.grant_id().to_string();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(500));
            kernel
                .revoke_grant(&grant_id, "admin", RevocationReason::PrincipalCompromised)
                .unwrap();
        })
    };

    let start = Instant::now();
    let outcome = kernel.execute_with_snapshot(
        "p1",
        grant.grant_id(),
        "transfer",
        &context("transfer", 0.9),
        0.9,
    );
    let elapsed = start.elapsed();
    revoker.join().unwrap();

    // Friction is not refunded on doomed paths.
    assert!(elapsed >= Duration::from_secs(3));
    assert_eq!(
        outcome.non_action().unwrap().sub_reason,
        Some(GuardRefusalReason::GrantRevoked)
    );
}

#[test]
fn snapshot_listing_filters_by_capability_and_time() {
    let kernel = kernel_with("greet", ConsequenceLevel::Low);
    let grant = kernel.issue_grant("p1", "greet", "default", 60.0, None).unwrap();

    for i in 0..3 {
        let outcome = kernel.execute_with_snapshot(
            "p1",
            grant.grant_id(),
            "greet",
            &context(&format!("greet-{}", i), 0.9),
            0.9,
        );
        assert!(outcome.is_success());
    }

    let all = kernel.list_snapshots(&SnapshotQuery::new());
    assert_eq!(all.len(), 3);

    let limited = kernel.list_snapshots(&SnapshotQuery {
        capability_name: Some("greet".to_string()),
        limit: Some(2),
        ..SnapshotQuery::new()
    });
    assert_eq!(limited.len(), 2);
    // Limit keeps the most recent captures.
    assert_eq!(limited[1].snapshot_id, all[2].snapshot_id);

    let windowed = kernel.list_snapshots(&SnapshotQuery {
        time_range: Some((all[1].captured_at, all[2].captured_at)),
        ..SnapshotQuery::new()
    });
    assert_eq!(windowed.len(), 2);

    let stats = kernel.snapshot_statistics();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.by_principal.get("p1"), Some(&3));
    assert_eq!(stats.by_confidence_range.get("VERY_HIGH"), Some(&3));
}

#[test]
fn snapshots_for_failed_gates_are_not_captured() {
    let kernel = kernel_with("greet", ConsequenceLevel::Low);
    let grant = kernel.issue_grant("p1", "greet", "default", 60.0, None).unwrap();
    kernel
        .revoke_grant(grant.grant_id(), "p1", RevocationReason::ExplicitRevocation)
        .unwrap();

    let outcome = kernel.execute_with_snapshot(
        "p1",
        grant.grant_id(),
        "greet",
        &context("greet", 0.9),
        0.9,
    );
    assert_eq!(
        outcome.non_action().unwrap().sub_reason,
        Some(GuardRefusalReason::GrantRevoked)
    );
    assert!(kernel.list_snapshots(&SnapshotQuery::new()).is_empty());
}

#[test]
fn get_snapshot_by_id_round_trips() {
    let kernel = kernel_with("greet", ConsequenceLevel::Low);
    let grant = kernel.issue_grant("p1", "greet", "default", 60.0, None).unwrap();
    kernel
        .execute_with_snapshot("p1", grant.grant_id(), "greet", &context("greet", 0.9), 0.9);

    let listed = kernel.list_snapshots(&SnapshotQuery::new());
    let fetched = kernel.get_snapshot(&listed[0].snapshot_id).unwrap();
    assert_eq!(fetched, listed[0]);
}
