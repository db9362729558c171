//! End-to-end tests for the policy decision point.
//!
//! These tests verify default-deny, priority ordering, the deny-over-allow
//! tie-break, condition gating, caching, and decision determinism.

use std::collections::BTreeMap;
use std::sync::Arc;

use custody_kernel::engine::{EXPLAIN_NO_APPLICABLE, EXPLAIN_NO_MATCH};
use custody_kernel::{
    AccessRequest, DecisionCache, DecisionEngine, DecisionError, MemoryEventSink, MemoryStore,
    PolicyInput, PolicyPatch, PolicyService, RequestContext, Resource, Subject,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

struct Harness {
    policies: Arc<PolicyService>,
    engine: DecisionEngine,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(DecisionCache::default());
    let events = Arc::new(MemoryEventSink::new());
    let policies = Arc::new(PolicyService::new(store, cache.clone(), events.clone()));
    let engine = DecisionEngine::new(policies.clone(), cache, events);
    Harness { policies, engine }
}

fn request(subject_id: &str, roles: &[&str], resource: &str, action: &str) -> AccessRequest {
    AccessRequest {
        subject: Subject {
            id: subject_id.to_string(),
            subject_type: "user".to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        },
        resource: Resource {
            resource_type: resource.to_string(),
            id: "1".to_string(),
        },
        action: action.to_string(),
        context: RequestContext::default(),
    }
}

fn policy(name: &str, effect: &str, priority: i32, subjects: &[&str]) -> PolicyInput {
    PolicyInput {
        name: name.to_string(),
        description: String::new(),
        effect: effect.to_string(),
        resources: vec!["doc".to_string()],
        actions: vec!["read".to_string()],
        subjects: subjects.iter().map(|s| s.to_string()).collect(),
        conditions: BTreeMap::new(),
        priority,
        active: true,
        metadata: BTreeMap::new(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DEFAULT-DENY TESTS
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_no_policies_is_default_deny() {
    let h = harness();
    let decision = h
        .engine
        .check(&request("u1", &["viewer"], "doc", "read"))
        .await
        .unwrap();

    assert!(!decision.allowed);
    assert_eq!(decision.explanation, EXPLAIN_NO_APPLICABLE);
    assert!(decision.policy_id.is_empty());
    assert!(decision.matched_on.is_empty());
}

#[tokio::test]
async fn test_applicable_but_unmatched_is_default_deny() {
    let h = harness();
    h.policies
        .create(policy("doc-admins", "allow", 10, &["admin"]), "test")
        .await
        .unwrap();

    let decision = h
        .engine
        .check(&request("u1", &["viewer"], "doc", "read"))
        .await
        .unwrap();

    assert!(!decision.allowed);
    assert_eq!(decision.explanation, EXPLAIN_NO_MATCH);
}

#[tokio::test]
async fn test_inactive_policies_never_apply() {
    let h = harness();
    let created = h
        .policies
        .create(policy("doc-readers", "allow", 10, &["viewer"]), "test")
        .await
        .unwrap();

    let patch = PolicyPatch {
        active: Some(false),
        ..PolicyPatch::default()
    };
    h.policies
        .update(&created.id, patch, "test", "disable")
        .await
        .unwrap();

    let decision = h
        .engine
        .check(&request("u1", &["viewer"], "doc", "read"))
        .await
        .unwrap();
    assert!(!decision.allowed);
}

// ─────────────────────────────────────────────────────────────────────────────
// MATCHING AND TIE-BREAK TESTS
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_scenario_allow_then_deny_tiebreak() {
    let h = harness();

    // Scenario: policy A allows doc/read for viewers at priority 10.
    let a = h
        .policies
        .create(policy("A", "allow", 10, &["viewer"]), "test")
        .await
        .unwrap();

    let req = request("u1", &["viewer"], "doc", "read");
    let decision = h.engine.check(&req).await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.policy_id, a.id);
    assert_eq!(decision.explanation, "Matched policy: A (version 1)");
    assert_eq!(decision.matched_on, vec!["resource:doc", "action:read"]);

    // Policy B denies at the same priority with a later creation time.
    let b = h
        .policies
        .create(policy("B", "deny", 10, &["viewer"]), "test")
        .await
        .unwrap();

    let decision = h.engine.check(&req).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.policy_id, b.id);
}

#[tokio::test]
async fn test_higher_priority_wins() {
    let h = harness();
    h.policies
        .create(policy("low-allow", "allow", 1, &["viewer"]), "test")
        .await
        .unwrap();
    let deny = h
        .policies
        .create(policy("high-deny", "deny", 100, &["viewer"]), "test")
        .await
        .unwrap();

    let decision = h
        .engine
        .check(&request("u1", &["viewer"], "doc", "read"))
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.policy_id, deny.id);
}

#[tokio::test]
async fn test_roles_match_case_insensitively() {
    let h = harness();
    h.policies
        .create(policy("doc-readers", "allow", 10, &["Viewer"]), "test")
        .await
        .unwrap();

    let decision = h
        .engine
        .check(&request("u1", &["VIEWER"], "doc", "read"))
        .await
        .unwrap();
    assert!(decision.allowed);
}

#[tokio::test]
async fn test_wildcard_resource_and_action() {
    let h = harness();
    let mut input = policy("allow-everything", "allow", 1, &[]);
    input.resources = vec!["*".to_string()];
    input.actions = vec!["*".to_string()];
    h.policies.create(input, "test").await.unwrap();

    let decision = h
        .engine
        .check(&request("u1", &[], "anything", "whatever"))
        .await
        .unwrap();
    assert!(decision.allowed);
}

// ─────────────────────────────────────────────────────────────────────────────
// CONDITION TESTS
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_conditions_are_anded() {
    let h = harness();
    let mut input = policy("office-hours-prod", "allow", 10, &[]);
    input
        .conditions
        .insert("environment".to_string(), "production".to_string());
    input
        .conditions
        .insert("time_start".to_string(), "00:00".to_string());
    input
        .conditions
        .insert("time_end".to_string(), "23:59".to_string());
    h.policies.create(input, "test").await.unwrap();

    let mut req = request("prod-caller", &[], "doc", "read");
    req.context.environment = "production".to_string();
    assert!(h.engine.check(&req).await.unwrap().allowed);

    let mut req = request("stage-caller", &[], "doc", "read");
    req.context.environment = "staging".to_string();
    assert!(!h.engine.check(&req).await.unwrap().allowed);
}

#[tokio::test]
async fn test_unknown_condition_keys_are_forward_compatible() {
    let h = harness();
    let mut input = policy("future-policy", "allow", 10, &[]);
    input
        .conditions
        .insert("requires_hardware_token".to_string(), "true".to_string());
    h.policies.create(input, "test").await.unwrap();

    let decision = h
        .engine
        .check(&request("u1", &[], "doc", "read"))
        .await
        .unwrap();
    assert!(decision.allowed);
}

// ─────────────────────────────────────────────────────────────────────────────
// DETERMINISM AND CACHE TESTS
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_decision_is_deterministic_over_repeated_runs() {
    let h = harness();
    h.policies
        .create(policy("doc-readers", "allow", 10, &["viewer"]), "test")
        .await
        .unwrap();

    let req = request("u1", &["viewer"], "doc", "read");
    let first = h.engine.check(&req).await.unwrap();

    for _ in 0..50 {
        let next = h.engine.check(&req).await.unwrap();
        // Identical modulo the cache_hit observability flag.
        assert_eq!(next.allowed, first.allowed);
        assert_eq!(next.policy_id, first.policy_id);
        assert_eq!(next.explanation, first.explanation);
        assert_eq!(next.matched_on, first.matched_on);
    }
}

#[tokio::test]
async fn test_policy_mutation_invalidates_cached_decisions() {
    let h = harness();
    let created = h
        .policies
        .create(policy("doc-readers", "allow", 10, &["viewer"]), "test")
        .await
        .unwrap();

    let req = request("u1", &["viewer"], "doc", "read");
    assert!(h.engine.check(&req).await.unwrap().allowed);
    assert!(h.engine.check(&req).await.unwrap().cache_hit);

    // Flip the policy to deny; the cached allow must not survive.
    let patch = PolicyPatch {
        effect: "deny".to_string(),
        ..PolicyPatch::default()
    };
    h.policies
        .update(&created.id, patch, "test", "lockdown")
        .await
        .unwrap();

    let decision = h.engine.check(&req).await.unwrap();
    assert!(!decision.cache_hit);
    assert!(!decision.allowed);
}

#[tokio::test]
async fn test_delete_invalidates_cached_decisions() {
    let h = harness();
    let created = h
        .policies
        .create(policy("doc-readers", "allow", 10, &["viewer"]), "test")
        .await
        .unwrap();

    let req = request("u1", &["viewer"], "doc", "read");
    assert!(h.engine.check(&req).await.unwrap().allowed);

    h.policies.delete(&created.id, "test", "sunset").await.unwrap();

    let decision = h.engine.check(&req).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.explanation, EXPLAIN_NO_APPLICABLE);
}

// ─────────────────────────────────────────────────────────────────────────────
// BULK EVALUATION TESTS
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_bulk_check_preserves_order() {
    let h = harness();
    h.policies
        .create(policy("doc-readers", "allow", 10, &["viewer"]), "test")
        .await
        .unwrap();

    let batch = vec![
        request("u1", &["viewer"], "doc", "read"),
        request("u2", &["intern"], "doc", "read"),
        request("u3", &["viewer"], "doc", "read"),
    ];
    let decisions = h.engine.bulk_check(&batch).await.unwrap();

    assert_eq!(decisions.len(), 3);
    assert!(decisions[0].allowed);
    assert!(!decisions[1].allowed);
    assert!(decisions[2].allowed);
}

#[tokio::test]
async fn test_bulk_check_rejects_bad_batches() {
    let h = harness();

    assert!(matches!(
        h.engine.bulk_check(&[]).await.unwrap_err(),
        DecisionError::EmptyBatch
    ));

    let oversize: Vec<AccessRequest> = (0..101)
        .map(|i| request(&format!("u{}", i), &["viewer"], "doc", "read"))
        .collect();
    assert!(matches!(
        h.engine.bulk_check(&oversize).await.unwrap_err(),
        DecisionError::BatchTooLarge(101)
    ));
}
