//! The policy decision point.
//!
//! Given an access request, the engine returns an allow/deny decision with
//! an explanation. Evaluation is deterministic: the decision is a pure
//! function of the request, the set of active policies, and the evaluation
//! time. Two invocations with identical inputs return identical decisions,
//! modulo the `cache_hit` observability flag.
//!
//! ## Algorithm
//!
//! 1. Fingerprint the request and consult the cache.
//! 2. Fetch applicable policies (resource + action match, decision order).
//! 3. Empty set: default-deny, cache, return.
//! 4. Scan in order for the first active policy whose subject patterns and
//!    conditions hold. Ties on priority break by later creation time, then
//!    deny over allow (fail closed).
//! 5. Decision follows the matched effect, or default-deny when the scan
//!    finds nothing.
//! 6. Cache for 60 seconds and emit an `AccessDecision` event.

pub mod cache;

use std::sync::Arc;

use crate::canonical::canonical_now;
use crate::events::{emit, EventSink};
use crate::policy::conditions::{evaluate_all, ConditionContext};
use crate::policy::{PolicyError, PolicyService};
use crate::types::{AccessDecision, AccessRequest, DomainEvent, Policy, PolicyEffect};

pub use cache::{CacheConfig, CacheStats, DecisionCache, DECISION_CACHE_TTL};

/// Maximum number of requests in one bulk evaluation.
pub const MAX_BULK_REQUESTS: usize = 100;

/// Explanation used when no policy is applicable to the request.
pub const EXPLAIN_NO_APPLICABLE: &str =
    "No applicable policies found - access denied by default";

/// Explanation used when applicable policies exist but none match.
pub const EXPLAIN_NO_MATCH: &str = "No matching policy found - access denied by default";

/// Errors raised by the decision engine.
#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    /// Bulk evaluation received zero requests.
    #[error("bulk check requires at least one request")]
    EmptyBatch,
    /// Bulk evaluation exceeded the batch cap.
    #[error("bulk check of {0} requests exceeds the limit of 100")]
    BatchTooLarge(usize),
    /// The caller's deadline elapsed mid-evaluation.
    #[error("evaluation cancelled before completion")]
    Cancelled,
    /// Policy lookup failed.
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// The policy decision point.
pub struct DecisionEngine {
    policies: Arc<PolicyService>,
    cache: Arc<DecisionCache>,
    events: Arc<dyn EventSink>,
}

impl DecisionEngine {
    /// Create a new engine.
    ///
    /// The cache instance must be the one registered with the policy
    /// service, so policy mutations invalidate the entries this engine
    /// writes.
    pub fn new(
        policies: Arc<PolicyService>,
        cache: Arc<DecisionCache>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            policies,
            cache,
            events,
        }
    }

    /// Evaluate a single access request.
    pub async fn check(&self, request: &AccessRequest) -> Result<AccessDecision, DecisionError> {
        let fingerprint = request.fingerprint();

        if let Some(mut cached) = self.cache.get(&fingerprint) {
            cached.cache_hit = true;
            tracing::debug!(
                target: "custody_kernel::engine",
                fingerprint = %fingerprint,
                allowed = cached.allowed,
                "decision served from cache"
            );
            return Ok(cached);
        }

        let applicable = self
            .policies
            .find_applicable(&request.resource.resource_type, &request.action)
            .await?;

        // Missing request time means "now"; the engine never mutates the
        // request otherwise.
        let eval_time = request.context.time.unwrap_or_else(canonical_now);

        let (decision, matched) = if applicable.is_empty() {
            (self.default_deny(EXPLAIN_NO_APPLICABLE), None)
        } else {
            match self.first_match(&applicable, request, eval_time) {
                Some(policy) => {
                    let decision = AccessDecision {
                        allowed: policy.effect == PolicyEffect::Allow,
                        policy_id: policy.id.clone(),
                        policy_name: policy.name.clone(),
                        explanation: format!(
                            "Matched policy: {} (version {})",
                            policy.name, policy.version
                        ),
                        matched_on: vec![
                            format!("resource:{}", request.resource.resource_type),
                            format!("action:{}", request.action),
                        ],
                        evaluated_at: canonical_now(),
                        cache_hit: false,
                    };
                    (decision, Some(policy.id.clone()))
                }
                None => (self.default_deny(EXPLAIN_NO_MATCH), None),
            }
        };

        self.cache.insert(
            &fingerprint,
            &decision,
            matched.as_deref(),
            &request.resource.resource_type,
        );

        emit(
            self.events.as_ref(),
            DomainEvent::AccessDecision {
                timestamp: decision.evaluated_at,
                fingerprint: fingerprint.to_string(),
                allowed: decision.allowed,
                policy_id: decision.policy_id.clone(),
            },
        )
        .await;

        tracing::info!(
            target: "custody_kernel::engine",
            fingerprint = %fingerprint,
            subject = %request.subject.id,
            resource = %request.resource.resource_type,
            action = %request.action,
            allowed = decision.allowed,
            policy_id = %decision.policy_id,
            "access decision"
        );
        Ok(decision)
    }

    /// Evaluate up to [`MAX_BULK_REQUESTS`] requests in order.
    pub async fn bulk_check(
        &self,
        requests: &[AccessRequest],
    ) -> Result<Vec<AccessDecision>, DecisionError> {
        if requests.is_empty() {
            return Err(DecisionError::EmptyBatch);
        }
        if requests.len() > MAX_BULK_REQUESTS {
            return Err(DecisionError::BatchTooLarge(requests.len()));
        }

        let mut decisions = Vec::with_capacity(requests.len());
        for request in requests {
            decisions.push(self.check(request).await?);
        }
        Ok(decisions)
    }

    /// First policy in decision order that is active, covers the subject,
    /// and satisfies every condition.
    fn first_match<'a>(
        &self,
        applicable: &'a [Policy],
        request: &AccessRequest,
        eval_time: chrono::DateTime<chrono::Utc>,
    ) -> Option<&'a Policy> {
        let ctx = ConditionContext {
            time: eval_time,
            ip_address: request.context.ip_address.clone(),
            user_agent: request.context.user_agent.clone(),
            environment: request.context.environment.clone(),
        };

        applicable.iter().find(|policy| {
            policy.active
                && policy.matches_subject(&request.subject.roles)
                && evaluate_all(&policy.conditions, &ctx)
        })
    }

    fn default_deny(&self, explanation: &str) -> AccessDecision {
        AccessDecision {
            allowed: false,
            policy_id: String::new(),
            policy_name: String::new(),
            explanation: explanation.to_string(),
            matched_on: vec![],
            evaluated_at: canonical_now(),
            cache_hit: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventSink;
    use crate::store::MemoryStore;
    use crate::types::{PolicyInput, RequestContext, Resource, Subject};
    use std::collections::BTreeMap;

    fn harness() -> (Arc<PolicyService>, DecisionEngine, Arc<MemoryEventSink>) {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(DecisionCache::default());
        let events = Arc::new(MemoryEventSink::new());
        let policies = Arc::new(PolicyService::new(store, cache.clone(), events.clone()));
        let engine = DecisionEngine::new(policies.clone(), cache, events.clone());
        (policies, engine, events)
    }

    fn request(roles: &[&str], resource: &str, action: &str) -> AccessRequest {
        AccessRequest {
            subject: Subject {
                id: "u1".to_string(),
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

    fn policy_input(name: &str, effect: &str, priority: i32, subjects: &[&str]) -> PolicyInput {
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

    #[tokio::test]
    async fn test_default_deny_without_policies() {
        let (_, engine, _) = harness();
        let decision = engine.check(&request(&["viewer"], "doc", "read")).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.explanation, EXPLAIN_NO_APPLICABLE);
        assert!(decision.policy_id.is_empty());
    }

    #[tokio::test]
    async fn test_matching_allow_policy() {
        let (policies, engine, _) = harness();
        let created = policies
            .create(policy_input("doc-readers", "allow", 10, &["viewer"]), "admin")
            .await
            .unwrap();

        let decision = engine.check(&request(&["viewer"], "doc", "read")).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.policy_id, created.id);
        assert_eq!(
            decision.explanation,
            "Matched policy: doc-readers (version 1)"
        );
        assert_eq!(decision.matched_on, vec!["resource:doc", "action:read"]);
    }

    #[tokio::test]
    async fn test_subject_mismatch_falls_through_to_default_deny() {
        let (policies, engine, _) = harness();
        policies
            .create(policy_input("doc-readers", "allow", 10, &["viewer"]), "admin")
            .await
            .unwrap();

        let decision = engine.check(&request(&["intern"], "doc", "read")).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.explanation, EXPLAIN_NO_MATCH);
    }

    #[tokio::test]
    async fn test_cache_hit_flag_and_invalidation() {
        let (policies, engine, _) = harness();
        policies
            .create(policy_input("doc-readers", "allow", 10, &["viewer"]), "admin")
            .await
            .unwrap();

        let req = request(&["viewer"], "doc", "read");
        let first = engine.check(&req).await.unwrap();
        assert!(!first.cache_hit);

        let second = engine.check(&req).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.allowed, first.allowed);

        // A new deny policy over the same resource must evict the entry.
        policies
            .create(policy_input("doc-deny", "deny", 20, &["viewer"]), "admin")
            .await
            .unwrap();
        let third = engine.check(&req).await.unwrap();
        assert!(!third.cache_hit);
        assert!(!third.allowed);
    }

    #[tokio::test]
    async fn test_deny_wins_exact_tie() {
        let (policies, engine, _) = harness();
        // Same priority; the deny policy is created second so it also has
        // the later creation time. Either tie-break gives the same answer.
        policies
            .create(policy_input("allow-doc", "allow", 10, &["viewer"]), "admin")
            .await
            .unwrap();
        let deny = policies
            .create(policy_input("deny-doc", "deny", 10, &["viewer"]), "admin")
            .await
            .unwrap();

        let decision = engine.check(&request(&["viewer"], "doc", "read")).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.policy_id, deny.id);
    }

    #[tokio::test]
    async fn test_conditions_gate_matching() {
        let (policies, engine, _) = harness();
        let mut input = policy_input("prod-only", "allow", 10, &[]);
        input
            .conditions
            .insert("environment".to_string(), "production".to_string());
        policies.create(input, "admin").await.unwrap();

        // Distinct subjects so the two contexts do not share a cache slot:
        // the fingerprint deliberately excludes context.
        let mut req = request(&[], "doc", "read");
        req.subject.id = "staging-caller".to_string();
        req.context.environment = "staging".to_string();
        assert!(!engine.check(&req).await.unwrap().allowed);

        let mut req = request(&[], "doc", "read");
        req.subject.id = "production-caller".to_string();
        req.context.environment = "production".to_string();
        assert!(engine.check(&req).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_bulk_check_validates_batch() {
        let (_, engine, _) = harness();
        assert!(matches!(
            engine.bulk_check(&[]).await.unwrap_err(),
            DecisionError::EmptyBatch
        ));

        let oversize: Vec<AccessRequest> = (0..101)
            .map(|_| request(&["viewer"], "doc", "read"))
            .collect();
        assert!(matches!(
            engine.bulk_check(&oversize).await.unwrap_err(),
            DecisionError::BatchTooLarge(101)
        ));

        let batch: Vec<AccessRequest> =
            (0..3).map(|_| request(&["viewer"], "doc", "read")).collect();
        let decisions = engine.bulk_check(&batch).await.unwrap();
        assert_eq!(decisions.len(), 3);
    }

    #[tokio::test]
    async fn test_decision_event_emitted() {
        let (_, engine, events) = harness();
        engine.check(&request(&["viewer"], "doc", "read")).await.unwrap();
        let emitted = events.events();
        assert!(emitted
            .iter()
            .any(|e| matches!(e, DomainEvent::AccessDecision { allowed: false, .. })));
    }
}
