//! Decision cache with TTL and bounded invalidation.
//!
//! ## Cache Key Design
//!
//! Entries are keyed by the request fingerprint, which covers the request's
//! semantic key (subject, resource, action) and nothing else. Each entry
//! expires 60 seconds after insertion.
//!
//! ## Invalidation
//!
//! On any policy mutation the cache drops every entry the policy could
//! affect, using two indexes:
//!
//! - policy id → fingerprints that matched this policy (targeted drop on
//!   update and delete),
//! - request resource type → fingerprints (covers requests a created or
//!   reshaped policy may newly match, including cached default-denies).
//!
//! A policy carrying the `*` resource pattern can cover any request, so it
//! flushes the whole cache. Over-invalidation is acceptable;
//! under-invalidation is not. The cache is best-effort: when disabled,
//! callers fall through to direct evaluation.

use lru::LruCache;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use crate::types::{AccessDecision, DecisionFingerprint, Policy};

/// Time-to-live for every cached decision.
pub const DECISION_CACHE_TTL: Duration = Duration::from_secs(60);

/// Configuration for the decision cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache.
    pub max_entries: usize,
    /// Time-to-live per entry.
    pub ttl: Duration,
    /// Whether to enable the cache.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: DECISION_CACHE_TTL,
            enabled: true,
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    /// Current number of entries in the cache.
    pub len: usize,
    /// Maximum capacity of the cache.
    pub cap: usize,
}

#[derive(Debug, Clone)]
struct Entry {
    decision: AccessDecision,
    expires_at: Instant,
    policy_id: Option<String>,
    resource_type: String,
}

struct CacheInner {
    entries: LruCache<String, Entry>,
    by_policy: HashMap<String, BTreeSet<String>>,
    by_resource: HashMap<String, BTreeSet<String>>,
}

impl CacheInner {
    fn unindex(&mut self, key: &str, entry: &Entry) {
        if let Some(policy_id) = &entry.policy_id {
            if let Some(set) = self.by_policy.get_mut(policy_id) {
                set.remove(key);
                if set.is_empty() {
                    self.by_policy.remove(policy_id);
                }
            }
        }
        if let Some(set) = self.by_resource.get_mut(&entry.resource_type) {
            set.remove(key);
            if set.is_empty() {
                self.by_resource.remove(&entry.resource_type);
            }
        }
    }

    fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.pop(key) {
            self.unindex(key, &entry);
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.by_policy.clear();
        self.by_resource.clear();
    }
}

/// Memoizes access decisions keyed by request fingerprint.
///
/// Thread-safe; the per-process instance is shared by the decision engine
/// (reads and inserts) and the policy service (invalidation).
pub struct DecisionCache {
    inner: Option<RwLock<CacheInner>>,
    ttl: Duration,
}

impl DecisionCache {
    /// Create a cache from configuration.
    pub fn new(config: CacheConfig) -> Self {
        let inner = if config.enabled {
            let cap = NonZeroUsize::new(config.max_entries)
                .unwrap_or_else(|| NonZeroUsize::new(1000).expect("nonzero"));
            Some(RwLock::new(CacheInner {
                entries: LruCache::new(cap),
                by_policy: HashMap::new(),
                by_resource: HashMap::new(),
            }))
        } else {
            None
        };
        Self {
            inner,
            ttl: config.ttl,
        }
    }

    /// Create a disabled cache; every lookup misses and inserts are dropped.
    pub fn disabled() -> Self {
        Self::new(CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        })
    }

    /// Look up a cached decision. Expired entries are removed on the way out.
    pub fn get(&self, fingerprint: &DecisionFingerprint) -> Option<AccessDecision> {
        let inner = self.inner.as_ref()?;

        // Fast path under the read lock.
        let expired = {
            let guard = inner.read();
            match guard.entries.peek(fingerprint.as_str()) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.decision.clone());
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            inner.write().remove(fingerprint.as_str());
        }
        None
    }

    /// Insert a decision, indexing it for later invalidation.
    ///
    /// `policy_id` is the matched policy, or `None` for a default-deny;
    /// `resource_type` is the request's resource type (not the policy's
    /// pattern), so a future policy covering this type can find the entry.
    pub fn insert(
        &self,
        fingerprint: &DecisionFingerprint,
        decision: &AccessDecision,
        policy_id: Option<&str>,
        resource_type: &str,
    ) {
        let Some(inner) = self.inner.as_ref() else {
            return;
        };
        let key = fingerprint.as_str().to_string();
        let entry = Entry {
            decision: decision.clone(),
            expires_at: Instant::now() + self.ttl,
            policy_id: policy_id.map(|s| s.to_string()),
            resource_type: resource_type.to_string(),
        };

        let mut guard = inner.write();
        // push returns the displaced entry (same-key replacement or LRU
        // eviction); drop its index references before indexing the new one
        // so the index maps stay proportional to live entries.
        if let Some((evicted_key, evicted)) = guard.entries.push(key.clone(), entry.clone()) {
            guard.unindex(&evicted_key, &evicted);
        }
        if let Some(policy_id) = &entry.policy_id {
            guard
                .by_policy
                .entry(policy_id.clone())
                .or_default()
                .insert(key.clone());
        }
        guard
            .by_resource
            .entry(entry.resource_type.clone())
            .or_default()
            .insert(key);
    }

    /// Drop every entry the given policy could affect.
    ///
    /// Called by the policy service after create, update (with both the old
    /// and new shape), and delete.
    pub fn invalidate_policy(&self, policy: &Policy) {
        let Some(inner) = self.inner.as_ref() else {
            return;
        };
        let mut guard = inner.write();

        if policy.resources.iter().any(|r| r == "*") {
            guard.clear();
            return;
        }

        let mut keys: BTreeSet<String> = BTreeSet::new();
        if let Some(set) = guard.by_policy.get(&policy.id) {
            keys.extend(set.iter().cloned());
        }
        for resource in &policy.resources {
            if let Some(set) = guard.by_resource.get(resource) {
                keys.extend(set.iter().cloned());
            }
        }
        for key in keys {
            guard.remove(&key);
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        if let Some(inner) = self.inner.as_ref() {
            inner.write().clear();
        }
    }

    /// Cache statistics, or `None` when the cache is disabled.
    pub fn stats(&self) -> Option<CacheStats> {
        self.inner.as_ref().map(|inner| {
            let guard = inner.read();
            CacheStats {
                len: guard.entries.len(),
                cap: guard.entries.cap().get(),
            }
        })
    }
}

impl Default for DecisionCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::canonical_now;
    use crate::types::PolicyEffect;
    use std::collections::BTreeMap;

    fn decision(policy_id: &str) -> AccessDecision {
        AccessDecision {
            allowed: true,
            policy_id: policy_id.to_string(),
            policy_name: "p".to_string(),
            explanation: "test".to_string(),
            matched_on: vec![],
            evaluated_at: canonical_now(),
            cache_hit: false,
        }
    }

    fn policy(id: &str, resources: &[&str]) -> Policy {
        let now = canonical_now();
        Policy {
            id: id.to_string(),
            name: "p".to_string(),
            description: String::new(),
            effect: PolicyEffect::Allow,
            resources: resources.iter().map(|r| r.to_string()).collect(),
            actions: vec!["*".to_string()],
            subjects: vec![],
            conditions: BTreeMap::new(),
            priority: 0,
            version: 1,
            active: true,
            metadata: BTreeMap::new(),
            created_at: now,
            created_by: "t".to_string(),
            updated_at: now,
            updated_by: "t".to_string(),
        }
    }

    fn fp(s: &str) -> DecisionFingerprint {
        DecisionFingerprint::new(s.to_string())
    }

    #[test]
    fn test_insert_and_get() {
        let cache = DecisionCache::default();
        cache.insert(&fp("f1"), &decision("p1"), Some("p1"), "doc");

        let hit = cache.get(&fp("f1")).unwrap();
        assert_eq!(hit.policy_id, "p1");
        assert!(cache.get(&fp("f2")).is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = DecisionCache::new(CacheConfig {
            ttl: Duration::from_millis(0),
            ..CacheConfig::default()
        });
        cache.insert(&fp("f1"), &decision("p1"), Some("p1"), "doc");
        assert!(cache.get(&fp("f1")).is_none());
        assert_eq!(cache.stats().unwrap().len, 0);
    }

    #[test]
    fn test_invalidate_by_policy_id() {
        let cache = DecisionCache::default();
        cache.insert(&fp("f1"), &decision("p1"), Some("p1"), "doc");
        cache.insert(&fp("f2"), &decision("p2"), Some("p2"), "image");

        cache.invalidate_policy(&policy("p1", &["doc"]));

        assert!(cache.get(&fp("f1")).is_none());
        assert!(cache.get(&fp("f2")).is_some());
    }

    #[test]
    fn test_invalidate_covers_default_denies_by_resource() {
        let cache = DecisionCache::default();
        // A cached default-deny has no matched policy, only a resource type.
        let mut deny = decision("");
        deny.allowed = false;
        cache.insert(&fp("f1"), &deny, None, "doc");

        // A brand new policy over "doc" must drop the cached default-deny.
        cache.invalidate_policy(&policy("p-new", &["doc"]));
        assert!(cache.get(&fp("f1")).is_none());
    }

    #[test]
    fn test_wildcard_resource_flushes_everything() {
        let cache = DecisionCache::default();
        cache.insert(&fp("f1"), &decision("p1"), Some("p1"), "doc");
        cache.insert(&fp("f2"), &decision("p2"), Some("p2"), "image");

        cache.invalidate_policy(&policy("p3", &["*"]));

        assert_eq!(cache.stats().unwrap().len, 0);
    }

    #[test]
    fn test_disabled_cache_never_hits() {
        let cache = DecisionCache::disabled();
        cache.insert(&fp("f1"), &decision("p1"), Some("p1"), "doc");
        assert!(cache.get(&fp("f1")).is_none());
        assert!(cache.stats().is_none());
    }

    #[test]
    fn test_capacity_eviction_cleans_indexes() {
        let cache = DecisionCache::new(CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        });
        cache.insert(&fp("f1"), &decision("p1"), Some("p1"), "doc");
        cache.insert(&fp("f2"), &decision("p1"), Some("p1"), "doc");
        cache.insert(&fp("f3"), &decision("p1"), Some("p1"), "doc");

        assert_eq!(cache.stats().unwrap().len, 2);
        assert!(cache.get(&fp("f1")).is_none());
        assert!(cache.get(&fp("f3")).is_some());
    }
}
