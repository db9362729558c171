//! Policy store service: CRUD, versioning, history, and restore.
//!
//! Every state-changing mutation strictly increments the policy's version
//! counter and appends an immutable history snapshot, so any past state can
//! be inspected or restored. Deletion removes the live row but the history
//! outlives it, carrying a pre-delete snapshot for restoration.

pub mod conditions;

use std::cmp::Ordering;
use std::sync::Arc;
use uuid::Uuid;

use crate::canonical::canonical_now;
use crate::engine::cache::DecisionCache;
use crate::events::{emit, EventSink};
use crate::store::{PolicyStore, StoreError};
use crate::types::{
    ChangeKind, DomainEvent, Policy, PolicyEffect, PolicyInput, PolicyPatch, PolicyVersion,
};

pub use conditions::{evaluate_all, Condition, ConditionContext};

/// Reason recorded on the first history entry of every policy.
pub const INITIAL_CREATION_REASON: &str = "Initial policy creation";

/// Errors raised by the policy service.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// No live policy with the given id.
    #[error("policy not found: {0}")]
    NotFound(String),
    /// No history entry for the given `(policy_id, version)`.
    #[error("policy version not found: {id} version {version}")]
    VersionNotFound {
        /// The policy id.
        id: String,
        /// The requested version.
        version: u32,
    },
    /// Restore was asked to rebuild state from a snapshot that does not exist.
    #[error("cannot restore policy {id}: no snapshot for version {version}")]
    RestoreConflict {
        /// The policy id.
        id: String,
        /// The requested version.
        version: u32,
    },
    /// The effect string is not in the allowed set.
    #[error("invalid policy effect: {0}")]
    InvalidEffect(String),
    /// Page or page size out of range.
    #[error("invalid pagination: page {page}, page_size {page_size}")]
    InvalidPagination {
        /// The requested page (1-based).
        page: u32,
        /// The requested page size.
        page_size: u32,
    },
    /// The storage layer failed; callers may retry.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One page of policies.
#[derive(Debug, Clone)]
pub struct PolicyPage {
    /// Policies on this page.
    pub items: Vec<Policy>,
    /// Total rows across all pages.
    pub total: u64,
}

/// One page of history entries.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    /// History entries on this page.
    pub items: Vec<PolicyVersion>,
    /// Total rows across all pages.
    pub total: u64,
}

/// Service over the policy store.
pub struct PolicyService {
    store: Arc<dyn PolicyStore>,
    cache: Arc<DecisionCache>,
    events: Arc<dyn EventSink>,
}

impl PolicyService {
    /// Create a new service.
    pub fn new(
        store: Arc<dyn PolicyStore>,
        cache: Arc<DecisionCache>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            cache,
            events,
        }
    }

    /// Create a policy at version 1 and record its `created` history entry.
    ///
    /// Fails with `InvalidEffect` when the effect is not `allow` or `deny`.
    pub async fn create(&self, input: PolicyInput, actor: &str) -> Result<Policy, PolicyError> {
        let effect = PolicyEffect::from_str(&input.effect)
            .ok_or_else(|| PolicyError::InvalidEffect(input.effect.clone()))?;

        let now = canonical_now();
        let policy = Policy {
            id: Uuid::new_v4().to_string(),
            name: input.name,
            description: input.description,
            effect,
            resources: input.resources,
            actions: input.actions,
            subjects: input.subjects,
            conditions: input.conditions,
            priority: input.priority,
            version: 1,
            active: input.active,
            metadata: input.metadata,
            created_at: now,
            created_by: actor.to_string(),
            updated_at: now,
            updated_by: actor.to_string(),
        };

        let entry = self.history_entry(&policy, ChangeKind::Created, actor, INITIAL_CREATION_REASON);
        self.store.insert_policy(&policy, &entry).await?;

        self.cache.invalidate_policy(&policy);
        emit(
            self.events.as_ref(),
            DomainEvent::PolicyCreated {
                timestamp: now,
                policy_id: policy.id.clone(),
                version: policy.version,
            },
        )
        .await;

        tracing::info!(
            target: "custody_kernel::policy",
            policy_id = %policy.id,
            effect = %policy.effect,
            priority = policy.priority,
            "policy created"
        );
        Ok(policy)
    }

    /// Apply a patch to a live policy, incrementing its version.
    ///
    /// Empty patch strings and collections leave the field unchanged; an
    /// explicit null clears `conditions` or `metadata`. An invalid non-empty
    /// effect rejects the whole patch without touching state.
    pub async fn update(
        &self,
        id: &str,
        patch: PolicyPatch,
        actor: &str,
        reason: &str,
    ) -> Result<Policy, PolicyError> {
        // Validate before reading so a bad patch can never half-apply.
        let effect = if patch.effect.is_empty() {
            None
        } else {
            Some(
                PolicyEffect::from_str(&patch.effect)
                    .ok_or_else(|| PolicyError::InvalidEffect(patch.effect.clone()))?,
            )
        };

        let old = self
            .store
            .get_policy(id)
            .await?
            .ok_or_else(|| PolicyError::NotFound(id.to_string()))?;

        let mut policy = old.clone();
        if !patch.name.is_empty() {
            policy.name = patch.name;
        }
        if !patch.description.is_empty() {
            policy.description = patch.description;
        }
        if let Some(effect) = effect {
            policy.effect = effect;
        }
        if !patch.resources.is_empty() {
            policy.resources = patch.resources;
        }
        if !patch.actions.is_empty() {
            policy.actions = patch.actions;
        }
        if !patch.subjects.is_empty() {
            policy.subjects = patch.subjects;
        }
        if let Some(conditions) = patch.conditions {
            policy.conditions = conditions.unwrap_or_default();
        }
        if let Some(priority) = patch.priority {
            policy.priority = priority;
        }
        if let Some(active) = patch.active {
            policy.active = active;
        }
        if let Some(metadata) = patch.metadata {
            policy.metadata = metadata.unwrap_or_default();
        }

        let now = canonical_now();
        policy.version += 1;
        policy.updated_at = now;
        policy.updated_by = actor.to_string();

        let entry = self.history_entry(&policy, ChangeKind::Updated, actor, reason);
        if !self.store.update_policy(&policy, &entry).await? {
            return Err(PolicyError::NotFound(id.to_string()));
        }

        // Both the old and the new shape can cover cached requests.
        self.cache.invalidate_policy(&old);
        self.cache.invalidate_policy(&policy);
        emit(
            self.events.as_ref(),
            DomainEvent::PolicyUpdated {
                timestamp: now,
                policy_id: policy.id.clone(),
                version: policy.version,
            },
        )
        .await;

        tracing::info!(
            target: "custody_kernel::policy",
            policy_id = %policy.id,
            version = policy.version,
            "policy updated"
        );
        Ok(policy)
    }

    /// Remove the live policy row, preserving a restorable snapshot in the
    /// history at `version + 1`.
    pub async fn delete(&self, id: &str, actor: &str, reason: &str) -> Result<(), PolicyError> {
        let policy = self
            .store
            .get_policy(id)
            .await?
            .ok_or_else(|| PolicyError::NotFound(id.to_string()))?;

        let now = canonical_now();
        let mut snapshot = policy.clone();
        snapshot.version += 1;
        snapshot.updated_at = now;
        snapshot.updated_by = actor.to_string();

        let entry = self.history_entry(&snapshot, ChangeKind::Deleted, actor, reason);
        if !self.store.delete_policy(id, &entry).await? {
            return Err(PolicyError::NotFound(id.to_string()));
        }

        self.cache.invalidate_policy(&policy);
        emit(
            self.events.as_ref(),
            DomainEvent::PolicyDeleted {
                timestamp: now,
                policy_id: id.to_string(),
                version: snapshot.version,
            },
        )
        .await;

        tracing::info!(
            target: "custody_kernel::policy",
            policy_id = id,
            "policy deleted"
        );
        Ok(())
    }

    /// Fetch a live policy.
    pub async fn get(&self, id: &str) -> Result<Policy, PolicyError> {
        self.store
            .get_policy(id)
            .await?
            .ok_or_else(|| PolicyError::NotFound(id.to_string()))
    }

    /// List live policies, newest first.
    pub async fn list(
        &self,
        active_only: bool,
        page: u32,
        page_size: u32,
    ) -> Result<PolicyPage, PolicyError> {
        let (offset, limit) = page_bounds(page, page_size)?;
        let (items, total) = self.store.list_policies(active_only, offset, limit).await?;
        Ok(PolicyPage { items, total })
    }

    /// The full mutation history for a policy id, oldest first.
    ///
    /// Works for deleted policies; fails with `NotFound` only when the id
    /// never existed.
    pub async fn history(
        &self,
        id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<HistoryPage, PolicyError> {
        let (offset, limit) = page_bounds(page, page_size)?;
        let (items, total) = self.store.policy_history(id, offset, limit).await?;
        if total == 0 {
            return Err(PolicyError::NotFound(id.to_string()));
        }
        Ok(HistoryPage { items, total })
    }

    /// Fetch one immutable history entry.
    pub async fn get_version(&self, id: &str, version: u32) -> Result<PolicyVersion, PolicyError> {
        self.store
            .get_policy_version(id, version)
            .await?
            .ok_or(PolicyError::VersionNotFound {
                id: id.to_string(),
                version,
            })
    }

    /// Restore a policy to the state captured at a past version.
    ///
    /// The version counter advances past every recorded history version, so
    /// `(policy_id, version)` stays unique, and restoring a deleted policy
    /// resurrects it. Records an `updated` history entry with the caller's
    /// reason.
    pub async fn restore(
        &self,
        id: &str,
        version: u32,
        actor: &str,
        reason: &str,
    ) -> Result<Policy, PolicyError> {
        let target = self
            .store
            .get_policy_version(id, version)
            .await?
            .ok_or(PolicyError::RestoreConflict {
                id: id.to_string(),
                version,
            })?;

        let max_version = self.store.max_policy_version(id).await?.unwrap_or(0);
        let now = canonical_now();

        let mut restored = target.policy_data.clone();
        restored.id = id.to_string();
        restored.version = max_version + 1;
        restored.updated_at = now;
        restored.updated_by = actor.to_string();

        let reason = if reason.is_empty() {
            format!("Restored to version {}", version)
        } else {
            reason.to_string()
        };
        let entry = self.history_entry(&restored, ChangeKind::Updated, actor, &reason);

        match self.store.get_policy(id).await? {
            Some(old) => {
                if !self.store.update_policy(&restored, &entry).await? {
                    return Err(PolicyError::NotFound(id.to_string()));
                }
                self.cache.invalidate_policy(&old);
            }
            None => {
                self.store.insert_policy(&restored, &entry).await?;
            }
        }

        self.cache.invalidate_policy(&restored);
        emit(
            self.events.as_ref(),
            DomainEvent::PolicyUpdated {
                timestamp: now,
                policy_id: restored.id.clone(),
                version: restored.version,
            },
        )
        .await;

        tracing::info!(
            target: "custody_kernel::policy",
            policy_id = id,
            restored_from = version,
            new_version = restored.version,
            "policy restored"
        );
        Ok(restored)
    }

    /// Every active policy applicable to a resource type and action, in
    /// decision order.
    ///
    /// Ordering is priority descending, then creation time descending, then
    /// deny before allow, so the engine's first-match scan fails closed on
    /// exact ties.
    pub async fn find_applicable(
        &self,
        resource_type: &str,
        action: &str,
    ) -> Result<Vec<Policy>, PolicyError> {
        let mut matches = self.store.find_applicable(resource_type, action).await?;
        matches.sort_by(compare_for_decision);
        Ok(matches)
    }

    fn history_entry(
        &self,
        policy: &Policy,
        change_kind: ChangeKind,
        actor: &str,
        reason: &str,
    ) -> PolicyVersion {
        PolicyVersion {
            id: Uuid::new_v4().to_string(),
            policy_id: policy.id.clone(),
            version: policy.version,
            policy_data: policy.clone(),
            change_kind,
            changed_by: actor.to_string(),
            changed_at: policy.updated_at,
            reason: reason.to_string(),
        }
    }
}

/// Decision-order comparator: priority descending, creation time descending,
/// deny before allow.
pub fn compare_for_decision(a: &Policy, b: &Policy) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| effect_rank(a.effect).cmp(&effect_rank(b.effect)))
}

fn effect_rank(effect: PolicyEffect) -> u8 {
    match effect {
        PolicyEffect::Deny => 0,
        PolicyEffect::Allow => 1,
    }
}

fn page_bounds(page: u32, page_size: u32) -> Result<(u64, u64), PolicyError> {
    if page < 1 || page_size < 1 || page_size > 100 {
        return Err(PolicyError::InvalidPagination { page, page_size });
    }
    Ok(((page as u64 - 1) * page_size as u64, page_size as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventSink;
    use crate::store::MemoryStore;
    use std::collections::BTreeMap;

    fn service() -> (PolicyService, Arc<MemoryEventSink>) {
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(MemoryEventSink::new());
        let cache = Arc::new(DecisionCache::default());
        (PolicyService::new(store, cache, events.clone()), events)
    }

    fn input(name: &str, effect: &str) -> PolicyInput {
        PolicyInput {
            name: name.to_string(),
            description: String::new(),
            effect: effect.to_string(),
            resources: vec!["doc".to_string()],
            actions: vec!["read".to_string()],
            subjects: vec![],
            conditions: BTreeMap::new(),
            priority: 10,
            active: true,
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_effect() {
        let (service, events) = service();
        let err = service.create(input("p", "log"), "admin").await.unwrap_err();
        assert!(matches!(err, PolicyError::InvalidEffect(_)));
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_create_starts_at_version_one() {
        let (service, events) = service();
        let policy = service.create(input("p", "allow"), "admin").await.unwrap();
        assert_eq!(policy.version, 1);

        let history = service.history(&policy.id, 1, 10).await.unwrap();
        assert_eq!(history.total, 1);
        assert_eq!(history.items[0].change_kind, ChangeKind::Created);
        assert_eq!(history.items[0].reason, INITIAL_CREATION_REASON);
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_patch_effect_touches_nothing() {
        let (service, _) = service();
        let policy = service.create(input("p", "allow"), "admin").await.unwrap();

        let patch = PolicyPatch {
            effect: "log".to_string(),
            priority: Some(99),
            ..PolicyPatch::default()
        };
        let err = service.update(&policy.id, patch, "admin", "x").await.unwrap_err();
        assert!(matches!(err, PolicyError::InvalidEffect(_)));

        let current = service.get(&policy.id).await.unwrap();
        assert_eq!(current.version, 1);
        assert_eq!(current.priority, 10);
    }

    #[tokio::test]
    async fn test_update_increments_version_and_keeps_unset_fields() {
        let (service, _) = service();
        let policy = service.create(input("p", "allow"), "admin").await.unwrap();

        let patch = PolicyPatch {
            description: "tightened".to_string(),
            priority: Some(20),
            ..PolicyPatch::default()
        };
        let updated = service
            .update(&policy.id, patch, "admin", "tighten")
            .await
            .unwrap();

        assert_eq!(updated.version, 2);
        assert_eq!(updated.priority, 20);
        assert_eq!(updated.name, "p");
        assert_eq!(updated.description, "tightened");
    }

    #[tokio::test]
    async fn test_patch_null_clears_conditions() {
        let (service, _) = service();
        let mut create = input("p", "allow");
        create
            .conditions
            .insert("environment".to_string(), "production".to_string());
        let policy = service.create(create, "admin").await.unwrap();

        let patch: PolicyPatch = serde_json::from_str(r#"{"conditions": null}"#).unwrap();
        let updated = service.update(&policy.id, patch, "admin", "clear").await.unwrap();
        assert!(updated.conditions.is_empty());
    }

    #[tokio::test]
    async fn test_delete_preserves_restorable_history() {
        let (service, _) = service();
        let policy = service.create(input("p", "allow"), "admin").await.unwrap();
        service.delete(&policy.id, "admin", "sunset").await.unwrap();

        assert!(matches!(
            service.get(&policy.id).await.unwrap_err(),
            PolicyError::NotFound(_)
        ));

        let history = service.history(&policy.id, 1, 10).await.unwrap();
        assert_eq!(history.total, 2);
        let deletion = &history.items[1];
        assert_eq!(deletion.change_kind, ChangeKind::Deleted);
        assert_eq!(deletion.version, 2);
        assert_eq!(deletion.policy_data.name, "p");
    }

    #[tokio::test]
    async fn test_restore_after_delete_resurrects() {
        let (service, _) = service();
        let policy = service.create(input("p", "allow"), "admin").await.unwrap();
        service.delete(&policy.id, "admin", "sunset").await.unwrap();

        let restored = service.restore(&policy.id, 1, "admin", "undo").await.unwrap();
        assert_eq!(restored.version, 3);
        assert_eq!(restored.name, "p");
        assert!(service.get(&policy.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_restore_round_trip_matches_snapshot() {
        let (service, _) = service();
        let policy = service.create(input("p", "allow"), "admin").await.unwrap();

        for i in 0..5 {
            let patch = PolicyPatch {
                description: format!("rev {}", i),
                ..PolicyPatch::default()
            };
            service.update(&policy.id, patch, "admin", "rev").await.unwrap();
        }

        let restored = service.restore(&policy.id, 3, "admin", "rollback").await.unwrap();
        assert_eq!(restored.version, 7);

        let snapshot = service.get_version(&policy.id, 3).await.unwrap();
        assert_eq!(restored.description, snapshot.policy_data.description);
        assert_eq!(restored.effect, snapshot.policy_data.effect);

        let current = service.get(&policy.id).await.unwrap();
        assert_eq!(current.version, 7);
    }

    #[tokio::test]
    async fn test_restore_missing_snapshot_is_conflict() {
        let (service, _) = service();
        let policy = service.create(input("p", "allow"), "admin").await.unwrap();
        let err = service.restore(&policy.id, 9, "admin", "x").await.unwrap_err();
        assert!(matches!(err, PolicyError::RestoreConflict { .. }));
    }

    #[tokio::test]
    async fn test_deny_sorts_before_allow_on_exact_tie() {
        let now = canonical_now();
        let base = |id: &str, effect: PolicyEffect| Policy {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            effect,
            resources: vec!["doc".to_string()],
            actions: vec!["read".to_string()],
            subjects: vec![],
            conditions: BTreeMap::new(),
            priority: 10,
            version: 1,
            active: true,
            metadata: BTreeMap::new(),
            created_at: now,
            created_by: "t".to_string(),
            updated_at: now,
            updated_by: "t".to_string(),
        };

        let mut policies = vec![base("allow", PolicyEffect::Allow), base("deny", PolicyEffect::Deny)];
        policies.sort_by(compare_for_decision);
        assert_eq!(policies[0].id, "deny");
    }
}
