//! In-memory store for testing and single-process deployments.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::canonical::canonical_now;
use crate::types::{
    Analysis, AnalysisStatus, CustodyDraft, CustodyRecord, Evidence, EvidenceQuery, Policy,
    PolicyVersion,
};

use super::{
    AnalysisStore, CustodyStore, EvidenceStore, HealthProbe, PolicyStore, StoreError,
};

/// In-memory backing tables.
///
/// Uses BTreeMap for deterministic iteration order. All writes take the
/// single write lock, which also serializes custody appends and makes the
/// evidence-plus-first-record insert atomic.
#[derive(Debug, Default)]
struct Inner {
    policies: BTreeMap<String, Policy>,
    policy_versions: BTreeMap<(String, u32), PolicyVersion>,
    evidence: BTreeMap<String, Evidence>,
    custody: BTreeMap<String, Vec<CustodyRecord>>,
    analyses: BTreeMap<String, Analysis>,
}

/// In-memory store implementing every persistence trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live policies.
    pub fn num_policies(&self) -> usize {
        self.inner.read().policies.len()
    }

    /// Number of evidence rows, including soft-deleted ones.
    pub fn num_evidence(&self) -> usize {
        self.inner.read().evidence.len()
    }

    /// Directly overwrite a custody record, bypassing the append path.
    ///
    /// Test hook for simulating tampering with committed records.
    pub fn tamper_custody_record(
        &self,
        evidence_id: &str,
        index: usize,
        mutate: impl FnOnce(&mut CustodyRecord),
    ) -> bool {
        let mut inner = self.inner.write();
        match inner.custody.get_mut(evidence_id).and_then(|c| c.get_mut(index)) {
            Some(record) => {
                mutate(record);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn get_policy(&self, id: &str) -> Result<Option<Policy>, StoreError> {
        Ok(self.inner.read().policies.get(id).cloned())
    }

    async fn list_policies(
        &self,
        active_only: bool,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<Policy>, u64), StoreError> {
        let inner = self.inner.read();
        let mut matches: Vec<Policy> = inner
            .policies
            .values()
            .filter(|p| !active_only || p.active)
            .cloned()
            .collect();

        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let total = matches.len() as u64;
        let page = matches
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn find_applicable(
        &self,
        resource_type: &str,
        action: &str,
    ) -> Result<Vec<Policy>, StoreError> {
        let inner = self.inner.read();
        let mut matches: Vec<Policy> = inner
            .policies
            .values()
            .filter(|p| p.active && p.matches_resource(resource_type) && p.matches_action(action))
            .cloned()
            .collect();

        matches.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(matches)
    }

    async fn insert_policy(
        &self,
        policy: &Policy,
        version: &PolicyVersion,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.policies.contains_key(&policy.id) {
            return Err(StoreError::Conflict(format!(
                "policy {} already exists",
                policy.id
            )));
        }
        inner.policies.insert(policy.id.clone(), policy.clone());
        inner
            .policy_versions
            .insert((version.policy_id.clone(), version.version), version.clone());
        Ok(())
    }

    async fn update_policy(
        &self,
        policy: &Policy,
        version: &PolicyVersion,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        if !inner.policies.contains_key(&policy.id) {
            return Ok(false);
        }
        inner.policies.insert(policy.id.clone(), policy.clone());
        inner
            .policy_versions
            .insert((version.policy_id.clone(), version.version), version.clone());
        Ok(true)
    }

    async fn delete_policy(&self, id: &str, version: &PolicyVersion) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        if inner.policies.remove(id).is_none() {
            return Ok(false);
        }
        inner
            .policy_versions
            .insert((version.policy_id.clone(), version.version), version.clone());
        Ok(true)
    }

    async fn policy_history(
        &self,
        policy_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<PolicyVersion>, u64), StoreError> {
        let inner = self.inner.read();
        let all: Vec<PolicyVersion> = inner
            .policy_versions
            .range((policy_id.to_string(), 0)..(policy_id.to_string(), u32::MAX))
            .map(|(_, v)| v.clone())
            .collect();

        let total = all.len() as u64;
        let page = all
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn get_policy_version(
        &self,
        policy_id: &str,
        version: u32,
    ) -> Result<Option<PolicyVersion>, StoreError> {
        Ok(self
            .inner
            .read()
            .policy_versions
            .get(&(policy_id.to_string(), version))
            .cloned())
    }

    async fn max_policy_version(&self, policy_id: &str) -> Result<Option<u32>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .policy_versions
            .range((policy_id.to_string(), 0)..(policy_id.to_string(), u32::MAX))
            .map(|((_, v), _)| *v)
            .max())
    }
}

#[async_trait]
impl EvidenceStore for MemoryStore {
    async fn insert_evidence(
        &self,
        evidence: &Evidence,
        first_record: &CustodyRecord,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.evidence.contains_key(&evidence.id) {
            return Err(StoreError::Conflict(format!(
                "evidence {} already exists",
                evidence.id
            )));
        }
        inner.evidence.insert(evidence.id.clone(), evidence.clone());
        inner
            .custody
            .entry(evidence.id.clone())
            .or_default()
            .push(first_record.clone());
        Ok(())
    }

    async fn get_evidence(&self, id: &str) -> Result<Option<Evidence>, StoreError> {
        Ok(self.inner.read().evidence.get(id).cloned())
    }

    async fn update_evidence(&self, evidence: &Evidence) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        if !inner.evidence.contains_key(&evidence.id) {
            return Ok(false);
        }
        inner.evidence.insert(evidence.id.clone(), evidence.clone());
        Ok(true)
    }

    async fn evidence_exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.inner.read().evidence.contains_key(id))
    }

    async fn search_evidence(
        &self,
        query: &EvidenceQuery,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<Evidence>, u64), StoreError> {
        let inner = self.inner.read();
        let needle = query.text.to_lowercase();

        let mut matches: Vec<Evidence> = inner
            .evidence
            .values()
            .filter(|e| {
                if !needle.is_empty() {
                    let hit = e.name.to_lowercase().contains(&needle)
                        || e.description.to_lowercase().contains(&needle)
                        || e.source.to_lowercase().contains(&needle);
                    if !hit {
                        return false;
                    }
                }
                if !query.types.is_empty() && !query.types.contains(&e.evidence_type) {
                    return false;
                }
                if let Some(after) = query.collected_after {
                    if e.collected_at < after {
                        return false;
                    }
                }
                if let Some(before) = query.collected_before {
                    if e.collected_at > before {
                        return false;
                    }
                }
                query.tags.iter().all(|t| e.tags.contains(t))
            })
            .cloned()
            .collect();

        matches.sort_by(|a, b| b.collected_at.cmp(&a.collected_at).then_with(|| a.id.cmp(&b.id)));

        let total = matches.len() as u64;
        let page = matches
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }
}

#[async_trait]
impl CustodyStore for MemoryStore {
    async fn append_custody(&self, draft: CustodyDraft) -> Result<CustodyRecord, StoreError> {
        let mut inner = self.inner.write();
        let chain = inner.custody.entry(draft.evidence_id.clone()).or_default();

        let prev_hash = chain
            .last()
            .map(|head| head.record_hash.clone())
            .unwrap_or_default();

        // Strictly increasing timestamps are a chain invariant; two appends
        // within the same microsecond would otherwise fail verification.
        let mut timestamp = canonical_now();
        if let Some(head) = chain.last() {
            if timestamp <= head.timestamp {
                timestamp = head.timestamp + chrono::Duration::microseconds(1);
            }
        }

        let record = CustodyRecord::finalize(draft, prev_hash, timestamp);
        chain.push(record.clone());
        Ok(record)
    }

    async fn custody_chain(&self, evidence_id: &str) -> Result<Vec<CustodyRecord>, StoreError> {
        let inner = self.inner.read();
        let mut chain = inner.custody.get(evidence_id).cloned().unwrap_or_default();
        chain.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(chain)
    }
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn insert_analysis(&self, analysis: &Analysis) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.analyses.contains_key(&analysis.id) {
            return Err(StoreError::Conflict(format!(
                "analysis {} already exists",
                analysis.id
            )));
        }
        inner.analyses.insert(analysis.id.clone(), analysis.clone());
        Ok(())
    }

    async fn get_analysis(&self, id: &str) -> Result<Option<Analysis>, StoreError> {
        Ok(self.inner.read().analyses.get(id).cloned())
    }

    async fn claim_analysis(
        &self,
        id: &str,
        worker: &str,
    ) -> Result<Option<Analysis>, StoreError> {
        let mut inner = self.inner.write();
        match inner.analyses.get_mut(id) {
            Some(row) if row.status == AnalysisStatus::Pending => {
                let now = canonical_now();
                row.status = AnalysisStatus::Running;
                row.processed_by = worker.to_string();
                row.started_at = Some(now);
                row.updated_at = now;
                Ok(Some(row.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn cancel_analysis(&self, id: &str) -> Result<Option<Analysis>, StoreError> {
        let mut inner = self.inner.write();
        match inner.analyses.get_mut(id) {
            Some(row) if !row.status.is_terminal() => {
                let now = canonical_now();
                row.status = AnalysisStatus::Cancelled;
                row.completed_at = Some(now);
                row.updated_at = now;
                Ok(Some(row.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn complete_analysis(&self, analysis: &Analysis) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        match inner.analyses.get_mut(&analysis.id) {
            Some(row) if row.status == AnalysisStatus::Running => {
                *row = analysis.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn pending_analyses(&self) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read();
        let mut rows: Vec<&Analysis> = inner
            .analyses
            .values()
            .filter(|a| a.status == AnalysisStatus::Pending)
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows.into_iter().map(|a| a.id.clone()).collect())
    }
}

#[async_trait]
impl HealthProbe for MemoryStore {
    async fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeKind, PolicyEffect};
    use std::collections::BTreeMap as Map;

    fn make_policy(id: &str, priority: i32) -> Policy {
        let now = canonical_now();
        Policy {
            id: id.to_string(),
            name: format!("policy {}", id),
            description: String::new(),
            effect: PolicyEffect::Allow,
            resources: vec!["doc".to_string()],
            actions: vec!["read".to_string()],
            subjects: vec![],
            conditions: Map::new(),
            priority,
            version: 1,
            active: true,
            metadata: Map::new(),
            created_at: now,
            created_by: "test".to_string(),
            updated_at: now,
            updated_by: "test".to_string(),
        }
    }

    fn make_version(policy: &Policy, kind: ChangeKind) -> PolicyVersion {
        PolicyVersion {
            id: format!("v-{}-{}", policy.id, policy.version),
            policy_id: policy.id.clone(),
            version: policy.version,
            policy_data: policy.clone(),
            change_kind: kind,
            changed_by: "test".to_string(),
            changed_at: canonical_now(),
            reason: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_policy() {
        let store = MemoryStore::new();
        let policy = make_policy("p1", 10);
        let version = make_version(&policy, ChangeKind::Created);

        store.insert_policy(&policy, &version).await.unwrap();

        let fetched = store.get_policy("p1").await.unwrap().unwrap();
        assert_eq!(fetched.id, "p1");

        let (history, total) = store.policy_history("p1", 0, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(history[0].version, 1);
    }

    #[tokio::test]
    async fn test_history_survives_delete() {
        let store = MemoryStore::new();
        let policy = make_policy("p1", 10);
        store
            .insert_policy(&policy, &make_version(&policy, ChangeKind::Created))
            .await
            .unwrap();

        let mut snapshot = policy.clone();
        snapshot.version = 2;
        store
            .delete_policy("p1", &make_version(&snapshot, ChangeKind::Deleted))
            .await
            .unwrap();

        assert!(store.get_policy("p1").await.unwrap().is_none());
        let (history, total) = store.policy_history("p1", 0, 10).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(history[1].change_kind, ChangeKind::Deleted);
        assert_eq!(store.max_policy_version("p1").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_find_applicable_orders_by_priority() {
        let store = MemoryStore::new();
        for (id, priority) in [("low", 1), ("high", 10), ("mid", 5)] {
            let policy = make_policy(id, priority);
            store
                .insert_policy(&policy, &make_version(&policy, ChangeKind::Created))
                .await
                .unwrap();
        }

        let matches = store.find_applicable("doc", "read").await.unwrap();
        let ids: Vec<&str> = matches.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid", "low"]);

        assert!(store.find_applicable("image", "read").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_custody_append_links_and_orders() {
        let store = MemoryStore::new();
        let draft = |id: &str| CustodyDraft {
            id: id.to_string(),
            evidence_id: "ev1".to_string(),
            handler: "alice".to_string(),
            action: "TRANSFERRED".to_string(),
            location: "lab".to_string(),
            notes: String::new(),
            signature: String::new(),
        };

        let first = store.append_custody(draft("r1")).await.unwrap();
        let second = store.append_custody(draft("r2")).await.unwrap();

        assert_eq!(first.prev_hash, "");
        assert_eq!(second.prev_hash, first.record_hash);
        assert!(second.timestamp > first.timestamp);

        let chain = store.custody_chain("ev1").await.unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].id, "r1");
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = MemoryStore::new();
        let now = canonical_now();
        let analysis = Analysis {
            id: "a1".to_string(),
            evidence_id: "ev1".to_string(),
            analysis_type: crate::types::AnalysisType::Timeline,
            status: AnalysisStatus::Pending,
            parameters: Map::new(),
            results: Map::new(),
            findings: vec![],
            processed_by: String::new(),
            started_at: None,
            completed_at: None,
            error_message: String::new(),
            created_at: now,
            updated_at: now,
        };
        store.insert_analysis(&analysis).await.unwrap();

        let claimed = store.claim_analysis("a1", "worker-0").await.unwrap();
        assert!(claimed.is_some());
        assert_eq!(claimed.unwrap().status, AnalysisStatus::Running);

        // Second claim loses the compare-and-set.
        assert!(store.claim_analysis("a1", "worker-1").await.unwrap().is_none());
    }
}
