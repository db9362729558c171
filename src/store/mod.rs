//! Storage backends for policies, evidence, custody chains, and analyses.
//!
//! The services own all domain semantics (versioning, hashing, state
//! machines); the store traits below are the persistence seam. Backends must
//! guarantee:
//!
//! - deterministic ordering of multi-row results,
//! - atomicity where a method writes more than one row,
//! - per-evidence serialization of custody appends,
//! - a compare-and-set `pending → running` transition for analysis claims.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;

use crate::types::{
    Analysis, CustodyDraft, CustodyRecord, Evidence, EvidenceQuery, Policy, PolicyVersion,
};

/// Error type shared by all store backends.
///
/// Stores signal absence through `Option`/`bool` returns; errors are reserved
/// for the backend itself misbehaving, so callers can treat every variant as
/// retryable or surface it as a 5xx.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The backend is unreachable or failed mid-operation.
    #[error("storage backend unavailable: {0}")]
    Transient(String),
    /// A uniqueness or integrity constraint was violated.
    #[error("storage constraint violated: {0}")]
    Conflict(String),
}

/// Persistence contract for policies and their version history.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Fetch a live policy by id.
    async fn get_policy(&self, id: &str) -> Result<Option<Policy>, StoreError>;

    /// List live policies ordered by creation time descending then id.
    /// Returns the page plus the total row count.
    async fn list_policies(
        &self,
        active_only: bool,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<Policy>, u64), StoreError>;

    /// Fetch every active policy whose resource set matches `resource_type`
    /// and whose action set matches `action` (literal or `*`).
    ///
    /// Results are ordered by priority descending then creation time
    /// descending; the decision engine re-sorts with its full comparator.
    async fn find_applicable(
        &self,
        resource_type: &str,
        action: &str,
    ) -> Result<Vec<Policy>, StoreError>;

    /// Atomically insert a new policy row and its first history entry.
    async fn insert_policy(
        &self,
        policy: &Policy,
        version: &PolicyVersion,
    ) -> Result<(), StoreError>;

    /// Atomically replace a live policy row and append a history entry.
    /// Returns false when the policy row does not exist.
    async fn update_policy(
        &self,
        policy: &Policy,
        version: &PolicyVersion,
    ) -> Result<bool, StoreError>;

    /// Atomically remove the live policy row and append the deletion history
    /// entry. Returns false when the policy row does not exist.
    async fn delete_policy(&self, id: &str, version: &PolicyVersion) -> Result<bool, StoreError>;

    /// History entries for a policy id, ordered by version ascending.
    /// Returns the page plus the total row count. History survives deletion.
    async fn policy_history(
        &self,
        policy_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<PolicyVersion>, u64), StoreError>;

    /// Fetch one history entry by `(policy_id, version)`.
    async fn get_policy_version(
        &self,
        policy_id: &str,
        version: u32,
    ) -> Result<Option<PolicyVersion>, StoreError>;

    /// The highest version ever recorded for a policy id, live or deleted.
    async fn max_policy_version(&self, policy_id: &str) -> Result<Option<u32>, StoreError>;
}

/// Persistence contract for the evidence catalogue.
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Atomically insert an evidence row together with its first custody
    /// record. Either both land or neither does.
    async fn insert_evidence(
        &self,
        evidence: &Evidence,
        first_record: &CustodyRecord,
    ) -> Result<(), StoreError>;

    /// Fetch an evidence row by id. Soft-deleted rows remain readable.
    async fn get_evidence(&self, id: &str) -> Result<Option<Evidence>, StoreError>;

    /// Replace an evidence row. Returns false when the row does not exist.
    async fn update_evidence(&self, evidence: &Evidence) -> Result<bool, StoreError>;

    /// Whether an evidence row exists (including soft-deleted rows).
    async fn evidence_exists(&self, id: &str) -> Result<bool, StoreError>;

    /// Search the catalogue. Results are ordered by collection time
    /// descending then id; returns the page plus the total match count.
    async fn search_evidence(
        &self,
        query: &EvidenceQuery,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<Evidence>, u64), StoreError>;
}

/// Persistence contract for custody chains.
#[async_trait]
pub trait CustodyStore: Send + Sync {
    /// Append a record to an evidence chain.
    ///
    /// The backend serializes appends per evidence id: inside the critical
    /// section it reads the chain head, assigns a timestamp strictly greater
    /// than the head's, and finalizes the draft with
    /// [`CustodyRecord::finalize`].
    async fn append_custody(&self, draft: CustodyDraft) -> Result<CustodyRecord, StoreError>;

    /// The full chain for an evidence id, ordered by timestamp ascending.
    async fn custody_chain(&self, evidence_id: &str) -> Result<Vec<CustodyRecord>, StoreError>;
}

/// Persistence contract for analysis orchestration rows.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Insert a new analysis row.
    async fn insert_analysis(&self, analysis: &Analysis) -> Result<(), StoreError>;

    /// Fetch an analysis row by id.
    async fn get_analysis(&self, id: &str) -> Result<Option<Analysis>, StoreError>;

    /// Compare-and-set `pending → running`, recording the claiming worker
    /// and the start time. Returns the claimed row, or `None` when the row
    /// is absent or not pending. This is the ownership transfer: at most one
    /// caller can win the transition.
    async fn claim_analysis(&self, id: &str, worker: &str)
        -> Result<Option<Analysis>, StoreError>;

    /// Compare-and-set `pending|running → cancelled`. Returns the updated
    /// row, or `None` when the row is absent or already terminal.
    async fn cancel_analysis(&self, id: &str) -> Result<Option<Analysis>, StoreError>;

    /// Write a terminal result, but only while the stored status is still
    /// `running`. Returns false when the row is absent or the status moved
    /// (e.g. a concurrent cancel won).
    async fn complete_analysis(&self, analysis: &Analysis) -> Result<bool, StoreError>;

    /// Ids of all rows still in `pending`, oldest first. Used to requeue
    /// work after a restart.
    async fn pending_analyses(&self) -> Result<Vec<String>, StoreError>;
}

/// Liveness contract used by the service health endpoints.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Whether the backend can currently serve requests.
    async fn is_healthy(&self) -> bool;
}

pub use memory::MemoryStore;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresConfig, PostgresStore};
