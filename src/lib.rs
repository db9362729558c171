//! # custody-kernel
//!
//! Policy-driven access control with tamper-evident custody ledgers.
//!
//! The kernel answers two questions:
//!
//! > Given an access request, is it **allowed**, and by which policy?
//! >
//! > Given a protected artifact, has its custody history been **tampered
//! > with**?
//!
//! ## Core Contract
//!
//! 1. Evaluate access requests against versioned policies, default-deny,
//!    priority-ordered, with an explanation for every decision
//! 2. Record every mutation to protected artifacts in an append-only,
//!    hash-chained custody ledger whose integrity is verifiable
//! 3. Keep all state auditable: policy history is reconstructable and
//!    restorable, evidence deletion is soft, events trail every write
//!
//! ## Architecture
//!
//! ```text
//! AccessRequest → DecisionEngine → PolicyService → PolicyStore
//!                       ↓                ↓
//!                 DecisionCache ←── invalidation
//!
//! CollectRequest → EvidenceService → CustodyLedger → CustodyStore
//!                        ↓                 ↓
//!                    BlobStore      verify / flag damaged
//!
//! AnalysisRequest → AnalysisOrchestrator → worker pool (CAS ownership)
//!
//! every write ──────────────────────────→ EventSink
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same request + same active policies + same evaluation time → identical
//!   decision (modulo the `cache_hit` observability flag)
//! - Policy ties break by priority, then creation time, then deny over allow
//! - Custody chain hashes are reproducible from stored fields alone

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analysis;
pub mod canonical;
pub mod custody;
pub mod engine;
pub mod events;
pub mod evidence;
pub mod policy;
pub mod store;
pub mod types;

#[cfg(feature = "service")]
pub mod service;

// Re-exports
pub use types::{
    AccessDecision, AccessRequest, Analysis, AnalysisRequest, AnalysisStatus, AnalysisType,
    ChangeKind, CollectRequest, CustodyRecord, DecisionFingerprint, DomainEvent, Evidence,
    EvidenceQuery, EvidenceStatus, EvidenceType, Policy, PolicyEffect, PolicyInput, PolicyPatch,
    PolicyVersion, RequestContext, Resource, Subject,
};

pub use analysis::{AnalysisError, AnalysisOrchestrator, OrchestratorConfig};
pub use canonical::{canonical_hash, canonical_hash_hex, canonical_now, to_canonical_bytes};
pub use custody::{verify_chain, ChainStatus, CustodyError, CustodyLedger};
pub use engine::{
    CacheConfig, CacheStats, DecisionCache, DecisionEngine, DecisionError, DECISION_CACHE_TTL,
    MAX_BULK_REQUESTS,
};
pub use events::{EventError, EventSink, MemoryEventSink, TracingEventSink};
pub use evidence::{BlobStore, EvidenceError, EvidenceService};
pub use policy::{PolicyError, PolicyService};
pub use store::MemoryStore;

#[cfg(feature = "postgres")]
pub use store::{PostgresConfig, PostgresStore};

// Service re-exports (when service feature is enabled)
#[cfg(feature = "service")]
pub use service::{create_router, ServiceState};

/// Schema version for all kernel types.
/// Increment on breaking changes to any schema type.
pub const ENGINE_SCHEMA_VERSION: &str = "1.0.0";
