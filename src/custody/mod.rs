//! The custody ledger: append-only, hash-chained transfer records.
//!
//! ## Tamper Evidence
//!
//! Each record's `record_hash` covers its own fields plus the previous
//! record's hash, so modifying any committed field invalidates every later
//! link. Verification recomputes the whole chain; a single mismatch marks
//! the chain broken. Broken chains still accept appends (the new record
//! starts a new verifiable suffix) but the evidence is flagged damaged and
//! file retrieval is refused.
//!
//! ## Chain States
//!
//! - **Empty**: no records. Only reachable before collection has committed;
//!   externally observable only if atomicity has been violated.
//! - **Intact**: non-empty, every link and timestamp check holds.
//! - **Broken**: some check failed. Terminal for retrieval purposes.

use std::sync::Arc;

use crate::canonical::canonical_now;
use crate::events::{emit, EventSink};
use crate::store::{CustodyStore, EvidenceStore, StoreError};
use crate::types::{CustodyDraft, CustodyRecord, DomainEvent, EvidenceStatus};
use uuid::Uuid;

/// Errors raised by the custody ledger.
#[derive(Debug, thiserror::Error)]
pub enum CustodyError {
    /// The evidence id has no catalogue row.
    #[error("evidence not found: {0}")]
    EvidenceNotFound(String),
    /// The chain failed verification.
    #[error("chain of custody broken for evidence {0}")]
    ChainBroken(String),
    /// The storage layer failed; callers may retry.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of verifying a custody chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    /// No records exist for the evidence.
    Empty,
    /// Every record verified.
    Intact {
        /// Number of records in the chain.
        length: usize,
    },
    /// Verification failed at `index`.
    Broken {
        /// Index of the first failing record.
        index: usize,
        /// What failed.
        reason: String,
    },
}

impl ChainStatus {
    /// Whether the chain is non-empty and fully verified.
    pub fn is_intact(&self) -> bool {
        matches!(self, Self::Intact { .. })
    }
}

/// Verify a chain already ordered by timestamp ascending.
///
/// Checks, for every record, that the stored `record_hash` matches its
/// recomputed value; for every record after the first, that `prev_hash`
/// equals the previous record's recomputed hash and that timestamps strictly
/// increase; and that the first record's `prev_hash` is empty. An empty
/// chain never verifies.
pub fn verify_chain(records: &[CustodyRecord]) -> ChainStatus {
    if records.is_empty() {
        return ChainStatus::Empty;
    }

    if !records[0].prev_hash.is_empty() {
        return ChainStatus::Broken {
            index: 0,
            reason: "first record has a non-empty prev_hash".to_string(),
        };
    }

    let mut prev_recomputed: Option<String> = None;
    for (index, record) in records.iter().enumerate() {
        let recomputed = record.recompute_hash();
        if recomputed != record.record_hash {
            return ChainStatus::Broken {
                index,
                reason: "record hash does not match its fields".to_string(),
            };
        }

        if let Some(prev_hash) = &prev_recomputed {
            if record.prev_hash != *prev_hash {
                return ChainStatus::Broken {
                    index,
                    reason: "prev_hash does not match the preceding record".to_string(),
                };
            }
            if record.timestamp <= records[index - 1].timestamp {
                return ChainStatus::Broken {
                    index,
                    reason: "timestamp does not strictly increase".to_string(),
                };
            }
        }

        prev_recomputed = Some(recomputed);
    }

    ChainStatus::Intact {
        length: records.len(),
    }
}

/// Service over the custody store.
pub struct CustodyLedger {
    store: Arc<dyn CustodyStore>,
    evidence: Arc<dyn EvidenceStore>,
    events: Arc<dyn EventSink>,
}

impl CustodyLedger {
    /// Create a new ledger.
    pub fn new(
        store: Arc<dyn CustodyStore>,
        evidence: Arc<dyn EvidenceStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            evidence,
            events,
        }
    }

    /// Append a transfer record to an evidence chain.
    ///
    /// Appends remain legal on a broken chain; the record links to the
    /// stored head and starts a new verifiable suffix.
    pub async fn add(
        &self,
        evidence_id: &str,
        handler: &str,
        action: &str,
        location: &str,
        notes: &str,
        signature: &str,
    ) -> Result<CustodyRecord, CustodyError> {
        if !self.evidence.evidence_exists(evidence_id).await? {
            return Err(CustodyError::EvidenceNotFound(evidence_id.to_string()));
        }

        let draft = CustodyDraft {
            id: Uuid::new_v4().to_string(),
            evidence_id: evidence_id.to_string(),
            handler: handler.to_string(),
            action: action.to_string(),
            location: location.to_string(),
            notes: notes.to_string(),
            signature: signature.to_string(),
        };

        let record = self.store.append_custody(draft).await?;

        emit(
            self.events.as_ref(),
            DomainEvent::CustodyTransfer {
                timestamp: record.timestamp,
                evidence_id: evidence_id.to_string(),
                record_id: record.id.clone(),
                action: record.action.clone(),
            },
        )
        .await;

        tracing::info!(
            target: "custody_kernel::custody",
            evidence_id = evidence_id,
            record_id = %record.id,
            action = %record.action,
            handler = %record.handler,
            "custody record appended"
        );
        Ok(record)
    }

    /// The full chain for an evidence id, oldest first.
    pub async fn chain(&self, evidence_id: &str) -> Result<Vec<CustodyRecord>, CustodyError> {
        if !self.evidence.evidence_exists(evidence_id).await? {
            return Err(CustodyError::EvidenceNotFound(evidence_id.to_string()));
        }
        Ok(self.store.custody_chain(evidence_id).await?)
    }

    /// Verify an evidence chain without side effects.
    pub async fn verify(&self, evidence_id: &str) -> Result<ChainStatus, CustodyError> {
        let chain = self.chain(evidence_id).await?;
        Ok(verify_chain(&chain))
    }

    /// Verify an evidence chain, flagging the evidence damaged and emitting
    /// a security event when it is broken.
    ///
    /// This is the retrieval guard: callers refuse to hand out bytes unless
    /// the returned status is intact.
    pub async fn verify_and_flag(&self, evidence_id: &str) -> Result<ChainStatus, CustodyError> {
        let status = self.verify(evidence_id).await?;

        if let ChainStatus::Broken { index, reason } = &status {
            tracing::error!(
                target: "custody_kernel::custody",
                evidence_id = evidence_id,
                broken_at = index,
                reason = %reason,
                "chain of custody verification failed"
            );

            if let Some(mut evidence) = self.evidence.get_evidence(evidence_id).await? {
                // Deleted evidence keeps its status; the deletion itself is
                // part of the audit trail.
                if evidence.status != EvidenceStatus::Deleted
                    && evidence.status != EvidenceStatus::Damaged
                {
                    evidence.status = EvidenceStatus::Damaged;
                    evidence.updated_at = canonical_now();
                    self.evidence.update_evidence(&evidence).await?;
                }
            }

            emit(
                self.events.as_ref(),
                DomainEvent::SecurityEvent {
                    timestamp: canonical_now(),
                    severity: "critical".to_string(),
                    description: format!(
                        "chain of custody broken at record {}: {}",
                        index, reason
                    ),
                    evidence_id: evidence_id.to_string(),
                },
            )
            .await;
        }

        Ok(status)
    }
}
