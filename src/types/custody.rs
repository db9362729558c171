//! Custody chain record types and the chain hash.
//!
//! ## Chain Construction
//!
//! Every custody record carries `prev_hash` (the `record_hash` of the
//! preceding record for the same evidence, empty for the first record) and
//! `record_hash`, a SHA-256 over the record's canonical string:
//!
//! ```text
//! id|evidence_id|handler|action|location|timestamp-RFC3339|prev_hash
//! ```
//!
//! The digital signature is NOT part of the hash input, so a signature can be
//! recomputed or replaced without breaking the chain. Any other field of a
//! committed record cannot change without invalidating verification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::canonical::canonical_rfc3339;

/// Custody action recorded when evidence is first collected.
pub const ACTION_COLLECTED: &str = "COLLECTED";
/// Custody action recorded when evidence changes hands.
pub const ACTION_TRANSFERRED: &str = "TRANSFERRED";
/// Custody action recorded when an analysis touches evidence.
pub const ACTION_ANALYZED: &str = "ANALYZED";
/// Custody action recorded when evidence is soft-deleted.
pub const ACTION_DELETED: &str = "DELETED";

/// A single transfer entry in an evidence custody chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodyRecord {
    /// Unique identifier of the record.
    pub id: String,
    /// The evidence this record belongs to. Records are never reassigned.
    pub evidence_id: String,
    /// Who handled the evidence.
    pub handler: String,
    /// What happened. Free string; well-known values are the `ACTION_*`
    /// constants.
    pub action: String,
    /// Where the evidence was at the time.
    pub location: String,
    /// Free-form notes.
    pub notes: String,
    /// Opaque digital signature. Carried verbatim, excluded from the hash.
    pub signature: String,
    /// `record_hash` of the preceding record, or empty for the first record.
    pub prev_hash: String,
    /// SHA-256 chain hash of this record.
    pub record_hash: String,
    /// Logical time of the transfer. Strictly increases along a chain.
    pub timestamp: DateTime<Utc>,
    /// Row insertion time.
    pub created_at: DateTime<Utc>,
}

impl CustodyRecord {
    /// Build the canonical string covered by the chain hash.
    fn canonical_string(
        id: &str,
        evidence_id: &str,
        handler: &str,
        action: &str,
        location: &str,
        timestamp: &DateTime<Utc>,
        prev_hash: &str,
    ) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            id,
            evidence_id,
            handler,
            action,
            location,
            canonical_rfc3339(timestamp),
            prev_hash,
        )
    }

    /// Compute the chain hash for the given record fields.
    pub fn compute_hash(
        id: &str,
        evidence_id: &str,
        handler: &str,
        action: &str,
        location: &str,
        timestamp: &DateTime<Utc>,
        prev_hash: &str,
    ) -> String {
        let canonical = Self::canonical_string(
            id,
            evidence_id,
            handler,
            action,
            location,
            timestamp,
            prev_hash,
        );
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Recompute this record's chain hash from its stored fields.
    pub fn recompute_hash(&self) -> String {
        Self::compute_hash(
            &self.id,
            &self.evidence_id,
            &self.handler,
            &self.action,
            &self.location,
            &self.timestamp,
            &self.prev_hash,
        )
    }

    /// Finalize a draft into a committed record by linking it to the chain
    /// head and computing its hash.
    ///
    /// Store backends call this inside their per-evidence critical section so
    /// that concurrent appends serialize on the head hash.
    pub fn finalize(draft: CustodyDraft, prev_hash: String, timestamp: DateTime<Utc>) -> Self {
        let record_hash = Self::compute_hash(
            &draft.id,
            &draft.evidence_id,
            &draft.handler,
            &draft.action,
            &draft.location,
            &timestamp,
            &prev_hash,
        );
        Self {
            id: draft.id,
            evidence_id: draft.evidence_id,
            handler: draft.handler,
            action: draft.action,
            location: draft.location,
            notes: draft.notes,
            signature: draft.signature,
            prev_hash,
            record_hash,
            timestamp,
            created_at: timestamp,
        }
    }
}

/// Record fields known before the chain head is consulted.
///
/// `prev_hash`, `record_hash`, and the timestamp are assigned at append time
/// inside the store's critical section.
#[derive(Debug, Clone)]
pub struct CustodyDraft {
    /// Unique identifier of the record.
    pub id: String,
    /// The evidence this record belongs to.
    pub evidence_id: String,
    /// Who handled the evidence.
    pub handler: String,
    /// What happened.
    pub action: String,
    /// Where the evidence was.
    pub location: String,
    /// Free-form notes.
    pub notes: String,
    /// Opaque digital signature.
    pub signature: String,
}
