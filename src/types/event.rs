//! Domain events emitted after durable writes.
//!
//! Each event serializes to a self-describing map with an `event_type` tag,
//! an RFC3339 UTC `timestamp`, and kind-specific fields. Delivery is
//! best-effort at-least-once; consumers are assumed idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A domain event describing one state-changing operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A policy was created.
    PolicyCreated {
        /// When the write committed.
        timestamp: DateTime<Utc>,
        /// The new policy's id.
        policy_id: String,
        /// The new policy's version (always 1).
        version: u32,
    },
    /// A policy was updated.
    PolicyUpdated {
        /// When the write committed.
        timestamp: DateTime<Utc>,
        /// The updated policy's id.
        policy_id: String,
        /// The version after the update.
        version: u32,
    },
    /// A policy was deleted.
    PolicyDeleted {
        /// When the write committed.
        timestamp: DateTime<Utc>,
        /// The deleted policy's id.
        policy_id: String,
        /// The version recorded by the deletion history entry.
        version: u32,
    },
    /// An access request was evaluated.
    AccessDecision {
        /// When the decision was evaluated.
        timestamp: DateTime<Utc>,
        /// Fingerprint of the evaluated request.
        fingerprint: String,
        /// Whether access was granted.
        allowed: bool,
        /// Matched policy id, empty on default-deny.
        policy_id: String,
    },
    /// Evidence was collected into the catalogue.
    EvidenceCollected {
        /// When the write committed.
        timestamp: DateTime<Utc>,
        /// The new evidence id.
        evidence_id: String,
        /// The content hash of the stored blob.
        content_hash: String,
    },
    /// A custody record was appended.
    CustodyTransfer {
        /// When the write committed.
        timestamp: DateTime<Utc>,
        /// The evidence whose chain grew.
        evidence_id: String,
        /// The appended record's id.
        record_id: String,
        /// The appended record's action.
        action: String,
    },
    /// An analysis was accepted and queued.
    AnalysisStarted {
        /// When the write committed.
        timestamp: DateTime<Utc>,
        /// The new analysis id.
        analysis_id: String,
        /// The evidence under analysis.
        evidence_id: String,
        /// The analysis kind.
        analysis_type: String,
    },
    /// An analysis reached a terminal state.
    AnalysisCompleted {
        /// When the write committed.
        timestamp: DateTime<Utc>,
        /// The analysis id.
        analysis_id: String,
        /// The evidence that was analyzed.
        evidence_id: String,
        /// The terminal status, `completed`, `failed`, or `cancelled`.
        status: String,
    },
    /// Something integrity-relevant happened outside the normal flow.
    SecurityEvent {
        /// When the event was observed.
        timestamp: DateTime<Utc>,
        /// Severity label, e.g. `critical`.
        severity: String,
        /// What happened.
        description: String,
        /// The evidence involved, if any.
        evidence_id: String,
    },
}

impl DomainEvent {
    /// Wire tag of this event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PolicyCreated { .. } => "policy_created",
            Self::PolicyUpdated { .. } => "policy_updated",
            Self::PolicyDeleted { .. } => "policy_deleted",
            Self::AccessDecision { .. } => "access_decision",
            Self::EvidenceCollected { .. } => "evidence_collected",
            Self::CustodyTransfer { .. } => "custody_transfer",
            Self::AnalysisStarted { .. } => "analysis_started",
            Self::AnalysisCompleted { .. } => "analysis_completed",
            Self::SecurityEvent { .. } => "security_event",
        }
    }

    /// When the event happened.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::PolicyCreated { timestamp, .. }
            | Self::PolicyUpdated { timestamp, .. }
            | Self::PolicyDeleted { timestamp, .. }
            | Self::AccessDecision { timestamp, .. }
            | Self::EvidenceCollected { timestamp, .. }
            | Self::CustodyTransfer { timestamp, .. }
            | Self::AnalysisStarted { timestamp, .. }
            | Self::AnalysisCompleted { timestamp, .. }
            | Self::SecurityEvent { timestamp, .. } => *timestamp,
        }
    }
}
