//! Core types for the custody kernel.

pub mod analysis;
pub mod custody;
pub mod event;
pub mod evidence;
pub mod policy;
pub mod request;

pub use analysis::{Analysis, AnalysisRequest, AnalysisStatus, AnalysisType, Finding};
pub use custody::{
    CustodyDraft, CustodyRecord, ACTION_ANALYZED, ACTION_COLLECTED, ACTION_DELETED,
    ACTION_TRANSFERRED,
};
pub use event::DomainEvent;
pub use evidence::{
    CollectRequest, Evidence, EvidencePage, EvidenceQuery, EvidenceStatus, EvidenceType,
    HASH_ALGORITHM_SHA256,
};
pub use policy::{ChangeKind, Policy, PolicyEffect, PolicyInput, PolicyPatch, PolicyVersion};
pub use request::{
    AccessDecision, AccessRequest, DecisionFingerprint, RequestContext, Resource, Subject,
};
