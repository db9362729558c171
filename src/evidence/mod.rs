//! Evidence catalogue service.
//!
//! Collection writes the catalogue row and the first custody record in one
//! atomic step, so an evidence id can never exist without a chain. Deletion
//! is soft: the row flips to `deleted` (still readable for audit), the blob
//! may be removed, and a `DELETED` custody record carries the reason. File
//! retrieval runs chain verification first and refuses to hand out bytes
//! from a broken chain.

pub mod blob;

use std::sync::Arc;
use uuid::Uuid;

use crate::canonical::canonical_now;
use crate::custody::{ChainStatus, CustodyError, CustodyLedger};
use crate::events::{emit, EventSink};
use crate::store::{EvidenceStore, StoreError};
use crate::types::{
    CollectRequest, CustodyDraft, CustodyRecord, DomainEvent, Evidence, EvidencePage,
    EvidenceQuery, EvidenceStatus, EvidenceType, ACTION_COLLECTED, ACTION_DELETED,
    HASH_ALGORITHM_SHA256,
};

pub use blob::{BlobError, BlobStore, StoredBlob};

/// Maximum number of items in one batch collection.
pub const MAX_BATCH_COLLECT: usize = 100;

/// Errors raised by the evidence service.
#[derive(Debug, thiserror::Error)]
pub enum EvidenceError {
    /// No evidence with the given id.
    #[error("evidence not found: {0}")]
    NotFound(String),
    /// The evidence is soft-deleted; only audit reads remain.
    #[error("evidence deleted: {0}")]
    Deleted(String),
    /// The evidence type string is not in the closed enumeration.
    #[error("invalid evidence type: {0}")]
    InvalidEvidenceType(String),
    /// Page or page size out of range.
    #[error("invalid pagination: page {page}, page_size {page_size}")]
    InvalidPagination {
        /// The requested page (1-based).
        page: u32,
        /// The requested page size.
        page_size: u32,
    },
    /// Batch collection received zero items.
    #[error("batch collect requires at least one item")]
    EmptyBatch,
    /// Batch collection exceeded the cap.
    #[error("batch collect of {0} items exceeds the limit of 100")]
    BatchTooLarge(usize),
    /// The custody chain failed verification; retrieval refused.
    #[error("chain of custody broken for evidence {0}")]
    ChainOfCustodyBroken(String),
    /// Blob storage failed.
    #[error(transparent)]
    Blob(#[from] BlobError),
    /// Custody ledger failed.
    #[error(transparent)]
    Custody(#[from] CustodyError),
    /// The storage layer failed; callers may retry.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One item of a batch collection.
#[derive(Debug, Clone)]
pub struct BatchCollectItem {
    /// The collection request.
    pub request: CollectRequest,
    /// The artifact bytes.
    pub content: Vec<u8>,
}

/// Per-item failure in a batch collection.
#[derive(Debug)]
pub struct BatchCollectError {
    /// Index of the failed item in the input batch.
    pub index: usize,
    /// What went wrong.
    pub error: EvidenceError,
}

/// Outcome of a batch collection: successes plus per-item failures.
#[derive(Debug)]
pub struct BatchCollectOutcome {
    /// Evidence collected successfully.
    pub collected: Vec<Evidence>,
    /// Items that failed, with their input index.
    pub errors: Vec<BatchCollectError>,
}

/// Service over the evidence store and blob tree.
pub struct EvidenceService {
    store: Arc<dyn EvidenceStore>,
    custody: Arc<CustodyLedger>,
    blobs: Arc<BlobStore>,
    events: Arc<dyn EventSink>,
}

impl EvidenceService {
    /// Create a new service.
    pub fn new(
        store: Arc<dyn EvidenceStore>,
        custody: Arc<CustodyLedger>,
        blobs: Arc<BlobStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            custody,
            blobs,
            events,
        }
    }

    /// Collect one artifact: store its blob, hash it, and atomically write
    /// the catalogue row plus the first `COLLECTED` custody record.
    pub async fn collect(
        &self,
        request: CollectRequest,
        content: &[u8],
        actor: &str,
    ) -> Result<Evidence, EvidenceError> {
        let evidence_type = EvidenceType::from_str(&request.evidence_type)
            .ok_or_else(|| EvidenceError::InvalidEvidenceType(request.evidence_type.clone()))?;

        let id = Uuid::new_v4().to_string();
        let stored = self.blobs.write(&id, content).await?;
        let now = canonical_now();

        let evidence = Evidence {
            id: id.clone(),
            name: request.name,
            evidence_type,
            source: request.source,
            description: request.description,
            content_hash: stored.sha256,
            hash_algorithm: HASH_ALGORITHM_SHA256.to_string(),
            size_bytes: stored.size_bytes,
            storage_location: stored.location.clone(),
            tags: request.tags,
            metadata: request.metadata,
            status: EvidenceStatus::Collected,
            collected_at: now,
            collected_by: actor.to_string(),
            verified_at: None,
            verified_by: None,
            created_at: now,
            updated_at: now,
        };

        let first_record = CustodyRecord::finalize(
            CustodyDraft {
                id: Uuid::new_v4().to_string(),
                evidence_id: id.clone(),
                handler: actor.to_string(),
                action: ACTION_COLLECTED.to_string(),
                location: stored.location,
                notes: "Initial collection".to_string(),
                signature: String::new(),
            },
            String::new(),
            now,
        );

        if let Err(e) = self.store.insert_evidence(&evidence, &first_record).await {
            // The blob is orphaned if the row never landed; best-effort
            // cleanup keeps the tree consistent with the catalogue.
            if let Err(cleanup) = self.blobs.remove(&id).await {
                tracing::warn!(
                    target: "custody_kernel::evidence",
                    evidence_id = %id,
                    error = %cleanup,
                    "failed to remove orphaned blob after insert failure"
                );
            }
            return Err(e.into());
        }

        emit(
            self.events.as_ref(),
            DomainEvent::EvidenceCollected {
                timestamp: now,
                evidence_id: evidence.id.clone(),
                content_hash: evidence.content_hash.clone(),
            },
        )
        .await;

        tracing::info!(
            target: "custody_kernel::evidence",
            evidence_id = %evidence.id,
            evidence_type = %evidence.evidence_type,
            size_bytes = evidence.size_bytes,
            "evidence collected"
        );
        Ok(evidence)
    }

    /// Collect up to [`MAX_BATCH_COLLECT`] artifacts, returning per-item
    /// outcomes.
    pub async fn batch_collect(
        &self,
        items: Vec<BatchCollectItem>,
        actor: &str,
    ) -> Result<BatchCollectOutcome, EvidenceError> {
        if items.is_empty() {
            return Err(EvidenceError::EmptyBatch);
        }
        if items.len() > MAX_BATCH_COLLECT {
            return Err(EvidenceError::BatchTooLarge(items.len()));
        }

        let mut collected = Vec::new();
        let mut errors = Vec::new();
        for (index, item) in items.into_iter().enumerate() {
            match self.collect(item.request, &item.content, actor).await {
                Ok(evidence) => collected.push(evidence),
                Err(error) => errors.push(BatchCollectError { index, error }),
            }
        }
        Ok(BatchCollectOutcome { collected, errors })
    }

    /// Fetch an evidence row, including soft-deleted ones (audit read).
    pub async fn get(&self, id: &str) -> Result<Evidence, EvidenceError> {
        self.store
            .get_evidence(id)
            .await?
            .ok_or_else(|| EvidenceError::NotFound(id.to_string()))
    }

    /// Whether an evidence row exists.
    pub async fn exists(&self, id: &str) -> Result<bool, EvidenceError> {
        Ok(self.store.evidence_exists(id).await?)
    }

    /// Soft-delete evidence: flip the row to `deleted`, remove the blob,
    /// and append a `DELETED` custody record carrying the reason.
    ///
    /// Deleting already-deleted evidence is a no-op.
    pub async fn delete(&self, id: &str, actor: &str, reason: &str) -> Result<(), EvidenceError> {
        let mut evidence = self.get(id).await?;
        if evidence.status == EvidenceStatus::Deleted {
            return Ok(());
        }

        // Append before flipping the status so a deleted row can never exist
        // without a DELETED record in its chain.
        self.custody
            .add(
                id,
                actor,
                ACTION_DELETED,
                &evidence.storage_location,
                reason,
                "",
            )
            .await?;

        evidence.status = EvidenceStatus::Deleted;
        evidence.updated_at = canonical_now();
        if !self.store.update_evidence(&evidence).await? {
            return Err(EvidenceError::NotFound(id.to_string()));
        }

        if let Err(e) = self.blobs.remove(id).await {
            tracing::warn!(
                target: "custody_kernel::evidence",
                evidence_id = id,
                error = %e,
                "failed to remove blob for deleted evidence"
            );
        }

        tracing::info!(
            target: "custody_kernel::evidence",
            evidence_id = id,
            reason = reason,
            "evidence soft-deleted"
        );
        Ok(())
    }

    /// Retrieve the evidence file for download.
    ///
    /// Runs chain verification first; a broken chain refuses retrieval with
    /// `ChainOfCustodyBroken` and no bytes are returned.
    pub async fn retrieve_file(
        &self,
        id: &str,
    ) -> Result<(Evidence, tokio::fs::File), EvidenceError> {
        let evidence = self.get(id).await?;
        if evidence.status == EvidenceStatus::Deleted {
            return Err(EvidenceError::Deleted(id.to_string()));
        }

        let status = self.custody.verify_and_flag(id).await?;
        if !status.is_intact() {
            return Err(EvidenceError::ChainOfCustodyBroken(id.to_string()));
        }

        let file = self.blobs.open(id).await?;
        Ok((evidence, file))
    }

    /// Verify an evidence chain, flagging the evidence on failure.
    pub async fn verify_custody(&self, id: &str) -> Result<ChainStatus, EvidenceError> {
        // Existence check first so a missing id maps to NotFound, not to a
        // custody error.
        if !self.exists(id).await? {
            return Err(EvidenceError::NotFound(id.to_string()));
        }
        Ok(self.custody.verify_and_flag(id).await?)
    }

    /// Search the catalogue.
    pub async fn search(&self, query: &EvidenceQuery) -> Result<EvidencePage, EvidenceError> {
        if query.page < 1 || query.page_size < 1 || query.page_size > 100 {
            return Err(EvidenceError::InvalidPagination {
                page: query.page,
                page_size: query.page_size,
            });
        }
        let offset = (query.page as u64 - 1) * query.page_size as u64;
        let (items, total) = self
            .store
            .search_evidence(query, offset, query.page_size as u64)
            .await?;
        Ok(EvidencePage {
            items,
            total,
            page: query.page,
            page_size: query.page_size,
        })
    }
}
