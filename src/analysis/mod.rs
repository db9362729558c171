//! Analysis orchestration: a bounded worker pool over a durable queue.
//!
//! Each analysis row is a state machine: `pending → running → {completed,
//! failed, cancelled}`. The row itself is the durable queue entry; the
//! in-process channel only wakes workers up. A worker takes ownership of an
//! analysis through the store's compare-and-set `pending → running`, so at
//! most one worker ever runs a given id even if the same id is enqueued
//! twice. Pending rows left behind by a crash are re-enqueued with
//! [`AnalysisOrchestrator::requeue_pending`].

mod worker;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::canonical::canonical_now;
use crate::events::{emit, EventSink};
use crate::evidence::BlobStore;
use crate::store::{AnalysisStore, EvidenceStore, StoreError};
use crate::types::{Analysis, AnalysisRequest, AnalysisStatus, AnalysisType, DomainEvent};

use worker::WorkerContext;

/// Errors raised by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// The referenced evidence does not exist.
    #[error("evidence not found: {0}")]
    EvidenceNotFound(String),
    /// The analysis type string is not in the closed enumeration.
    #[error("invalid analysis type: {0}")]
    InvalidAnalysisType(String),
    /// No analysis with the given id.
    #[error("analysis not found: {0}")]
    NotFound(String),
    /// Results were requested before the analysis reached a terminal state.
    #[error("analysis still in progress: {0}")]
    AnalysisInProgress(String),
    /// The storage layer failed; callers may retry.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Number of background workers.
    pub workers: usize,
    /// Wake-up channel depth. A full channel is harmless: the pending row
    /// stays durable and is picked up by the next requeue.
    pub queue_depth: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 256,
        }
    }
}

/// Asynchronous state machine over analysis rows.
pub struct AnalysisOrchestrator {
    store: Arc<dyn AnalysisStore>,
    evidence: Arc<dyn EvidenceStore>,
    events: Arc<dyn EventSink>,
    queue: Mutex<Option<mpsc::Sender<String>>>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl AnalysisOrchestrator {
    /// Create an orchestrator and spawn its worker pool.
    pub fn new(
        store: Arc<dyn AnalysisStore>,
        evidence: Arc<dyn EvidenceStore>,
        blobs: Arc<BlobStore>,
        events: Arc<dyn EventSink>,
        config: OrchestratorConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<String>(config.queue_depth.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let ctx = WorkerContext {
            evidence: evidence.clone(),
            blobs,
            events: events.clone(),
        };

        let mut handles = Vec::with_capacity(config.workers);
        for i in 0..config.workers.max(1) {
            let worker_name = format!("analysis-worker-{}", i);
            let store = store.clone();
            let events = events.clone();
            let ctx = ctx.clone();
            let rx = rx.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(store, events, ctx, rx, worker_name).await;
            }));
        }

        Self {
            store,
            evidence,
            events,
            queue: Mutex::new(Some(tx)),
            handles: Mutex::new(handles),
        }
    }

    /// Validate and persist a new analysis, emit `AnalysisStarted`, and wake
    /// a worker.
    pub async fn start(
        &self,
        request: AnalysisRequest,
        _actor: &str,
    ) -> Result<Analysis, AnalysisError> {
        if !self.evidence.evidence_exists(&request.evidence_id).await? {
            return Err(AnalysisError::EvidenceNotFound(request.evidence_id));
        }
        let analysis_type = AnalysisType::from_str(&request.analysis_type)
            .ok_or_else(|| AnalysisError::InvalidAnalysisType(request.analysis_type.clone()))?;

        let now = canonical_now();
        let analysis = Analysis {
            id: Uuid::new_v4().to_string(),
            evidence_id: request.evidence_id,
            analysis_type,
            status: AnalysisStatus::Pending,
            parameters: request.parameters,
            results: BTreeMap::new(),
            findings: vec![],
            processed_by: String::new(),
            started_at: None,
            completed_at: None,
            error_message: String::new(),
            created_at: now,
            updated_at: now,
        };

        self.store.insert_analysis(&analysis).await?;

        emit(
            self.events.as_ref(),
            DomainEvent::AnalysisStarted {
                timestamp: now,
                analysis_id: analysis.id.clone(),
                evidence_id: analysis.evidence_id.clone(),
                analysis_type: analysis.analysis_type.to_string(),
            },
        )
        .await;

        self.enqueue(&analysis.id);

        tracing::info!(
            target: "custody_kernel::analysis",
            analysis_id = %analysis.id,
            evidence_id = %analysis.evidence_id,
            analysis_type = %analysis.analysis_type,
            "analysis queued"
        );
        Ok(analysis)
    }

    /// Fetch an analysis row.
    pub async fn get(&self, id: &str) -> Result<Analysis, AnalysisError> {
        self.store
            .get_analysis(id)
            .await?
            .ok_or_else(|| AnalysisError::NotFound(id.to_string()))
    }

    /// Fetch results. Legal only from terminal states; otherwise fails with
    /// `AnalysisInProgress`.
    pub async fn get_results(&self, id: &str) -> Result<Analysis, AnalysisError> {
        let analysis = self.get(id).await?;
        if !analysis.status.is_terminal() {
            return Err(AnalysisError::AnalysisInProgress(id.to_string()));
        }
        Ok(analysis)
    }

    /// Cancel an analysis. Legal from `pending` or `running`; a no-op from
    /// terminal states.
    pub async fn cancel(&self, id: &str) -> Result<Analysis, AnalysisError> {
        match self.store.cancel_analysis(id).await? {
            Some(cancelled) => {
                emit(
                    self.events.as_ref(),
                    DomainEvent::AnalysisCompleted {
                        timestamp: cancelled.updated_at,
                        analysis_id: cancelled.id.clone(),
                        evidence_id: cancelled.evidence_id.clone(),
                        status: cancelled.status.to_string(),
                    },
                )
                .await;
                tracing::info!(
                    target: "custody_kernel::analysis",
                    analysis_id = id,
                    "analysis cancelled"
                );
                Ok(cancelled)
            }
            // Already terminal (no-op) or never existed.
            None => self.get(id).await,
        }
    }

    /// Re-enqueue every pending row, e.g. after a restart.
    pub async fn requeue_pending(&self) -> Result<usize, AnalysisError> {
        let pending = self.store.pending_analyses().await?;
        let count = pending.len();
        for id in pending {
            self.enqueue(&id);
        }
        if count > 0 {
            tracing::info!(
                target: "custody_kernel::analysis",
                count = count,
                "requeued pending analyses"
            );
        }
        Ok(count)
    }

    /// Stop accepting work and wait for the workers to drain.
    pub async fn shutdown(&self) {
        // Dropping the sender closes the channel; workers exit when recv
        // returns None.
        self.queue.lock().take();
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn enqueue(&self, id: &str) {
        let sender = self.queue.lock().clone();
        match sender {
            Some(tx) => {
                if let Err(e) = tx.try_send(id.to_string()) {
                    // The durable pending row is the queue of record; a full
                    // channel only delays pickup until the next requeue.
                    tracing::warn!(
                        target: "custody_kernel::analysis",
                        analysis_id = id,
                        error = %e,
                        "wake-up queue unavailable, analysis stays pending"
                    );
                }
            }
            None => {
                tracing::warn!(
                    target: "custody_kernel::analysis",
                    analysis_id = id,
                    "orchestrator shut down, analysis stays pending"
                );
            }
        }
    }
}

async fn worker_loop(
    store: Arc<dyn AnalysisStore>,
    events: Arc<dyn EventSink>,
    ctx: WorkerContext,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
    worker_name: String,
) {
    loop {
        let id = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(id) = id else {
            break;
        };
        process_one(&store, &events, &ctx, &id, &worker_name).await;
    }
    tracing::debug!(
        target: "custody_kernel::analysis",
        worker = %worker_name,
        "worker exiting"
    );
}

async fn process_one(
    store: &Arc<dyn AnalysisStore>,
    events: &Arc<dyn EventSink>,
    ctx: &WorkerContext,
    id: &str,
    worker_name: &str,
) {
    // Ownership transfer: whoever wins the pending → running CAS runs it.
    let claimed = match store.claim_analysis(id, worker_name).await {
        Ok(Some(analysis)) => analysis,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(
                target: "custody_kernel::analysis",
                analysis_id = id,
                error = %e,
                "failed to claim analysis"
            );
            return;
        }
    };

    let mut analysis = claimed;
    let outcome = worker::run_analyzer(ctx, &mut analysis).await;

    let now = canonical_now();
    analysis.completed_at = Some(now);
    analysis.updated_at = now;
    match outcome {
        Ok(()) => analysis.status = AnalysisStatus::Completed,
        Err(message) => {
            analysis.status = AnalysisStatus::Failed;
            analysis.error_message = message;
        }
    }

    // A concurrent cancel may have won; only the running row is overwritten.
    let wrote = match store.complete_analysis(&analysis).await {
        Ok(wrote) => wrote,
        Err(e) => {
            tracing::error!(
                target: "custody_kernel::analysis",
                analysis_id = id,
                error = %e,
                "failed to persist analysis result"
            );
            return;
        }
    };

    if wrote {
        emit(
            events.as_ref(),
            DomainEvent::AnalysisCompleted {
                timestamp: now,
                analysis_id: analysis.id.clone(),
                evidence_id: analysis.evidence_id.clone(),
                status: analysis.status.to_string(),
            },
        )
        .await;

        tracing::info!(
            target: "custody_kernel::analysis",
            analysis_id = %analysis.id,
            status = %analysis.status,
            worker = worker_name,
            "analysis finished"
        );
    }
}
