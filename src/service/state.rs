//! Service state wiring.
//!
//! Builds the full service graph (stores, cache, sinks, services) once and
//! shares it across request handlers.

use std::sync::Arc;

use crate::analysis::{AnalysisOrchestrator, OrchestratorConfig};
use crate::custody::CustodyLedger;
use crate::engine::{CacheConfig, DecisionCache, DecisionEngine};
use crate::events::EventSink;
use crate::evidence::{BlobStore, EvidenceService};
use crate::policy::PolicyService;
use crate::store::{
    AnalysisStore, CustodyStore, EvidenceStore, HealthProbe, PolicyStore,
};

/// Everything a request handler needs, built once at startup.
pub struct ServiceState {
    /// Policy CRUD, history, and restore.
    pub policies: Arc<PolicyService>,
    /// The policy decision point.
    pub engine: Arc<DecisionEngine>,
    /// Evidence catalogue and blob retrieval.
    pub evidence: Arc<EvidenceService>,
    /// Custody chain append and verification.
    pub custody: Arc<CustodyLedger>,
    /// Analysis orchestration.
    pub analysis: Arc<AnalysisOrchestrator>,
    /// Backend liveness for the health endpoints.
    pub health: Arc<dyn HealthProbe>,
}

/// The single backend type the service wires against: one store value
/// implementing every persistence trait plus the health probe.
pub trait Backend:
    PolicyStore + EvidenceStore + CustodyStore + AnalysisStore + HealthProbe
{
}

impl<T> Backend for T where
    T: PolicyStore + EvidenceStore + CustodyStore + AnalysisStore + HealthProbe
{
}

impl ServiceState {
    /// Wire the full service graph over one backend.
    pub fn new<B>(
        backend: Arc<B>,
        blobs: BlobStore,
        events: Arc<dyn EventSink>,
        cache_config: CacheConfig,
        orchestrator_config: OrchestratorConfig,
    ) -> Self
    where
        B: Backend + Send + Sync + 'static,
    {
        let blobs = Arc::new(blobs);
        let cache = Arc::new(DecisionCache::new(cache_config));

        let policies = Arc::new(PolicyService::new(
            backend.clone(),
            cache.clone(),
            events.clone(),
        ));
        let engine = Arc::new(DecisionEngine::new(
            policies.clone(),
            cache,
            events.clone(),
        ));
        let custody = Arc::new(CustodyLedger::new(
            backend.clone(),
            backend.clone(),
            events.clone(),
        ));
        let evidence = Arc::new(EvidenceService::new(
            backend.clone(),
            custody.clone(),
            blobs.clone(),
            events.clone(),
        ));
        let analysis = Arc::new(AnalysisOrchestrator::new(
            backend.clone(),
            backend.clone(),
            blobs,
            events,
            orchestrator_config,
        ));

        Self {
            policies,
            engine,
            evidence,
            custody,
            analysis,
            health: backend,
        }
    }
}

impl Clone for ServiceState {
    fn clone(&self) -> Self {
        Self {
            policies: Arc::clone(&self.policies),
            engine: Arc::clone(&self.engine),
            evidence: Arc::clone(&self.evidence),
            custody: Arc::clone(&self.custody),
            analysis: Arc::clone(&self.analysis),
            health: Arc::clone(&self.health),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventSink;
    use crate::store::MemoryStore;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_state_wires_over_memory_backend() {
        let state = ServiceState::new(
            Arc::new(MemoryStore::new()),
            BlobStore::new(std::env::temp_dir().join(format!("state-test-{}", Uuid::new_v4()))),
            Arc::new(MemoryEventSink::new()),
            CacheConfig::default(),
            OrchestratorConfig::default(),
        );
        assert!(state.health.is_healthy().await);
    }
}
