//! Custody Kernel REST Service
//!
//! Exposes the policy decision point and the custody engine as a REST API.
//!
//! ## Endpoints
//!
//! All domain endpoints live under `/api/v1`:
//!
//! - `POST /api/v1/control/policies` - Create a policy
//! - `GET /api/v1/control/policies` - List policies
//! - `GET|PUT|DELETE /api/v1/control/policies/:id` - Policy CRUD
//! - `GET /api/v1/control/policies/:id/history` - Version history
//! - `POST /api/v1/control/policies/:id/restore` - Restore a past version
//! - `POST /api/v1/control/check` - Evaluate an access request
//! - `POST /api/v1/control/check/bulk` - Evaluate up to 100 requests
//! - `POST /api/v1/forensic/evidence` - Collect evidence
//! - `GET /api/v1/forensic/evidence` - Search the catalogue
//! - `POST /api/v1/forensic/evidence/batch` - Batch collection
//! - `GET|DELETE /api/v1/forensic/evidence/:id` - Evidence CRUD
//! - `GET /api/v1/forensic/evidence/:id/download` - Guarded file retrieval
//! - `GET|POST /api/v1/forensic/evidence/:id/custody` - Chain read/append
//! - `POST /api/v1/forensic/evidence/:id/custody/verify` - Chain verification
//! - `POST /api/v1/forensic/analysis` - Start an analysis
//! - `GET /api/v1/forensic/analysis/:id` - Analysis status
//! - `GET /api/v1/forensic/analysis/:id/results` - Terminal results
//! - `GET /health` - Detailed service health check
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe

pub mod middleware;
pub mod routes;
pub mod state;

pub use middleware::metrics_middleware;
pub use routes::create_router;
pub use state::ServiceState;
