//! Service middleware for metrics and request tracking.
//!
//! ## Metrics Exposed
//!
//! - `custody_kernel_requests_total` - Counter of total requests by route
//!   group, endpoint, method, and status
//! - `custody_kernel_request_duration_seconds` - Histogram of request latency
//! - `custody_kernel_decisions_total` - Counter of access decisions by outcome
//! - `custody_kernel_chain_verifications_total` - Counter of chain verifications
//!
//! Request metrics are labeled by classifying the path against this API's
//! route taxonomy (policy control plane, decision point, evidence catalogue,
//! custody chain, analysis, health probes) instead of reporting raw paths,
//! so evidence and policy ids never blow up metric cardinality.

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::info;

/// Metrics middleware that records request counts and latency, labeled by
/// route group and endpoint.
///
/// Uses tracing for now - can be upgraded to prometheus metrics later.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let (group, endpoint) = classify_route(request.uri().path());

    let response = next.run(request).await;

    let elapsed = started.elapsed();
    let status = response.status().as_u16();

    info!(
        target: "custody_kernel::metrics",
        metric_type = "request",
        route_group = group,
        endpoint = endpoint,
        method = %method,
        status = status,
        latency_ms = elapsed.as_millis() as u64,
        "request_metric"
    );

    response
}

/// Map a request path onto `(route_group, endpoint)` labels.
///
/// Id segments are wildcards, so every policy or evidence id folds into the
/// same label. Paths outside the known taxonomy land in `other`.
fn classify_route(path: &str) -> (&'static str, &'static str) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match segments.as_slice() {
        ["health"] => ("health", "detailed"),
        ["health", "live"] => ("health", "liveness"),
        ["health", "ready"] => ("health", "readiness"),

        ["api", "v1", "control", "policies"] => ("policy_control", "collection"),
        ["api", "v1", "control", "policies", _] => ("policy_control", "item"),
        ["api", "v1", "control", "policies", _, "history"] => ("policy_control", "history"),
        ["api", "v1", "control", "policies", _, "restore"] => ("policy_control", "restore"),

        ["api", "v1", "control", "check"] => ("decision", "check"),
        ["api", "v1", "control", "check", "bulk"] => ("decision", "check_bulk"),

        ["api", "v1", "forensic", "evidence"] => ("evidence", "collection"),
        ["api", "v1", "forensic", "evidence", "batch"] => ("evidence", "batch"),
        ["api", "v1", "forensic", "evidence", _] => ("evidence", "item"),
        ["api", "v1", "forensic", "evidence", _, "download"] => ("evidence", "download"),
        ["api", "v1", "forensic", "evidence", _, "custody"] => ("custody", "chain"),
        ["api", "v1", "forensic", "evidence", _, "custody", "verify"] => ("custody", "verify"),

        ["api", "v1", "forensic", "analysis"] => ("analysis", "start"),
        ["api", "v1", "forensic", "analysis", _] => ("analysis", "item"),
        ["api", "v1", "forensic", "analysis", _, "results"] => ("analysis", "results"),

        _ => ("other", "unmatched"),
    }
}

/// Record an access decision outcome.
pub fn record_decision_metric(allowed: bool, cache_hit: bool) {
    info!(
        target: "custody_kernel::metrics",
        metric_type = "decision",
        allowed = allowed,
        cache_hit = cache_hit,
        "decision_metric"
    );
}

/// Record a chain verification outcome.
pub fn record_chain_verification(valid: bool) {
    let result = if valid { "intact" } else { "broken" };
    info!(
        target: "custody_kernel::metrics",
        metric_type = "chain_verification",
        result = result,
        "chain_verification_metric"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_folds_ids_into_one_label() {
        let a = classify_route(
            "/api/v1/forensic/evidence/550e8400-e29b-41d4-a716-446655440000/custody/verify",
        );
        let b = classify_route("/api/v1/forensic/evidence/another-id/custody/verify");
        assert_eq!(a, ("custody", "verify"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_classify_distinguishes_route_groups() {
        assert_eq!(
            classify_route("/api/v1/control/policies"),
            ("policy_control", "collection")
        );
        assert_eq!(
            classify_route("/api/v1/control/policies/p-1/restore"),
            ("policy_control", "restore")
        );
        assert_eq!(
            classify_route("/api/v1/control/check/bulk"),
            ("decision", "check_bulk")
        );
        assert_eq!(
            classify_route("/api/v1/forensic/evidence/batch"),
            ("evidence", "batch")
        );
        assert_eq!(
            classify_route("/api/v1/forensic/analysis/a-1/results"),
            ("analysis", "results")
        );
        assert_eq!(classify_route("/health/ready"), ("health", "readiness"));
    }

    #[test]
    fn test_classify_unknown_paths() {
        assert_eq!(classify_route("/favicon.ico"), ("other", "unmatched"));
        assert_eq!(
            classify_route("/api/v2/control/policies"),
            ("other", "unmatched")
        );
    }
}
