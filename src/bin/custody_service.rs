//! Custody Kernel Service Binary
//!
//! Runs the policy decision point and custody engine as a REST API service
//! with production-grade features:
//! - Structured JSON logging
//! - Request metrics with latency tracking
//! - Graceful shutdown handling
//! - Health check endpoints
//!
//! ## Configuration
//!
//! Environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `EVIDENCE_BLOB_ROOT`: Root directory for evidence blobs (default: ./evidence-blobs)
//! - `PORT`: Service port (default: 8002)
//! - `HOST`: Service host (default: 0.0.0.0)
//! - `ANALYSIS_WORKERS`: Background analysis workers (default: 4)
//! - `REQUEST_TIMEOUT_SECS`: Per-request deadline (default: 30)
//! - `RUST_LOG`: Log level filter (default: info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=postgresql://... cargo run --bin custody_service --features service
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::middleware;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use custody_kernel::analysis::OrchestratorConfig;
use custody_kernel::engine::CacheConfig;
use custody_kernel::events::TracingEventSink;
use custody_kernel::evidence::BlobStore;
use custody_kernel::service::{create_router, metrics_middleware, ServiceState};
use custody_kernel::PostgresStore;

/// Initialize the tracing subscriber with JSON or pretty format
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "custody_service=info,custody_kernel=info,tower_http=info,sqlx=warn".into());

    if log_format == "pretty" {
        // Pretty format for local development
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_span_events(FmtSpan::CLOSE))
            .init();
    } else {
        // JSON format for production log collectors
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true),
            )
            .init();
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let version = env!("CARGO_PKG_VERSION");
    info!(version = version, "Starting Custody Kernel Service");

    let port: u16 = env_parse("PORT", 8002);
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let workers: usize = env_parse("ANALYSIS_WORKERS", 4);
    let timeout_secs: u64 = env_parse("REQUEST_TIMEOUT_SECS", 30);

    // Connect to PostgreSQL with timeout
    info!("Connecting to PostgreSQL...");
    let connect_start = Instant::now();

    let store = match tokio::time::timeout(Duration::from_secs(30), PostgresStore::from_env())
        .await
    {
        Ok(Ok(store)) => store,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            return Err(e.into());
        }
        Err(_) => {
            tracing::error!("PostgreSQL connection timeout after 30s");
            return Err("Database connection timeout".into());
        }
    };

    info!(
        latency_ms = connect_start.elapsed().as_millis() as u64,
        "PostgreSQL connection established"
    );

    store.apply_schema().await?;
    info!("Database schema applied");

    let blobs = BlobStore::from_env();
    info!(blob_root = %blobs.base().display(), "Evidence blob store ready");

    let state = ServiceState::new(
        Arc::new(store),
        blobs,
        Arc::new(TracingEventSink::new()),
        CacheConfig::default(),
        OrchestratorConfig {
            workers,
            ..OrchestratorConfig::default()
        },
    );

    // Pending rows left behind by a previous process get picked up again.
    match state.analysis.requeue_pending().await {
        Ok(count) if count > 0 => info!(count = count, "Requeued pending analyses"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Failed to requeue pending analyses"),
    }

    // Build router with middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state.clone())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(timeout_secs)))
        .layer(cors);

    // Start server
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!(address = %addr, version = version, "Custody Kernel Service listening");

    let listener = TcpListener::bind(addr).await?;

    // Graceful shutdown handling
    let shutdown_signal = async {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
            _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
        }
    };

    info!("Ready to accept connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    // Drain the analysis workers before exiting.
    state.analysis.shutdown().await;

    info!("Custody Kernel Service shutdown complete");

    Ok(())
}
