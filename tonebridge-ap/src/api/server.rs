//! HTTP server setup and routing
//!
//! Sets up the Axum router for stream control, chunk ingest and SSE.

use crate::error::{Error, Result};
use crate::pipeline::OutputInfo;
use crate::playback::scheduler::Scheduler;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub scheduler: Arc<Scheduler>,
    pub output: Arc<OutputInfo>,
}

impl AppContext {
    pub fn new(scheduler: Arc<Scheduler>, output: OutputInfo) -> Self {
        Self {
            scheduler,
            output: Arc::new(output),
        }
    }
}

/// Build the router; request bodies above `max_chunk_bytes` get 413
pub fn create_router(ctx: AppContext, max_chunk_bytes: usize) -> Router {
    Router::new()
        // Health and build identification
        .route("/health", get(super::handlers::health))
        .route("/build_info", get(super::handlers::build_info))

        // Stream control
        .route("/stream/start", post(super::handlers::start_stream))
        .route("/stream/stop", post(super::handlers::stop_stream))
        .route("/stream/status", get(super::handlers::stream_status))

        // Chunk ingest (raw encoded bytes)
        .route("/stream/chunks", post(super::handlers::enqueue_chunk))

        // SSE event stream
        .route("/events", get(super::sse::event_stream))

        .with_state(ctx)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_chunk_bytes))
        .layer(TraceLayer::new_for_http())

        // Enable CORS for local browser producers
        .layer(CorsLayer::permissive())
}

/// Run the HTTP server until `shutdown` resolves
pub async fn run<F>(port: u16, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    Ok(())
}
