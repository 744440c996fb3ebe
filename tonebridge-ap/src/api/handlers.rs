//! HTTP request handlers
//!
//! Producers POST one encoded chunk per request to `/stream/chunks`; everything
//! else is control and inspection.

use crate::api::server::AppContext;
use crate::error::Error;
use crate::pipeline::OutputInfo;
use crate::playback::scheduler::{EnqueueOutcome, SchedulerStatus};
use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde::Serialize;
use tonebridge_common::events::StreamState;
use tracing::{debug, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize)]
pub struct BuildInfoResponse {
    version: String,
    git_hash: String,
    build_timestamp: String,
    build_profile: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: String,
}

#[derive(Debug, Serialize)]
pub struct StateResponse {
    state: StreamState,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    sequence: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    dropped_sequence: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct StreamStatusResponse {
    #[serde(flatten)]
    scheduler: SchedulerStatus,
    output: OutputInfo,
}

type ApiError = (StatusCode, Json<StatusResponse>);

fn api_error(code: StatusCode, message: impl Into<String>) -> ApiError {
    (
        code,
        Json(StatusResponse {
            status: message.into(),
        }),
    )
}

// ============================================================================
// Health / Build Info
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "tonebridge-ap".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /build_info
pub async fn build_info() -> Json<BuildInfoResponse> {
    Json(BuildInfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        build_profile: env!("BUILD_PROFILE").to_string(),
    })
}

// ============================================================================
// Stream Control
// ============================================================================

/// POST /stream/start
///
/// 409 once the sink has failed; the process must rebuild the pipeline.
pub async fn start_stream(State(ctx): State<AppContext>) -> Result<Json<StateResponse>, ApiError> {
    match ctx.scheduler.start() {
        Ok(()) => {
            info!("Stream started via API");
            Ok(Json(StateResponse {
                state: ctx.scheduler.state(),
            }))
        }
        Err(Error::InvalidState(msg)) => Err(api_error(StatusCode::CONFLICT, msg)),
        Err(e) => {
            warn!("Start failed: {}", e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// POST /stream/stop
pub async fn stop_stream(State(ctx): State<AppContext>) -> Json<StateResponse> {
    ctx.scheduler.stop();
    info!("Stream stopped via API");
    Json(StateResponse {
        state: ctx.scheduler.state(),
    })
}

/// GET /stream/status
pub async fn stream_status(State(ctx): State<AppContext>) -> Json<StreamStatusResponse> {
    Json(StreamStatusResponse {
        scheduler: ctx.scheduler.status(),
        output: OutputInfo::clone(&ctx.output),
    })
}

// ============================================================================
// Chunk Ingest
// ============================================================================

/// POST /stream/chunks - body is one self-contained encoded chunk
///
/// Returns 202 with the assigned sequence number. Decode errors surface later
/// as `DecodeError` events, not here.
pub async fn enqueue_chunk(
    State(ctx): State<AppContext>,
    body: Bytes,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    if body.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "empty chunk"));
    }

    let size = body.len();
    match ctx.scheduler.enqueue(body.as_ref()) {
        EnqueueOutcome::Queued { sequence } => {
            debug!("Chunk {} accepted ({} bytes)", sequence, size);
            Ok((
                StatusCode::ACCEPTED,
                Json(EnqueueResponse {
                    sequence,
                    dropped_sequence: None,
                }),
            ))
        }
        EnqueueOutcome::Overflowed {
            sequence,
            dropped_sequence,
        } => Ok((
            StatusCode::ACCEPTED,
            Json(EnqueueResponse {
                sequence,
                dropped_sequence: Some(dropped_sequence),
            }),
        )),
        EnqueueOutcome::Refused => Err(api_error(StatusCode::CONFLICT, "stream is stopped")),
    }
}
