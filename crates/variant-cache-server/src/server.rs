//! HTTP server for variant cache endpoints
//!
//! Provides /health, /variants, /variant and /match endpoints.

use crate::types::{HealthResponse, MatchQuery, SourceQuery, VariantQuery};
use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use variant_cache::{BlobRef, CacheEngine, ImageFormat};

/// Shared state for the HTTP server
pub struct ServerState {
    pub engine: CacheEngine,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(engine: CacheEngine) -> Self {
        Self {
            engine,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn parse_format(name: &str) -> Result<ImageFormat, Response> {
    name.parse::<ImageFormat>()
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))
}

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/variants", get(list_variants).delete(invalidate_source))
        .route("/variant", get(get_variant).put(put_variant))
        .route("/match", get(match_variant))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server, returning once `shutdown` resolves
pub async fn start_server<F>(state: SharedState, port: u16, shutdown: F) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds() as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        engine_state: state.engine.state(),
        cache: state.engine.stats(),
    })
}

/// All resident variants of a source
async fn list_variants(
    State(state): State<SharedState>,
    Query(query): Query<SourceQuery>,
) -> Response {
    Json(state.engine.get_variants(&query.source)).into_response()
}

/// Exact variant lookup
async fn get_variant(
    State(state): State<SharedState>,
    Query(query): Query<VariantQuery>,
) -> Response {
    let format = match parse_format(&query.format) {
        Ok(format) => format,
        Err(response) => return response,
    };

    match state
        .engine
        .get_exact(&query.source, query.width, query.height, format)
    {
        Some(blob) => blob_response(&blob, format).await,
        None => error_response(StatusCode::NOT_FOUND, "Variant not cached"),
    }
}

/// First variant of a source matching an approximate size
async fn match_variant(
    State(state): State<SharedState>,
    Query(query): Query<MatchQuery>,
) -> Response {
    let format = match parse_format(&query.format) {
        Ok(format) => format,
        Err(response) => return response,
    };

    match state
        .engine
        .find_variant(&query.source, query.x, query.y, format)
    {
        Some(entry) => blob_response(entry.blob(), format).await,
        None => error_response(StatusCode::NOT_FOUND, "No matching variant"),
    }
}

/// Queue a variant for caching; the write completes in the background
async fn put_variant(
    State(state): State<SharedState>,
    Query(query): Query<VariantQuery>,
    body: Bytes,
) -> Response {
    let format = match parse_format(&query.format) {
        Ok(format) => format,
        Err(response) => return response,
    };
    if body.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Empty body");
    }

    debug!(source_id = %query.source, width = query.width, height = query.height, %format, size = body.len(), "Queueing variant");
    // Fire-and-forget: failures are logged by the engine.
    drop(state.engine.put(
        query.source,
        body.to_vec(),
        query.width,
        query.height,
        format,
    ));
    StatusCode::ACCEPTED.into_response()
}

/// Drop every variant of a source
async fn invalidate_source(
    State(state): State<SharedState>,
    Query(query): Query<SourceQuery>,
) -> StatusCode {
    state.engine.invalidate(&query.source);
    StatusCode::NO_CONTENT
}

async fn blob_response(blob: &BlobRef, format: ImageFormat) -> Response {
    match tokio::fs::read(blob.path()).await {
        Ok(data) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, format.content_type()),
                (header::CACHE_CONTROL, "public, max-age=86400"),
                (header::HeaderName::from_static("x-cache"), "HIT"),
            ],
            Body::from(data),
        )
            .into_response(),
        Err(e) => {
            // Evicted between lookup and read.
            warn!(path = ?blob.path(), error = %e, "Failed to read cached blob");
            error_response(StatusCode::NOT_FOUND, "Variant not cached")
        }
    }
}
