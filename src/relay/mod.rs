//! budgetsync relay
//!
//! A minimal HTTP storage provider: devices upload sealed batches and
//! download the batches their other devices uploaded. The relay never opens
//! a payload.
//!
//! # Configuration
//!
//! Environment variables:
//! - `BUDGETSYNC_RELAY_PORT`: Port to listen on (default: 8080)
//! - `BUDGETSYNC_RELAY_DATA_DIR`: Directory to store batches (default: ~/.local/share/budgetsync-relay)
//! - `BUDGETSYNC_RELAY_CONFIG`: Path to the API key file (default: ~/.config/budgetsync-relay/config.yaml)
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint (no auth required)
//! - `PUT /batches/{id}`: Store a sealed batch (auth required)
//! - `GET /batches?since=<rfc3339>`: Batches received after `since` (auth required)

mod keys;
mod storage;

pub use keys::{ApiKeyStore, AuthUser};
pub use storage::{Receipt, RelayStorage, RelayStorageError, StoredBatch};

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, put},
    Extension, Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use budget_sync_core::BatchId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Largest batch the relay accepts.
const MAX_BATCH_BYTES: usize = 32 * 1024 * 1024;

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub config_path: PathBuf,
}

impl RelayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let port = std::env::var("BUDGETSYNC_RELAY_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let data_dir = std::env::var("BUDGETSYNC_RELAY_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("budgetsync-relay")
            });

        let config_path = std::env::var("BUDGETSYNC_RELAY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("budgetsync-relay")
                    .join("config.yaml")
            });

        Self {
            port,
            data_dir,
            config_path,
        }
    }
}

// ============================================================================
// Wire format
// ============================================================================

/// Response to `PUT /batches/{id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub batch_id: BatchId,
    pub received_at: DateTime<Utc>,
}

/// One batch in a download response. The payload is base64 encoded.
#[derive(Debug, Serialize, Deserialize)]
pub struct WireBatch {
    pub id: BatchId,
    pub received_at: DateTime<Utc>,
    pub payload: String,
}

/// Response to `GET /batches`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub batches: Vec<WireBatch>,
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    since: Option<DateTime<Utc>>,
}

/// Error response body
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

fn error_response(status: StatusCode, error: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error,
            message: message.into(),
        }),
    )
        .into_response()
}

// ============================================================================
// Authentication
// ============================================================================

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub api_keys: Arc<ApiKeyStore>,
    pub storage: Arc<RelayStorage>,
}

/// Authentication middleware
async fn auth_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let api_key = match auth_header {
        Some(h) if h.starts_with("Bearer ") => &h[7..],
        Some(_) => {
            return error_response(
                StatusCode::UNAUTHORIZED,
                "invalid_auth",
                "Authorization header must use Bearer scheme",
            );
        }
        None => {
            return error_response(
                StatusCode::UNAUTHORIZED,
                "missing_auth",
                "Authorization header required",
            );
        }
    };

    match state.api_keys.validate(api_key) {
        Some(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        None => error_response(StatusCode::UNAUTHORIZED, "invalid_key", "Invalid API key"),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint (no auth required)
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn put_batch(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let Ok(batch_id) = id.parse::<BatchId>() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_batch_id",
            format!("Invalid batch ID: {}", id),
        );
    };

    match state.storage.store(&user.user_id, &batch_id, &body) {
        Ok(receipt) => {
            let status = if receipt.created {
                tracing::info!(user = %user.user_id, batch = %batch_id, bytes = body.len(), "Batch received");
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (
                status,
                Json(UploadResponse {
                    batch_id,
                    received_at: receipt.received_at,
                }),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(user = %user.user_id, batch = %batch_id, "Failed to store batch: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", e.to_string())
        }
    }
}

async fn get_batches(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<DownloadQuery>,
) -> Response {
    match state.storage.since(&user.user_id, query.since) {
        Ok(stored) => {
            let batches = stored
                .into_iter()
                .map(|batch| WireBatch {
                    id: batch.id,
                    received_at: batch.received_at,
                    payload: STANDARD.encode(&batch.payload),
                })
                .collect();
            Json(DownloadResponse { batches }).into_response()
        }
        Err(e) => {
            tracing::error!(user = %user.user_id, "Failed to list batches: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", e.to_string())
        }
    }
}

/// Builds the relay router.
pub fn router(state: AppState) -> Router {
    // Public routes (no auth)
    let public_routes = Router::new().route("/health", get(health));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/batches", get(get_batches))
        .route("/batches/{id}", put(put_batch))
        .layer(DefaultBodyLimit::max(MAX_BATCH_BYTES))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
