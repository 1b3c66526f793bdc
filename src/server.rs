//! HTTP sync API.
//!
//! Exposes the five synchronization access patterns, search, ingest, and
//! the privileged snapshot rebuild over JSON HTTP for mobile and admin
//! clients.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/tenants/{tenant}/records/dump` | Bounded full dump |
//! | `GET`  | `/tenants/{tenant}/records/chunk` | Chunked dump (`offset`, `limit`) |
//! | `GET`  | `/tenants/{tenant}/records/incremental` | Delta sync (`since`) |
//! | `POST` | `/tenants/{tenant}/records/batch` | ID-batch fetch |
//! | `GET`  | `/tenants/{tenant}/records/search` | Record search (`q`, `kind`) |
//! | `POST` | `/tenants/{tenant}/records` | Ingest a validated batch |
//! | `GET`  | `/tenants/{tenant}/snapshot/meta` | Snapshot metadata |
//! | `GET`  | `/tenants/{tenant}/snapshot/file` | Snapshot download (octet-stream) |
//! | `POST` | `/tenants/{tenant}/snapshot/rebuild` | Privileged synchronous rebuild |
//!
//! # Error contract
//!
//! Every error body carries a structured success flag and message:
//!
//! ```json
//! { "success": false, "message": "payload too large: ...", "total_records": 150000 }
//! ```
//!
//! Tenant references arrive pre-stamped by the upstream auth middleware
//! and are trusted here; the only credential this layer checks itself is
//! the `x-admin-token` header on the rebuild endpoint. With
//! `server.production = true`, internal error text is withheld.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crate::config::Config;
use crate::error::SyncError;
use crate::ingest;
use crate::models::{Category, NormalizedRecord};
use crate::protocol;
use crate::registry::TenantRegistry;
use crate::search::{self, SearchKind};
use crate::snapshot::SnapshotBuilder;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    registry: Arc<TenantRegistry>,
    /// `None` when the snapshot engine failed its startup probe; the
    /// rebuild endpoint then reports `EngineUnavailable`.
    builder: Option<Arc<SnapshotBuilder>>,
}

/// Start the sync API server. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let registry = Arc::new(TenantRegistry::open(config).await?);

    let builder = match SnapshotBuilder::new(config) {
        Ok(builder) => Some(Arc::new(builder)),
        Err(err) => {
            error!(error = %err, "snapshot engine failed to initialize; snapshot endpoints degraded");
            None
        }
    };

    let bind_addr = config.server.bind.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = app(Arc::new(config.clone()), registry, builder).layer(cors);

    tracing::info!(addr = %bind_addr, "sync server listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the application router over an already-opened registry and an
/// optional snapshot builder. `run_server` adds CORS and binds it to a
/// listener; in-process callers can drive it directly.
pub fn app(
    config: Arc<Config>,
    registry: Arc<TenantRegistry>,
    builder: Option<Arc<SnapshotBuilder>>,
) -> Router {
    router(AppState {
        config,
        registry,
        builder,
    })
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/tenants/{tenant}/records/dump", get(handle_dump))
        .route("/tenants/{tenant}/records/chunk", get(handle_chunk))
        .route(
            "/tenants/{tenant}/records/incremental",
            get(handle_incremental),
        )
        .route("/tenants/{tenant}/records/batch", post(handle_batch))
        .route("/tenants/{tenant}/records/search", get(handle_search))
        .route("/tenants/{tenant}/records", post(handle_ingest))
        .route("/tenants/{tenant}/snapshot/meta", get(handle_snapshot_meta))
        .route("/tenants/{tenant}/snapshot/file", get(handle_snapshot_file))
        .route(
            "/tenants/{tenant}/snapshot/rebuild",
            post(handle_rebuild),
        )
        .with_state(state)
}

// ============ Error response ============

/// Error that converts into a `{ success: false, message }` response.
struct AppError {
    status: StatusCode,
    message: String,
    /// True corpus size, reported alongside `PayloadTooLarge` so clients
    /// can switch strategy.
    total_records: Option<i64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({ "success": false, "message": self.message });
        if let Some(total) = self.total_records {
            body["total_records"] = json!(total);
        }
        (self.status, Json(body)).into_response()
    }
}

impl AppError {
    /// Map an engine error onto the HTTP surface. Internal errors keep
    /// their text only outside production mode.
    fn from_sync(err: SyncError, production: bool) -> AppError {
        let (status, total_records) = match &err {
            SyncError::TenantNotFound(_) => (StatusCode::NOT_FOUND, None),
            SyncError::BadCursor(_) => (StatusCode::BAD_REQUEST, None),
            SyncError::Unauthorized => (StatusCode::UNAUTHORIZED, None),
            SyncError::PayloadTooLarge { total, .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, Some(*total))
            }
            SyncError::ConnectionTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, None),
            SyncError::EngineUnavailable => (StatusCode::SERVICE_UNAVAILABLE, None),
            SyncError::BuildFailure(_) | SyncError::Storage(_) | SyncError::Io(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };

        let message = if production && status == StatusCode::INTERNAL_SERVER_ERROR {
            "internal error".to_string()
        } else {
            err.to_string()
        };

        AppError {
            status,
            message,
            total_records,
        }
    }

    fn bad_request(message: impl Into<String>) -> AppError {
        AppError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            total_records: None,
        }
    }

    fn not_found(message: impl Into<String>) -> AppError {
        AppError {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            total_records: None,
        }
    }
}

impl AppState {
    fn fail(&self, err: SyncError) -> AppError {
        AppError::from_sync(err, self.config.server.production)
    }

    async fn resolve(&self, tenant: &str) -> Result<Arc<crate::registry::TenantHandle>, AppError> {
        self.registry
            .resolve(tenant)
            .await
            .map_err(|e| self.fail(e))
    }
}

// ============ GET /health ============

async fn handle_health() -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ============ GET /tenants/{tenant}/records/dump ============

async fn handle_dump(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let handle = state.resolve(&tenant).await?;
    let dump = protocol::full_dump(&handle, &state.config.sync)
        .await
        .map_err(|e| state.fail(e))?;

    Ok(Json(json!({
        "success": true,
        "total_records": dump.total_records,
        "records": dump.records,
    })))
}

// ============ GET /tenants/{tenant}/records/chunk ============

#[derive(Deserialize)]
struct ChunkParams {
    offset: Option<i64>,
    limit: Option<i64>,
}

async fn handle_chunk(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(params): Query<ChunkParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let offset = params
        .offset
        .ok_or_else(|| AppError::bad_request("missing query parameter: offset"))?;
    let limit = params
        .limit
        .ok_or_else(|| AppError::bad_request("missing query parameter: limit"))?;

    let handle = state.resolve(&tenant).await?;
    let chunk = protocol::chunked_dump(&handle, &state.config.sync, offset, limit)
        .await
        .map_err(|e| state.fail(e))?;

    Ok(Json(json!({
        "success": true,
        "records": chunk.records,
        "offset": chunk.offset,
        "limit": chunk.limit,
        "total_records": chunk.total_records,
        "has_more": chunk.has_more,
        "next_offset": chunk.next_offset,
    })))
}

// ============ GET /tenants/{tenant}/records/incremental ============

#[derive(Deserialize)]
struct IncrementalParams {
    since: Option<String>,
}

async fn handle_incremental(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(params): Query<IncrementalParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let since = params
        .since
        .ok_or_else(|| AppError::bad_request("missing query parameter: since"))?;

    let handle = state.resolve(&tenant).await?;
    let delta = protocol::incremental(&handle, &state.config.sync, &since)
        .await
        .map_err(|e| state.fail(e))?;

    Ok(Json(json!({
        "success": true,
        "since": delta.since,
        "count": delta.count,
        "records": delta.records,
    })))
}

// ============ POST /tenants/{tenant}/records/batch ============

#[derive(Deserialize)]
struct BatchRequest {
    category: String,
    ids: Vec<String>,
}

async fn handle_batch(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let category = Category::parse(&request.category)
        .ok_or_else(|| AppError::bad_request(format!("unknown category: {}", request.category)))?;

    let handle = state.resolve(&tenant).await?;
    let records = protocol::batch_fetch(&handle, category, &request.ids)
        .await
        .map_err(|e| state.fail(e))?;

    Ok(Json(json!({
        "success": true,
        "count": records.len(),
        "records": records,
    })))
}

// ============ GET /tenants/{tenant}/records/search ============

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
    kind: Option<String>,
}

async fn handle_search(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(params): Query<SearchParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let query = params
        .q
        .ok_or_else(|| AppError::bad_request("missing query parameter: q"))?;
    let kind = match params.kind.as_deref() {
        None => SearchKind::Any,
        Some(s) => SearchKind::parse(s)
            .ok_or_else(|| AppError::bad_request(format!("unknown search kind: {s}")))?,
    };

    let handle = state.resolve(&tenant).await?;
    let results = search::search(&handle, &state.config.sync, &query, kind)
        .await
        .map_err(|e| state.fail(e))?;

    Ok(Json(json!({
        "success": true,
        "count": results.len(),
        "results": results,
    })))
}

// ============ POST /tenants/{tenant}/records ============

#[derive(Deserialize)]
struct IngestRequest {
    category: String,
    records: Vec<NormalizedRecord>,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let category = Category::parse(&request.category)
        .ok_or_else(|| AppError::bad_request(format!("unknown category: {}", request.category)))?;

    let handle = state.resolve(&tenant).await?;
    let summary = ingest::ingest_records(&handle.pool, category, &request.records)
        .await
        .map_err(|e| state.fail(e.into()))?;

    // Fire-and-forget rebuild; failures are logged, never surfaced here.
    if let Some(builder) = &state.builder {
        builder.clone().trigger(state.registry.clone(), tenant);
    }

    Ok(Json(json!({
        "success": true,
        "received": summary.received,
        "upserted": summary.upserted,
    })))
}

// ============ GET /tenants/{tenant}/snapshot/meta ============

async fn handle_snapshot_meta(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let builder = state
        .builder
        .as_ref()
        .ok_or_else(|| state.fail(SyncError::EngineUnavailable))?;

    let handle = state.resolve(&tenant).await?;
    let meta = builder
        .read_meta(&handle)
        .map_err(|e| state.fail(e))?
        .ok_or_else(|| AppError::not_found(format!("no snapshot built for tenant: {tenant}")))?;

    Ok(Json(json!({ "success": true, "meta": meta })))
}

// ============ GET /tenants/{tenant}/snapshot/file ============

async fn handle_snapshot_file(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Response, AppError> {
    let builder = state
        .builder
        .as_ref()
        .ok_or_else(|| state.fail(SyncError::EngineUnavailable))?;

    let handle = state.resolve(&tenant).await?;
    let path = builder.snapshot_path(&handle);
    if !path.exists() {
        return Err(AppError::not_found(format!(
            "no snapshot built for tenant: {tenant}"
        )));
    }

    // Snapshot files grow with the tenant corpus; stream rather than
    // buffering the whole file per request.
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| state.fail(e.into()))?;
    let size_bytes = file
        .metadata()
        .await
        .map_err(|e| state.fail(e.into()))?
        .len();
    let filename = format!("{}-snapshot.sqlite", handle.namespace);
    let body = Body::from_stream(ReaderStream::new(file));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, size_bytes.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response())
}

// ============ POST /tenants/{tenant}/snapshot/rebuild ============

async fn handle_rebuild(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let expected = state
        .config
        .server
        .admin_token
        .as_deref()
        .ok_or_else(|| state.fail(SyncError::Unauthorized))?;
    let presented = headers
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if presented != expected {
        return Err(state.fail(SyncError::Unauthorized));
    }

    let builder = state
        .builder
        .as_ref()
        .ok_or_else(|| state.fail(SyncError::EngineUnavailable))?;

    let handle = state.resolve(&tenant).await?;
    let meta = builder.build(&handle).await.map_err(|e| state.fail(e))?;

    Ok(Json(json!({ "success": true, "meta": meta })))
}
