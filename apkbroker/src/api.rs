//! HTTP surface.
//!
//! | Method   | Path                      | Purpose                                   |
//! |----------|---------------------------|-------------------------------------------|
//! | `GET`    | `/`                       | Service status and counters               |
//! | `GET`    | `/download/{id}`          | Resolve and stream the artifact           |
//! | `HEAD`   | `/download/{id}`          | Size of a cached artifact, never acquires |
//! | `GET`    | `/info/{id}`              | Availability without downloading          |
//! | `GET`    | `/not-found-cache`        | Live negative entries                     |
//! | `DELETE` | `/not-found-cache/{id}`   | Forget one negative entry                 |
//! | `DELETE` | `/cache`                  | Evict everything, reset counters          |
//! | `GET`    | `/stats`                  | Counters and cache occupancy              |
//!
//! `GET /download/{id}` honours `?force_tool=true` and the
//! `X-Force-Tool: true` header. Errors are JSON `{"detail": "..."}`; a
//! not-found answered from the negative cache also carries
//! `X-Negative-Cache: true`.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::SystemTime;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header::{
    CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::broker::{Broker, BrokerError};
use crate::cache::{CounterSnapshot, NegativeEntry};
use crate::package::{Artifact, PackageId, PackageIdError};

const X_SOURCE: &str = "x-source";
const X_FILE_TYPE: &str = "x-file-type";
const X_FILE_SIZE: &str = "x-file-size";
const X_CACHE_HIT: &str = "x-cache-hit";
const X_CACHED: &str = "x-cached";
const X_FORCE_TOOL: &str = "x-force-tool";
const X_NEGATIVE_CACHE: &str = "x-negative-cache";

/// Shared handler state.
pub type AppState = Arc<Broker>;

/// Error response.
#[derive(Debug)]
pub enum ApiError {
    InvalidId(PackageIdError),
    NotFound { detail: String, negative_cache: bool },
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail, negative) = match self {
            ApiError::InvalidId(e) => (
                StatusCode::BAD_REQUEST,
                format!("invalid package name: {e}"),
                false,
            ),
            ApiError::NotFound {
                detail,
                negative_cache,
            } => (StatusCode::NOT_FOUND, detail, negative_cache),
            ApiError::Internal(detail) => (StatusCode::INTERNAL_SERVER_ERROR, detail, false),
        };

        let mut response = (status, Json(ErrorBody { detail })).into_response();
        if negative {
            response
                .headers_mut()
                .insert(X_NEGATIVE_CACHE, HeaderValue::from_static("true"));
        }
        response
    }
}

impl From<PackageIdError> for ApiError {
    fn from(e: PackageIdError) -> Self {
        ApiError::InvalidId(e)
    }
}

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        match e {
            BrokerError::NotFoundCached { id } => not_found_cached(&id),
            BrokerError::NotFound { id, .. } => ApiError::NotFound {
                detail: format!("App {id} not found"),
                negative_cache: false,
            },
            storage @ BrokerError::Storage { .. } => {
                error!(error = %storage, "Storage failure while serving download");
                ApiError::Internal(storage.to_string())
            }
        }
    }
}

fn not_found_cached(id: &PackageId) -> ApiError {
    ApiError::NotFound {
        detail: format!("App {id} not found (cached)"),
        negative_cache: true,
    }
}

/// Build the router.
pub fn router(broker: AppState) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/download/:id", get(download).head(download_head))
        .route("/info/:id", get(package_info))
        .route("/not-found-cache", get(list_negative))
        .route("/not-found-cache/:id", delete(forget_negative))
        .route("/cache", delete(clear_cache))
        .route("/stats", get(stats))
        .with_state(broker)
}

/// Serve until `shutdown` is cancelled, then drain in-flight requests.
pub async fn serve(
    listener: TcpListener,
    broker: AppState,
    shutdown: CancellationToken,
) -> io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP server listening");
    }
    axum::serve(listener, router(broker))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

// =============================================================================
// Handlers
// =============================================================================

#[derive(Serialize)]
struct StatusResponse<'a> {
    status: &'static str,
    name: &'static str,
    version: &'static str,
    strategies: Vec<&'a str>,
    stats: CounterSnapshot,
}

async fn status(State(broker): State<AppState>) -> Response {
    Json(StatusResponse {
        status: "running",
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        strategies: broker.strategy_names(),
        stats: broker.counters(),
    })
    .into_response()
}

#[derive(Debug, Default, Deserialize)]
struct DownloadQuery {
    #[serde(default)]
    force_tool: bool,
}

async fn download(
    State(broker): State<AppState>,
    Path(raw): Path<String>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let id = PackageId::parse(&raw)?;
    let force_tool = query.force_tool || header_is_true(&headers, X_FORCE_TOOL);

    let artifact = broker.resolve(&id, force_tool).await?;
    file_response(&artifact).await
}

async fn download_head(
    State(broker): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Response, ApiError> {
    let id = PackageId::parse(&raw)?;

    let response = match broker.peek(&id).await {
        Some(artifact) => Response::builder()
            .header(CONTENT_LENGTH, artifact.size_bytes)
            .header(X_FILE_TYPE, artifact.kind.extension())
            .header(X_CACHED, "true")
            .body(Body::empty()),
        None => Response::builder()
            .header(CONTENT_LENGTH, 0)
            .header(X_CACHED, "false")
            .body(Body::empty()),
    };
    response.map_err(|e| ApiError::Internal(e.to_string()))
}

#[derive(Serialize)]
struct CachedView {
    kind: String,
    file_type: &'static str,
    size_bytes: u64,
}

#[derive(Serialize)]
struct InfoResponse {
    package_name: String,
    status: &'static str,
    cached: Option<CachedView>,
}

async fn package_info(
    State(broker): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<InfoResponse>, ApiError> {
    let id = PackageId::parse(&raw)?;
    if broker.is_negative(&id) {
        return Err(not_found_cached(&id));
    }

    let cached = broker.peek(&id).await.map(|a| CachedView {
        kind: a.kind.to_string(),
        file_type: a.kind.extension(),
        size_bytes: a.size_bytes,
    });

    Ok(Json(InfoResponse {
        package_name: id.to_string(),
        status: "available",
        cached,
    }))
}

#[derive(Debug, Serialize, PartialEq)]
struct NegativeView {
    cached_at: String,
    expires_in_minutes: f64,
}

impl From<&NegativeEntry> for NegativeView {
    fn from(entry: &NegativeEntry) -> Self {
        Self {
            cached_at: rfc3339(entry.cached_at),
            expires_in_minutes: round_to(entry.expires_in.as_secs_f64() / 60.0, 1),
        }
    }
}

#[derive(Serialize)]
struct NegativeListResponse {
    not_found_apps: BTreeMap<String, NegativeView>,
    count: usize,
}

async fn list_negative(State(broker): State<AppState>) -> Json<NegativeListResponse> {
    let not_found_apps: BTreeMap<String, NegativeView> = broker
        .negative_entries()
        .iter()
        .map(|entry| (entry.id.to_string(), NegativeView::from(entry)))
        .collect();

    Json(NegativeListResponse {
        count: not_found_apps.len(),
        not_found_apps,
    })
}

#[derive(Serialize)]
struct ForgetResponse {
    status: &'static str,
    package: String,
}

async fn forget_negative(
    State(broker): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<ForgetResponse>, ApiError> {
    let id = PackageId::parse(&raw)?;
    let status = if broker.forget_negative(&id) {
        "removed"
    } else {
        "not_in_cache"
    };
    Ok(Json(ForgetResponse {
        status,
        package: id.to_string(),
    }))
}

#[derive(Serialize)]
struct ClearResponse {
    status: &'static str,
    files_removed: usize,
    bytes_freed: u64,
    timers_cancelled: usize,
}

async fn clear_cache(State(broker): State<AppState>) -> Result<Json<ClearResponse>, ApiError> {
    let summary = broker.clear_cache().await.map_err(|e| {
        error!(error = %e, "Cache clear failed");
        ApiError::Internal(e.to_string())
    })?;

    Ok(Json(ClearResponse {
        status: "cache_cleared",
        files_removed: summary.files_removed,
        bytes_freed: summary.bytes_freed,
        timers_cancelled: summary.timers_cancelled,
    }))
}

#[derive(Serialize)]
struct StatsResponse {
    stats: CounterSnapshot,
    cached_not_found: usize,
    cache_dir_bytes: u64,
    cache_dir_size_mb: f64,
}

async fn stats(State(broker): State<AppState>) -> Json<StatsResponse> {
    let stats = broker.stats().await;
    Json(StatsResponse {
        stats: stats.counters,
        cached_not_found: stats.cached_not_found,
        cache_dir_bytes: stats.cache_dir_bytes,
        cache_dir_size_mb: round_to(stats.cache_dir_bytes as f64 / (1024.0 * 1024.0), 2),
    })
}

// =============================================================================
// Helpers
// =============================================================================

async fn file_response(artifact: &Artifact) -> Result<Response, ApiError> {
    let file = tokio::fs::File::open(&artifact.path).await.map_err(|e| {
        error!(package = %artifact.id, path = %artifact.path.display(), error = %e, "Artifact vanished before streaming");
        ApiError::Internal(format!("failed to open artifact: {e}"))
    })?;

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(CONTENT_LENGTH, artifact.size_bytes)
        .header(
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", artifact.file_name()),
        )
        .header(CACHE_CONTROL, "no-cache")
        .header(X_SOURCE, artifact.source.to_string())
        .header(X_FILE_TYPE, artifact.kind.extension())
        .header(X_FILE_SIZE, artifact.size_bytes)
        .header(X_CACHE_HIT, artifact.is_cache_hit().to_string())
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

fn header_is_true(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn rfc3339(at: SystemTime) -> String {
    DateTime::<Local>::from(at).to_rfc3339()
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
