//! Inbound submission API.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/ingest` | Queue a URL or a pasted note for analysis |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! `/api/ingest` authenticates with `Authorization: Bearer <api key>`, the
//! per-profile key. Errors use one body shape:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "either url or content is required" } }
//! ```

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::db::Repository;
use crate::events::EventBus;
use crate::models::{Item, Job, NewItem, SourceType};

#[derive(Clone)]
struct AppState {
    repo: Arc<Repository>,
    bus: EventBus,
}

pub fn router(repo: Arc<Repository>, bus: EventBus) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/ingest", post(handle_ingest))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { repo, bus })
}

/// Serves the API on `bind` until `shutdown` resolves, then lets open
/// requests finish.
pub async fn run_server(
    bind: &str,
    repo: Arc<Repository>,
    bus: EventBus,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Submission API listening on http://{}", bind);
    axum::serve(listener, router(repo, bus))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn unauthorized() -> ApiError {
    ApiError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized",
        message: "missing or unknown API key".to_string(),
    }
}

fn internal(err: crate::error::AppError) -> ApiError {
    tracing::error!("Submission API error: {}", err);
    ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: "internal error".to_string(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/ingest ============

#[derive(Debug, Deserialize)]
struct IngestRequest {
    url: Option<String>,
    title: Option<String>,
    content: Option<String>,
}

/// Records a `pending` item for the key's owner and queues its ingest job.
/// A URL wins over pasted content when both are given.
async fn handle_ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<IngestRequest>,
) -> Result<(StatusCode, Json<Item>), ApiError> {
    let api_key = bearer_token(&headers).ok_or_else(unauthorized)?;
    let owner_id = state
        .repo
        .find_owner_by_api_key(api_key)
        .await
        .map_err(internal)?
        .ok_or_else(unauthorized)?;

    let url = non_empty(req.url);
    let content = non_empty(req.content);
    let title = non_empty(req.title);

    if let Some(url) = &url {
        let parsed = url::Url::parse(url).map_err(|e| bad_request(format!("invalid url: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(bad_request("url must be http or https"));
        }
    } else if content.is_none() {
        return Err(bad_request("either url or content is required"));
    }

    let item = state
        .repo
        .insert_item(NewItem {
            owner_id,
            url,
            title,
            content_raw: content,
            source_type: SourceType::Api,
        })
        .await
        .map_err(internal)?;

    let job = Job::ingest_for(&item);
    if !state.bus.emit(job) {
        tracing::error!("Item {} stored but its ingest job was not queued", item.id);
    }

    Ok((StatusCode::ACCEPTED, Json(item)))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
