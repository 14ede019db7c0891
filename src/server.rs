//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/feed` | One feed page (`user`, `page`, `page_size`, `tags`, `project_type`, `sort`) |
//! | `GET`  | `/scores/top` | Top-score snapshot (`limit`) |
//! | `GET`  | `/scores/{id}` | Cached score of one item |
//! | `POST` | `/jobs/recompute` | Run the recomputation job now |
//! | `POST` | `/cache/invalidate` | Drop cache entries for items and users |
//! | `POST` | `/items/{id}/like` | Toggle a like |
//! | `POST` | `/items/{id}/save` | Toggle a save |
//! | `POST` | `/items/{id}/view` | Record a view |
//! | `POST` | `/items/{id}/interactions` | Record a share or a demo/source click |
//! | `POST` | `/items/{id}/comments` | Add a comment or reply |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "page must be >= 1" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `store_unavailable` (503, safe to retry). Malformed JSON bodies are
//! rejected by axum before reaching a handler.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use devfeed_core::cache::Entity;
use devfeed_core::feed::{FeedPage, FeedRequest};
use devfeed_core::models::{Comment, InteractionKind, ScoreView, ToggleOutcome, TopScore};
use devfeed_core::recompute::JobReport;
use devfeed_core::FeedError;

use crate::config::Config;
use crate::interactions::ViewOutcome;
use crate::scheduler::spawn_recompute_task;
use crate::service::{parse_filter, FeedService};

const DEFAULT_TOP_LIMIT: usize = 10;
const MAX_TOP_LIMIT: usize = 100;

/// Shared state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    service: Arc<FeedService>,
    /// Bearer token required by `POST /jobs/recompute`, if any.
    job_secret: Option<Arc<str>>,
}

/// Starts the HTTP server on `[server].bind` with the background
/// recomputation task. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = Arc::new(FeedService::open(config).await?);
    let _scheduler = spawn_recompute_task(
        service.clone(),
        config.scheduler.recompute_interval_secs,
    );

    let app = build_router(service, config.server.job_secret.clone());
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "devfeed server listening");
    println!("devfeed server listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}

/// The full route table over an existing service.
pub fn build_router(service: Arc<FeedService>, job_secret: Option<String>) -> Router {
    let state = AppState {
        service,
        job_secret: job_secret.filter(|s| !s.is_empty()).map(Arc::from),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/feed", get(handle_feed))
        .route("/scores/top", get(handle_top_scores))
        .route("/scores/{id}", get(handle_score))
        .route("/jobs/recompute", post(handle_recompute))
        .route("/cache/invalidate", post(handle_invalidate))
        .route("/items/{id}/like", post(handle_like))
        .route("/items/{id}/save", post(handle_save))
        .route("/items/{id}/view", post(handle_view))
        .route("/items/{id}/interactions", post(handle_interaction))
        .route("/items/{id}/comments", post(handle_comment))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
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

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn unauthorized() -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized",
        message: "missing or invalid bearer token".to_string(),
    }
}

impl From<FeedError> for AppError {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::InvalidRequest(msg) => bad_request(msg),
            FeedError::NotFound(msg) => AppError {
                status: StatusCode::NOT_FOUND,
                code: "not_found",
                message: msg,
            },
            FeedError::Store(e) => {
                warn!(error = %format!("{:#}", e), "store failure");
                AppError {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    code: "store_unavailable",
                    message: "storage is temporarily unavailable, retry later".to_string(),
                }
            }
        }
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

// ============ GET /feed ============

#[derive(Debug, Deserialize)]
struct FeedQuery {
    user: Option<String>,
    page: Option<u32>,
    page_size: Option<u32>,
    tags: Option<String>,
    project_type: Option<String>,
    sort: Option<String>,
}

async fn handle_feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<FeedPage>, AppError> {
    let filter = parse_filter(
        query.tags.as_deref(),
        query.project_type.as_deref(),
        query.sort.as_deref(),
    )?;
    let req = FeedRequest {
        user_id: query.user.filter(|u| !u.trim().is_empty()),
        page: query.page.unwrap_or(1),
        page_size: query
            .page_size
            .unwrap_or(state.service.settings().default_page_size),
        filter,
    };

    let page = state.service.get_feed(&req, Utc::now()).await?;
    Ok(Json(page))
}

// ============ GET /scores ============

#[derive(Debug, Deserialize)]
struct TopQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct TopScoresResponse {
    items: Vec<TopScore>,
}

async fn handle_top_scores(
    State(state): State<AppState>,
    Query(query): Query<TopQuery>,
) -> Result<Json<TopScoresResponse>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_TOP_LIMIT).clamp(1, MAX_TOP_LIMIT);
    let items = state.service.top_scores(limit).await?;
    Ok(Json(TopScoresResponse { items }))
}

async fn handle_score(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ScoreView>, AppError> {
    match state.service.get_score(&id).await? {
        Some(view) => Ok(Json(view)),
        None => Err(FeedError::NotFound(format!("item {}", id)).into()),
    }
}

// ============ POST /jobs/recompute ============

fn check_bearer(headers: &HeaderMap, secret: Option<&str>) -> Result<(), AppError> {
    let Some(secret) = secret else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match presented {
        Some(token) if token == secret => Ok(()),
        _ => Err(unauthorized()),
    }
}

async fn handle_recompute(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<JobReport>, AppError> {
    check_bearer(&headers, state.job_secret.as_deref())?;
    let report = state.service.run_recompute(Utc::now()).await;
    Ok(Json(report))
}

// ============ POST /cache/invalidate ============

#[derive(Debug, Deserialize)]
struct InvalidateBody {
    #[serde(default)]
    items: Vec<String>,
    #[serde(default)]
    users: Vec<String>,
}

#[derive(Serialize)]
struct InvalidateResponse {
    invalidated: usize,
}

async fn handle_invalidate(
    State(state): State<AppState>,
    Json(body): Json<InvalidateBody>,
) -> Json<InvalidateResponse> {
    let entities: Vec<Entity> = body
        .items
        .into_iter()
        .map(Entity::Item)
        .chain(body.users.into_iter().map(Entity::User))
        .collect();
    let invalidated = state.service.invalidate(&entities).await;
    Json(InvalidateResponse { invalidated })
}

// ============ POST /items/{id}/... ============

#[derive(Debug, Deserialize)]
struct ActorBody {
    actor: String,
}

async fn handle_like(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ActorBody>,
) -> Result<Json<ToggleOutcome>, AppError> {
    let outcome = state.service.toggle_like(&body.actor, &id, Utc::now()).await?;
    Ok(Json(outcome))
}

async fn handle_save(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ActorBody>,
) -> Result<Json<ToggleOutcome>, AppError> {
    let outcome = state.service.toggle_save(&body.actor, &id, Utc::now()).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct ViewBody {
    #[serde(default)]
    actor: Option<String>,
    #[serde(default)]
    dwell_secs: Option<u32>,
    #[serde(default)]
    referrer: Option<String>,
}

async fn handle_view(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ViewBody>,
) -> Result<Json<ViewOutcome>, AppError> {
    let actor = body.actor.as_deref().filter(|a| !a.trim().is_empty());
    let outcome = state
        .service
        .record_view(
            actor,
            &id,
            body.dwell_secs.unwrap_or(0),
            body.referrer,
            Utc::now(),
        )
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct InteractionBody {
    #[serde(default)]
    actor: Option<String>,
    kind: String,
}

async fn handle_interaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<InteractionBody>,
) -> Result<StatusCode, AppError> {
    let kind: InteractionKind = body
        .kind
        .parse()
        .map_err(|e: anyhow::Error| bad_request(e.to_string()))?;
    let actor = body.actor.as_deref().filter(|a| !a.trim().is_empty());
    state
        .service
        .record_interaction(actor, &id, kind, Utc::now())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct CommentBody {
    author: String,
    body: String,
    #[serde(default)]
    parent_id: Option<String>,
}

async fn handle_comment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CommentBody>,
) -> Result<(StatusCode, Json<Comment>), AppError> {
    let comment = state
        .service
        .add_comment(
            &body.author,
            &id,
            &body.body,
            body.parent_id.as_deref(),
            Utc::now(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}
