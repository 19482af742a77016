use std::hash::{Hash, Hasher};
use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use tally_core::db::IdBlock;
use tally_core::sync::{ChangeItem, PullPage, PushRequest, PushResponse, SyncSummary};
use tally_core::SyncService;

use crate::auth::{extract_bearer_token, AuthenticatedUser, TokenVerifier};
use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    verifier: Arc<TokenVerifier>,
    sync: SyncService,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, sync: SyncService) -> Self {
        Self {
            verifier: Arc::new(TokenVerifier::new(config.clone())),
            config,
            sync,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/sync/push", post(push))
        .route("/sync/pull", get(pull))
        .route("/sync/summary", get(summary))
        .route("/sync/activity", get(activity))
        .route("/sync/ids/allocate", post(allocate_ids))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state.verifier.verify_access_token(token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

async fn push(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>, AppError> {
    let ops = request.ops.len();
    let response = state.sync.push(user.user_id, &request).await?;
    tracing::info!(
        endpoint = "sync_push",
        user = user_fingerprint(user.user_id),
        book = request.book_id,
        ops,
        "Processed push batch"
    );
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullParams {
    book_id: i64,
    after_change_id: Option<i64>,
    limit: Option<i64>,
}

async fn pull(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(params): Query<PullParams>,
) -> Result<Json<PullPage>, AppError> {
    let page = state
        .sync
        .pull(
            user.user_id,
            params.book_id,
            params.after_change_id,
            params.limit,
        )
        .await?;
    tracing::info!(
        endpoint = "sync_pull",
        user = user_fingerprint(user.user_id),
        book = params.book_id,
        returned = page.changes.len(),
        has_more = page.has_more,
        "Served pull page"
    );
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryParams {
    book_id: i64,
}

async fn summary(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(params): Query<SummaryParams>,
) -> Result<Json<SyncSummary>, AppError> {
    let summary = state.sync.summary(user.user_id, params.book_id).await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityParams {
    book_id: i64,
    before_change_id: Option<i64>,
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ActivityResponse {
    success: bool,
    changes: Vec<ChangeItem>,
}

async fn activity(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(params): Query<ActivityParams>,
) -> Result<Json<ActivityResponse>, AppError> {
    let changes = state
        .sync
        .activity(
            user.user_id,
            params.book_id,
            params.before_change_id,
            params.limit,
        )
        .await?;
    Ok(Json(ActivityResponse {
        success: true,
        changes,
    }))
}

#[derive(Debug, Deserialize)]
struct AllocateRequest {
    count: Option<i64>,
}

#[derive(Debug, Serialize)]
struct AllocateResponse {
    success: bool,
    #[serde(flatten)]
    block: IdBlock,
}

async fn allocate_ids(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<AllocateRequest>,
) -> Result<Json<AllocateResponse>, AppError> {
    let block = state.sync.allocate_ids(request.count).await?;
    tracing::info!(
        endpoint = "sync_ids_allocate",
        user = user_fingerprint(user.user_id),
        size = block.end - block.start + 1,
        "Allocated id block"
    );
    Ok(Json(AllocateResponse {
        success: true,
        block,
    }))
}

fn user_fingerprint(user_id: i64) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_id.hash(&mut hasher);
    hasher.finish()
}
