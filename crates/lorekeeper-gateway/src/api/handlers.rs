//! API request handlers

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use lorekeeper::analyzer::EntryPoint;
use lorekeeper::escalation::CountersSnapshot;
use lorekeeper::health::HealthReport;
use lorekeeper::history::DEFAULT_PAGE_LIMIT;
use lorekeeper::{ConflictAnalysisResult, ConflictRecord, LoreEventPayload, Statistics};
use serde::{Deserialize, Serialize};

use super::state::AppState;
use crate::error::{ApiError, ApiResult};

/// Upper bound on a single history page
const MAX_PAGE_LIMIT: usize = 500;

/// Analyze a lore event
pub async fn analyze_lore(
    State(state): State<AppState>,
    payload: Result<Json<LoreEventPayload>, JsonRejection>,
) -> ApiResult<Json<ConflictAnalysisResult>> {
    ingest(&state, payload, EntryPoint::Analyze).await
}

/// Analyze a lore event through the escalation entry point
pub async fn escalate_lore(
    State(state): State<AppState>,
    payload: Result<Json<LoreEventPayload>, JsonRejection>,
) -> ApiResult<Json<ConflictAnalysisResult>> {
    ingest(&state, payload, EntryPoint::Escalate).await
}

async fn ingest(
    state: &AppState,
    payload: Result<Json<LoreEventPayload>, JsonRejection>,
    entry: EntryPoint,
) -> ApiResult<Json<ConflictAnalysisResult>> {
    let Json(payload) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let result = state.lorekeeper.ingest(payload, entry).await?;
    Ok(Json(result))
}

/// Pagination query params
#[derive(Debug, Deserialize)]
pub struct ListConflictsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

/// One page of conflict history
#[derive(Debug, Serialize, Deserialize)]
pub struct ConflictPage {
    pub conflicts: Vec<ConflictRecord>,
    /// Retained records
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// List retained conflicts, oldest first
pub async fn list_conflicts(
    State(state): State<AppState>,
    Query(query): Query<ListConflictsQuery>,
) -> Json<ConflictPage> {
    let limit = query.limit.min(MAX_PAGE_LIMIT);
    let store = state.lorekeeper.store();

    Json(ConflictPage {
        conflicts: store.list(limit, query.offset),
        total: store.len(),
        limit,
        offset: query.offset,
    })
}

/// Get cumulative statistics
pub async fn conflict_stats(State(state): State<AppState>) -> Json<Statistics> {
    Json(state.lorekeeper.store().stats())
}

/// Get a retained conflict by id
pub async fn get_conflict(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<ConflictRecord>> {
    Ok(Json(state.lorekeeper.store().get(id)?))
}

/// Resolve request body
#[derive(Debug, Default, Deserialize)]
pub struct ResolveRequest {
    #[serde(default)]
    pub note: Option<String>,
}

/// Mark a pending conflict resolved
pub async fn resolve_conflict(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    body: Option<Json<ResolveRequest>>,
) -> ApiResult<Json<ConflictRecord>> {
    let note = body.and_then(|Json(req)| req.note);
    Ok(Json(state.lorekeeper.store().resolve(id, note)?))
}

/// Cumulative escalation dispatch counters
pub async fn escalation_stats(State(state): State<AppState>) -> Json<CountersSnapshot> {
    Json(state.lorekeeper.router().counters())
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResponse {
    #[serde(flatten)]
    pub report: HealthReport,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Health check endpoint
pub async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<HealthCheckResponse>) {
    let report = state.lorekeeper.health().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthCheckResponse {
            report,
            version: state.version.clone(),
            uptime_seconds: state.uptime_secs(),
        }),
    )
}
