//! REST API implementation for the telemetry-driven task generator.
//!
//! This module provides the HTTP surface callers use to request on-demand
//! analysis, review and act on generated task cards, subscribe to live
//! updates, and manage templates. Each public function corresponds to an
//! endpoint and is responsible for talking to the store, scheduler,
//! broadcast, templates, and auto-approval components and shaping their
//! results into a response.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tgt_core::error::{ConflictError, NotFoundError, ValidationError};
use tgt_core::task::{Status, TaskFilter, TaskType};
use tgt_core::template::{Template, TemplateError};
use tgt_core::{funnel, TgtConfig};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tracing::{info, warn};

use crate::auto_approval::AutoApprovalEngine;
use crate::broadcast::{ChangeBroadcast, ChangeEvent};
use crate::scheduler::Scheduler;
use crate::store::{TaskStore, TaskStoreError};
use crate::templates_store::TemplatesStore;

/// Application state shared across all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<TgtConfig>,
    pub store: Arc<TaskStore>,
    pub scheduler: Arc<Scheduler>,
    pub broadcast: Arc<ChangeBroadcast>,
    pub templates: Arc<TemplatesStore>,
    pub auto_approval: Arc<AutoApprovalEngine>,
}

/// Builds the router. Called once at server startup.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/tasks/suggest", post(suggest_tasks))
        .route("/tasks", get(list_tasks))
        .route("/tasks/stats", get(task_stats))
        .route("/tasks/cleanup", post(cleanup_tasks))
        .route("/tasks/scheduler/stats", get(scheduler_stats))
        .route("/tasks/scheduler/run", post(scheduler_run))
        .route("/tasks/stream", get(stream_tasks))
        .route("/tasks/analytics", get(analytics))
        .route("/tasks/funnel", get(funnel_report))
        .route("/tasks/auto-approval/stats", get(auto_approval_stats))
        .route(
            "/tasks/templates",
            get(list_templates).post(create_template),
        )
        .route(
            "/tasks/templates/{id}",
            get(get_template).put(update_template).delete(delete_template),
        )
        .route("/tasks/from-template/{id}", post(from_template))
        .route("/tasks/batch/approve", post(batch_approve))
        .route("/tasks/batch/dismiss", post(batch_dismiss))
        .route("/tasks/{id}/approve", post(approve_task))
        .route("/tasks/{id}/dismiss", post(dismiss_task))
        .route("/tasks/{id}/complete", post(complete_task))
        .route("/tasks/{id}", get(get_task))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "task-generator-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
struct SuggestRequest {
    #[serde(default)]
    window_minutes: Option<u64>,
    #[serde(default)]
    min_confidence: Option<f64>,
    #[serde(default)]
    max_tasks: Option<usize>,
}

/// Runs analyzers on demand via the same pipeline the scheduler's timer
/// uses, honoring its single-flight and quota rules.
async fn suggest_tasks(
    State(state): State<AppState>,
    Json(request): Json<SuggestRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let overrides = crate::scheduler::RunOverrides {
        window_minutes: request.window_minutes,
        min_confidence: request.min_confidence,
        max_tasks: request.max_tasks,
    };
    let saved = state.scheduler.run_now_with(overrides).await?;
    let scheduler_stats = state.scheduler.stats().await;
    info!(saved, "on-demand task suggestion run completed");
    Ok(Json(serde_json::json!({
        "tasksSaved": saved,
        "schedulerStats": scheduler_stats,
    })))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    #[serde(rename = "type")]
    task_type: Option<String>,
    limit: Option<usize>,
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<tgt_core::TaskCard>>, ApiError> {
    let filter = TaskFilter {
        status: query.status.as_deref().map(parse_status).transpose()?,
        task_type: query.task_type.as_deref().map(parse_task_type).transpose()?,
    };
    let limit = query.limit.unwrap_or(usize::MAX);
    let tasks = state.store.load(&filter, limit).await?;
    Ok(Json(tasks))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<tgt_core::TaskCard>, ApiError> {
    let task = state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(NotFoundError(id)))?;
    Ok(Json(task))
}

async fn task_stats(State(state): State<AppState>) -> Result<Json<crate::store::StoreStats>, ApiError> {
    Ok(Json(state.store.stats().await?))
}

#[derive(Debug, Deserialize)]
struct DismissRequest {
    reason: String,
}

async fn approve_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<tgt_core::TaskCard>, ApiError> {
    let task = state.store.approve(&id).await?;
    Ok(Json(task))
}

async fn dismiss_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<DismissRequest>,
) -> Result<Json<tgt_core::TaskCard>, ApiError> {
    let task = state.store.dismiss(&id, request.reason).await?;
    Ok(Json(task))
}

async fn complete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<tgt_core::TaskCard>, ApiError> {
    let task = state.store.complete(&id).await?;
    Ok(Json(task))
}

#[derive(Debug, Deserialize)]
struct CleanupRequest {
    days_old: i64,
}

async fn cleanup_tasks(
    State(state): State<AppState>,
    Json(request): Json<CleanupRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = state.store.cleanup(request.days_old).await?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

async fn scheduler_stats(State(state): State<AppState>) -> Json<crate::scheduler::SchedulerStats> {
    Json(state.scheduler.stats().await)
}

async fn scheduler_run(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let saved = state.scheduler.run_now().await?;
    Ok(Json(serde_json::json!({ "tasksSaved": saved })))
}

/// Long-lived SSE channel. Emits `connected` once, then `init` with the
/// current active count, then whatever the broadcast component sends
/// (`update` / `notification` / heartbeats) for the connection's lifetime.
async fn stream_tasks(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, std::convert::Infallible>>> {
    let active_count = state.store.active_titles().await.map(|t| t.len()).unwrap_or(0);
    let rx = state.broadcast.subscribe();
    let connected = stream::once(async { Ok(SseEvent::default().event("connected").data("ok")) });
    let init = stream::once(async move {
        Ok(SseEvent::default()
            .event("init")
            .data(serde_json::json!({ "activeCount": active_count }).to_string()))
    });
    let updates = BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(event) => Some(to_sse_event(event)),
        Err(_) => None,
    });

    Sse::new(connected.chain(init).chain(updates)).keep_alive(KeepAlive::default())
}

fn to_sse_event(event: ChangeEvent) -> Result<SseEvent, std::convert::Infallible> {
    let (name, data) = match &event {
        ChangeEvent::Update { active_count } => (
            "update",
            serde_json::json!({ "activeCount": active_count }).to_string(),
        ),
        ChangeEvent::Notification { message } => (
            "notification",
            serde_json::json!({ "message": message }).to_string(),
        ),
        ChangeEvent::Heartbeat => ("heartbeat", "{}".to_string()),
    };
    Ok(SseEvent::default().event(name).data(data))
}

#[derive(Debug, Deserialize)]
struct AnalyticsQuery {
    #[serde(default = "default_days_back")]
    days_back: i64,
}

fn default_days_back() -> i64 {
    30
}

async fn analytics(
    State(state): State<AppState>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tasks = state.store.load(&TaskFilter::default(), usize::MAX).await?;
    let report = funnel::compute(&tasks, query.days_back, Utc::now());
    let recommendation = funnel::recommend(&report);
    let store_stats = state.store.stats().await?;
    Ok(Json(serde_json::json!({
        "funnel": report,
        "recommendation": recommendation,
        "distributions": store_stats,
    })))
}

#[derive(Debug, Deserialize)]
struct FunnelQuery {
    #[serde(default = "default_days_back")]
    days_back: i64,
}

async fn funnel_report(
    State(state): State<AppState>,
    Query(query): Query<FunnelQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tasks = state.store.load(&TaskFilter::default(), usize::MAX).await?;
    let report = funnel::compute(&tasks, query.days_back, Utc::now());
    let recommendation = funnel::recommend(&report);
    Ok(Json(serde_json::json!({
        "report": report,
        "recommendation": recommendation,
    })))
}

async fn auto_approval_stats(
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let stats = state.auto_approval.stats().await;
    Json(serde_json::json!({
        "enabled": state.config.auto_approve,
        "confidenceThreshold": state.config.auto_approve_confidence,
        "trustedAnalyzers": state.config.auto_approve_analyzers,
        "maxPerHour": state.config.auto_approve_max_per_hour,
        "stats": stats,
    }))
}

async fn list_templates(State(state): State<AppState>) -> Json<Vec<Template>> {
    Json(state.templates.list().await)
}

async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Template>, ApiError> {
    state
        .templates
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(NotFoundError(id)))
}

async fn create_template(
    State(state): State<AppState>,
    Json(template): Json<Template>,
) -> Result<StatusCode, ApiError> {
    state.templates.create(template).await?;
    Ok(StatusCode::CREATED)
}

async fn update_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(template): Json<Template>,
) -> Result<StatusCode, ApiError> {
    state.templates.update(&id, template).await?;
    Ok(StatusCode::OK)
}

async fn delete_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.templates.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct FromTemplateRequest {
    #[serde(default)]
    variables: HashMap<String, String>,
}

async fn from_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<FromTemplateRequest>,
) -> Result<Json<tgt_core::TaskCard>, ApiError> {
    let template = state
        .templates
        .get(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(NotFoundError(id.clone())))?;
    let task_id = tgt_core::task::generate_task_id(Utc::now(), &format!("{id}-{:?}", request.variables));
    let task = tgt_core::template::instantiate(&template, &request.variables, task_id)?;
    state.store.save(&task).await?;
    Ok(Json(task))
}

#[derive(Debug, Deserialize)]
struct BatchApproveRequest {
    task_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BatchDismissRequest {
    task_ids: Vec<String>,
    reason: String,
}

#[derive(Debug, Serialize)]
struct BatchResult {
    succeeded: Vec<String>,
    failed: Vec<BatchFailure>,
}

#[derive(Debug, Serialize)]
struct BatchFailure {
    id: String,
    error: String,
}

async fn batch_approve(
    State(state): State<AppState>,
    Json(request): Json<BatchApproveRequest>,
) -> Json<BatchResult> {
    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    for id in request.task_ids {
        match state.store.approve(&id).await {
            Ok(_) => succeeded.push(id),
            Err(e) => failed.push(BatchFailure {
                id,
                error: e.to_string(),
            }),
        }
    }
    Json(BatchResult { succeeded, failed })
}

async fn batch_dismiss(
    State(state): State<AppState>,
    Json(request): Json<BatchDismissRequest>,
) -> Json<BatchResult> {
    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    for id in request.task_ids {
        match state.store.dismiss(&id, request.reason.clone()).await {
            Ok(_) => succeeded.push(id),
            Err(e) => failed.push(BatchFailure {
                id,
                error: e.to_string(),
            }),
        }
    }
    Json(BatchResult { succeeded, failed })
}

fn parse_status(s: &str) -> Result<Status, ApiError> {
    match s {
        "generated" => Ok(Status::Generated),
        "approved" => Ok(Status::Approved),
        "dismissed" => Ok(Status::Dismissed),
        "completed" => Ok(Status::Completed),
        other => Err(ApiError::BadRequest(format!("unknown status '{other}'"))),
    }
}

fn parse_task_type(s: &str) -> Result<TaskType, ApiError> {
    match s {
        "continuation_issue" => Ok(TaskType::ContinuationIssue),
        "error_spike" => Ok(TaskType::ErrorSpike),
        "documentation_gap" => Ok(TaskType::DocumentationGap),
        "performance_degradation" => Ok(TaskType::PerformanceDegradation),
        "ux_issue" => Ok(TaskType::UxIssue),
        "template" => Ok(TaskType::Template),
        other => Err(ApiError::BadRequest(format!("unknown task type '{other}'"))),
    }
}

/// Error taxonomy per §7, mapped to HTTP status in [`IntoResponse`].
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<TaskStoreError> for ApiError {
    fn from(e: TaskStoreError) -> Self {
        match e {
            TaskStoreError::NotFound(e) => ApiError::NotFound(e),
            TaskStoreError::Conflict(e) => ApiError::Conflict(e),
            TaskStoreError::Io(e) => ApiError::Internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Template(TemplateError::BuiltIn(_)) => StatusCode::FORBIDDEN,
            ApiError::Template(TemplateError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Template(TemplateError::UnreplacedVariable(_)) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %self, "api request failed with an internal error");
        }

        let body = Json(serde_json::json!({
            "error": status.canonical_reason().unwrap_or("error"),
            "details": self.to_string(),
        }));
        (status, body).into_response()
    }
}
