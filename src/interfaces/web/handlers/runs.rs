//! Run lifecycle endpoints.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde::Deserialize;
use uuid::Uuid;

use super::super::AppState;
use super::super::auth;
use super::super::error::ApiError;
use crate::core::graph::ThreadAccess;
use crate::core::runs::types::{
    AgentRun, BundleFile, CompleteRun, EnqueueRun, PlanChange, ResultStatus, RunMode,
};

const DEFAULT_MODEL: &str = "gpt-5";

#[derive(Deserialize)]
pub struct EnqueueBody {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub chat_message_id: Option<String>,
}

#[derive(Deserialize)]
pub struct ClaimBody {
    #[serde(default)]
    pub runner_id: Option<String>,
}

#[derive(Deserialize)]
pub struct CompleteBody {
    pub status: String,
    pub messages: Vec<String>,
    #[serde(default)]
    pub changes: Vec<PlanChange>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub runner_id: Option<String>,
    #[serde(default)]
    pub bundle_files: Vec<BundleFile>,
}

#[derive(Deserialize)]
pub struct CancelBody {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn enqueue_run(
    Path((thread_id, mode)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<EnqueueBody>,
) -> Result<impl IntoResponse, ApiError> {
    let mode = RunMode::from_status(&mode)
        .ok_or_else(|| ApiError::validation(format!("unknown assistant mode '{mode}'")))?;
    if body.prompt.trim().is_empty() {
        return Err(ApiError::validation("prompt is required"));
    }

    let user = auth::caller_user(&headers)?;
    let access = state.access.resolve_thread(&user, &thread_id).await?;
    require_edit(&access)?;

    let run = state
        .coordinator
        .enqueue(EnqueueRun {
            thread_id: thread_id.clone(),
            project_id: access.project_id,
            org_id: access.org_id,
            requested_by: user,
            mode,
            prompt: body.prompt,
            system_prompt: body.system_prompt,
            chat_message_id: body.chat_message_id,
            model: body.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "run_id": run.run_id,
            "status": run.status,
            "mode": run.mode,
            "thread_id": run.thread_id,
        })),
    ))
}

pub async fn get_run(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AgentRun>, ApiError> {
    // Existence first: an unknown run answers 404 even for callers who
    // would not have been allowed to see it.
    let run = state.coordinator.get(&run_id).await?;
    let user = auth::caller_user(&headers)?;
    state.access.resolve_thread(&user, &run.thread_id).await?;
    Ok(Json(run))
}

pub async fn claim_run(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<ClaimBody>>,
) -> Result<Json<AgentRun>, ApiError> {
    let run = state.coordinator.get(&run_id).await?;
    let user = auth::caller_user(&headers)?;
    let access = state.access.resolve_thread(&user, &run.thread_id).await?;
    require_edit(&access)?;

    let runner_id = body
        .and_then(|Json(b)| b.runner_id)
        .unwrap_or_else(|| format!("runner-{}", Uuid::new_v4()));
    let run = state.coordinator.claim(&run_id, &runner_id).await?;
    Ok(Json(run))
}

pub async fn complete_run(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CompleteBody>,
) -> Result<Json<AgentRun>, ApiError> {
    let status = ResultStatus::from_status(&body.status)
        .ok_or_else(|| ApiError::validation(format!("unknown result status '{}'", body.status)))?;
    if body.messages.is_empty() {
        return Err(ApiError::validation("messages must not be empty"));
    }
    for change in &body.changes {
        change.validate().map_err(ApiError::validation)?;
    }
    for file in &body.bundle_files {
        file.validate().map_err(ApiError::validation)?;
    }

    let run = state.coordinator.get(&run_id).await?;
    let user = auth::caller_user(&headers)?;
    let access = state.access.resolve_thread(&user, &run.thread_id).await?;
    require_edit(&access)?;

    let run = state
        .coordinator
        .complete(
            &run_id,
            CompleteRun {
                status,
                messages: body.messages,
                changes: body.changes,
                error: body.error,
                runner_id: body.runner_id,
                bundle_files: body.bundle_files,
            },
        )
        .await?;
    Ok(Json(run))
}

pub async fn cancel_run(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<CancelBody>>,
) -> Result<Json<AgentRun>, ApiError> {
    let run = state.coordinator.get(&run_id).await?;
    let user = auth::caller_user(&headers)?;
    let access = state.access.resolve_thread(&user, &run.thread_id).await?;
    require_edit(&access)?;

    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or_else(|| "cancelled by user".to_string());
    let run = state.coordinator.cancel(&run_id, &reason).await?;
    Ok(Json(run))
}

pub async fn list_thread_runs(
    Path(thread_id): Path<String>,
    Query(query): Query<ListQuery>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = auth::caller_user(&headers)?;
    state.access.resolve_thread(&user, &thread_id).await?;

    let limit = query.limit.unwrap_or(50).min(200);
    let runs = state.coordinator.list_for_thread(&thread_id, limit).await?;
    Ok(Json(serde_json::json!({ "items": runs })))
}

fn require_edit(access: &ThreadAccess) -> Result<(), ApiError> {
    if access.can_edit {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "thread is read-only for this user".to_string(),
        ))
    }
}
