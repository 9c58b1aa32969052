use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{ApiError, ApiErrorResponse};
use crate::state::AppState;
use ac_agent::AgentSnapshot;
use ac_git::MergeResult;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentRequest {
    pub name: Option<String>,
    pub source_repo: Option<String>,
}

#[derive(Serialize)]
pub struct AgentsResponse {
    pub agents: Vec<AgentSnapshot>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestBody {
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeBody {
    #[serde(default)]
    pub target_branch: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestResponse {
    pub pr_url: String,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Serialize)]
pub struct DiffResponse {
    pub diff: String,
}

pub async fn list(State(state): State<AppState>) -> Json<AgentsResponse> {
    Json(AgentsResponse {
        agents: state.registry.list().await,
    })
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AgentSnapshot>, ApiErrorResponse> {
    state
        .registry
        .get(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Agent"))
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateAgentRequest>,
) -> Result<(StatusCode, Json<AgentSnapshot>), ApiErrorResponse> {
    let name = body
        .name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing required field: name"))?;
    let source_repo = body
        .source_repo
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing required field: sourceRepo"))?;

    let agent = state
        .registry
        .create(name, PathBuf::from(source_repo))
        .await?;
    Ok((StatusCode::CREATED, Json(agent)))
}

pub async fn delete_agent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiErrorResponse> {
    state.registry.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiErrorResponse> {
    let record = state.registry.record(id).await?;
    let status = state.coordinator.status(&record.work_dir).await?;
    Ok(Json(StatusResponse { status }))
}

pub async fn diff(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DiffResponse>, ApiErrorResponse> {
    let record = state.registry.record(id).await?;
    let diff = state.coordinator.diff(&record.work_dir).await?;
    Ok(Json(DiffResponse { diff }))
}

pub async fn create_pr(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<PullRequestBody>,
) -> Result<Json<PullRequestResponse>, ApiErrorResponse> {
    let title = body
        .title
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing required field: title"))?;

    let record = state.registry.record(id).await?;
    let pr_url = state
        .coordinator
        .create_pull_request(&record.work_dir, title, body.body.as_deref().unwrap_or(""))
        .await?;
    Ok(Json(PullRequestResponse { pr_url }))
}

/// Merge outcomes (including conflicts) are always 200; the `success` field
/// distinguishes. Only protocol-level failures become HTTP errors.
pub async fn merge(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<MergeBody>,
) -> Result<Json<MergeResult>, ApiErrorResponse> {
    let record = state.registry.record(id).await?;
    let result = state
        .coordinator
        .try_local_merge(&record.work_dir, body.target_branch)
        .await?;
    Ok(Json(result))
}
