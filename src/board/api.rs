use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Redirect, Response},
    routing::{delete, get, patch, post, put},
};
use serde::Deserialize;
use tracing::error;

use super::gateway::{CreateIssue, CreateProject, Gateway};
use super::models::{AssignType, Board, Issue, IssuePatch, Project, ProjectPatch, UserId};
use super::permissions::Caller;
use crate::errors::BoardError;

/// Header carrying the authenticated user id, set by the auth proxy.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Where unauthenticated requests are sent.
pub const SIGN_IN_PATH: &str = "/sign-in";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub gateway: Gateway,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct WorkspaceNameRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct JoinWorkspaceRequest {
    pub invite_code: String,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: AssignType,
}

#[derive(Deserialize)]
pub struct LeadRequest {
    pub user_id: Option<UserId>,
}

#[derive(Deserialize)]
pub struct CommentRequest {
    pub value: String,
}

#[derive(Deserialize)]
pub struct CreateMilestoneRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Deserialize)]
pub struct UpdateMilestoneRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct AssistantRequest {
    pub prompt: String,
}

// ── Caller extraction ─────────────────────────────────────────────────

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(Caller::new)
            .ok_or(ApiError(BoardError::Unauthenticated))
    }
}

// ── Error handling ────────────────────────────────────────────────────

pub struct ApiError(pub BoardError);

impl From<BoardError> for ApiError {
    fn from(err: BoardError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BoardError::Unauthenticated => return Redirect::to(SIGN_IN_PATH).into_response(),
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            BoardError::PermissionDenied => StatusCode::FORBIDDEN,
            BoardError::Validation(_) => StatusCode::BAD_REQUEST,
            BoardError::Assistant(_) | BoardError::Realtime(_) | BoardError::Database(_) => {
                error!("Request failed: {:#}", self.0);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({"error": self.0.to_string()}))).into_response()
    }
}

fn success(message: &str) -> Json<serde_json::Value> {
    Json(serde_json::json!({"success": message}))
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/workspaces", get(list_workspaces).post(create_workspace))
        .route("/api/workspaces/join", post(join_workspace))
        .route(
            "/api/workspaces/{workspace_id}",
            get(get_workspace)
                .patch(update_workspace)
                .delete(delete_workspace),
        )
        .route(
            "/api/workspaces/{workspace_id}/members/{user_id}",
            delete(remove_member),
        )
        .route("/api/workspaces/{workspace_id}/issues", post(create_issue))
        .route(
            "/api/workspaces/{workspace_id}/issues/board",
            get(get_issue_board).put(commit_issue_board),
        )
        .route(
            "/api/workspaces/{workspace_id}/issues/{id}",
            get(get_issue).patch(update_issue).delete(delete_issue),
        )
        .route(
            "/api/workspaces/{workspace_id}/issues/{id}/assignees",
            post(assign_issue),
        )
        .route("/api/workspaces/{workspace_id}/projects", post(create_project))
        .route(
            "/api/workspaces/{workspace_id}/projects/board",
            get(get_project_board).put(commit_project_board),
        )
        .route(
            "/api/workspaces/{workspace_id}/projects/{id}",
            get(get_project).patch(update_project).delete(delete_project),
        )
        .route(
            "/api/workspaces/{workspace_id}/projects/{id}/members",
            post(assign_project_member),
        )
        .route(
            "/api/workspaces/{workspace_id}/projects/{id}/lead",
            put(set_project_lead),
        )
        .route(
            "/api/workspaces/{workspace_id}/assistant",
            post(ask_assistant),
        )
        .route(
            "/api/issues/{issue_id}/comments",
            get(list_comments).post(add_comment),
        )
        .route(
            "/api/issues/{issue_id}/comments/{comment_id}",
            patch(update_comment).delete(delete_comment),
        )
        .route(
            "/api/projects/{project_id}/milestones",
            get(list_milestones).post(create_milestone),
        )
        .route(
            "/api/milestones/{id}",
            patch(update_milestone).delete(delete_milestone),
        )
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_workspaces(
    State(state): State<SharedState>,
    caller: Caller,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.gateway.list_workspaces(&caller).await?))
}

async fn create_workspace(
    State(state): State<SharedState>,
    caller: Caller,
    Json(req): Json<WorkspaceNameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace = state.gateway.create_workspace(&caller, &req.name).await?;
    Ok((StatusCode::CREATED, Json(workspace)))
}

async fn join_workspace(
    State(state): State<SharedState>,
    caller: Caller,
    Json(req): Json<JoinWorkspaceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .gateway
            .join_workspace(&caller, &req.invite_code)
            .await?,
    ))
}

async fn get_workspace(
    State(state): State<SharedState>,
    caller: Caller,
    Path(workspace_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.gateway.get_workspace(&caller, workspace_id).await?))
}

async fn update_workspace(
    State(state): State<SharedState>,
    caller: Caller,
    Path(workspace_id): Path<i64>,
    Json(req): Json<WorkspaceNameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .gateway
            .update_workspace(&caller, workspace_id, &req.name)
            .await?,
    ))
}

async fn delete_workspace(
    State(state): State<SharedState>,
    caller: Caller,
    Path(workspace_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.gateway.delete_workspace(&caller, workspace_id).await?;
    Ok(success("Workspace deleted"))
}

async fn remove_member(
    State(state): State<SharedState>,
    caller: Caller,
    Path((workspace_id, user_id)): Path<(i64, String)>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .gateway
            .remove_member(&caller, workspace_id, &user_id)
            .await?,
    ))
}

// Issues

async fn create_issue(
    State(state): State<SharedState>,
    caller: Caller,
    Path(workspace_id): Path<i64>,
    Json(req): Json<CreateIssue>,
) -> Result<impl IntoResponse, ApiError> {
    let issue = state.gateway.create_issue(&caller, workspace_id, req).await?;
    Ok((StatusCode::CREATED, Json(issue)))
}

async fn get_issue_board(
    State(state): State<SharedState>,
    caller: Caller,
    Path(workspace_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.gateway.issue_board(&caller, workspace_id).await?))
}

async fn commit_issue_board(
    State(state): State<SharedState>,
    caller: Caller,
    Path(workspace_id): Path<i64>,
    Json(board): Json<Board<Issue>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .gateway
            .commit_issue_order(&caller, workspace_id, board)
            .await?,
    ))
}

async fn get_issue(
    State(state): State<SharedState>,
    caller: Caller,
    Path((workspace_id, id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.gateway.get_issue(&caller, workspace_id, id).await?))
}

async fn update_issue(
    State(state): State<SharedState>,
    caller: Caller,
    Path((workspace_id, id)): Path<(i64, i64)>,
    Json(patch): Json<IssuePatch>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .gateway
            .update_issue(&caller, workspace_id, id, patch)
            .await?,
    ))
}

async fn delete_issue(
    State(state): State<SharedState>,
    caller: Caller,
    Path((workspace_id, id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    state.gateway.delete_issue(&caller, workspace_id, id).await?;
    Ok(success("Issue deleted"))
}

async fn assign_issue(
    State(state): State<SharedState>,
    caller: Caller,
    Path((workspace_id, id)): Path<(i64, i64)>,
    Json(req): Json<AssignRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .gateway
            .assign_issue(&caller, workspace_id, id, &req.user_id, req.kind)
            .await?,
    ))
}

// Projects

async fn create_project(
    State(state): State<SharedState>,
    caller: Caller,
    Path(workspace_id): Path<i64>,
    Json(req): Json<CreateProject>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .gateway
        .create_project(&caller, workspace_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project_board(
    State(state): State<SharedState>,
    caller: Caller,
    Path(workspace_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.gateway.project_board(&caller, workspace_id).await?))
}

async fn commit_project_board(
    State(state): State<SharedState>,
    caller: Caller,
    Path(workspace_id): Path<i64>,
    Json(board): Json<Board<Project>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .gateway
            .commit_project_order(&caller, workspace_id, board)
            .await?,
    ))
}

async fn get_project(
    State(state): State<SharedState>,
    caller: Caller,
    Path((workspace_id, id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.gateway.get_project(&caller, workspace_id, id).await?))
}

async fn update_project(
    State(state): State<SharedState>,
    caller: Caller,
    Path((workspace_id, id)): Path<(i64, i64)>,
    Json(patch): Json<ProjectPatch>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .gateway
            .update_project(&caller, workspace_id, id, patch)
            .await?,
    ))
}

async fn delete_project(
    State(state): State<SharedState>,
    caller: Caller,
    Path((workspace_id, id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    state.gateway.delete_project(&caller, workspace_id, id).await?;
    Ok(success("Project deleted"))
}

async fn assign_project_member(
    State(state): State<SharedState>,
    caller: Caller,
    Path((workspace_id, id)): Path<(i64, i64)>,
    Json(req): Json<AssignRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .gateway
            .assign_project_member(&caller, workspace_id, id, &req.user_id, req.kind)
            .await?,
    ))
}

async fn set_project_lead(
    State(state): State<SharedState>,
    caller: Caller,
    Path((workspace_id, id)): Path<(i64, i64)>,
    Json(req): Json<LeadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .gateway
            .set_project_lead(&caller, workspace_id, id, req.user_id)
            .await?,
    ))
}

async fn ask_assistant(
    State(state): State<SharedState>,
    caller: Caller,
    Path(workspace_id): Path<i64>,
    Json(req): Json<AssistantRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let text = state
        .gateway
        .ask_assistant(&caller, workspace_id, &req.prompt)
        .await?;
    Ok(Json(serde_json::json!({"text": text})))
}

// Comments

async fn list_comments(
    State(state): State<SharedState>,
    caller: Caller,
    Path(issue_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.gateway.list_comments(&caller, issue_id).await?))
}

async fn add_comment(
    State(state): State<SharedState>,
    caller: Caller,
    Path(issue_id): Path<i64>,
    Json(req): Json<CommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let comment = state
        .gateway
        .add_comment(&caller, issue_id, &req.value)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn update_comment(
    State(state): State<SharedState>,
    caller: Caller,
    Path((issue_id, comment_id)): Path<(i64, i64)>,
    Json(req): Json<CommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .gateway
            .update_comment(&caller, issue_id, comment_id, &req.value)
            .await?,
    ))
}

async fn delete_comment(
    State(state): State<SharedState>,
    caller: Caller,
    Path((issue_id, comment_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .gateway
        .delete_comment(&caller, issue_id, comment_id)
        .await?;
    Ok(success("Comment deleted"))
}

// Milestones

async fn list_milestones(
    State(state): State<SharedState>,
    caller: Caller,
    Path(project_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.gateway.list_milestones(&caller, project_id).await?))
}

async fn create_milestone(
    State(state): State<SharedState>,
    caller: Caller,
    Path(project_id): Path<i64>,
    Json(req): Json<CreateMilestoneRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let milestone = state
        .gateway
        .create_milestone(&caller, project_id, &req.name, &req.description)
        .await?;
    Ok((StatusCode::CREATED, Json(milestone)))
}

async fn update_milestone(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<i64>,
    Json(req): Json<UpdateMilestoneRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .gateway
            .update_milestone(&caller, id, req.name, req.description)
            .await?,
    ))
}

async fn delete_milestone(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.gateway.delete_milestone(&caller, id).await?;
    Ok(success("Milestone deleted"))
}
