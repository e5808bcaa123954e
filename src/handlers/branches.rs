use crate::{
    entities::branch,
    errors::ServiceError,
    handlers::common::created_response,
    services::branches::{CreateBranchInput, UpdateBranchInput},
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct ListBranchesQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Serialize)]
pub struct ScopeInvalidated {
    pub branch_id: Option<Uuid>,
    pub removed: bool,
}

pub fn branches_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_branches).post(create_branch))
        .route("/:branch_id", get(get_branch).put(update_branch))
        .route("/:branch_id/scope/invalidate", post(invalidate_branch_scope))
        .route("/scope/invalidate", post(invalidate_all_scopes))
}

async fn list_branches(
    State(state): State<AppState>,
    Query(query): Query<ListBranchesQuery>,
) -> ApiResult<Vec<branch::Model>> {
    let branches = state
        .services
        .branches
        .list_branches(query.include_inactive)
        .await?;
    Ok(Json(ApiResponse::success(branches)))
}

async fn create_branch(
    State(state): State<AppState>,
    Json(input): Json<CreateBranchInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let created = state.services.branches.create_branch(input).await?;
    Ok(created_response(created))
}

async fn get_branch(
    State(state): State<AppState>,
    Path(branch_id): Path<Uuid>,
) -> ApiResult<branch::Model> {
    let found = state.services.branches.get_branch(branch_id).await?;
    Ok(Json(ApiResponse::success(found)))
}

async fn update_branch(
    State(state): State<AppState>,
    Path(branch_id): Path<Uuid>,
    Json(input): Json<UpdateBranchInput>,
) -> ApiResult<branch::Model> {
    let updated = state
        .services
        .branches
        .update_branch(branch_id, input)
        .await?;
    Ok(Json(ApiResponse::success(updated)))
}

async fn invalidate_branch_scope(
    State(state): State<AppState>,
    Path(branch_id): Path<Uuid>,
) -> ApiResult<ScopeInvalidated> {
    let removed = state
        .services
        .branches
        .invalidate_scope(Some(branch_id))
        .await;
    Ok(Json(ApiResponse::success(ScopeInvalidated {
        branch_id: Some(branch_id),
        removed,
    })))
}

async fn invalidate_all_scopes(State(state): State<AppState>) -> ApiResult<ScopeInvalidated> {
    let removed = state.services.branches.invalidate_scope(None).await;
    Ok(Json(ApiResponse::success(ScopeInvalidated {
        branch_id: None,
        removed,
    })))
}
