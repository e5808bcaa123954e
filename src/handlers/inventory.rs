use crate::{
    commands::inventory::{
        adjust_stock_command::AdjustStockCommand, set_stock_levels_command::SetStockLevelsCommand,
    },
    handlers::common::{paginated, PaginationParams},
    services::inventory::{AdjustMode, StockChange, StockLevel},
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    /// Signed change; negative removes stock
    pub delta: i32,
    #[serde(default)]
    pub mode: AdjustMode,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StockLevelsRequest {
    pub min_stock_level: Option<i32>,
    pub max_stock_level: Option<i32>,
}

/// Routes nested under `/branches`
pub fn inventory_router() -> Router<AppState> {
    Router::new()
        .route("/:branch_id/inventory", get(list_branch_stock))
        .route("/:branch_id/inventory/low-stock", get(list_low_stock))
        .route("/:branch_id/inventory/:product_id", get(get_stock_level))
        .route("/:branch_id/inventory/:product_id/adjust", post(adjust_stock))
        .route("/:branch_id/inventory/:product_id/levels", put(set_stock_levels))
}

async fn list_branch_stock(
    State(state): State<AppState>,
    Path(branch_id): Path<Uuid>,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<PaginatedResponse<StockLevel>> {
    let (page, per_page) = pagination.resolve(&state.config);
    let (items, total) = state
        .services
        .inventory
        .list_branch_stock(branch_id, page, per_page)
        .await?;
    Ok(Json(ApiResponse::success(paginated(items, total, page, per_page))))
}

async fn list_low_stock(
    State(state): State<AppState>,
    Path(branch_id): Path<Uuid>,
) -> ApiResult<Vec<StockLevel>> {
    let items = state.services.inventory.list_low_stock(branch_id).await?;
    Ok(Json(ApiResponse::success(items)))
}

async fn get_stock_level(
    State(state): State<AppState>,
    Path((branch_id, product_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StockLevel> {
    let level = state
        .services
        .inventory
        .get_stock_level(product_id, branch_id)
        .await?;
    Ok(Json(ApiResponse::success(level)))
}

async fn adjust_stock(
    State(state): State<AppState>,
    Path((branch_id, product_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<AdjustStockRequest>,
) -> ApiResult<StockChange> {
    let mut command = AdjustStockCommand::new(product_id, branch_id, request.delta, request.mode);
    command.reason = request.reason;
    let change = state.services.inventory.adjust_stock(command).await?;
    Ok(Json(ApiResponse::success(change)))
}

async fn set_stock_levels(
    State(state): State<AppState>,
    Path((branch_id, product_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<StockLevelsRequest>,
) -> ApiResult<StockLevel> {
    let command = SetStockLevelsCommand {
        product_id,
        branch_id,
        min_stock_level: request.min_stock_level,
        max_stock_level: request.max_stock_level,
    };
    let level = state.services.inventory.set_stock_levels(command).await?;
    Ok(Json(ApiResponse::success(level)))
}
