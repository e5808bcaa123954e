use crate::{
    entities::product,
    errors::ServiceError,
    handlers::common::{created_response, no_content_response, paginated, PaginationParams},
    services::products::{CreateProductInput, UpdateProductInput},
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use uuid::Uuid;

/// Routes nested under `/branches`
pub fn products_router() -> Router<AppState> {
    Router::new()
        .route(
            "/:branch_id/products",
            get(list_products).post(create_product),
        )
        .route(
            "/:branch_id/products/:product_id",
            get(get_product).put(update_product).delete(delete_product),
        )
}

async fn list_products(
    State(state): State<AppState>,
    Path(branch_id): Path<Uuid>,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<PaginatedResponse<product::Model>> {
    let (page, per_page) = pagination.resolve(&state.config);
    let (items, total) = state
        .services
        .products
        .list_products(branch_id, page, per_page)
        .await?;
    Ok(Json(ApiResponse::success(paginated(items, total, page, per_page))))
}

async fn create_product(
    State(state): State<AppState>,
    Path(branch_id): Path<Uuid>,
    Json(input): Json<CreateProductInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let created = state
        .services
        .products
        .create_product(branch_id, input)
        .await?;
    Ok(created_response(created))
}

async fn get_product(
    State(state): State<AppState>,
    Path((branch_id, product_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<product::Model> {
    let found = state
        .services
        .products
        .get_product(branch_id, product_id)
        .await?;
    Ok(Json(ApiResponse::success(found)))
}

async fn update_product(
    State(state): State<AppState>,
    Path((branch_id, product_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<UpdateProductInput>,
) -> ApiResult<product::Model> {
    let updated = state
        .services
        .products
        .update_product(branch_id, product_id, input)
        .await?;
    Ok(Json(ApiResponse::success(updated)))
}

async fn delete_product(
    State(state): State<AppState>,
    Path((branch_id, product_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .services
        .products
        .delete_product(branch_id, product_id)
        .await?;
    Ok(no_content_response())
}
