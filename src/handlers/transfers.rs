use crate::{
    commands::transfers::{create_transfer_command::CreateTransferCommand, TransferReceipt},
    entities::inventory_transfer::{self, TransferStatus},
    errors::ServiceError,
    handlers::common::{paginated, PaginationParams},
    services::transfers::{TransferDetails, TransferFilter},
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Debug, Default, Deserialize)]
pub struct ListTransfersQuery {
    pub branch_id: Option<Uuid>,
    pub status: Option<TransferStatus>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

pub fn transfers_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_transfers).post(create_transfer))
        .route("/:id", get(get_transfer))
        .route("/:id/complete", post(complete_transfer))
        .route("/:id/cancel", post(cancel_transfer))
}

/// The `Idempotency-Key` header fills in a missing body key; two different
/// keys are rejected.
fn merge_idempotency_key(
    headers: &HeaderMap,
    command: &mut CreateTransferCommand,
) -> Result<(), ServiceError> {
    let header_key = match headers.get(IDEMPOTENCY_KEY_HEADER) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| {
                    ServiceError::ValidationError("Idempotency-Key must be visible ASCII".to_string())
                })?
                .trim()
                .to_string(),
        ),
        None => None,
    };

    match (header_key, command.idempotency_key.as_deref()) {
        (Some(header), Some(body)) if header != body => Err(ServiceError::ValidationError(
            "Idempotency-Key header and body idempotency_key differ".to_string(),
        )),
        (Some(header), _) => {
            command.idempotency_key = Some(header);
            Ok(())
        }
        (None, _) => Ok(()),
    }
}

/// `POST /api/v1/transfers`: 201 for a new transfer, 200 for a replay
async fn create_transfer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut command): Json<CreateTransferCommand>,
) -> Result<(StatusCode, Json<ApiResponse<TransferReceipt>>), ServiceError> {
    merge_idempotency_key(&headers, &mut command)?;
    let receipt = state.services.transfers.create_transfer(command).await?;
    let status = if receipt.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(ApiResponse::success(receipt))))
}

async fn list_transfers(
    State(state): State<AppState>,
    Query(query): Query<ListTransfersQuery>,
) -> ApiResult<PaginatedResponse<inventory_transfer::Model>> {
    let (page, per_page) = PaginationParams {
        page: query.page,
        per_page: query.per_page,
    }
    .resolve(&state.config);
    let filter = TransferFilter {
        branch_id: query.branch_id,
        status: query.status,
    };
    let (items, total) = state
        .services
        .transfers
        .list_transfers(filter, page, per_page)
        .await?;
    Ok(Json(ApiResponse::success(paginated(items, total, page, per_page))))
}

async fn get_transfer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<TransferDetails> {
    let details = state.services.transfers.get_transfer(id).await?;
    Ok(Json(ApiResponse::success(details)))
}

async fn complete_transfer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<TransferReceipt> {
    let receipt = state.services.transfers.complete_transfer(id).await?;
    Ok(Json(ApiResponse::success(receipt)))
}

async fn cancel_transfer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<TransferReceipt> {
    let receipt = state.services.transfers.cancel_transfer(id).await?;
    Ok(Json(ApiResponse::success(receipt)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn command() -> CreateTransferCommand {
        CreateTransferCommand::new(Uuid::new_v4(), Uuid::new_v4(), vec![])
    }

    #[test]
    fn header_key_fills_missing_body_key() {
        let mut headers = HeaderMap::new();
        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static("  abc-1 "));
        let mut cmd = command();
        merge_idempotency_key(&headers, &mut cmd).unwrap();
        assert_eq!(cmd.idempotency_key.as_deref(), Some("abc-1"));
    }

    #[test]
    fn conflicting_keys_are_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static("abc-1"));
        let mut cmd = command().with_idempotency_key("abc-2");
        assert!(matches!(
            merge_idempotency_key(&headers, &mut cmd),
            Err(ServiceError::ValidationError(_))
        ));

        let mut same = command().with_idempotency_key("abc-1");
        assert!(merge_idempotency_key(&headers, &mut same).is_ok());
        assert!(merge_idempotency_key(&HeaderMap::new(), &mut command()).is_ok());
    }
}
