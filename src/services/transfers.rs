use crate::{
    commands::transfers::{
        cancel_transfer_command::CancelTransferCommand,
        complete_transfer_command::CompleteTransferCommand,
        create_transfer_command::CreateTransferCommand, load_lines, TransferReceipt,
    },
    commands::Command,
    db::DbPool,
    entities::{
        inventory_transfer::{self, Column as TransferColumn, Entity as InventoryTransfer, TransferStatus},
        inventory_transfer_line,
    },
    errors::ServiceError,
    events::EventSender,
};
use sea_orm::{ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// A transfer header with its lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDetails {
    #[serde(flatten)]
    pub transfer: inventory_transfer::Model,
    pub lines: Vec<inventory_transfer_line::Model>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransferFilter {
    /// Matches either end of the transfer
    pub branch_id: Option<Uuid>,
    pub status: Option<TransferStatus>,
}

/// Entry point for the atomic transfer path
pub struct TransferService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    enforce_max_stock_level: bool,
}

impl TransferService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        enforce_max_stock_level: bool,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            enforce_max_stock_level,
        }
    }

    #[instrument(skip(self, command))]
    pub async fn create_transfer(
        &self,
        mut command: CreateTransferCommand,
    ) -> Result<TransferReceipt, ServiceError> {
        command.enforce_max_stock_level = self.enforce_max_stock_level;
        command
            .execute(self.db_pool.clone(), self.event_sender.clone())
            .await
    }

    #[instrument(skip(self))]
    pub async fn complete_transfer(&self, transfer_id: Uuid) -> Result<TransferReceipt, ServiceError> {
        let command = CompleteTransferCommand {
            transfer_id,
            enforce_max_stock_level: self.enforce_max_stock_level,
        };
        command
            .execute(self.db_pool.clone(), self.event_sender.clone())
            .await
    }

    #[instrument(skip(self))]
    pub async fn cancel_transfer(&self, transfer_id: Uuid) -> Result<TransferReceipt, ServiceError> {
        CancelTransferCommand { transfer_id }
            .execute(self.db_pool.clone(), self.event_sender.clone())
            .await
    }

    pub async fn get_transfer(&self, transfer_id: Uuid) -> Result<TransferDetails, ServiceError> {
        let db = self.db_pool.as_ref();
        let transfer = InventoryTransfer::find_by_id(transfer_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Transfer {} not found", transfer_id)))?;
        let lines = load_lines(db, transfer_id).await?;
        Ok(TransferDetails { transfer, lines })
    }

    /// Newest first, 1-based page
    pub async fn list_transfers(
        &self,
        filter: TransferFilter,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<inventory_transfer::Model>, u64), ServiceError> {
        let mut query = InventoryTransfer::find();
        if let Some(branch_id) = filter.branch_id {
            query = query.filter(
                Condition::any()
                    .add(TransferColumn::SourceBranchId.eq(branch_id))
                    .add(TransferColumn::DestinationBranchId.eq(branch_id)),
            );
        }
        if let Some(status) = filter.status {
            query = query.filter(TransferColumn::Status.eq(status));
        }

        let paginator = query
            .order_by_desc(TransferColumn::CreatedAt)
            .order_by_desc(TransferColumn::Id)
            .paginate(self.db_pool.as_ref(), per_page);

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let items = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;
        Ok((items, total))
    }
}
