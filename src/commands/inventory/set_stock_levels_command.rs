use crate::commands::Command;
use crate::{
    db::{with_transaction, DbPool},
    entities::branch_inventory::{Column as StockColumn, Entity as BranchInventory},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        branches::require_branch,
        inventory::{ensure_stock_row, find_stock_row, StockLevel},
    },
};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Sets the min/max thresholds of a (product, branch) stock row, creating
/// the row with zero quantity when missing.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SetStockLevelsCommand {
    pub product_id: Uuid,
    pub branch_id: Uuid,
    #[validate(range(min = 0, message = "Minimum stock level cannot be negative"))]
    pub min_stock_level: Option<i32>,
    #[validate(range(min = 0, message = "Maximum stock level cannot be negative"))]
    pub max_stock_level: Option<i32>,
}

#[async_trait]
impl Command for SetStockLevelsCommand {
    type Result = StockLevel;

    #[instrument(skip(self, db_pool, event_sender), fields(product_id = %self.product_id, branch_id = %self.branch_id))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate()?;
        if let (Some(min), Some(max)) = (self.min_stock_level, self.max_stock_level) {
            if min > max {
                return Err(ServiceError::ValidationError(format!(
                    "Minimum stock level {} exceeds maximum {}",
                    min, max
                )));
            }
        }

        let product_id = self.product_id;
        let branch_id = self.branch_id;
        let min = self.min_stock_level;
        let max = self.max_stock_level;

        let level = with_transaction(db_pool.as_ref(), move |txn| {
            Box::pin(async move {
                require_branch(txn, branch_id, false).await?;
                ensure_stock_row(txn, product_id, branch_id).await?;

                BranchInventory::update_many()
                    .col_expr(StockColumn::MinStockLevel, Expr::value(min))
                    .col_expr(StockColumn::MaxStockLevel, Expr::value(max))
                    .col_expr(StockColumn::Version, Expr::col(StockColumn::Version).add(1))
                    .col_expr(StockColumn::UpdatedAt, Expr::value(Utc::now()))
                    .filter(StockColumn::ProductId.eq(product_id))
                    .filter(StockColumn::BranchId.eq(branch_id))
                    .exec(txn)
                    .await
                    .map_err(ServiceError::db_error)?;

                find_stock_row(txn, product_id, branch_id)
                    .await?
                    .map(StockLevel::from)
                    .ok_or_else(|| {
                        ServiceError::InternalError(format!(
                            "Stock row for product {} at branch {} missing after update",
                            product_id, branch_id
                        ))
                    })
            })
        })
        .await?;

        info!(min_stock_level = ?min, max_stock_level = ?max, "Stock levels updated");

        event_sender
            .send_or_log(Event::StockLevelsChanged {
                product_id,
                branch_id,
                min_stock_level: min,
                max_stock_level: max,
            })
            .await;

        Ok(level)
    }
}
