use crate::commands::Command;
use crate::{
    db::{with_transaction, DbPool},
    errors::ServiceError,
    events::{Event, EventSender},
    metrics::{failure_reason, STOCK_ADJUSTMENTS, STOCK_ADJUSTMENT_FAILURES},
    services::{
        branches::require_branch,
        inventory::{apply_delta, AdjustMode, Movement, StockChange},
    },
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Largest magnitude accepted for a single adjustment
pub const MAX_ADJUSTMENT: u32 = 1_000_000;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AdjustStockCommand {
    pub product_id: Uuid,
    pub branch_id: Uuid,
    /// Signed change; negative removes stock
    pub delta: i32,
    #[serde(default)]
    pub mode: AdjustMode,
    #[validate(length(max = 255, message = "Reason cannot exceed 255 characters"))]
    pub reason: Option<String>,
    #[serde(skip)]
    pub enforce_max_stock_level: bool,
}

impl AdjustStockCommand {
    pub fn new(product_id: Uuid, branch_id: Uuid, delta: i32, mode: AdjustMode) -> Self {
        Self {
            product_id,
            branch_id,
            delta,
            mode,
            reason: None,
            enforce_max_stock_level: false,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    fn validate_delta(&self) -> Result<(), ServiceError> {
        if self.delta == 0 {
            return Err(ServiceError::ValidationError(
                "Adjustment delta cannot be zero".to_string(),
            ));
        }
        if self.delta.unsigned_abs() > MAX_ADJUSTMENT {
            return Err(ServiceError::ValidationError(format!(
                "Adjustment delta must be within ±{}",
                MAX_ADJUSTMENT
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Command for AdjustStockCommand {
    type Result = StockChange;

    #[instrument(skip(self, db_pool, event_sender), fields(product_id = %self.product_id, branch_id = %self.branch_id, delta = self.delta))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        let validated = self
            .validate()
            .map_err(ServiceError::from)
            .and_then(|_| self.validate_delta());
        if let Err(e) = validated {
            STOCK_ADJUSTMENT_FAILURES.with_label_values(&["validation"]).inc();
            error!("Invalid stock adjustment: {}", e);
            return Err(e);
        }

        let product_id = self.product_id;
        let branch_id = self.branch_id;
        let delta = self.delta;
        let mode = self.mode;
        let enforce_max = self.enforce_max_stock_level;
        let reason = self.reason.clone();

        let change = with_transaction(db_pool.as_ref(), move |txn| {
            Box::pin(async move {
                require_branch(txn, branch_id, true).await?;
                apply_delta(
                    txn,
                    product_id,
                    branch_id,
                    delta,
                    mode,
                    enforce_max,
                    Movement::adjustment(reason),
                )
                .await
            })
        })
        .await
        .map_err(|e| {
            STOCK_ADJUSTMENT_FAILURES
                .with_label_values(&[failure_reason(&e)])
                .inc();
            e
        })?;

        let mode_label = match mode {
            AdjustMode::Clamped => "clamped",
            AdjustMode::Guarded => "guarded",
        };
        STOCK_ADJUSTMENTS.with_label_values(&[mode_label]).inc();

        info!(
            quantity = change.quantity_after,
            version = change.version,
            "Stock adjusted"
        );

        event_sender
            .send_or_log(Event::StockAdjusted {
                product_id,
                branch_id,
                requested_delta: delta,
                new_quantity: change.quantity_after,
                reason: self.reason.clone(),
            })
            .await;

        if let (true, Some(min)) = (change.is_low_stock(), change.min_stock_level) {
            event_sender
                .send_or_log(Event::LowStockDetected {
                    product_id,
                    branch_id,
                    quantity: change.quantity_after,
                    min_stock_level: min,
                })
                .await;
        }

        Ok(change)
    }
}
