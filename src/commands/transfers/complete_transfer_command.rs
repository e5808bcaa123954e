use super::{apply_transfer_lines, load_lines, transition_status, TransferReceipt};
use crate::commands::Command;
use crate::{
    db::{with_transaction, DbPool},
    entities::inventory_transfer::TransferStatus,
    errors::ServiceError,
    events::{Event, EventSender},
    metrics::{failure_reason, TRANSFERS_COMPLETED, TRANSFER_FAILURES},
    services::branches::require_branch,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Applies the stock movement of a pending transfer and marks it completed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteTransferCommand {
    pub transfer_id: Uuid,
    #[serde(skip)]
    pub enforce_max_stock_level: bool,
}

impl CompleteTransferCommand {
    pub fn new(transfer_id: Uuid) -> Self {
        Self {
            transfer_id,
            enforce_max_stock_level: false,
        }
    }
}

#[async_trait]
impl Command for CompleteTransferCommand {
    type Result = TransferReceipt;

    #[instrument(skip(self, db_pool, event_sender), fields(transfer_id = %self.transfer_id))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        let transfer_id = self.transfer_id;
        let enforce_max = self.enforce_max_stock_level;

        let (header, units) = with_transaction(db_pool.as_ref(), move |txn| {
            Box::pin(async move {
                let header = transition_status(txn, transfer_id, TransferStatus::Completed).await?;
                require_branch(txn, header.source_branch_id, true).await?;
                require_branch(txn, header.destination_branch_id, true).await?;

                let lines: Vec<(Uuid, i32)> = load_lines(txn, transfer_id)
                    .await?
                    .into_iter()
                    .map(|line| (line.product_id, line.quantity))
                    .collect();

                let units = apply_transfer_lines(
                    txn,
                    transfer_id,
                    header.source_branch_id,
                    header.destination_branch_id,
                    &lines,
                    enforce_max,
                )
                .await?;

                Ok((header, units))
            })
        })
        .await
        .map_err(|e| {
            TRANSFER_FAILURES
                .with_label_values(&[failure_reason(&e)])
                .inc();
            error!("Transfer completion failed: {}", e);
            e
        })?;

        TRANSFERS_COMPLETED.inc();
        info!(units, "Transfer completed");

        event_sender
            .send_or_log(Event::TransferCompleted {
                transfer_id,
                source_branch_id: header.source_branch_id,
                destination_branch_id: header.destination_branch_id,
                units_moved: units,
            })
            .await;

        Ok(TransferReceipt::from_header(&header, false))
    }
}
