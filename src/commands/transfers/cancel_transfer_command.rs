use super::{transition_status, TransferReceipt};
use crate::commands::Command;
use crate::{
    db::DbPool,
    entities::inventory_transfer::TransferStatus,
    errors::ServiceError,
    events::{Event, EventSender},
    metrics::{failure_reason, TRANSFERS_CANCELLED, TRANSFER_FAILURES},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Cancels a pending transfer. Stock is untouched: pending transfers never moved any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelTransferCommand {
    pub transfer_id: Uuid,
}

#[async_trait]
impl Command for CancelTransferCommand {
    type Result = TransferReceipt;

    #[instrument(skip(self, db_pool, event_sender), fields(transfer_id = %self.transfer_id))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        let header = transition_status(db_pool.as_ref(), self.transfer_id, TransferStatus::Cancelled)
            .await
            .map_err(|e| {
                TRANSFER_FAILURES
                    .with_label_values(&[failure_reason(&e)])
                    .inc();
                warn!("Transfer cancellation rejected: {}", e);
                e
            })?;

        TRANSFERS_CANCELLED.inc();
        info!("Transfer cancelled");

        event_sender
            .send_or_log(Event::TransferCancelled {
                transfer_id: self.transfer_id,
            })
            .await;

        Ok(TransferReceipt::from_header(&header, false))
    }
}
