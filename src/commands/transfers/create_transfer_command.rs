use super::{
    apply_transfer_lines, find_by_idempotency_key, merge_lines, replay_or_conflict,
    request_fingerprint, TransferLineInput, TransferReceipt,
};
use crate::commands::Command;
use crate::{
    db::{with_transaction, DbPool},
    entities::{
        inventory_transfer::{self, TransferStatus},
        inventory_transfer_line,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    metrics::{
        failure_reason, TRANSFERS_COMPLETED, TRANSFERS_CREATED, TRANSFER_FAILURES,
        TRANSFER_REPLAYS,
    },
    services::branches::require_branch,
};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

fn default_apply() -> bool {
    true
}

/// Submits a transfer. With `apply` (the default) the stock moves and the
/// header is stored as `completed` in one transaction; otherwise the header
/// and lines are stored `pending` and stock is untouched.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateTransferCommand {
    pub source_branch_id: Uuid,
    pub destination_branch_id: Uuid,
    #[validate(length(max = 1000, message = "Notes cannot exceed 1000 characters"))]
    pub notes: Option<String>,
    pub lines: Vec<TransferLineInput>,
    #[serde(default = "default_apply")]
    pub apply: bool,
    #[validate(length(min = 1, max = 128, message = "Idempotency key must be 1-128 characters"))]
    pub idempotency_key: Option<String>,
    #[serde(skip)]
    pub enforce_max_stock_level: bool,
}

impl CreateTransferCommand {
    pub fn new(
        source_branch_id: Uuid,
        destination_branch_id: Uuid,
        lines: Vec<TransferLineInput>,
    ) -> Self {
        Self {
            source_branch_id,
            destination_branch_id,
            notes: None,
            lines,
            apply: true,
            idempotency_key: None,
            enforce_max_stock_level: false,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn pending(mut self) -> Self {
        self.apply = false;
        self
    }

    fn check(&self) -> Result<Vec<(Uuid, i32)>, ServiceError> {
        self.validate()?;
        if self.source_branch_id == self.destination_branch_id {
            return Err(ServiceError::ValidationError(
                "Source and destination branch must differ".to_string(),
            ));
        }
        merge_lines(&self.lines)
    }
}

#[async_trait]
impl Command for CreateTransferCommand {
    type Result = TransferReceipt;

    #[instrument(skip(self, db_pool, event_sender), fields(source = %self.source_branch_id, destination = %self.destination_branch_id, apply = self.apply))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        let lines = self.check().map_err(|e| {
            TRANSFER_FAILURES.with_label_values(&["validation"]).inc();
            error!("Invalid transfer request: {}", e);
            e
        })?;

        let notes = self
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        let fingerprint = request_fingerprint(
            self.source_branch_id,
            self.destination_branch_id,
            notes.as_deref(),
            self.apply,
            &lines,
        )?;

        let db = db_pool.as_ref();

        if let Some(key) = &self.idempotency_key {
            if let Some(existing) = find_by_idempotency_key(db, key).await? {
                return self.replay(&existing, key, &fingerprint);
            }
        }

        let source_branch_id = self.source_branch_id;
        let destination_branch_id = self.destination_branch_id;
        let apply = self.apply;
        let enforce_max = self.enforce_max_stock_level;
        let idempotency_key = self.idempotency_key.clone();
        let request_hash = fingerprint.clone();
        let txn_lines = lines.clone();

        let result = with_transaction(db, move |txn| {
            Box::pin(async move {
                require_branch(txn, source_branch_id, true).await?;
                require_branch(txn, destination_branch_id, true).await?;

                let now = Utc::now();
                let transfer_id = Uuid::new_v4();
                let header = inventory_transfer::ActiveModel {
                    id: Set(transfer_id),
                    source_branch_id: Set(source_branch_id),
                    destination_branch_id: Set(destination_branch_id),
                    notes: Set(notes),
                    status: Set(if apply {
                        TransferStatus::Completed
                    } else {
                        TransferStatus::Pending
                    }),
                    idempotency_key: Set(idempotency_key),
                    request_hash: Set(Some(request_hash)),
                    created_at: Set(now),
                    updated_at: Set(now),
                    completed_at: Set(apply.then_some(now)),
                }
                .insert(txn)
                .await
                .map_err(ServiceError::db_error)?;

                let rows = txn_lines.iter().map(|(product_id, quantity)| {
                    inventory_transfer_line::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        transfer_id: Set(transfer_id),
                        product_id: Set(*product_id),
                        quantity: Set(*quantity),
                        created_at: Set(now),
                    }
                });
                inventory_transfer_line::Entity::insert_many(rows)
                    .exec_without_returning(txn)
                    .await
                    .map_err(ServiceError::db_error)?;

                let units = if apply {
                    apply_transfer_lines(
                        txn,
                        transfer_id,
                        source_branch_id,
                        destination_branch_id,
                        &txn_lines,
                        enforce_max,
                    )
                    .await?
                } else {
                    0
                };

                Ok((header, units))
            })
        })
        .await;

        let (header, units) = match result {
            Ok(done) => done,
            Err(e) if e.is_unique_violation() && self.idempotency_key.is_some() => {
                // Lost a race with a concurrent first submission of the same key
                let key = self.idempotency_key.as_deref().unwrap_or_default();
                warn!(idempotency_key = key, "Concurrent submission with the same idempotency key");
                return match find_by_idempotency_key(db, key).await? {
                    Some(existing) => self.replay(&existing, key, &fingerprint),
                    None => Err(e),
                };
            }
            Err(e) => {
                TRANSFER_FAILURES
                    .with_label_values(&[failure_reason(&e)])
                    .inc();
                error!("Transfer rolled back: {}", e);
                return Err(e);
            }
        };

        TRANSFERS_CREATED.inc();
        info!(transfer_id = %header.id, status = %header.status, lines = lines.len(), units, "Transfer created");

        event_sender
            .send_or_log(Event::TransferSubmitted {
                transfer_id: header.id,
                source_branch_id,
                destination_branch_id,
                line_count: lines.len(),
            })
            .await;

        if header.status == TransferStatus::Completed {
            TRANSFERS_COMPLETED.inc();
            event_sender
                .send_or_log(Event::TransferCompleted {
                    transfer_id: header.id,
                    source_branch_id,
                    destination_branch_id,
                    units_moved: units,
                })
                .await;
        }

        Ok(TransferReceipt::from_header(&header, false))
    }
}

impl CreateTransferCommand {
    fn replay(
        &self,
        existing: &inventory_transfer::Model,
        key: &str,
        fingerprint: &str,
    ) -> Result<TransferReceipt, ServiceError> {
        let receipt = replay_or_conflict(existing, key, fingerprint).map_err(|e| {
            TRANSFER_FAILURES.with_label_values(&["conflict"]).inc();
            e
        })?;
        TRANSFER_REPLAYS.inc();
        info!(transfer_id = %receipt.transfer_id, idempotency_key = key, "Replaying earlier transfer");
        Ok(receipt)
    }
}
