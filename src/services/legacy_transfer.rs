/*!
 * Legacy transfer path
 *
 * Unguarded stock writes as the first back office did them: every step is
 * its own statement, nothing runs in a transaction, and the adjuster reads
 * the current quantity before writing `max(0, current + delta)` back. Two
 * overlapping adjustments of one row can lose an update, and re-running a
 * transfer after a mid-sequence failure applies its lines again.
 *
 * New code should use [`crate::services::transfers::TransferService`].
 */

use crate::{
    db::DbPool,
    entities::{
        branch_inventory::{self, Column as StockColumn, Entity as BranchInventory},
        inventory_transfer::{self, TransferStatus},
        inventory_transfer_line,
    },
    errors::ServiceError,
    metrics::LEGACY_WRITES,
    services::inventory::{clamp_quantity, find_stock_row},
};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{sea_query::OnConflict, ActiveModelTrait, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Applies a signed delta to one (product, branch) stock row
#[async_trait]
pub trait StockAdjuster: Send + Sync {
    async fn adjust(&self, product_id: Uuid, branch_id: Uuid, delta: i32) -> Result<i32, ServiceError>;
}

/// First half of a read-then-write adjustment: what was read and what will
/// be written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingWrite {
    pub product_id: Uuid,
    pub branch_id: Uuid,
    pub observed: i32,
    pub delta: i32,
    pub target: i32,
}

/// Read-then-write adjuster with no concurrency control
pub struct LegacyStockAdjuster {
    db_pool: Arc<DbPool>,
}

impl LegacyStockAdjuster {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Reads the current quantity (no row reads as 0) and computes the value
    /// to write
    pub async fn read(
        &self,
        product_id: Uuid,
        branch_id: Uuid,
        delta: i32,
    ) -> Result<PendingWrite, ServiceError> {
        let observed = find_stock_row(self.db_pool.as_ref(), product_id, branch_id)
            .await?
            .map(|row| row.quantity)
            .unwrap_or(0);

        Ok(PendingWrite {
            product_id,
            branch_id,
            observed,
            delta,
            target: clamp_quantity(observed, delta),
        })
    }

    /// Upserts the computed value, overwriting whatever is stored now
    pub async fn write(&self, pending: PendingWrite) -> Result<i32, ServiceError> {
        let row = branch_inventory::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(pending.product_id),
            branch_id: Set(pending.branch_id),
            quantity: Set(pending.target),
            min_stock_level: Set(None),
            max_stock_level: Set(None),
            version: Set(0),
            updated_at: Set(Utc::now()),
        };

        BranchInventory::insert(row)
            .on_conflict(
                OnConflict::columns([StockColumn::ProductId, StockColumn::BranchId])
                    .update_columns([StockColumn::Quantity, StockColumn::UpdatedAt])
                    .to_owned(),
            )
            .exec_without_returning(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        LEGACY_WRITES.inc();
        debug!(
            product_id = %pending.product_id,
            branch_id = %pending.branch_id,
            observed = pending.observed,
            written = pending.target,
            "Legacy stock write"
        );
        Ok(pending.target)
    }
}

#[async_trait]
impl StockAdjuster for LegacyStockAdjuster {
    async fn adjust(&self, product_id: Uuid, branch_id: Uuid, delta: i32) -> Result<i32, ServiceError> {
        let pending = self.read(product_id, branch_id, delta).await?;
        self.write(pending).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyTransferLine {
    pub product_id: Uuid,
    /// Floored to a whole number before use
    pub quantity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyTransferRequest {
    pub source_branch_id: Uuid,
    pub destination_branch_id: Uuid,
    pub notes: Option<String>,
    pub lines: Vec<LegacyTransferLine>,
}

/// Header, then lines, then two adjustments per line, each awaited in turn.
/// An error stops the sequence where it is; nothing already written is undone.
pub struct LegacyTransferOrchestrator<A = LegacyStockAdjuster> {
    db_pool: Arc<DbPool>,
    adjuster: A,
}

impl LegacyTransferOrchestrator<LegacyStockAdjuster> {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        let adjuster = LegacyStockAdjuster::new(db_pool.clone());
        Self { db_pool, adjuster }
    }
}

impl<A: StockAdjuster> LegacyTransferOrchestrator<A> {
    pub fn with_adjuster(db_pool: Arc<DbPool>, adjuster: A) -> Self {
        Self { db_pool, adjuster }
    }

    pub fn adjuster(&self) -> &A {
        &self.adjuster
    }

    /// Returns the id of the created transfer
    #[instrument(skip(self, request), fields(source = %request.source_branch_id, destination = %request.destination_branch_id))]
    pub async fn apply_transfer(&self, request: &LegacyTransferRequest) -> Result<Uuid, ServiceError> {
        let db = self.db_pool.as_ref();
        let now = Utc::now();

        let header = inventory_transfer::ActiveModel {
            id: Set(Uuid::new_v4()),
            source_branch_id: Set(request.source_branch_id),
            destination_branch_id: Set(request.destination_branch_id),
            notes: Set(request.notes.clone()),
            status: Set(TransferStatus::Completed),
            idempotency_key: Set(None),
            request_hash: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            completed_at: Set(Some(now)),
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)?;

        let quantities: Vec<(Uuid, i32)> = request
            .lines
            .iter()
            .map(|line| (line.product_id, line.quantity.floor() as i32))
            .collect();

        for (product_id, quantity) in &quantities {
            inventory_transfer_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                transfer_id: Set(header.id),
                product_id: Set(*product_id),
                quantity: Set(*quantity),
                created_at: Set(now),
            }
            .insert(db)
            .await
            .map_err(ServiceError::db_error)?;
        }

        for (product_id, quantity) in &quantities {
            self.adjuster
                .adjust(*product_id, request.source_branch_id, -*quantity)
                .await?;
            self.adjuster
                .adjust(*product_id, request.destination_branch_id, *quantity)
                .await?;
        }

        info!(transfer_id = %header.id, lines = quantities.len(), "Legacy transfer applied");
        Ok(header.id)
    }
}
