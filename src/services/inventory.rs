/*!
 * Branch stock levels
 *
 * Atomic stock primitives shared by the adjustment and transfer commands,
 * plus the read side used by the HTTP layer. Every mutation here is a
 * single conditional `UPDATE`; callers decide the transaction boundary.
 */

use crate::{
    commands::inventory::{
        adjust_stock_command::AdjustStockCommand, set_stock_levels_command::SetStockLevelsCommand,
    },
    commands::Command,
    db::DbPool,
    entities::{
        branch_inventory::{self, Column as StockColumn, Entity as BranchInventory},
        inventory_movement::{self, Entity as InventoryMovement, MovementKind},
    },
    errors::ServiceError,
    events::EventSender,
    services::branches::require_branch,
};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::{Expr, OnConflict, SimpleExpr},
    ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// How a negative delta that would drive stock below zero is handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustMode {
    /// Floor the result at zero
    #[default]
    Clamped,
    /// Reject with `InsufficientStock`
    Guarded,
}

/// Ledger context for one applied change
#[derive(Debug, Clone)]
pub struct Movement {
    pub kind: MovementKind,
    pub transfer_id: Option<Uuid>,
    pub reason: Option<String>,
}

impl Movement {
    pub fn adjustment(reason: Option<String>) -> Self {
        Self {
            kind: MovementKind::Adjustment,
            transfer_id: None,
            reason,
        }
    }

    pub fn transfer(kind: MovementKind, transfer_id: Uuid) -> Self {
        Self {
            kind,
            transfer_id: Some(transfer_id),
            reason: None,
        }
    }
}

/// Result of one applied stock change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChange {
    pub product_id: Uuid,
    pub branch_id: Uuid,
    pub requested_delta: i32,
    pub quantity_after: i32,
    pub version: i32,
    pub min_stock_level: Option<i32>,
}

impl StockChange {
    pub fn is_low_stock(&self) -> bool {
        self.min_stock_level
            .map(|min| self.quantity_after <= min)
            .unwrap_or(false)
    }
}

/// Stock of a product at a branch; a missing row reads as zero
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: Uuid,
    pub branch_id: Uuid,
    pub quantity: i32,
    pub min_stock_level: Option<i32>,
    pub max_stock_level: Option<i32>,
    pub version: i32,
    pub low_stock: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl StockLevel {
    fn empty(product_id: Uuid, branch_id: Uuid) -> Self {
        Self {
            product_id,
            branch_id,
            quantity: 0,
            min_stock_level: None,
            max_stock_level: None,
            version: 0,
            low_stock: false,
            updated_at: None,
        }
    }
}

impl From<branch_inventory::Model> for StockLevel {
    fn from(row: branch_inventory::Model) -> Self {
        Self {
            low_stock: row.is_low_stock(),
            product_id: row.product_id,
            branch_id: row.branch_id,
            quantity: row.quantity,
            min_stock_level: row.min_stock_level,
            max_stock_level: row.max_stock_level,
            version: row.version,
            updated_at: Some(row.updated_at),
        }
    }
}

/// `max(0, current + delta)` without overflow
pub fn clamp_quantity(current: i32, delta: i32) -> i32 {
    current.saturating_add(delta).max(0)
}

pub async fn find_stock_row<C>(
    conn: &C,
    product_id: Uuid,
    branch_id: Uuid,
) -> Result<Option<branch_inventory::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    BranchInventory::find()
        .filter(StockColumn::ProductId.eq(product_id))
        .filter(StockColumn::BranchId.eq(branch_id))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// Inserts a zero-quantity row for (product, branch) unless one exists
pub async fn ensure_stock_row<C>(
    conn: &C,
    product_id: Uuid,
    branch_id: Uuid,
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    let row = branch_inventory::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        branch_id: Set(branch_id),
        quantity: Set(0),
        min_stock_level: Set(None),
        max_stock_level: Set(None),
        version: Set(0),
        updated_at: Set(Utc::now()),
    };

    let result = BranchInventory::insert(row)
        .on_conflict(
            OnConflict::columns([StockColumn::ProductId, StockColumn::BranchId])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await;

    match result {
        Ok(_) | Err(DbErr::RecordNotInserted) => Ok(()),
        Err(e) => Err(ServiceError::db_error(e)),
    }
}

/// Applies `delta` to the (product, branch) row in one statement and records
/// a movement.
///
/// Negative deltas in [`AdjustMode::Guarded`] only match rows with enough
/// stock; no match is `InsufficientStock`. With `enforce_max` a positive
/// delta only matches rows that stay within `max_stock_level`; no match is
/// `StockLimitExceeded`. A positive delta that would overflow the stored
/// quantity is `StockLimitExceeded` in every mode.
#[instrument(skip(conn, movement))]
pub async fn apply_delta<C>(
    conn: &C,
    product_id: Uuid,
    branch_id: Uuid,
    delta: i32,
    mode: AdjustMode,
    enforce_max: bool,
    movement: Movement,
) -> Result<StockChange, ServiceError>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    let guarded_debit = mode == AdjustMode::Guarded && delta < 0;

    // A guarded debit never creates a row: no row means no stock
    if !guarded_debit {
        ensure_stock_row(conn, product_id, branch_id).await?;
    }

    let new_quantity: SimpleExpr = match mode {
        AdjustMode::Clamped => Expr::case(
            Expr::col(StockColumn::Quantity).lt(delta.saturating_neg()),
            0,
        )
        .finally(Expr::col(StockColumn::Quantity).add(delta))
        .into(),
        AdjustMode::Guarded => Expr::col(StockColumn::Quantity).add(delta),
    };

    let mut update = BranchInventory::update_many()
        .col_expr(StockColumn::Quantity, new_quantity)
        .col_expr(StockColumn::Version, Expr::col(StockColumn::Version).add(1))
        .col_expr(StockColumn::UpdatedAt, Expr::value(now))
        .filter(StockColumn::ProductId.eq(product_id))
        .filter(StockColumn::BranchId.eq(branch_id));

    if guarded_debit {
        update = update.filter(StockColumn::Quantity.gte(delta.saturating_neg()));
    }
    if delta > 0 {
        update = update.filter(StockColumn::Quantity.lte(i32::MAX - delta));
    }
    if enforce_max && delta > 0 {
        update = update.filter(
            Condition::any()
                .add(StockColumn::MaxStockLevel.is_null())
                .add(
                    Expr::col(StockColumn::MaxStockLevel)
                        .gte(Expr::col(StockColumn::Quantity).add(delta)),
                ),
        );
    }

    let result = update.exec(conn).await.map_err(ServiceError::db_error)?;

    if result.rows_affected == 0 {
        let current = find_stock_row(conn, product_id, branch_id).await?;
        return Err(rejection(product_id, branch_id, delta, current));
    }

    let row = find_stock_row(conn, product_id, branch_id)
        .await?
        .ok_or_else(|| {
            ServiceError::InternalError(format!(
                "Stock row for product {} at branch {} vanished after update",
                product_id, branch_id
            ))
        })?;

    InventoryMovement::insert(inventory_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        branch_id: Set(branch_id),
        kind: Set(movement.kind),
        requested_delta: Set(delta),
        quantity_after: Set(row.quantity),
        transfer_id: Set(movement.transfer_id),
        reason: Set(movement.reason),
        created_at: Set(now),
    })
    .exec_without_returning(conn)
    .await
    .map_err(ServiceError::db_error)?;

    debug!(
        %product_id, %branch_id, delta, quantity = row.quantity, version = row.version,
        "Stock change applied"
    );

    Ok(StockChange {
        product_id,
        branch_id,
        requested_delta: delta,
        quantity_after: row.quantity,
        version: row.version,
        min_stock_level: row.min_stock_level,
    })
}

fn rejection(
    product_id: Uuid,
    branch_id: Uuid,
    delta: i32,
    current: Option<branch_inventory::Model>,
) -> ServiceError {
    let available = current.as_ref().map(|row| row.quantity).unwrap_or(0);
    if delta < 0 {
        return ServiceError::InsufficientStock(format!(
            "product {} at branch {}: available {}, requested {}",
            product_id,
            branch_id,
            available,
            delta.unsigned_abs()
        ));
    }
    if i64::from(available) + i64::from(delta) > i64::from(i32::MAX) {
        return ServiceError::StockLimitExceeded(format!(
            "product {} at branch {}: {} + {} exceeds the largest storable quantity",
            product_id, branch_id, available, delta
        ));
    }
    match current.and_then(|row| row.max_stock_level) {
        Some(max) => ServiceError::StockLimitExceeded(format!(
            "product {} at branch {}: {} + {} exceeds max stock level {}",
            product_id, branch_id, available, delta, max
        )),
        None => ServiceError::ConcurrentModification(product_id),
    }
}

pub struct InventoryService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    enforce_max_stock_level: bool,
}

impl InventoryService {
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

    /// Adjusts one (product, branch) stock row atomically
    #[instrument(skip(self))]
    pub async fn adjust_stock(&self, mut command: AdjustStockCommand) -> Result<StockChange, ServiceError> {
        command.enforce_max_stock_level = self.enforce_max_stock_level;
        command
            .execute(self.db_pool.clone(), self.event_sender.clone())
            .await
    }

    #[instrument(skip(self))]
    pub async fn set_stock_levels(&self, command: SetStockLevelsCommand) -> Result<StockLevel, ServiceError> {
        command
            .execute(self.db_pool.clone(), self.event_sender.clone())
            .await
    }

    pub async fn get_stock_level(
        &self,
        product_id: Uuid,
        branch_id: Uuid,
    ) -> Result<StockLevel, ServiceError> {
        let db = self.db_pool.as_ref();
        require_branch(db, branch_id, false).await?;

        Ok(find_stock_row(db, product_id, branch_id)
            .await?
            .map(StockLevel::from)
            .unwrap_or_else(|| StockLevel::empty(product_id, branch_id)))
    }

    /// Stock rows of a branch, one page at a time (1-based page)
    pub async fn list_branch_stock(
        &self,
        branch_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<StockLevel>, u64), ServiceError> {
        let db = self.db_pool.as_ref();
        require_branch(db, branch_id, false).await?;

        let paginator = BranchInventory::find()
            .filter(StockColumn::BranchId.eq(branch_id))
            .order_by_asc(StockColumn::ProductId)
            .paginate(db, per_page);

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let rows = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;

        Ok((rows.into_iter().map(StockLevel::from).collect(), total))
    }

    /// Rows whose quantity is at or below their configured minimum
    pub async fn list_low_stock(&self, branch_id: Uuid) -> Result<Vec<StockLevel>, ServiceError> {
        let db = self.db_pool.as_ref();
        require_branch(db, branch_id, false).await?;

        let rows = BranchInventory::find()
            .filter(StockColumn::BranchId.eq(branch_id))
            .filter(StockColumn::MinStockLevel.is_not_null())
            .filter(Expr::col(StockColumn::Quantity).lte(Expr::col(StockColumn::MinStockLevel)))
            .order_by_asc(StockColumn::Quantity)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(rows.into_iter().map(StockLevel::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_floors_at_zero() {
        assert_eq!(clamp_quantity(10, -4), 6);
        assert_eq!(clamp_quantity(10, -15), 0);
        assert_eq!(clamp_quantity(0, i32::MIN), 0);
        assert_eq!(clamp_quantity(i32::MAX, 1), i32::MAX);
    }

    #[test]
    fn rejection_distinguishes_debits_from_limits() {
        let product = Uuid::new_v4();
        let branch = Uuid::new_v4();
        assert!(matches!(
            rejection(product, branch, -5, None),
            ServiceError::InsufficientStock(msg) if msg.contains("available 0, requested 5")
        ));

        let row = branch_inventory::Model {
            id: Uuid::new_v4(),
            product_id: product,
            branch_id: branch,
            quantity: 8,
            min_stock_level: None,
            max_stock_level: Some(10),
            version: 3,
            updated_at: Utc::now(),
        };
        assert!(matches!(
            rejection(product, branch, 5, Some(row)),
            ServiceError::StockLimitExceeded(msg) if msg.contains("max stock level 10")
        ));
    }

    #[test]
    fn default_mode_is_clamped() {
        assert_eq!(AdjustMode::default(), AdjustMode::Clamped);
        let mode: AdjustMode = serde_json::from_str("\"guarded\"").unwrap();
        assert_eq!(mode, AdjustMode::Guarded);
    }
}
