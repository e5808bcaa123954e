/*!
 * Inter-branch transfer commands
 *
 * A transfer moves stock between two branches. Its header starts `pending`
 * and ends `completed` or `cancelled`; the create command can complete it in
 * the same transaction. Stock moves only on completion, line by line, with a
 * guarded debit at the source and an upsert-increment at the destination.
 */

use crate::{
    entities::{
        inventory_movement::MovementKind,
        inventory_transfer::{self, Column as TransferColumn, Entity as InventoryTransfer, TransferStatus},
        inventory_transfer_line::{self, Entity as InventoryTransferLine},
    },
    errors::ServiceError,
    services::inventory::{apply_delta, AdjustMode, Movement},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;
use validator::Validate;

pub mod cancel_transfer_command;
pub mod complete_transfer_command;
pub mod create_transfer_command;

/// Largest quantity a single (merged) line may carry
pub const MAX_LINE_QUANTITY: i32 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct TransferLineInput {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 1000000, message = "Quantity must be between 1 and 1000000"))]
    pub quantity: i32,
}

impl TransferLineInput {
    pub fn new(product_id: Uuid, quantity: i32) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// What a transfer submission or transition returns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transfer_id: Uuid,
    pub status: TransferStatus,
    /// True when an earlier request with the same idempotency key produced
    /// this transfer and nothing was applied this time
    pub replayed: bool,
    pub source_branch_id: Uuid,
    pub destination_branch_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransferReceipt {
    pub fn from_header(header: &inventory_transfer::Model, replayed: bool) -> Self {
        Self {
            transfer_id: header.id,
            status: header.status,
            replayed,
            source_branch_id: header.source_branch_id,
            destination_branch_id: header.destination_branch_id,
            created_at: header.created_at,
            completed_at: header.completed_at,
        }
    }
}

/// Validates lines and merges duplicates by product. The result is ordered
/// by product id so concurrent transfers lock rows in the same order.
pub fn merge_lines(lines: &[TransferLineInput]) -> Result<Vec<(Uuid, i32)>, ServiceError> {
    if lines.is_empty() {
        return Err(ServiceError::ValidationError(
            "A transfer needs at least one line".to_string(),
        ));
    }

    let mut merged: BTreeMap<Uuid, i32> = BTreeMap::new();
    for (index, line) in lines.iter().enumerate() {
        line.validate().map_err(|e| {
            ServiceError::ValidationError(format!("Line {}: {}", index + 1, e))
        })?;

        let total = merged.entry(line.product_id).or_insert(0);
        *total = total
            .checked_add(line.quantity)
            .filter(|q| *q <= MAX_LINE_QUANTITY)
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "Combined quantity for product {} exceeds {}",
                    line.product_id, MAX_LINE_QUANTITY
                ))
            })?;
    }

    Ok(merged.into_iter().collect())
}

#[derive(Serialize)]
struct Fingerprint<'a> {
    source_branch_id: Uuid,
    destination_branch_id: Uuid,
    notes: Option<&'a str>,
    apply: bool,
    lines: &'a [(Uuid, i32)],
}

/// SHA-256 over the canonical (merged) request, hex encoded
pub fn request_fingerprint(
    source_branch_id: Uuid,
    destination_branch_id: Uuid,
    notes: Option<&str>,
    apply: bool,
    merged_lines: &[(Uuid, i32)],
) -> Result<String, ServiceError> {
    let canonical = serde_json::to_vec(&Fingerprint {
        source_branch_id,
        destination_branch_id,
        notes,
        apply,
        lines: merged_lines,
    })
    .map_err(|e| ServiceError::InternalError(format!("Failed to encode request: {}", e)))?;

    Ok(hex::encode(Sha256::digest(&canonical)))
}

pub async fn find_by_idempotency_key<C>(
    conn: &C,
    key: &str,
) -> Result<Option<inventory_transfer::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    InventoryTransfer::find()
        .filter(TransferColumn::IdempotencyKey.eq(key))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// Answers a repeated submission: same payload replays, anything else conflicts
pub fn replay_or_conflict(
    existing: &inventory_transfer::Model,
    key: &str,
    fingerprint: &str,
) -> Result<TransferReceipt, ServiceError> {
    if existing.request_hash.as_deref() == Some(fingerprint) {
        Ok(TransferReceipt::from_header(existing, true))
    } else {
        Err(ServiceError::Conflict(format!(
            "Idempotency key '{}' was already used for a different transfer request",
            key
        )))
    }
}

pub async fn load_lines<C>(
    conn: &C,
    transfer_id: Uuid,
) -> Result<Vec<inventory_transfer_line::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    InventoryTransferLine::find()
        .filter(inventory_transfer_line::Column::TransferId.eq(transfer_id))
        .order_by_asc(inventory_transfer_line::Column::ProductId)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// Moves every line from source to destination. Returns the units moved.
pub async fn apply_transfer_lines<C>(
    conn: &C,
    transfer_id: Uuid,
    source_branch_id: Uuid,
    destination_branch_id: Uuid,
    lines: &[(Uuid, i32)],
    enforce_max: bool,
) -> Result<i64, ServiceError>
where
    C: ConnectionTrait,
{
    let mut units: i64 = 0;
    for (product_id, quantity) in lines {
        apply_delta(
            conn,
            *product_id,
            source_branch_id,
            -*quantity,
            AdjustMode::Guarded,
            false,
            Movement::transfer(MovementKind::TransferOut, transfer_id),
        )
        .await?;

        apply_delta(
            conn,
            *product_id,
            destination_branch_id,
            *quantity,
            AdjustMode::Guarded,
            enforce_max,
            Movement::transfer(MovementKind::TransferIn, transfer_id),
        )
        .await?;

        units += i64::from(*quantity);
    }
    debug!(%transfer_id, units, lines = lines.len(), "Transfer lines applied");
    Ok(units)
}

/// Moves a header out of `pending` with a compare-and-set on its status, so
/// of two concurrent transitions exactly one wins.
pub async fn transition_status<C>(
    conn: &C,
    transfer_id: Uuid,
    next: TransferStatus,
) -> Result<inventory_transfer::Model, ServiceError>
where
    C: ConnectionTrait,
{
    let header = find_header(conn, transfer_id).await?;
    if !header.status.can_transition_to(next) {
        return Err(invalid_transition(&header, next));
    }

    let now = Utc::now();
    let mut update = InventoryTransfer::update_many()
        .col_expr(TransferColumn::Status, Expr::value(next))
        .col_expr(TransferColumn::UpdatedAt, Expr::value(now));
    if next == TransferStatus::Completed {
        update = update.col_expr(TransferColumn::CompletedAt, Expr::value(now));
    }

    let result = update
        .filter(TransferColumn::Id.eq(transfer_id))
        .filter(TransferColumn::Status.eq(header.status))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    let current = find_header(conn, transfer_id).await?;
    if result.rows_affected == 0 {
        return Err(invalid_transition(&current, next));
    }
    Ok(current)
}

async fn find_header<C>(conn: &C, transfer_id: Uuid) -> Result<inventory_transfer::Model, ServiceError>
where
    C: ConnectionTrait,
{
    InventoryTransfer::find_by_id(transfer_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Transfer {} not found", transfer_id)))
}

fn invalid_transition(header: &inventory_transfer::Model, next: TransferStatus) -> ServiceError {
    ServiceError::InvalidStatus(format!(
        "Transfer {} is {}; cannot move to {}",
        header.id, header.status, next
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn merge_sums_duplicate_products_in_id_order() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let merged = merge_lines(&[
            TransferLineInput::new(b, 2),
            TransferLineInput::new(a, 3),
            TransferLineInput::new(b, 5),
        ])
        .unwrap();
        assert_eq!(merged, vec![(a, 3), (b, 7)]);
    }

    #[test]
    fn merge_rejects_empty_and_non_positive_lines() {
        assert_matches!(merge_lines(&[]), Err(ServiceError::ValidationError(_)));
        assert_matches!(
            merge_lines(&[TransferLineInput::new(Uuid::new_v4(), 0)]),
            Err(ServiceError::ValidationError(msg)) if msg.starts_with("Line 1")
        );
        assert_matches!(
            merge_lines(&[TransferLineInput::new(Uuid::new_v4(), -4)]),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn merge_rejects_combined_overflow() {
        let p = Uuid::new_v4();
        let result = merge_lines(&[
            TransferLineInput::new(p, MAX_LINE_QUANTITY),
            TransferLineInput::new(p, 1),
        ]);
        assert_matches!(result, Err(ServiceError::ValidationError(msg)) if msg.contains("Combined"));
    }

    #[test]
    fn fingerprint_ignores_line_order_after_merge() {
        let (src, dst) = (Uuid::new_v4(), Uuid::new_v4());
        let a = Uuid::from_u128(10);
        let b = Uuid::from_u128(20);

        let first = merge_lines(&[TransferLineInput::new(a, 1), TransferLineInput::new(b, 2)]).unwrap();
        let second = merge_lines(&[TransferLineInput::new(b, 2), TransferLineInput::new(a, 1)]).unwrap();
        assert_eq!(
            request_fingerprint(src, dst, Some("restock"), true, &first).unwrap(),
            request_fingerprint(src, dst, Some("restock"), true, &second).unwrap()
        );

        let changed = merge_lines(&[TransferLineInput::new(a, 2), TransferLineInput::new(b, 2)]).unwrap();
        assert_ne!(
            request_fingerprint(src, dst, Some("restock"), true, &first).unwrap(),
            request_fingerprint(src, dst, Some("restock"), true, &changed).unwrap()
        );
        assert_ne!(
            request_fingerprint(src, dst, Some("restock"), true, &first).unwrap(),
            request_fingerprint(src, dst, Some("restock"), false, &first).unwrap()
        );
    }

    #[test]
    fn replay_requires_matching_hash() {
        let now = Utc::now();
        let header = inventory_transfer::Model {
            id: Uuid::new_v4(),
            source_branch_id: Uuid::new_v4(),
            destination_branch_id: Uuid::new_v4(),
            notes: None,
            status: TransferStatus::Completed,
            idempotency_key: Some("k-1".into()),
            request_hash: Some("abc".into()),
            created_at: now,
            updated_at: now,
            completed_at: Some(now),
        };

        let receipt = replay_or_conflict(&header, "k-1", "abc").unwrap();
        assert!(receipt.replayed);
        assert_eq!(receipt.transfer_id, header.id);

        assert_matches!(
            replay_or_conflict(&header, "k-1", "def"),
            Err(ServiceError::Conflict(_))
        );
    }
}
