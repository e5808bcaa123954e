mod common;

use assert_matches::assert_matches;
use common::TestApp;
use stockroom_api::{
    commands::inventory::{
        adjust_stock_command::AdjustStockCommand, set_stock_levels_command::SetStockLevelsCommand,
    },
    commands::transfers::{create_transfer_command::CreateTransferCommand, TransferLineInput},
    entities::{
        branch_inventory::{Column as StockColumn, Entity as BranchInventory},
        inventory_transfer::TransferStatus,
    },
    errors::ServiceError,
    services::{branches::UpdateBranchInput, inventory::AdjustMode},
};
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

struct Shelf {
    app: TestApp,
    north: Uuid,
    south: Uuid,
    product: Uuid,
}

/// Two branches; `north` holds 10 units of one product.
async fn shelf() -> Shelf {
    shelf_with(TestApp::new().await).await
}

async fn shelf_with(app: TestApp) -> Shelf {
    let north = app.branch("NORTH").await;
    let south = app.branch("SOUTH").await;
    let product = Uuid::new_v4();
    app.seed_stock(product, north, 10).await;
    Shelf {
        app,
        north,
        south,
        product,
    }
}

#[tokio::test]
async fn transfer_moves_stock_and_records_one_header_and_line() {
    let s = shelf().await;

    let receipt = s
        .app
        .state
        .services
        .transfers
        .create_transfer(
            CreateTransferCommand::new(s.north, s.south, vec![TransferLineInput::new(s.product, 4)])
                .with_notes("weekend restock"),
        )
        .await
        .expect("transfer succeeds");

    assert_eq!(receipt.status, TransferStatus::Completed);
    assert!(!receipt.replayed);
    assert!(receipt.completed_at.is_some());
    assert_eq!(s.app.stock(s.product, s.north).await, 6);
    assert_eq!(s.app.stock(s.product, s.south).await, 4);
    assert_eq!(s.app.transfer_count().await, 1);
    assert_eq!(s.app.line_count(receipt.transfer_id).await, 1);

    let details = s
        .app
        .state
        .services
        .transfers
        .get_transfer(receipt.transfer_id)
        .await
        .unwrap();
    assert_eq!(details.transfer.notes.as_deref(), Some("weekend restock"));
    assert_eq!(details.lines[0].quantity, 4);
}

#[tokio::test]
async fn duplicate_lines_are_merged_before_applying() {
    let s = shelf().await;

    let receipt = s
        .app
        .state
        .services
        .transfers
        .create_transfer(CreateTransferCommand::new(
            s.north,
            s.south,
            vec![
                TransferLineInput::new(s.product, 3),
                TransferLineInput::new(s.product, 2),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(s.app.line_count(receipt.transfer_id).await, 1);
    assert_eq!(s.app.stock(s.product, s.north).await, 5);
    assert_eq!(s.app.stock(s.product, s.south).await, 5);
}

#[tokio::test]
async fn overdrawn_transfer_persists_nothing_while_clamped_adjustment_floors_at_zero() {
    let s = shelf().await;
    let transfers = &s.app.state.services.transfers;

    let err = transfers
        .create_transfer(CreateTransferCommand::new(
            s.north,
            s.south,
            vec![TransferLineInput::new(s.product, 15)],
        ))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));
    assert_eq!(s.app.transfer_count().await, 0);
    assert_eq!(s.app.stock(s.product, s.north).await, 10);
    assert_eq!(s.app.stock(s.product, s.south).await, 0);

    let change = s
        .app
        .state
        .services
        .inventory
        .adjust_stock(AdjustStockCommand::new(s.product, s.north, -15, AdjustMode::Clamped))
        .await
        .unwrap();
    assert_eq!(change.quantity_after, 0);
    assert_eq!(s.app.stock(s.product, s.north).await, 0);
}

#[tokio::test]
async fn guarded_adjustment_rejects_overdraw() {
    let s = shelf().await;

    let err = s
        .app
        .state
        .services
        .inventory
        .adjust_stock(AdjustStockCommand::new(s.product, s.north, -11, AdjustMode::Guarded))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));
    assert_eq!(s.app.stock(s.product, s.north).await, 10);
}

#[tokio::test]
async fn failing_second_line_rolls_back_the_first() {
    let s = shelf().await;
    let scarce = Uuid::new_v4();
    s.app.seed_stock(scarce, s.north, 1).await;

    let err = s
        .app
        .state
        .services
        .transfers
        .create_transfer(CreateTransferCommand::new(
            s.north,
            s.south,
            vec![
                TransferLineInput::new(s.product, 5),
                TransferLineInput::new(scarce, 2),
            ],
        ))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::InsufficientStock(_));
    assert_eq!(s.app.stock(s.product, s.north).await, 10);
    assert_eq!(s.app.stock(s.product, s.south).await, 0);
    assert_eq!(s.app.stock(scarce, s.north).await, 1);
    assert_eq!(s.app.transfer_count().await, 0);
}

#[tokio::test]
async fn same_branch_transfer_is_rejected() {
    let s = shelf().await;

    let err = s
        .app
        .state
        .services
        .transfers
        .create_transfer(CreateTransferCommand::new(
            s.north,
            s.north,
            vec![TransferLineInput::new(s.product, 1)],
        ))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::ValidationError(_));
    assert_eq!(s.app.transfer_count().await, 0);
    assert_eq!(s.app.stock(s.product, s.north).await, 10);
}

#[tokio::test]
async fn invalid_lines_are_rejected() {
    let s = shelf().await;
    let transfers = &s.app.state.services.transfers;

    for lines in [
        vec![],
        vec![TransferLineInput::new(s.product, 0)],
        vec![TransferLineInput::new(s.product, -3)],
    ] {
        let err = transfers
            .create_transfer(CreateTransferCommand::new(s.north, s.south, lines))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }
    assert_eq!(s.app.transfer_count().await, 0);
}

#[tokio::test]
async fn unknown_or_inactive_branch_is_rejected() {
    let s = shelf().await;
    let transfers = &s.app.state.services.transfers;

    let err = transfers
        .create_transfer(CreateTransferCommand::new(
            s.north,
            Uuid::new_v4(),
            vec![TransferLineInput::new(s.product, 1)],
        ))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    s.app
        .state
        .services
        .branches
        .update_branch(
            s.south,
            UpdateBranchInput {
                name: None,
                is_active: Some(false),
            },
        )
        .await
        .unwrap();

    let err = transfers
        .create_transfer(CreateTransferCommand::new(
            s.north,
            s.south,
            vec![TransferLineInput::new(s.product, 1)],
        ))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
    assert_eq!(s.app.stock(s.product, s.north).await, 10);
}

#[tokio::test]
async fn repeated_idempotency_key_replays_the_first_result() {
    let s = shelf().await;
    let transfers = &s.app.state.services.transfers;
    let command = || {
        CreateTransferCommand::new(s.north, s.south, vec![TransferLineInput::new(s.product, 3)])
            .with_idempotency_key("till-7-0001")
    };

    let first = transfers.create_transfer(command()).await.unwrap();
    let second = transfers.create_transfer(command()).await.unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.transfer_id, second.transfer_id);
    assert_eq!(s.app.transfer_count().await, 1);
    assert_eq!(s.app.stock(s.product, s.north).await, 7);
    assert_eq!(s.app.stock(s.product, s.south).await, 3);
}

#[tokio::test]
async fn reused_idempotency_key_with_different_payload_conflicts() {
    let s = shelf().await;
    let transfers = &s.app.state.services.transfers;

    transfers
        .create_transfer(
            CreateTransferCommand::new(s.north, s.south, vec![TransferLineInput::new(s.product, 3)])
                .with_idempotency_key("till-7-0002"),
        )
        .await
        .unwrap();

    let err = transfers
        .create_transfer(
            CreateTransferCommand::new(s.north, s.south, vec![TransferLineInput::new(s.product, 4)])
                .with_idempotency_key("till-7-0002"),
        )
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::Conflict(_));
    assert_eq!(s.app.stock(s.product, s.north).await, 7);
}

#[tokio::test]
async fn pending_transfer_moves_stock_only_when_completed() {
    let s = shelf().await;
    let transfers = &s.app.state.services.transfers;

    let pending = transfers
        .create_transfer(
            CreateTransferCommand::new(s.north, s.south, vec![TransferLineInput::new(s.product, 6)])
                .pending(),
        )
        .await
        .unwrap();
    assert_eq!(pending.status, TransferStatus::Pending);
    assert!(pending.completed_at.is_none());
    assert_eq!(s.app.stock(s.product, s.north).await, 10);

    let completed = transfers.complete_transfer(pending.transfer_id).await.unwrap();
    assert_eq!(completed.status, TransferStatus::Completed);
    assert!(completed.completed_at.is_some());
    assert_eq!(s.app.stock(s.product, s.north).await, 4);
    assert_eq!(s.app.stock(s.product, s.south).await, 6);

    let err = transfers.complete_transfer(pending.transfer_id).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidStatus(_));
    let err = transfers.cancel_transfer(pending.transfer_id).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidStatus(_));
    assert_eq!(s.app.stock(s.product, s.north).await, 4);
}

#[tokio::test]
async fn cancelled_transfer_never_moves_stock() {
    let s = shelf().await;
    let transfers = &s.app.state.services.transfers;

    let pending = transfers
        .create_transfer(
            CreateTransferCommand::new(s.north, s.south, vec![TransferLineInput::new(s.product, 2)])
                .pending(),
        )
        .await
        .unwrap();

    let cancelled = transfers.cancel_transfer(pending.transfer_id).await.unwrap();
    assert_eq!(cancelled.status, TransferStatus::Cancelled);

    let err = transfers.complete_transfer(pending.transfer_id).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidStatus(_));
    assert_eq!(s.app.stock(s.product, s.north).await, 10);
    assert_eq!(s.app.stock(s.product, s.south).await, 0);
}

#[tokio::test]
async fn completing_an_overdrawn_pending_transfer_keeps_it_pending() {
    let s = shelf().await;
    let transfers = &s.app.state.services.transfers;

    let pending = transfers
        .create_transfer(
            CreateTransferCommand::new(s.north, s.south, vec![TransferLineInput::new(s.product, 8)])
                .pending(),
        )
        .await
        .unwrap();

    s.app
        .state
        .services
        .inventory
        .adjust_stock(AdjustStockCommand::new(s.product, s.north, -5, AdjustMode::Guarded))
        .await
        .unwrap();

    let err = transfers.complete_transfer(pending.transfer_id).await.unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    let details = transfers.get_transfer(pending.transfer_id).await.unwrap();
    assert_eq!(details.transfer.status, TransferStatus::Pending);
    assert_eq!(s.app.stock(s.product, s.north).await, 5);
}

#[tokio::test]
async fn unknown_transfer_is_not_found() {
    let s = shelf().await;
    let err = s
        .app
        .state
        .services
        .transfers
        .complete_transfer(Uuid::new_v4())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn destination_max_level_is_enforced_when_configured() {
    let app = TestApp::with_config(|cfg| cfg.enforce_max_stock_level = true).await;
    let s = shelf_with(app).await;
    s.app.seed_stock(s.product, s.south, 5).await;

    s.app
        .state
        .services
        .inventory
        .set_stock_levels(SetStockLevelsCommand {
            product_id: s.product,
            branch_id: s.south,
            min_stock_level: None,
            max_stock_level: Some(8),
        })
        .await
        .unwrap();

    let transfers = &s.app.state.services.transfers;
    let err = transfers
        .create_transfer(CreateTransferCommand::new(
            s.north,
            s.south,
            vec![TransferLineInput::new(s.product, 4)],
        ))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::StockLimitExceeded(_));
    assert_eq!(s.app.stock(s.product, s.north).await, 10);
    assert_eq!(s.app.stock(s.product, s.south).await, 5);

    transfers
        .create_transfer(CreateTransferCommand::new(
            s.north,
            s.south,
            vec![TransferLineInput::new(s.product, 3)],
        ))
        .await
        .unwrap();
    assert_eq!(s.app.stock(s.product, s.south).await, 8);
}

#[tokio::test]
async fn transfers_are_listed_newest_first_per_branch() {
    let s = shelf().await;
    let transfers = &s.app.state.services.transfers;
    let east = s.app.branch("EAST").await;

    for (destination, quantity) in [(s.south, 1), (east, 2), (s.south, 3)] {
        transfers
            .create_transfer(CreateTransferCommand::new(
                s.north,
                destination,
                vec![TransferLineInput::new(s.product, quantity)],
            ))
            .await
            .unwrap();
    }

    let (all, total) = transfers
        .list_transfers(Default::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(total, 3);
    assert_eq!(all.len(), 3);

    let (east_only, total) = transfers
        .list_transfers(
            stockroom_api::services::transfers::TransferFilter {
                branch_id: Some(east),
                status: None,
            },
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(east_only[0].destination_branch_id, east);
    assert_eq!(s.app.stock(s.product, s.north).await, 4);
}

#[tokio::test]
async fn credit_past_the_storable_maximum_is_a_stock_limit() {
    let s = shelf().await;
    s.app.seed_stock(s.product, s.south, 1).await;
    BranchInventory::update_many()
        .col_expr(StockColumn::Quantity, Expr::value(i32::MAX - 2))
        .filter(StockColumn::ProductId.eq(s.product))
        .filter(StockColumn::BranchId.eq(s.south))
        .exec(s.app.db().as_ref())
        .await
        .unwrap();

    let err = s
        .app
        .state
        .services
        .transfers
        .create_transfer(CreateTransferCommand::new(
            s.north,
            s.south,
            vec![TransferLineInput::new(s.product, 4)],
        ))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::StockLimitExceeded(_));
    assert_eq!(s.app.stock(s.product, s.north).await, 10);
    assert_eq!(s.app.stock(s.product, s.south).await, i32::MAX - 2);

    let err = s
        .app
        .state
        .services
        .inventory
        .adjust_stock(AdjustStockCommand::new(s.product, s.south, 3, AdjustMode::Clamped))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::StockLimitExceeded(_));

    s.app
        .state
        .services
        .inventory
        .adjust_stock(AdjustStockCommand::new(s.product, s.south, 2, AdjustMode::Clamped))
        .await
        .unwrap();
    assert_eq!(s.app.stock(s.product, s.south).await, i32::MAX);
}
