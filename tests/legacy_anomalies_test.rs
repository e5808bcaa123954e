//! The unguarded transfer path still in use by older tills. These tests pin
//! down the anomalies the atomic path exists to remove.

mod common;

use assert_matches::assert_matches;
use async_trait::async_trait;
use common::TestApp;
use std::sync::atomic::{AtomicUsize, Ordering};
use stockroom_api::{
    errors::ServiceError,
    services::legacy_transfer::{
        LegacyStockAdjuster, LegacyTransferLine, LegacyTransferOrchestrator,
        LegacyTransferRequest, StockAdjuster,
    },
};
use uuid::Uuid;

/// Delegates to the real adjuster but fails the Nth call (1-based).
struct FailOnCall {
    inner: LegacyStockAdjuster,
    fail_on: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl StockAdjuster for FailOnCall {
    async fn adjust(&self, product_id: Uuid, branch_id: Uuid, delta: i32) -> Result<i32, ServiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(ServiceError::InternalError("connection reset".to_string()));
        }
        self.inner.adjust(product_id, branch_id, delta).await
    }
}

fn request(source: Uuid, destination: Uuid, product: Uuid, quantity: f64) -> LegacyTransferRequest {
    LegacyTransferRequest {
        source_branch_id: source,
        destination_branch_id: destination,
        notes: None,
        lines: vec![LegacyTransferLine {
            product_id: product,
            quantity,
        }],
    }
}

#[tokio::test]
async fn interleaved_read_then_write_loses_an_update() {
    let app = TestApp::new().await;
    let branch = app.branch("NORTH").await;
    let product = Uuid::new_v4();
    app.seed_stock(product, branch, 10).await;

    let adjuster = LegacyStockAdjuster::new(app.db());
    let first = adjuster.read(product, branch, -3).await.unwrap();
    let second = adjuster.read(product, branch, -4).await.unwrap();
    assert_eq!(first.observed, 10);
    assert_eq!(second.observed, 10);

    adjuster.write(first).await.unwrap();
    adjuster.write(second).await.unwrap();

    // Both sales happened, but only the second one is reflected
    assert_eq!(app.stock(product, branch).await, 6);
}

#[tokio::test]
async fn legacy_adjuster_clamps_at_zero() {
    let app = TestApp::new().await;
    let branch = app.branch("NORTH").await;
    let product = Uuid::new_v4();
    app.seed_stock(product, branch, 2).await;

    let adjuster = LegacyStockAdjuster::new(app.db());
    assert_eq!(adjuster.adjust(product, branch, -5).await.unwrap(), 0);
    assert_eq!(adjuster.adjust(Uuid::new_v4(), branch, 4).await.unwrap(), 4);
    assert_eq!(app.stock(product, branch).await, 0);
}

#[tokio::test]
async fn retry_after_partial_failure_double_debits_the_source() {
    let app = TestApp::new().await;
    let north = app.branch("NORTH").await;
    let south = app.branch("SOUTH").await;
    let product = Uuid::new_v4();
    app.seed_stock(product, north, 10).await;

    // Call 1 debits the source, call 2 (the destination credit) fails
    let flaky = LegacyTransferOrchestrator::with_adjuster(
        app.db(),
        FailOnCall {
            inner: LegacyStockAdjuster::new(app.db()),
            fail_on: 2,
            calls: AtomicUsize::new(0),
        },
    );
    let req = request(north, south, product, 4.0);

    let err = flaky.apply_transfer(&req).await.unwrap_err();
    assert_matches!(err, ServiceError::InternalError(_));
    assert_eq!(flaky.adjuster().calls.load(Ordering::SeqCst), 2);
    assert_eq!(app.stock(product, north).await, 6);
    assert_eq!(app.stock(product, south).await, 0);
    assert_eq!(app.transfer_count().await, 1);

    let retry = LegacyTransferOrchestrator::new(app.db());
    retry.apply_transfer(&req).await.unwrap();

    assert_eq!(app.stock(product, north).await, 2);
    assert_eq!(app.stock(product, south).await, 4);
    assert_eq!(app.transfer_count().await, 2);
}

#[tokio::test]
async fn legacy_path_accepts_same_branch_and_floors_fractional_quantities() {
    let app = TestApp::new().await;
    let north = app.branch("NORTH").await;
    let product = Uuid::new_v4();
    app.seed_stock(product, north, 10).await;

    let orchestrator = LegacyTransferOrchestrator::new(app.db());
    let transfer_id = orchestrator
        .apply_transfer(&request(north, north, product, 3.9))
        .await
        .unwrap();

    // Debit then credit of the same row nets to zero
    assert_eq!(app.stock(product, north).await, 10);
    assert_eq!(app.line_count(transfer_id).await, 1);

    let details = app
        .state
        .services
        .transfers
        .get_transfer(transfer_id)
        .await
        .unwrap();
    assert_eq!(details.lines[0].quantity, 3);
}
