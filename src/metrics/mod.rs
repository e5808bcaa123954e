/*!
 * # Metrics
 *
 * Prometheus counters for stock mutations, transfers and scope routing,
 * exposed in text format at `/metrics`.
 */

use axum::{http::header, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::errors::ServiceError;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref STOCK_ADJUSTMENTS: IntCounterVec = register_counter_vec(
        "stock_adjustments_total",
        "Stock adjustments applied, by mode",
        &["mode"],
    );
    pub static ref STOCK_ADJUSTMENT_FAILURES: IntCounterVec = register_counter_vec(
        "stock_adjustment_failures_total",
        "Stock adjustments rejected, by reason",
        &["reason"],
    );
    pub static ref TRANSFERS_CREATED: IntCounter = register_counter(
        "inventory_transfers_created_total",
        "Transfers accepted and persisted",
    );
    pub static ref TRANSFERS_COMPLETED: IntCounter = register_counter(
        "inventory_transfers_completed_total",
        "Transfers whose stock movement was applied",
    );
    pub static ref TRANSFERS_CANCELLED: IntCounter = register_counter(
        "inventory_transfers_cancelled_total",
        "Transfers cancelled before completion",
    );
    pub static ref TRANSFER_FAILURES: IntCounterVec = register_counter_vec(
        "inventory_transfer_failures_total",
        "Transfers rejected or rolled back, by reason",
        &["reason"],
    );
    pub static ref TRANSFER_REPLAYS: IntCounter = register_counter(
        "inventory_transfer_replays_total",
        "Transfer submissions answered from an earlier idempotent request",
    );
    pub static ref LEGACY_WRITES: IntCounter = register_counter(
        "legacy_stock_writes_total",
        "Unguarded read-then-write stock updates",
    );
    pub static ref SCOPE_LOOKUPS: IntCounterVec = register_counter_vec(
        "data_scope_lookups_total",
        "Branch data scope resolutions, by cache outcome",
        &["outcome"],
    );
}

fn register_counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric can be created");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric can be registered");
    counter
}

fn register_counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), labels).expect("metric can be created");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric can be registered");
    counter
}

/// Classifies a service error into a low-cardinality label value
pub fn failure_reason(err: &ServiceError) -> &'static str {
    match err {
        ServiceError::ValidationError(_) => "validation",
        ServiceError::NotFound(_) => "not_found",
        ServiceError::InsufficientStock(_) => "insufficient_stock",
        ServiceError::StockLimitExceeded(_) => "stock_limit",
        ServiceError::Conflict(_) | ServiceError::ConcurrentModification(_) => "conflict",
        ServiceError::InvalidStatus(_) | ServiceError::InvalidOperation(_) => "invalid_state",
        _ => "internal",
    }
}

/// Renders every registered metric in the Prometheus text format
pub fn render() -> Result<String, ServiceError> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| ServiceError::InternalError(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| ServiceError::InternalError(format!("Metrics are not UTF-8: {}", e)))
}

/// `GET /metrics`
pub async fn metrics_handler() -> Result<impl IntoResponse, ServiceError> {
    let body = render()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
