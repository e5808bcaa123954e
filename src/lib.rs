//! Stockroom API
//!
//! Back office for a multi-branch retail point of sale: per-branch stock
//! levels, atomic inter-branch transfers and branch-scoped product storage.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

use axum::{routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::warn;

pub mod commands;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod migrator;
pub mod services;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    handlers::AppServices,
    services::{
        branches::BranchService, inventory::InventoryService, products::ProductService,
        scope::ScopeResolver, transfers::TransferService,
    },
};

/// Shared application state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: Arc<AppConfig>,
    pub event_sender: Arc<EventSender>,
    pub services: AppServices,
}

impl AppState {
    /// Wires every service onto one pool and one event channel.
    pub fn new(db: Arc<DbPool>, config: AppConfig, event_sender: EventSender) -> Self {
        let event_sender = Arc::new(event_sender);
        let enforce_max = config.enforce_max_stock_level;
        let resolver = Arc::new(ScopeResolver::new(
            db.clone(),
            config.sqlite_scope_dir.as_ref().map(PathBuf::from),
        ));

        let services = AppServices {
            branches: Arc::new(BranchService::new(
                db.clone(),
                event_sender.clone(),
                resolver.clone(),
            )),
            inventory: Arc::new(InventoryService::new(
                db.clone(),
                event_sender.clone(),
                enforce_max,
            )),
            products: Arc::new(ProductService::new(db.clone(), resolver)),
            transfers: Arc::new(TransferService::new(
                db.clone(),
                event_sender.clone(),
                enforce_max,
            )),
        };

        Self {
            db,
            config: Arc::new(config),
            event_sender,
            services,
        }
    }
}

/// Envelope for every successful JSON response
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    pub meta: ResponseMeta,
}

#[derive(Serialize)]
pub struct ResponseMeta {
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
            meta: ResponseMeta::capture(),
        }
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Routes served under `/api/v1`
pub fn api_v1_routes() -> Router<AppState> {
    let branch_routes = handlers::branches::branches_router()
        .merge(handlers::inventory::inventory_router())
        .merge(handlers::products::products_router());

    Router::new()
        .nest("/transfers", handlers::transfers::transfers_router())
        .nest("/branches", branch_routes)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<http::HeaderValue> = config
        .cors_allowed_origins
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if !origins.is_empty() {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if config.is_development() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    }
}

/// Full application router with health probes, metrics and middleware
pub fn build_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs.max(1));
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(handlers::health::liveness))
        .route("/health/ready", get(handlers::health::readiness))
        .route("/metrics", get(metrics::metrics_handler))
        .nest("/api/v1", api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[test]
    fn success_response_carries_timestamp() {
        let response = ApiResponse::success("ok");
        assert!(response.success);
        assert_eq!(response.data, "ok");
        assert!(DateTime::parse_from_rfc3339(&response.meta.timestamp).is_ok());
    }
}
