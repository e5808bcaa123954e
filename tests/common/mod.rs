#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, PaginatorTrait, QueryFilter, Statement,
};
use serde_json::Value;
use stockroom_api::{
    commands::inventory::adjust_stock_command::AdjustStockCommand,
    config::AppConfig,
    db::{self, DbPool},
    entities::{
        inventory_transfer::Entity as InventoryTransfer,
        inventory_transfer_line::Entity as InventoryTransferLine,
    },
    events::{self, EventSender},
    services::{
        branches::CreateBranchInput,
        inventory::AdjustMode,
        scope::SchemaName,
    },
    AppState,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// Application state and router over a private SQLite database.
///
/// [`TestApp::new`] uses an in-memory database on exactly one connection:
/// every `sqlite::memory:` connection is its own database, and isolated
/// branch scopes are attached per connection. [`TestApp::file_backed`] puts
/// the database in a temporary WAL file so several connections really write
/// at the same time.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
    _dir: Option<TempDir>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Shared-scope app over a temporary database file with a pool of
    /// `connections` connections.
    pub async fn file_backed(connections: u32) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("stockroom.db").display());
        Self::build(url, Some(dir), |cfg| {
            cfg.db_max_connections = connections;
        })
        .await
    }

    /// Builds the app after letting the caller tweak the configuration.
    pub async fn with_config(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        Self::build("sqlite::memory:".to_string(), None, tweak).await
    }

    async fn build(url: String, dir: Option<TempDir>, tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            url,
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        tweak(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        if dir.is_some() {
            pool.execute(Statement::from_string(
                DbBackend::Sqlite,
                "PRAGMA journal_mode = WAL".to_string(),
            ))
            .await
            .expect("switch to WAL");
        }

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let state = AppState::new(Arc::new(pool), cfg, EventSender::new(event_tx));
        let router = stockroom_api::build_router(state.clone());

        Self {
            router,
            state,
            _event_task: event_task,
            _dir: dir,
        }
    }

    pub fn db(&self) -> Arc<DbPool> {
        self.state.db.clone()
    }

    /// Creates an active branch sharing the default product storage.
    pub async fn branch(&self, code: &str) -> Uuid {
        self.create_branch(code, None).await
    }

    /// Creates an active branch with its own product schema.
    pub async fn isolated_branch(&self, code: &str, schema: &str) -> Uuid {
        let schema = SchemaName::parse(schema).expect("valid schema name");
        self.create_branch(code, Some(schema)).await
    }

    async fn create_branch(&self, code: &str, isolated_schema: Option<SchemaName>) -> Uuid {
        self.state
            .services
            .branches
            .create_branch(CreateBranchInput {
                code: code.to_string(),
                name: format!("Branch {}", code),
                isolated_schema,
            })
            .await
            .expect("create branch")
            .id
    }

    /// Puts `quantity` units of `product_id` on the shelf at `branch_id`.
    pub async fn seed_stock(&self, product_id: Uuid, branch_id: Uuid, quantity: i32) {
        self.state
            .services
            .inventory
            .adjust_stock(
                AdjustStockCommand::new(product_id, branch_id, quantity, AdjustMode::Guarded)
                    .with_reason("seed"),
            )
            .await
            .expect("seed stock");
    }

    pub async fn stock(&self, product_id: Uuid, branch_id: Uuid) -> i32 {
        self.state
            .services
            .inventory
            .get_stock_level(product_id, branch_id)
            .await
            .expect("read stock level")
            .quantity
    }

    pub async fn transfer_count(&self) -> u64 {
        InventoryTransfer::find()
            .count(self.state.db.as_ref())
            .await
            .expect("count transfers")
    }

    pub async fn line_count(&self, transfer_id: Uuid) -> u64 {
        InventoryTransferLine::find()
            .filter(
                stockroom_api::entities::inventory_transfer_line::Column::TransferId
                    .eq(transfer_id),
            )
            .count(self.state.db.as_ref())
            .await
            .expect("count transfer lines")
    }

    /// Sends a request through the full router and decodes the JSON body.
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.request_with_headers(method, uri, body, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("build request"))
            .await
            .expect("router response");

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}
