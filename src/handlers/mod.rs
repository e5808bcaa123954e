use crate::services::{
    branches::BranchService, inventory::InventoryService, products::ProductService,
    transfers::TransferService,
};
use std::sync::Arc;

pub mod branches;
pub mod common;
pub mod health;
pub mod inventory;
pub mod products;
pub mod transfers;

/// Services shared by every handler
#[derive(Clone)]
pub struct AppServices {
    pub branches: Arc<BranchService>,
    pub inventory: Arc<InventoryService>,
    pub products: Arc<ProductService>,
    pub transfers: Arc<TransferService>,
}
