pub mod branch;
pub mod branch_inventory;
pub mod inventory_movement;
pub mod inventory_transfer;
pub mod inventory_transfer_line;
pub mod product;
