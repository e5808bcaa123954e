pub mod branches;
pub mod inventory;
pub mod legacy_transfer;
pub mod products;
pub mod scope;
pub mod transfers;
