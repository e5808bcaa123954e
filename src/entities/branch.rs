use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A store location with its own stock counts
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "branches")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub name: String,
    /// Schema holding this branch's product rows; `None` means the shared scope
    pub isolated_schema: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::branch_inventory::Entity")]
    BranchInventory,
}

impl Related<super::branch_inventory::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BranchInventory.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
