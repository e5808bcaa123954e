use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_branches_table::Migration),
            Box::new(m20240301_000002_create_products_table::Migration),
            Box::new(m20240301_000003_create_branch_inventory_table::Migration),
            Box::new(m20240301_000004_create_inventory_transfers_table::Migration),
            Box::new(m20240301_000005_create_inventory_transfer_lines_table::Migration),
            Box::new(m20240301_000006_create_inventory_movements_table::Migration),
        ]
    }
}

#[derive(DeriveIden)]
pub enum Products {
    Table,
    Id,
    Sku,
    Name,
    Price,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

/// `CREATE TABLE IF NOT EXISTS` for a product table. The shared scope and
/// every isolated branch schema use the same shape.
pub fn products_table(table: impl IntoTableRef) -> TableCreateStatement {
    Table::create()
        .table(table)
        .if_not_exists()
        .col(ColumnDef::new(Products::Id).uuid().not_null().primary_key())
        .col(ColumnDef::new(Products::Sku).string().not_null())
        .col(ColumnDef::new(Products::Name).string().not_null())
        // SQLite rejects decimal precision above 16
        .col(
            ColumnDef::new(Products::Price)
                .decimal_len(16, 4)
                .not_null()
                .default(0),
        )
        .col(
            ColumnDef::new(Products::IsActive)
                .boolean()
                .not_null()
                .default(true),
        )
        .col(
            ColumnDef::new(Products::CreatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(
            ColumnDef::new(Products::UpdatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .to_owned()
}

mod m20240301_000001_create_branches_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_branches_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Branches::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Branches::Id).uuid().not_null().primary_key())
                        .col(
                            ColumnDef::new(Branches::Code)
                                .string_len(32)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Branches::Name).string().not_null())
                        .col(
                            ColumnDef::new(Branches::IsolatedSchema)
                                .string_len(63)
                                .null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Branches::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Branches::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Branches::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Branches::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Branches {
        Table,
        Id,
        Code,
        Name,
        IsolatedSchema,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000002_create_products_table {
    use super::{products_table, Products};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_products_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager.create_table(products_table(Products::Table)).await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_products_sku")
                        .table(Products::Table)
                        .col(Products::Sku)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }
}

mod m20240301_000003_create_branch_inventory_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_branch_inventory_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(BranchInventory::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(BranchInventory::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(BranchInventory::ProductId).uuid().not_null())
                        .col(ColumnDef::new(BranchInventory::BranchId).uuid().not_null())
                        .col(
                            ColumnDef::new(BranchInventory::Quantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(BranchInventory::MinStockLevel).integer().null())
                        .col(ColumnDef::new(BranchInventory::MaxStockLevel).integer().null())
                        .col(
                            ColumnDef::new(BranchInventory::Version)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(BranchInventory::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_branch_inventory_branch")
                                .from(BranchInventory::Table, BranchInventory::BranchId)
                                .to(Branches::Table, Branches::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // Required by the destination upsert (ON CONFLICT target)
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_branch_inventory_product_branch")
                        .table(BranchInventory::Table)
                        .col(BranchInventory::ProductId)
                        .col(BranchInventory::BranchId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_branch_inventory_branch")
                        .table(BranchInventory::Table)
                        .col(BranchInventory::BranchId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(BranchInventory::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum BranchInventory {
        Table,
        Id,
        ProductId,
        BranchId,
        Quantity,
        MinStockLevel,
        MaxStockLevel,
        Version,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Branches {
        Table,
        Id,
    }
}

mod m20240301_000004_create_inventory_transfers_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_inventory_transfers_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryTransfers::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryTransfers::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(InventoryTransfers::SourceBranchId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryTransfers::DestinationBranchId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryTransfers::Notes).text().null())
                        .col(
                            ColumnDef::new(InventoryTransfers::Status)
                                .string_len(20)
                                .not_null()
                                .default("pending"),
                        )
                        .col(
                            ColumnDef::new(InventoryTransfers::IdempotencyKey)
                                .string_len(128)
                                .null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(InventoryTransfers::RequestHash)
                                .string_len(64)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(InventoryTransfers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryTransfers::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryTransfers::CompletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_transfers_status")
                        .table(InventoryTransfers::Table)
                        .col(InventoryTransfers::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryTransfers::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryTransfers {
        Table,
        Id,
        SourceBranchId,
        DestinationBranchId,
        Notes,
        Status,
        IdempotencyKey,
        RequestHash,
        CreatedAt,
        UpdatedAt,
        CompletedAt,
    }
}

mod m20240301_000005_create_inventory_transfer_lines_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000005_create_inventory_transfer_lines_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryTransferLines::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryTransferLines::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(InventoryTransferLines::TransferId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryTransferLines::ProductId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryTransferLines::Quantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryTransferLines::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_transfer_lines_transfer")
                                .from(
                                    InventoryTransferLines::Table,
                                    InventoryTransferLines::TransferId,
                                )
                                .to(InventoryTransfers::Table, InventoryTransfers::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_transfer_lines_transfer")
                        .table(InventoryTransferLines::Table)
                        .col(InventoryTransferLines::TransferId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryTransferLines::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryTransferLines {
        Table,
        Id,
        TransferId,
        ProductId,
        Quantity,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum InventoryTransfers {
        Table,
        Id,
    }
}

mod m20240301_000006_create_inventory_movements_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000006_create_inventory_movements_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryMovements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryMovements::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(InventoryMovements::ProductId).uuid().not_null())
                        .col(ColumnDef::new(InventoryMovements::BranchId).uuid().not_null())
                        .col(
                            ColumnDef::new(InventoryMovements::Kind)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryMovements::RequestedDelta)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryMovements::QuantityAfter)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryMovements::TransferId).uuid().null())
                        .col(ColumnDef::new(InventoryMovements::Reason).string().null())
                        .col(
                            ColumnDef::new(InventoryMovements::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_movements_product_branch")
                        .table(InventoryMovements::Table)
                        .col(InventoryMovements::ProductId)
                        .col(InventoryMovements::BranchId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_movements_transfer")
                        .table(InventoryMovements::Table)
                        .col(InventoryMovements::TransferId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryMovements::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryMovements {
        Table,
        Id,
        ProductId,
        BranchId,
        Kind,
        RequestedDelta,
        QuantityAfter,
        TransferId,
        Reason,
        CreatedAt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::sea_orm::{ConnectOptions, Database, DbBackend, Statement};

    #[test]
    fn products_table_builds_for_sqlite() {
        let sql = products_table(Products::Table).to_string(SqliteQueryBuilder);
        assert!(sql.contains(r#""price" real(16, 4) NOT NULL"#), "{sql}");
    }

    #[tokio::test]
    async fn migrations_apply_on_in_memory_sqlite() {
        let mut options = ConnectOptions::new("sqlite::memory:");
        options.max_connections(1).min_connections(1);
        let db = Database::connect(options).await.unwrap();

        Migrator::up(&db, None).await.unwrap();

        let rows = db
            .query_all(Statement::from_string(
                DbBackend::Sqlite,
                "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name".to_string(),
            ))
            .await
            .unwrap();
        let tables: Vec<String> = rows
            .iter()
            .map(|row| row.try_get::<String>("", "name").unwrap())
            .collect();
        for table in [
            "branches",
            "products",
            "branch_inventory",
            "inventory_transfers",
            "inventory_transfer_lines",
            "inventory_movements",
        ] {
            assert!(tables.iter().any(|t| t == table), "missing {table}: {tables:?}");
        }
    }
}
