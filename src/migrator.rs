use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_inventory_records_table::Migration),
            Box::new(m20240101_000002_create_inventory_transactions_table::Migration),
            Box::new(m20240101_000003_create_purchase_order_tables::Migration),
        ]
    }
}

// Migration implementations

mod m20240101_000001_create_inventory_records_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_inventory_records_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryRecords::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryRecords::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryRecords::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(InventoryRecords::WarehouseId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::Quantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::ReservedQuantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::CostPrice)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::MinimumStockLevel)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::MaximumStockLevel)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::ReorderPoint)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(InventoryRecords::SupplierId).uuid().null())
                        .col(
                            ColumnDef::new(InventoryRecords::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::LastUpdated)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // One record per (product, warehouse); get-or-create relies on this.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .unique()
                        .name("idx_inventory_records_product_warehouse")
                        .table(InventoryRecords::Table)
                        .col(InventoryRecords::ProductId)
                        .col(InventoryRecords::WarehouseId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_records_warehouse_id")
                        .table(InventoryRecords::Table)
                        .col(InventoryRecords::WarehouseId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryRecords::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum InventoryRecords {
        Table,
        Id,
        ProductId,
        WarehouseId,
        Quantity,
        ReservedQuantity,
        CostPrice,
        MinimumStockLevel,
        MaximumStockLevel,
        ReorderPoint,
        SupplierId,
        CreatedAt,
        LastUpdated,
    }
}

mod m20240101_000002_create_inventory_transactions_table {
    use super::m20240101_000001_create_inventory_records_table::InventoryRecords;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_inventory_transactions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryTransactions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryTransactions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryTransactions::InventoryId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryTransactions::TransactionType)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryTransactions::Quantity)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryTransactions::UnitCost).decimal().null())
                        .col(
                            ColumnDef::new(InventoryTransactions::ReferenceNumber)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryTransactions::Notes).string().null())
                        .col(
                            ColumnDef::new(InventoryTransactions::CreatedBy)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryTransactions::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_inventory_transactions_inventory_id")
                                .from(
                                    InventoryTransactions::Table,
                                    InventoryTransactions::InventoryId,
                                )
                                .to(InventoryRecords::Table, InventoryRecords::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_transactions_inventory_id")
                        .table(InventoryTransactions::Table)
                        .col(InventoryTransactions::InventoryId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_transactions_reference_number")
                        .table(InventoryTransactions::Table)
                        .col(InventoryTransactions::ReferenceNumber)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_transactions_created_at")
                        .table(InventoryTransactions::Table)
                        .col(InventoryTransactions::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryTransactions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryTransactions {
        Table,
        Id,
        InventoryId,
        TransactionType,
        Quantity,
        UnitCost,
        ReferenceNumber,
        Notes,
        CreatedBy,
        CreatedAt,
    }
}

mod m20240101_000003_create_purchase_order_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_purchase_order_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PurchaseOrders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PurchaseOrders::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::PoNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(PurchaseOrders::SupplierId).uuid().not_null())
                        .col(ColumnDef::new(PurchaseOrders::WarehouseId).uuid().not_null())
                        .col(
                            ColumnDef::new(PurchaseOrders::Status)
                                .string()
                                .not_null()
                                .default("draft"),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::ExpectedDeliveryDate)
                                .date()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::TotalAmount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(PurchaseOrders::Notes).string().null())
                        .col(ColumnDef::new(PurchaseOrders::CreatedBy).uuid().not_null())
                        .col(
                            ColumnDef::new(PurchaseOrders::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::UpdatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PurchaseOrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PurchaseOrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::PurchaseOrderId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::ProductId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::QuantityOrdered)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::QuantityReceived)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::UnitPrice)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::UpdatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_purchase_order_items_purchase_order_id")
                                .from(
                                    PurchaseOrderItems::Table,
                                    PurchaseOrderItems::PurchaseOrderId,
                                )
                                .to(PurchaseOrders::Table, PurchaseOrders::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_purchase_orders_status")
                        .table(PurchaseOrders::Table)
                        .col(PurchaseOrders::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_purchase_orders_supplier_id")
                        .table(PurchaseOrders::Table)
                        .col(PurchaseOrders::SupplierId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_purchase_order_items_purchase_order_id")
                        .table(PurchaseOrderItems::Table)
                        .col(PurchaseOrderItems::PurchaseOrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PurchaseOrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(PurchaseOrders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PurchaseOrders {
        Table,
        Id,
        PoNumber,
        SupplierId,
        WarehouseId,
        Status,
        ExpectedDeliveryDate,
        TotalAmount,
        Notes,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum PurchaseOrderItems {
        Table,
        Id,
        PurchaseOrderId,
        ProductId,
        QuantityOrdered,
        QuantityReceived,
        UnitPrice,
        CreatedAt,
        UpdatedAt,
    }
}
