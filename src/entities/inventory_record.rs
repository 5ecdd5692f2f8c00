use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coarse stock position of a record relative to its configured levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockStatus {
    OutOfStock,
    LowStock,
    Normal,
    Overstock,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::OutOfStock => "out_of_stock",
            StockStatus::LowStock => "low_stock",
            StockStatus::Normal => "normal",
            StockStatus::Overstock => "overstock",
        }
    }
}

/// Stock truth for one (product, warehouse) pair.
///
/// Quantities are mutated exclusively through
/// [`crate::services::stock_operations::StockOperationService`]; every
/// committed mutation is paired with a ledger entry in
/// [`super::inventory_transaction`]. The invariants
/// `quantity >= 0` and `0 <= reserved_quantity <= quantity` hold after every
/// committed operation.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: i32,
    pub reserved_quantity: i32,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub cost_price: Decimal,
    pub minimum_stock_level: i32,
    pub maximum_stock_level: i32,
    pub reorder_point: i32,
    pub supplier_id: Option<Uuid>,
    pub created_at: DateTimeUtc,
    pub last_updated: DateTimeUtc,
}

impl Model {
    /// On-hand minus reserved: the quantity free to be newly committed.
    pub fn available_quantity(&self) -> i32 {
        self.quantity - self.reserved_quantity
    }

    pub fn stock_status(&self) -> StockStatus {
        if self.quantity <= 0 {
            StockStatus::OutOfStock
        } else if self.quantity <= self.minimum_stock_level {
            StockStatus::LowStock
        } else if self.quantity > self.maximum_stock_level {
            StockStatus::Overstock
        } else {
            StockStatus::Normal
        }
    }

    pub fn needs_reordering(&self) -> bool {
        self.available_quantity() <= self.reorder_point
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::inventory_transaction::Entity")]
    InventoryTransaction,
}

impl Related<super::inventory_transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InventoryTransaction.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr> {
        let mut active_model = self;
        let now = Utc::now();
        if insert {
            if let ActiveValue::NotSet = active_model.created_at {
                active_model.created_at = Set(now);
            }
        }
        active_model.last_updated = Set(now);
        Ok(active_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(quantity: i32, reserved: i32) -> Model {
        Model {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            warehouse_id: Uuid::new_v4(),
            quantity,
            reserved_quantity: reserved,
            cost_price: Decimal::ZERO,
            minimum_stock_level: 10,
            maximum_stock_level: 100,
            reorder_point: 5,
            supplier_id: None,
            created_at: Utc::now(),
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn available_quantity_subtracts_reservations() {
        assert_eq!(record(100, 30).available_quantity(), 70);
        assert_eq!(record(5, 5).available_quantity(), 0);
    }

    #[test]
    fn stock_status_thresholds() {
        assert_eq!(record(0, 0).stock_status(), StockStatus::OutOfStock);
        assert_eq!(record(10, 0).stock_status(), StockStatus::LowStock);
        assert_eq!(record(50, 0).stock_status(), StockStatus::Normal);
        assert_eq!(record(101, 0).stock_status(), StockStatus::Overstock);
    }

    #[test]
    fn reorder_check_uses_available_not_on_hand() {
        // 8 on hand but 4 reserved leaves 4 available, at or under the
        // reorder point of 5.
        assert!(record(8, 4).needs_reordering());
        assert!(!record(8, 0).needs_reordering());
    }
}
