use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Purchase order lifecycle. Draft and Ordered are open; Received and
/// Cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderStatus {
    Draft,
    Ordered,
    Received,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseOrderStatus::Draft => "draft",
            PurchaseOrderStatus::Ordered => "ordered",
            PurchaseOrderStatus::Received => "received",
            PurchaseOrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(PurchaseOrderStatus::Draft),
            "ordered" => Some(PurchaseOrderStatus::Ordered),
            "received" => Some(PurchaseOrderStatus::Received),
            "cancelled" => Some(PurchaseOrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Open orders may still be received or cancelled.
    pub fn is_open(&self) -> bool {
        matches!(self, PurchaseOrderStatus::Draft | PurchaseOrderStatus::Ordered)
    }
}

/// Batched intake request against one supplier and one warehouse.
///
/// `total_amount` always equals the sum of
/// `quantity_ordered * unit_price` over the order's items.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "purchase_orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub po_number: String,
    pub supplier_id: Uuid,
    pub warehouse_id: Uuid,
    pub status: String,
    pub expected_delivery_date: Option<Date>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_amount: Decimal,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl Model {
    pub fn status(&self) -> Option<PurchaseOrderStatus> {
        PurchaseOrderStatus::from_str(&self.status)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::purchase_order_item::Entity")]
    PurchaseOrderItem,
}

impl Related<super::purchase_order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PurchaseOrderItem.def()
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
        active_model.updated_at = Set(now);
        Ok(active_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for s in [
            PurchaseOrderStatus::Draft,
            PurchaseOrderStatus::Ordered,
            PurchaseOrderStatus::Received,
            PurchaseOrderStatus::Cancelled,
        ] {
            assert_eq!(PurchaseOrderStatus::from_str(s.as_str()), Some(s));
        }
        assert_eq!(PurchaseOrderStatus::from_str("approved"), None);
    }

    #[test]
    fn terminal_statuses_are_not_open() {
        assert!(PurchaseOrderStatus::Draft.is_open());
        assert!(PurchaseOrderStatus::Ordered.is_open());
        assert!(!PurchaseOrderStatus::Received.is_open());
        assert!(!PurchaseOrderStatus::Cancelled.is_open());
    }
}
