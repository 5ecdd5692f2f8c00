use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Business cause of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    Purchase,
    Sale,
    Adjustment,
    Reservation,
    Release,
    TransferIn,
    TransferOut,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Purchase => "purchase",
            TransactionType::Sale => "sale",
            TransactionType::Adjustment => "adjustment",
            TransactionType::Reservation => "reservation",
            TransactionType::Release => "release",
            TransactionType::TransferIn => "transfer_in",
            TransactionType::TransferOut => "transfer_out",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "purchase" => Some(TransactionType::Purchase),
            "sale" => Some(TransactionType::Sale),
            "adjustment" => Some(TransactionType::Adjustment),
            "reservation" => Some(TransactionType::Reservation),
            "release" => Some(TransactionType::Release),
            "transfer_in" => Some(TransactionType::TransferIn),
            "transfer_out" => Some(TransactionType::TransferOut),
            _ => None,
        }
    }

    /// Whether entries of this type change the on-hand quantity. Reservation
    /// bookkeeping moves `reserved_quantity` only.
    pub fn affects_on_hand(&self) -> bool {
        !matches!(self, TransactionType::Reservation | TransactionType::Release)
    }
}

/// Append-only ledger entry: one quantity-affecting event on one inventory
/// record, with its cause, actor, and caller-supplied correlation reference.
///
/// Entries are inserted in the same database transaction as the record
/// mutation they evidence and are never updated or deleted afterwards. For
/// RESERVATION and RELEASE entries `quantity` records the amount reserved or
/// released; for every other type it is the signed on-hand delta.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub inventory_id: Uuid,
    pub transaction_type: String,
    pub quantity: i32,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub unit_cost: Option<Decimal>,
    pub reference_number: String,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTimeUtc,
}

impl Model {
    pub fn transaction_type(&self) -> Option<TransactionType> {
        TransactionType::from_str(&self.transaction_type)
    }

    /// Signed contribution of this entry to the record's on-hand quantity.
    pub fn on_hand_delta(&self) -> i32 {
        match self.transaction_type() {
            Some(t) if t.affects_on_hand() => self.quantity,
            _ => 0,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::inventory_record::Entity",
        from = "Column::InventoryId",
        to = "super::inventory_record::Column::Id"
    )]
    InventoryRecord,
}

impl Related<super::inventory_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InventoryRecord.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, _insert: bool) -> Result<Self, DbErr> {
        let mut active_model = self;
        if let ActiveValue::NotSet = active_model.created_at {
            active_model.created_at = Set(Utc::now());
        }
        Ok(active_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_type_round_trips() {
        for t in [
            TransactionType::Purchase,
            TransactionType::Sale,
            TransactionType::Adjustment,
            TransactionType::Reservation,
            TransactionType::Release,
            TransactionType::TransferIn,
            TransactionType::TransferOut,
        ] {
            assert_eq!(TransactionType::from_str(t.as_str()), Some(t));
        }
        assert_eq!(TransactionType::from_str("unknown"), None);
    }

    #[test]
    fn reservation_entries_do_not_move_on_hand() {
        assert!(!TransactionType::Reservation.affects_on_hand());
        assert!(!TransactionType::Release.affects_on_hand());
        assert!(TransactionType::Sale.affects_on_hand());
        assert!(TransactionType::TransferOut.affects_on_hand());
    }
}
