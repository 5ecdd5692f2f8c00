use crate::{
    db::DbPool,
    entities::{
        inventory_transaction::TransactionType,
        purchase_order::{self, Entity as PurchaseOrder, PurchaseOrderStatus},
        purchase_order_item::{self, Entity as PurchaseOrderItem},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::stock_operations,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionError, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Input for creating a purchase order.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewPurchaseOrder {
    pub supplier_id: Uuid,
    pub warehouse_id: Uuid,
    #[validate(length(min = 1, message = "purchase order needs at least one item"))]
    pub items: Vec<NewPurchaseOrderItem>,
    pub expected_delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewPurchaseOrderItem {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "quantity_ordered must be at least 1"))]
    pub quantity_ordered: i32,
    pub unit_price: Decimal,
}

fn unwrap_txn_err(e: TransactionError<ServiceError>) -> ServiceError {
    match e {
        TransactionError::Connection(db_err) => ServiceError::StorageUnavailable(db_err),
        TransactionError::Transaction(service_err) => service_err,
    }
}

/// Purchase order workflow: Draft -> (Ordered) -> Received | Cancelled.
///
/// Receipt is the only path that touches stock; it drives the stock engine's
/// transaction-scoped helpers so the item receipts, the item updates, and the
/// status transition commit as one unit.
#[derive(Clone)]
pub struct PurchaseOrderService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl PurchaseOrderService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates a Draft purchase order with its items. `total_amount` is
    /// computed here, never accepted from the caller, so the PO total
    /// invariant holds by construction.
    #[instrument(skip(self, new_po))]
    pub async fn create_purchase_order(
        &self,
        new_po: NewPurchaseOrder,
        actor: Uuid,
    ) -> Result<(purchase_order::Model, Vec<purchase_order_item::Model>), ServiceError> {
        new_po.validate()?;
        for item in &new_po.items {
            item.validate()?;
            if item.unit_price < Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "unit_price for product {} cannot be negative",
                    item.product_id
                )));
            }
        }

        let total_amount: Decimal = new_po
            .items
            .iter()
            .map(|item| Decimal::from(item.quantity_ordered) * item.unit_price)
            .sum();

        let (po, items) = self
            .db_pool
            .transaction::<_, (purchase_order::Model, Vec<purchase_order_item::Model>), ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        let po_id = Uuid::new_v4();
                        let header = purchase_order::ActiveModel {
                            id: Set(po_id),
                            po_number: Set(format!("PO-{}", po_id.simple())),
                            supplier_id: Set(new_po.supplier_id),
                            warehouse_id: Set(new_po.warehouse_id),
                            status: Set(PurchaseOrderStatus::Draft.as_str().to_string()),
                            expected_delivery_date: Set(new_po.expected_delivery_date),
                            total_amount: Set(total_amount),
                            notes: Set(new_po.notes.clone()),
                            created_by: Set(actor),
                            ..Default::default()
                        };
                        let po = header
                            .insert(txn)
                            .await
                            .map_err(ServiceError::StorageUnavailable)?;

                        let mut items = Vec::with_capacity(new_po.items.len());
                        for item in &new_po.items {
                            let line = purchase_order_item::ActiveModel {
                                id: Set(Uuid::new_v4()),
                                purchase_order_id: Set(po_id),
                                product_id: Set(item.product_id),
                                quantity_ordered: Set(item.quantity_ordered),
                                quantity_received: Set(0),
                                unit_price: Set(item.unit_price),
                                ..Default::default()
                            };
                            let line = line
                                .insert(txn)
                                .await
                                .map_err(ServiceError::StorageUnavailable)?;
                            items.push(line);
                        }

                        Ok((po, items))
                    })
                },
            )
            .await
            .map_err(unwrap_txn_err)?;

        info!(
            po_id = %po.id,
            po_number = %po.po_number,
            total_amount = %po.total_amount,
            item_count = items.len(),
            "purchase order created"
        );

        self.event_sender
            .notify(Event::PurchaseOrderCreated(po.id))
            .await;

        Ok((po, items))
    }

    /// Explicit submission: Draft -> Ordered.
    #[instrument(skip(self))]
    pub async fn submit_purchase_order(
        &self,
        po_id: Uuid,
        actor: Uuid,
    ) -> Result<purchase_order::Model, ServiceError> {
        let po = self
            .transition(po_id, &[PurchaseOrderStatus::Draft], PurchaseOrderStatus::Ordered)
            .await?;

        info!(po_id = %po.id, actor = %actor, "purchase order submitted");
        self.event_sender
            .notify(Event::PurchaseOrderSubmitted(po.id))
            .await;
        Ok(po)
    }

    /// Draft/Ordered -> Cancelled. Terminal orders are rejected.
    #[instrument(skip(self))]
    pub async fn cancel_purchase_order(
        &self,
        po_id: Uuid,
        actor: Uuid,
    ) -> Result<purchase_order::Model, ServiceError> {
        let po = self
            .transition(
                po_id,
                &[PurchaseOrderStatus::Draft, PurchaseOrderStatus::Ordered],
                PurchaseOrderStatus::Cancelled,
            )
            .await?;

        info!(po_id = %po.id, actor = %actor, "purchase order cancelled");
        self.event_sender
            .notify(Event::PurchaseOrderCancelled(po.id))
            .await;
        Ok(po)
    }

    async fn transition(
        &self,
        po_id: Uuid,
        from: &'static [PurchaseOrderStatus],
        to: PurchaseOrderStatus,
    ) -> Result<purchase_order::Model, ServiceError> {
        self.db_pool
            .transaction::<_, purchase_order::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let po = PurchaseOrder::find_by_id(po_id)
                        .lock_exclusive()
                        .one(txn)
                        .await
                        .map_err(ServiceError::StorageUnavailable)?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!("purchase order {} not found", po_id))
                        })?;

                    let status = po.status();
                    if !status.map_or(false, |s| from.contains(&s)) {
                        return Err(ServiceError::InvalidStatus {
                            po_id,
                            status: po.status.clone(),
                            expected: from
                                .iter()
                                .map(|s| s.as_str())
                                .collect::<Vec<_>>()
                                .join(" or "),
                        });
                    }

                    let mut active: purchase_order::ActiveModel = po.into();
                    active.status = Set(to.as_str().to_string());
                    active
                        .update(txn)
                        .await
                        .map_err(ServiceError::StorageUnavailable)
                })
            })
            .await
            .map_err(unwrap_txn_err)
    }

    /// Books received goods into stock and closes the order.
    ///
    /// Allowed from Draft or Ordered. Per item, the received quantity is
    /// clamped to what is still outstanding; each receipt get-or-creates the
    /// (product, warehouse) record and adds stock with type PURCHASE and the
    /// PO number as the ledger reference. The stock mutations, ledger
    /// entries, item updates, and the transition to Received all commit in
    /// one database transaction. Received is terminal: a second receive call
    /// is rejected rather than silently double-counting.
    #[instrument(skip(self, received_items, notes))]
    pub async fn receive_purchase_order(
        &self,
        po_id: Uuid,
        received_items: HashMap<Uuid, i32>,
        actor: Uuid,
        notes: Option<&str>,
    ) -> Result<purchase_order::Model, ServiceError> {
        if received_items.is_empty() {
            return Err(ServiceError::ValidationError(
                "no items to receive".to_string(),
            ));
        }
        for (item_id, quantity) in &received_items {
            if *quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "received quantity for item {} must be positive",
                    item_id
                )));
            }
        }
        let notes = notes.map(str::to_string);

        let (po, receipts) = self
            .db_pool
            .transaction::<_, (purchase_order::Model, usize), ServiceError>(move |txn| {
                Box::pin(async move {
                    let po = PurchaseOrder::find_by_id(po_id)
                        .lock_exclusive()
                        .one(txn)
                        .await
                        .map_err(ServiceError::StorageUnavailable)?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!("purchase order {} not found", po_id))
                        })?;

                    if !po.status().map_or(false, |s| s.is_open()) {
                        return Err(ServiceError::InvalidStatus {
                            po_id,
                            status: po.status.clone(),
                            expected: "draft or ordered".to_string(),
                        });
                    }

                    let items = PurchaseOrderItem::find()
                        .filter(purchase_order_item::Column::PurchaseOrderId.eq(po_id))
                        .all(txn)
                        .await
                        .map_err(ServiceError::StorageUnavailable)?;

                    let mut receipts = 0usize;
                    for (item_id, quantity) in &received_items {
                        let item = items
                            .iter()
                            .find(|i| i.id == *item_id)
                            .ok_or_else(|| {
                                ServiceError::NotFound(format!(
                                    "item {} does not belong to purchase order {}",
                                    item_id, po_id
                                ))
                            })?;

                        let received = (*quantity).min(item.quantity_outstanding());
                        if received == 0 {
                            continue;
                        }

                        let record = stock_operations::get_or_create_in_txn(
                            txn,
                            item.product_id,
                            po.warehouse_id,
                        )
                        .await?;

                        stock_operations::apply_add_stock(
                            txn,
                            record.id,
                            received,
                            actor,
                            TransactionType::Purchase,
                            &po.po_number,
                            Some(item.unit_price),
                            notes.clone(),
                        )
                        .await?;

                        let mut active: purchase_order_item::ActiveModel = item.clone().into();
                        active.quantity_received = Set(item.quantity_received + received);
                        active
                            .update(txn)
                            .await
                            .map_err(ServiceError::StorageUnavailable)?;

                        receipts += 1;
                    }

                    let mut active: purchase_order::ActiveModel = po.into();
                    active.status = Set(PurchaseOrderStatus::Received.as_str().to_string());
                    let po = active
                        .update(txn)
                        .await
                        .map_err(ServiceError::StorageUnavailable)?;

                    Ok((po, receipts))
                })
            })
            .await
            .map_err(unwrap_txn_err)?;

        info!(
            po_id = %po.id,
            items_received = receipts,
            "purchase order received"
        );

        self.event_sender
            .notify(Event::PurchaseOrderReceived {
                po_id: po.id,
                items_received: receipts,
            })
            .await;

        Ok(po)
    }

    /// Gets a purchase order by id.
    #[instrument(skip(self))]
    pub async fn get_purchase_order(
        &self,
        po_id: Uuid,
    ) -> Result<Option<purchase_order::Model>, ServiceError> {
        let po = PurchaseOrder::find_by_id(po_id)
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::StorageUnavailable)?;
        Ok(po)
    }

    /// Items of a purchase order, in creation order.
    #[instrument(skip(self))]
    pub async fn get_purchase_order_items(
        &self,
        po_id: Uuid,
    ) -> Result<Vec<purchase_order_item::Model>, ServiceError> {
        let items = PurchaseOrderItem::find()
            .filter(purchase_order_item::Column::PurchaseOrderId.eq(po_id))
            .order_by_asc(purchase_order_item::Column::CreatedAt)
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::StorageUnavailable)?;
        Ok(items)
    }

    /// Purchase orders in a given status.
    #[instrument(skip(self))]
    pub async fn list_purchase_orders_by_status(
        &self,
        status: PurchaseOrderStatus,
    ) -> Result<Vec<purchase_order::Model>, ServiceError> {
        let pos = PurchaseOrder::find()
            .filter(purchase_order::Column::Status.eq(status.as_str()))
            .order_by_desc(purchase_order::Column::CreatedAt)
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::StorageUnavailable)?;
        Ok(pos)
    }

    /// Purchase orders for a supplier.
    #[instrument(skip(self))]
    pub async fn list_purchase_orders_by_supplier(
        &self,
        supplier_id: Uuid,
    ) -> Result<Vec<purchase_order::Model>, ServiceError> {
        let pos = PurchaseOrder::find()
            .filter(purchase_order::Column::SupplierId.eq(supplier_id))
            .order_by_desc(purchase_order::Column::CreatedAt)
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::StorageUnavailable)?;
        Ok(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn new_purchase_order_rejects_empty_items() {
        let po = NewPurchaseOrder {
            supplier_id: Uuid::new_v4(),
            warehouse_id: Uuid::new_v4(),
            items: vec![],
            expected_delivery_date: None,
            notes: None,
        };
        assert!(po.validate().is_err());
    }

    #[test]
    fn new_purchase_order_item_rejects_zero_quantity() {
        let item = NewPurchaseOrderItem {
            product_id: Uuid::new_v4(),
            quantity_ordered: 0,
            unit_price: dec!(1.00),
        };
        assert!(item.validate().is_err());

        let item = NewPurchaseOrderItem {
            quantity_ordered: 1,
            ..item
        };
        assert!(item.validate().is_ok());
    }
}
