use crate::{
    db::DbPool,
    entities::{
        inventory_record::{self, Entity as InventoryRecord},
        inventory_transaction::{self, Entity as InventoryTransaction, TransactionType},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionError, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// The only code path permitted to mutate inventory quantities.
///
/// Every operation runs inside one database transaction: the target record is
/// re-read under an exclusive row lock, invariants are validated against that
/// post-lock state, and the quantity update plus its ledger entry commit
/// together or not at all. Concurrent operations against the same record
/// serialize on the row lock, so a racing caller can never overdraw based on
/// a stale read.
#[derive(Clone)]
pub struct StockOperationService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

fn unwrap_txn_err(e: TransactionError<ServiceError>) -> ServiceError {
    match e {
        TransactionError::Connection(db_err) => ServiceError::StorageUnavailable(db_err),
        TransactionError::Transaction(service_err) => service_err,
    }
}

/// Loads a record under an exclusive row lock, erroring if it does not exist.
pub(crate) async fn load_record_for_update<C: ConnectionTrait>(
    conn: &C,
    record_id: Uuid,
) -> Result<inventory_record::Model, ServiceError> {
    InventoryRecord::find_by_id(record_id)
        .lock_exclusive()
        .one(conn)
        .await
        .map_err(ServiceError::StorageUnavailable)?
        .ok_or_else(|| ServiceError::NotFound(format!("inventory record {} not found", record_id)))
}

/// Appends one ledger entry. Entries are immutable once inserted.
pub(crate) async fn insert_ledger_entry<C: ConnectionTrait>(
    conn: &C,
    inventory_id: Uuid,
    transaction_type: TransactionType,
    quantity: i32,
    unit_cost: Option<Decimal>,
    reference: &str,
    notes: Option<String>,
    actor: Uuid,
) -> Result<inventory_transaction::Model, ServiceError> {
    let entry = inventory_transaction::ActiveModel {
        id: Set(Uuid::new_v4()),
        inventory_id: Set(inventory_id),
        transaction_type: Set(transaction_type.as_str().to_string()),
        quantity: Set(quantity),
        unit_cost: Set(unit_cost),
        reference_number: Set(reference.to_string()),
        notes: Set(notes),
        created_by: Set(actor),
        ..Default::default()
    };

    entry
        .insert(conn)
        .await
        .map_err(ServiceError::StorageUnavailable)
}

/// Idempotent get-or-create for the (product, warehouse) record. A racing
/// creator loses on the unique index and picks up the winner's row.
pub(crate) async fn get_or_create_in_txn<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    warehouse_id: Uuid,
) -> Result<inventory_record::Model, ServiceError> {
    let existing = InventoryRecord::find()
        .filter(inventory_record::Column::ProductId.eq(product_id))
        .filter(inventory_record::Column::WarehouseId.eq(warehouse_id))
        .lock_exclusive()
        .one(conn)
        .await
        .map_err(ServiceError::StorageUnavailable)?;

    if let Some(record) = existing {
        return Ok(record);
    }

    let fresh = inventory_record::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        warehouse_id: Set(warehouse_id),
        quantity: Set(0),
        reserved_quantity: Set(0),
        cost_price: Set(Decimal::ZERO),
        minimum_stock_level: Set(0),
        maximum_stock_level: Set(0),
        reorder_point: Set(0),
        supplier_id: Set(None),
        ..Default::default()
    };

    match fresh.insert(conn).await {
        Ok(record) => Ok(record),
        Err(insert_err) => {
            // Unique-index conflict with a concurrent creator.
            let raced = InventoryRecord::find()
                .filter(inventory_record::Column::ProductId.eq(product_id))
                .filter(inventory_record::Column::WarehouseId.eq(warehouse_id))
                .lock_exclusive()
                .one(conn)
                .await
                .map_err(ServiceError::StorageUnavailable)?;
            raced.ok_or(ServiceError::StorageUnavailable(insert_err))
        }
    }
}

/// Increments on-hand quantity and appends the paired ledger entry. Also
/// tracks the latest unit cost on the record when one is supplied.
pub(crate) async fn apply_add_stock<C: ConnectionTrait>(
    conn: &C,
    record_id: Uuid,
    quantity: i32,
    actor: Uuid,
    transaction_type: TransactionType,
    reference: &str,
    unit_cost: Option<Decimal>,
    notes: Option<String>,
) -> Result<(inventory_record::Model, inventory_transaction::Model), ServiceError> {
    let record = load_record_for_update(conn, record_id).await?;

    let mut active: inventory_record::ActiveModel = record.clone().into();
    active.quantity = Set(record.quantity + quantity);
    if let Some(cost) = unit_cost {
        active.cost_price = Set(cost);
    }
    let updated = active
        .update(conn)
        .await
        .map_err(ServiceError::StorageUnavailable)?;

    let entry = insert_ledger_entry(
        conn,
        record_id,
        transaction_type,
        quantity,
        unit_cost,
        reference,
        notes,
        actor,
    )
    .await?;

    Ok((updated, entry))
}

impl StockOperationService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    fn require_positive(quantity: i32) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::InvalidQuantity { quantity });
        }
        Ok(())
    }

    async fn maybe_notify_low_stock(&self, record: &inventory_record::Model) {
        if record.needs_reordering() {
            self.event_sender
                .notify(Event::LowStockDetected {
                    record_id: record.id,
                    product_id: record.product_id,
                    warehouse_id: record.warehouse_id,
                    available_quantity: record.available_quantity(),
                    reorder_point: record.reorder_point,
                })
                .await;
        }
    }

    /// Fetches a record by id.
    #[instrument(skip(self))]
    pub async fn get_record(
        &self,
        record_id: Uuid,
    ) -> Result<Option<inventory_record::Model>, ServiceError> {
        let record = InventoryRecord::find_by_id(record_id)
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::StorageUnavailable)?;
        Ok(record)
    }

    /// Fetches the record for a (product, warehouse) pair.
    #[instrument(skip(self))]
    pub async fn get_record_for(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<Option<inventory_record::Model>, ServiceError> {
        let record = InventoryRecord::find()
            .filter(inventory_record::Column::ProductId.eq(product_id))
            .filter(inventory_record::Column::WarehouseId.eq(warehouse_id))
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::StorageUnavailable)?;
        Ok(record)
    }

    /// Idempotently creates (or returns) the record for a (product,
    /// warehouse) pair.
    #[instrument(skip(self))]
    pub async fn get_or_create_record(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<inventory_record::Model, ServiceError> {
        self.db_pool
            .transaction::<_, inventory_record::Model, ServiceError>(move |txn| {
                Box::pin(async move { get_or_create_in_txn(txn, product_id, warehouse_id).await })
            })
            .await
            .map_err(unwrap_txn_err)
    }

    /// Updates the replenishment settings of a record. Configuration only:
    /// quantities are untouched and no ledger entry is written.
    #[instrument(skip(self))]
    pub async fn set_stock_levels(
        &self,
        record_id: Uuid,
        minimum_stock_level: i32,
        maximum_stock_level: i32,
        reorder_point: i32,
        supplier_id: Option<Uuid>,
    ) -> Result<inventory_record::Model, ServiceError> {
        if minimum_stock_level < 0 || reorder_point < 0 {
            return Err(ServiceError::ValidationError(
                "stock levels cannot be negative".to_string(),
            ));
        }
        if maximum_stock_level < minimum_stock_level {
            return Err(ServiceError::ValidationError(
                "maximum_stock_level cannot be below minimum_stock_level".to_string(),
            ));
        }

        let record = self
            .db_pool
            .transaction::<_, inventory_record::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let record = load_record_for_update(txn, record_id).await?;

                    let mut active: inventory_record::ActiveModel = record.into();
                    active.minimum_stock_level = Set(minimum_stock_level);
                    active.maximum_stock_level = Set(maximum_stock_level);
                    active.reorder_point = Set(reorder_point);
                    active.supplier_id = Set(supplier_id);
                    active
                        .update(txn)
                        .await
                        .map_err(ServiceError::StorageUnavailable)
                })
            })
            .await
            .map_err(unwrap_txn_err)?;

        info!(
            record_id = %record.id,
            reorder_point = reorder_point,
            "stock levels updated"
        );
        self.maybe_notify_low_stock(&record).await;

        Ok(record)
    }

    /// Ledger entries for one record, oldest first.
    #[instrument(skip(self))]
    pub async fn list_transactions(
        &self,
        record_id: Uuid,
    ) -> Result<Vec<inventory_transaction::Model>, ServiceError> {
        let entries = InventoryTransaction::find()
            .filter(inventory_transaction::Column::InventoryId.eq(record_id))
            .order_by_asc(inventory_transaction::Column::CreatedAt)
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::StorageUnavailable)?;
        Ok(entries)
    }

    /// Adds stock to a record.
    #[instrument(skip(self, notes))]
    pub async fn add_stock(
        &self,
        record_id: Uuid,
        quantity: i32,
        actor: Uuid,
        transaction_type: TransactionType,
        reference: &str,
        unit_cost: Option<Decimal>,
        notes: Option<&str>,
    ) -> Result<(inventory_record::Model, inventory_transaction::Model), ServiceError> {
        Self::require_positive(quantity)?;
        let reference = reference.to_string();
        let notes = notes.map(str::to_string);

        let (record, entry) = self
            .db_pool
            .transaction::<_, (inventory_record::Model, inventory_transaction::Model), ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        apply_add_stock(
                            txn,
                            record_id,
                            quantity,
                            actor,
                            transaction_type,
                            &reference,
                            unit_cost,
                            notes,
                        )
                        .await
                    })
                },
            )
            .await
            .map_err(unwrap_txn_err)?;

        info!(
            record_id = %record.id,
            quantity = quantity,
            new_quantity = record.quantity,
            "stock added"
        );

        self.event_sender
            .notify(Event::StockAdded {
                record_id: record.id,
                product_id: record.product_id,
                warehouse_id: record.warehouse_id,
                quantity,
                new_quantity: record.quantity,
                transaction_id: entry.id,
            })
            .await;

        Ok((record, entry))
    }

    /// Removes stock from a record.
    ///
    /// The request is validated against the available (unreserved) quantity:
    /// stock that has been reserved cannot be taken by another commitment.
    #[instrument(skip(self, notes))]
    pub async fn remove_stock(
        &self,
        record_id: Uuid,
        quantity: i32,
        actor: Uuid,
        transaction_type: TransactionType,
        reference: &str,
        notes: Option<&str>,
    ) -> Result<(inventory_record::Model, inventory_transaction::Model), ServiceError> {
        Self::require_positive(quantity)?;
        let reference = reference.to_string();
        let notes = notes.map(str::to_string);

        let (record, entry) = self
            .db_pool
            .transaction::<_, (inventory_record::Model, inventory_transaction::Model), ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        let record = load_record_for_update(txn, record_id).await?;

                        let available = record.available_quantity();
                        if quantity > available {
                            return Err(ServiceError::InsufficientStock {
                                record_id,
                                requested: quantity,
                                available,
                            });
                        }

                        let mut active: inventory_record::ActiveModel = record.clone().into();
                        active.quantity = Set(record.quantity - quantity);
                        let updated = active
                            .update(txn)
                            .await
                            .map_err(ServiceError::StorageUnavailable)?;

                        let entry = insert_ledger_entry(
                            txn,
                            record_id,
                            transaction_type,
                            -quantity,
                            None,
                            &reference,
                            notes,
                            actor,
                        )
                        .await?;

                        Ok((updated, entry))
                    })
                },
            )
            .await
            .map_err(unwrap_txn_err)?;

        info!(
            record_id = %record.id,
            quantity = quantity,
            new_quantity = record.quantity,
            "stock removed"
        );

        self.event_sender
            .notify(Event::StockRemoved {
                record_id: record.id,
                product_id: record.product_id,
                warehouse_id: record.warehouse_id,
                quantity,
                new_quantity: record.quantity,
                transaction_id: entry.id,
            })
            .await;
        self.maybe_notify_low_stock(&record).await;

        Ok((record, entry))
    }

    /// Earmarks part of the on-hand quantity for a pending commitment.
    #[instrument(skip(self, notes))]
    pub async fn reserve_stock(
        &self,
        record_id: Uuid,
        quantity: i32,
        actor: Uuid,
        reference: &str,
        notes: Option<&str>,
    ) -> Result<(inventory_record::Model, inventory_transaction::Model), ServiceError> {
        Self::require_positive(quantity)?;
        let reference = reference.to_string();
        let notes = notes.map(str::to_string);

        let (record, entry) = self
            .db_pool
            .transaction::<_, (inventory_record::Model, inventory_transaction::Model), ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        let record = load_record_for_update(txn, record_id).await?;

                        let available = record.available_quantity();
                        if quantity > available {
                            return Err(ServiceError::InsufficientAvailableStock {
                                record_id,
                                requested: quantity,
                                available,
                            });
                        }

                        let mut active: inventory_record::ActiveModel = record.clone().into();
                        active.reserved_quantity = Set(record.reserved_quantity + quantity);
                        let updated = active
                            .update(txn)
                            .await
                            .map_err(ServiceError::StorageUnavailable)?;

                        let entry = insert_ledger_entry(
                            txn,
                            record_id,
                            TransactionType::Reservation,
                            quantity,
                            None,
                            &reference,
                            notes,
                            actor,
                        )
                        .await?;

                        Ok((updated, entry))
                    })
                },
            )
            .await
            .map_err(unwrap_txn_err)?;

        info!(
            record_id = %record.id,
            quantity = quantity,
            reserved_quantity = record.reserved_quantity,
            "stock reserved"
        );

        self.event_sender
            .notify(Event::StockReserved {
                record_id: record.id,
                quantity,
                reserved_quantity: record.reserved_quantity,
                transaction_id: entry.id,
            })
            .await;
        self.maybe_notify_low_stock(&record).await;

        Ok((record, entry))
    }

    /// Returns reserved stock to the available pool. Releasing more than is
    /// currently reserved releases exactly the reserved amount; the ledger
    /// entry records what was actually released.
    #[instrument(skip(self))]
    pub async fn release_reservation(
        &self,
        record_id: Uuid,
        quantity: i32,
        actor: Uuid,
        reference: &str,
    ) -> Result<(inventory_record::Model, inventory_transaction::Model), ServiceError> {
        Self::require_positive(quantity)?;
        let reference = reference.to_string();

        let (record, entry) = self
            .db_pool
            .transaction::<_, (inventory_record::Model, inventory_transaction::Model), ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        let record = load_record_for_update(txn, record_id).await?;

                        let released = quantity.min(record.reserved_quantity);

                        let mut active: inventory_record::ActiveModel = record.clone().into();
                        active.reserved_quantity = Set(record.reserved_quantity - released);
                        let updated = active
                            .update(txn)
                            .await
                            .map_err(ServiceError::StorageUnavailable)?;

                        let entry = insert_ledger_entry(
                            txn,
                            record_id,
                            TransactionType::Release,
                            released,
                            None,
                            &reference,
                            None,
                            actor,
                        )
                        .await?;

                        Ok((updated, entry))
                    })
                },
            )
            .await
            .map_err(unwrap_txn_err)?;

        info!(
            record_id = %record.id,
            released = entry.quantity,
            reserved_quantity = record.reserved_quantity,
            "reservation released"
        );

        self.event_sender
            .notify(Event::ReservationReleased {
                record_id: record.id,
                quantity: entry.quantity,
                reserved_quantity: record.reserved_quantity,
                transaction_id: entry.id,
            })
            .await;

        Ok((record, entry))
    }

    /// Applies a signed correction (damage, shrinkage, stocktake). The
    /// mandatory `reason` is stored on the ledger entry for audit.
    #[instrument(skip(self))]
    pub async fn adjust_inventory(
        &self,
        record_id: Uuid,
        delta: i32,
        actor: Uuid,
        reason: &str,
        reference: &str,
    ) -> Result<(inventory_record::Model, inventory_transaction::Model), ServiceError> {
        if delta == 0 {
            return Err(ServiceError::InvalidQuantity { quantity: delta });
        }
        if reason.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "adjustment reason is required".to_string(),
            ));
        }
        let reason = reason.to_string();
        let reference = reference.to_string();

        let (record, entry, old_quantity) = self
            .db_pool
            .transaction::<_, (inventory_record::Model, inventory_transaction::Model, i32), ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        let record = load_record_for_update(txn, record_id).await?;

                        let new_quantity = record.quantity + delta;
                        if new_quantity < 0 || new_quantity < record.reserved_quantity {
                            return Err(ServiceError::InvalidAdjustment {
                                record_id,
                                delta,
                                quantity: record.quantity,
                                reserved_quantity: record.reserved_quantity,
                            });
                        }

                        let old_quantity = record.quantity;
                        let mut active: inventory_record::ActiveModel = record.clone().into();
                        active.quantity = Set(new_quantity);
                        let updated = active
                            .update(txn)
                            .await
                            .map_err(ServiceError::StorageUnavailable)?;

                        let entry = insert_ledger_entry(
                            txn,
                            record_id,
                            TransactionType::Adjustment,
                            delta,
                            None,
                            &reference,
                            Some(reason),
                            actor,
                        )
                        .await?;

                        Ok((updated, entry, old_quantity))
                    })
                },
            )
            .await
            .map_err(unwrap_txn_err)?;

        info!(
            record_id = %record.id,
            delta = delta,
            new_quantity = record.quantity,
            "inventory adjusted"
        );

        self.event_sender
            .notify(Event::InventoryAdjusted {
                record_id: record.id,
                old_quantity,
                new_quantity: record.quantity,
                reason: entry.notes.clone().unwrap_or_default(),
                transaction_id: entry.id,
                reference_number: entry.reference_number.clone(),
            })
            .await;
        self.maybe_notify_low_stock(&record).await;

        Ok((record, entry))
    }

    /// Moves stock between two records atomically: the source decrement, the
    /// destination increment, and both ledger entries commit together or the
    /// whole transfer rolls back. Rows are locked in id order so concurrent
    /// opposing transfers cannot deadlock.
    #[instrument(skip(self, notes))]
    pub async fn transfer_stock(
        &self,
        source_id: Uuid,
        dest_id: Uuid,
        quantity: i32,
        actor: Uuid,
        reference: &str,
        notes: Option<&str>,
    ) -> Result<(inventory_transaction::Model, inventory_transaction::Model), ServiceError> {
        Self::require_positive(quantity)?;
        if source_id == dest_id {
            return Err(ServiceError::ValidationError(
                "cannot transfer stock to the same record".to_string(),
            ));
        }
        let reference = reference.to_string();
        let notes = notes.map(str::to_string);

        type TransferResult = (
            inventory_record::Model,
            inventory_record::Model,
            inventory_transaction::Model,
            inventory_transaction::Model,
        );

        let (source, dest, source_entry, dest_entry) = self
            .db_pool
            .transaction::<_, TransferResult, ServiceError>(move |txn| {
                Box::pin(async move {
                    // Deterministic lock order prevents AB/BA deadlocks
                    // between concurrent opposing transfers.
                    let (first_id, second_id) = if source_id < dest_id {
                        (source_id, dest_id)
                    } else {
                        (dest_id, source_id)
                    };
                    let first = load_record_for_update(txn, first_id).await?;
                    let second = load_record_for_update(txn, second_id).await?;
                    let (source, dest) = if first.id == source_id {
                        (first, second)
                    } else {
                        (second, first)
                    };

                    let available = source.available_quantity();
                    if quantity > available {
                        return Err(ServiceError::InsufficientStock {
                            record_id: source_id,
                            requested: quantity,
                            available,
                        });
                    }

                    let mut source_active: inventory_record::ActiveModel = source.clone().into();
                    source_active.quantity = Set(source.quantity - quantity);
                    let source = source_active
                        .update(txn)
                        .await
                        .map_err(ServiceError::StorageUnavailable)?;

                    let source_entry = insert_ledger_entry(
                        txn,
                        source_id,
                        TransactionType::TransferOut,
                        -quantity,
                        None,
                        &reference,
                        notes.clone(),
                        actor,
                    )
                    .await?;

                    let mut dest_active: inventory_record::ActiveModel = dest.clone().into();
                    dest_active.quantity = Set(dest.quantity + quantity);
                    let dest = dest_active
                        .update(txn)
                        .await
                        .map_err(ServiceError::StorageUnavailable)?;

                    let dest_entry = insert_ledger_entry(
                        txn,
                        dest_id,
                        TransactionType::TransferIn,
                        quantity,
                        None,
                        &reference,
                        notes,
                        actor,
                    )
                    .await?;

                    Ok((source, dest, source_entry, dest_entry))
                })
            })
            .await
            .map_err(unwrap_txn_err)?;

        info!(
            source_id = %source.id,
            dest_id = %dest.id,
            quantity = quantity,
            reference = %source_entry.reference_number,
            "stock transferred"
        );

        self.event_sender
            .notify(Event::StockTransferred {
                source_record_id: source.id,
                dest_record_id: dest.id,
                product_id: source.product_id,
                quantity,
                reference_number: source_entry.reference_number.clone(),
            })
            .await;
        self.maybe_notify_low_stock(&source).await;

        Ok((source_entry, dest_entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::DbErr;

    #[test]
    fn txn_error_unwraps_to_service_error() {
        let err = unwrap_txn_err(TransactionError::Transaction(
            ServiceError::InvalidQuantity { quantity: 0 },
        ));
        assert!(matches!(err, ServiceError::InvalidQuantity { quantity: 0 }));

        let err = unwrap_txn_err(TransactionError::Connection(DbErr::Custom("gone".into())));
        assert!(matches!(err, ServiceError::StorageUnavailable(_)));
    }
}
