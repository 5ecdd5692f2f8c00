mod common;

use rust_decimal_macros::dec;
use std::collections::HashMap;
use stockroom_api::entities::purchase_order::PurchaseOrderStatus;
use stockroom_api::errors::ServiceError;
use stockroom_api::services::{PurchaseOrderService, StockOperationService};
use stockroom_api::services::purchase_orders::{NewPurchaseOrder, NewPurchaseOrderItem};
use uuid::Uuid;

struct Harness {
    purchase_orders: PurchaseOrderService,
    stock: StockOperationService,
    _db: std::sync::Arc<sea_orm::DatabaseConnection>,
}

async fn harness() -> Harness {
    let db = common::setup_db().await;
    let (events, _rx) = common::test_events();
    Harness {
        purchase_orders: PurchaseOrderService::new(db.clone(), events.clone()),
        stock: StockOperationService::new(db.clone(), events),
        _db: db,
    }
}

fn two_item_po(warehouse_id: Uuid) -> NewPurchaseOrder {
    NewPurchaseOrder {
        supplier_id: Uuid::new_v4(),
        warehouse_id,
        items: vec![
            NewPurchaseOrderItem {
                product_id: Uuid::new_v4(),
                quantity_ordered: 10,
                unit_price: dec!(5.00),
            },
            NewPurchaseOrderItem {
                product_id: Uuid::new_v4(),
                quantity_ordered: 5,
                unit_price: dec!(8.00),
            },
        ],
        expected_delivery_date: None,
        notes: Some("restock".to_string()),
    }
}

#[tokio::test]
async fn create_computes_total_from_items() {
    let h = harness().await;
    let actor = Uuid::new_v4();

    let (po, items) = h
        .purchase_orders
        .create_purchase_order(two_item_po(Uuid::new_v4()), actor)
        .await
        .unwrap();

    assert_eq!(po.status(), Some(PurchaseOrderStatus::Draft));
    // 10 * 5.00 + 5 * 8.00
    assert_eq!(po.total_amount, dec!(90.00));
    assert_eq!(po.created_by, actor);
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i.quantity_received == 0));

    // Total always equals the sum of line totals.
    let line_sum: rust_decimal::Decimal = items.iter().map(|i| i.line_total()).sum();
    assert_eq!(po.total_amount, line_sum);
}

#[tokio::test]
async fn create_rejects_invalid_input() {
    let h = harness().await;
    let actor = Uuid::new_v4();

    let empty = NewPurchaseOrder {
        supplier_id: Uuid::new_v4(),
        warehouse_id: Uuid::new_v4(),
        items: vec![],
        expected_delivery_date: None,
        notes: None,
    };
    assert!(matches!(
        h.purchase_orders
            .create_purchase_order(empty, actor)
            .await
            .unwrap_err(),
        ServiceError::ValidationError(_)
    ));

    let zero_quantity = NewPurchaseOrder {
        supplier_id: Uuid::new_v4(),
        warehouse_id: Uuid::new_v4(),
        items: vec![NewPurchaseOrderItem {
            product_id: Uuid::new_v4(),
            quantity_ordered: 0,
            unit_price: dec!(1.00),
        }],
        expected_delivery_date: None,
        notes: None,
    };
    assert!(matches!(
        h.purchase_orders
            .create_purchase_order(zero_quantity, actor)
            .await
            .unwrap_err(),
        ServiceError::ValidationError(_)
    ));

    let negative_price = NewPurchaseOrder {
        supplier_id: Uuid::new_v4(),
        warehouse_id: Uuid::new_v4(),
        items: vec![NewPurchaseOrderItem {
            product_id: Uuid::new_v4(),
            quantity_ordered: 1,
            unit_price: dec!(-2.00),
        }],
        expected_delivery_date: None,
        notes: None,
    };
    assert!(matches!(
        h.purchase_orders
            .create_purchase_order(negative_price, actor)
            .await
            .unwrap_err(),
        ServiceError::ValidationError(_)
    ));
}

#[tokio::test]
async fn submission_and_cancellation_follow_the_state_machine() {
    let h = harness().await;
    let actor = Uuid::new_v4();

    let (po, _) = h
        .purchase_orders
        .create_purchase_order(two_item_po(Uuid::new_v4()), actor)
        .await
        .unwrap();

    let po = h
        .purchase_orders
        .submit_purchase_order(po.id, actor)
        .await
        .unwrap();
    assert_eq!(po.status(), Some(PurchaseOrderStatus::Ordered));

    // Ordered cannot be submitted again.
    assert!(matches!(
        h.purchase_orders
            .submit_purchase_order(po.id, actor)
            .await
            .unwrap_err(),
        ServiceError::InvalidStatus { .. }
    ));

    let po = h
        .purchase_orders
        .cancel_purchase_order(po.id, actor)
        .await
        .unwrap();
    assert_eq!(po.status(), Some(PurchaseOrderStatus::Cancelled));

    // Cancelled is terminal.
    assert!(matches!(
        h.purchase_orders
            .cancel_purchase_order(po.id, actor)
            .await
            .unwrap_err(),
        ServiceError::InvalidStatus { .. }
    ));
}

#[tokio::test]
async fn partial_receipt_books_stock_and_closes_the_order() {
    let h = harness().await;
    let actor = Uuid::new_v4();
    let warehouse_id = Uuid::new_v4();

    let (po, items) = h
        .purchase_orders
        .create_purchase_order(two_item_po(warehouse_id), actor)
        .await
        .unwrap();

    // Receive all 10 of the first item, 3 of 5 of the second.
    let received: HashMap<Uuid, i32> =
        HashMap::from([(items[0].id, 10), (items[1].id, 3)]);
    let po = h
        .purchase_orders
        .receive_purchase_order(po.id, received, actor, Some("dock 3"))
        .await
        .unwrap();
    assert_eq!(po.status(), Some(PurchaseOrderStatus::Received));

    let stored_items = h
        .purchase_orders
        .get_purchase_order_items(po.id)
        .await
        .unwrap();
    let first = stored_items.iter().find(|i| i.id == items[0].id).unwrap();
    let second = stored_items.iter().find(|i| i.id == items[1].id).unwrap();
    assert_eq!(first.quantity_received, 10);
    assert_eq!(second.quantity_received, 3);

    // Stock landed on the PO's warehouse, priced at the item cost.
    let record_one = h
        .stock
        .get_record_for(items[0].product_id, warehouse_id)
        .await
        .unwrap()
        .unwrap();
    let record_two = h
        .stock
        .get_record_for(items[1].product_id, warehouse_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record_one.quantity, 10);
    assert_eq!(record_two.quantity, 3);
    assert_eq!(record_one.cost_price, dec!(5.00));
    assert_eq!(record_two.cost_price, dec!(8.00));

    // Each receipt left a PURCHASE ledger entry referencing the PO number.
    let entries = h.stock.list_transactions(record_one.id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].transaction_type, "purchase");
    assert_eq!(entries[0].reference_number, po.po_number);
    assert_eq!(entries[0].unit_cost, Some(dec!(5.00)));
    assert_eq!(entries[0].created_by, actor);
}

#[tokio::test]
async fn received_orders_reject_further_receipts() {
    let h = harness().await;
    let actor = Uuid::new_v4();
    let warehouse_id = Uuid::new_v4();

    let (po, items) = h
        .purchase_orders
        .create_purchase_order(two_item_po(warehouse_id), actor)
        .await
        .unwrap();

    h.purchase_orders
        .receive_purchase_order(po.id, HashMap::from([(items[0].id, 2)]), actor, None)
        .await
        .unwrap();

    // Second receipt is rejected, even for the item that was short.
    let err = h
        .purchase_orders
        .receive_purchase_order(po.id, HashMap::from([(items[0].id, 8)]), actor, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidStatus { .. }));

    // And no stock moved on the rejected call.
    let record = h
        .stock
        .get_record_for(items[0].product_id, warehouse_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.quantity, 2);
}

#[tokio::test]
async fn receipt_clamps_to_ordered_quantity() {
    let h = harness().await;
    let actor = Uuid::new_v4();
    let warehouse_id = Uuid::new_v4();

    let (po, items) = h
        .purchase_orders
        .create_purchase_order(two_item_po(warehouse_id), actor)
        .await
        .unwrap();

    // 15 arrives for an item with only 10 ordered.
    let po = h
        .purchase_orders
        .receive_purchase_order(po.id, HashMap::from([(items[0].id, 15)]), actor, None)
        .await
        .unwrap();
    assert_eq!(po.status(), Some(PurchaseOrderStatus::Received));

    let stored_items = h
        .purchase_orders
        .get_purchase_order_items(po.id)
        .await
        .unwrap();
    let first = stored_items.iter().find(|i| i.id == items[0].id).unwrap();
    assert_eq!(first.quantity_received, 10);

    let record = h
        .stock
        .get_record_for(items[0].product_id, warehouse_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.quantity, 10);
}

#[tokio::test]
async fn receipt_of_foreign_item_rolls_back_entirely() {
    let h = harness().await;
    let actor = Uuid::new_v4();
    let warehouse_id = Uuid::new_v4();

    let (po, items) = h
        .purchase_orders
        .create_purchase_order(two_item_po(warehouse_id), actor)
        .await
        .unwrap();

    let received: HashMap<Uuid, i32> =
        HashMap::from([(items[0].id, 10), (Uuid::new_v4(), 3)]);
    let err = h
        .purchase_orders
        .receive_purchase_order(po.id, received, actor, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));

    // The whole receipt rolled back: order still open, no stock booked.
    let po = h
        .purchase_orders
        .get_purchase_order(po.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(po.status(), Some(PurchaseOrderStatus::Draft));
    assert!(h
        .stock
        .get_record_for(items[0].product_id, warehouse_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn receive_validates_its_input() {
    let h = harness().await;
    let actor = Uuid::new_v4();

    let (po, items) = h
        .purchase_orders
        .create_purchase_order(two_item_po(Uuid::new_v4()), actor)
        .await
        .unwrap();

    let err = h
        .purchase_orders
        .receive_purchase_order(po.id, HashMap::new(), actor, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));

    let err = h
        .purchase_orders
        .receive_purchase_order(po.id, HashMap::from([(items[0].id, 0)]), actor, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn status_and_supplier_queries_filter_orders() {
    let h = harness().await;
    let actor = Uuid::new_v4();
    let supplier_id = Uuid::new_v4();

    let mut po = two_item_po(Uuid::new_v4());
    po.supplier_id = supplier_id;
    let (first, _) = h
        .purchase_orders
        .create_purchase_order(po, actor)
        .await
        .unwrap();
    let (second, _) = h
        .purchase_orders
        .create_purchase_order(two_item_po(Uuid::new_v4()), actor)
        .await
        .unwrap();

    h.purchase_orders
        .submit_purchase_order(second.id, actor)
        .await
        .unwrap();

    let drafts = h
        .purchase_orders
        .list_purchase_orders_by_status(PurchaseOrderStatus::Draft)
        .await
        .unwrap();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].id, first.id);

    let by_supplier = h
        .purchase_orders
        .list_purchase_orders_by_supplier(supplier_id)
        .await
        .unwrap();
    assert_eq!(by_supplier.len(), 1);
    assert_eq!(by_supplier[0].id, first.id);
}
