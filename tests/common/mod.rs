use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use std::sync::Arc;
use stockroom_api::db::{establish_connection_with_config, run_migrations, DbConfig};
use stockroom_api::entities::inventory_record;
use stockroom_api::events::{event_channel, Event, EventSender};
use tokio::sync::mpsc::Receiver;
use uuid::Uuid;

/// Fresh in-memory database with the full schema applied.
///
/// A single pooled connection keeps every query in the test on the same
/// SQLite in-memory database.
pub async fn setup_db() -> Arc<DatabaseConnection> {
    let config = DbConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        ..Default::default()
    };
    let pool = Arc::new(
        establish_connection_with_config(&config)
            .await
            .expect("Failed to create DB pool"),
    );
    run_migrations(pool.as_ref())
        .await
        .expect("Failed to run migrations");
    pool
}

pub fn test_events() -> (EventSender, Receiver<Event>) {
    event_channel(256)
}

/// Inserts an inventory record directly, bypassing the engine. Used to set up
/// report fixtures with specific thresholds.
#[allow(clippy::too_many_arguments)]
pub async fn seed_record(
    db: &DatabaseConnection,
    warehouse_id: Uuid,
    quantity: i32,
    reserved_quantity: i32,
    cost_price: Decimal,
    minimum_stock_level: i32,
    maximum_stock_level: i32,
    reorder_point: i32,
) -> inventory_record::Model {
    let record = inventory_record::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(Uuid::new_v4()),
        warehouse_id: Set(warehouse_id),
        quantity: Set(quantity),
        reserved_quantity: Set(reserved_quantity),
        cost_price: Set(cost_price),
        minimum_stock_level: Set(minimum_stock_level),
        maximum_stock_level: Set(maximum_stock_level),
        reorder_point: Set(reorder_point),
        supplier_id: Set(None),
        created_at: Set(Utc::now()),
        last_updated: Set(Utc::now()),
    };

    record.insert(db).await.expect("Failed to seed record")
}
