//! Stockroom API Library
//!
//! Backend engine for inventory control: the per-(product, warehouse) stock
//! ledger with reservations and transfers, the purchase order intake
//! workflow, and read-only reporting over both.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod services;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub stock_operations: services::StockOperationService,
    pub purchase_orders: services::PurchaseOrderService,
    pub reporting: services::ReportingService,
}

impl AppState {
    /// Wires every service against one pool and one event channel. The
    /// caller owns the receiving end (see [`events::spawn_event_logger`]).
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
    ) -> Self {
        Self {
            stock_operations: services::StockOperationService::new(
                db.clone(),
                event_sender.clone(),
            ),
            purchase_orders: services::PurchaseOrderService::new(
                db.clone(),
                event_sender.clone(),
            ),
            reporting: services::ReportingService::new(db.clone()),
            db,
            config,
            event_sender,
        }
    }
}
