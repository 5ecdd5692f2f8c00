//! Service layer: the stock operation engine (the only mutator of inventory
//! quantities), the purchase order workflow built on top of it, and the
//! read-only reporting queries.

pub mod purchase_orders;
pub mod reporting;
pub mod stock_operations;

pub use purchase_orders::PurchaseOrderService;
pub use reporting::ReportingService;
pub use stock_operations::StockOperationService;
