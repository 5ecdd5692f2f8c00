use crate::{
    db::DbPool,
    entities::{
        inventory_record::{self, Entity as InventoryRecord},
        inventory_transaction::{self, Entity as InventoryTransaction},
    },
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Kinds of inventory report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryReportType {
    StockLevels,
    Movements,
    Valuation,
}

/// One line of a stock-levels report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockLevelLine {
    pub record_id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: i32,
    pub reserved_quantity: i32,
    pub available_quantity: i32,
    pub stock_status: String,
    pub needs_reordering: bool,
}

/// Ledger aggregation for one transaction type within the report window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementLine {
    pub transaction_type: String,
    pub entry_count: u64,
    pub total_quantity: i64,
}

/// One line of a valuation report: on-hand quantity priced at cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationLine {
    pub record_id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: i32,
    pub cost_price: Decimal,
    pub total_value: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportDetails {
    StockLevels(Vec<StockLevelLine>),
    Movements(Vec<MovementLine>),
    Valuation(Vec<ValuationLine>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    pub record_count: usize,
    pub total_quantity: i64,
    pub total_reserved: i64,
    pub total_value: Decimal,
    pub ledger_entries: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryReport {
    pub report_type: InventoryReportType,
    pub warehouse_id: Option<Uuid>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub generated_at: DateTime<Utc>,
    pub summary: ReportSummary,
    pub details: ReportDetails,
}

/// Read-only queries over inventory records and the ledger. Safe to run
/// concurrently with stock operations; reads are as fresh as the store's
/// isolation gives them, which is fine for reporting.
#[derive(Clone)]
pub struct ReportingService {
    db_pool: Arc<DbPool>,
}

impl ReportingService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    async fn fetch_records(
        &self,
        warehouse_id: Option<Uuid>,
    ) -> Result<Vec<inventory_record::Model>, ServiceError> {
        let mut query = InventoryRecord::find();
        if let Some(warehouse_id) = warehouse_id {
            query = query.filter(inventory_record::Column::WarehouseId.eq(warehouse_id));
        }
        let records = query
            .order_by_asc(inventory_record::Column::ProductId)
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::StorageUnavailable)?;
        Ok(records)
    }

    /// Records whose available quantity has fallen to the reorder point.
    #[instrument(skip(self))]
    pub async fn get_low_stock_items(
        &self,
        warehouse_id: Option<Uuid>,
    ) -> Result<Vec<inventory_record::Model>, ServiceError> {
        let records = self.fetch_records(warehouse_id).await?;
        Ok(records
            .into_iter()
            .filter(|r| r.needs_reordering())
            .collect())
    }

    /// Records holding more than their configured maximum.
    #[instrument(skip(self))]
    pub async fn get_overstock_items(
        &self,
        warehouse_id: Option<Uuid>,
    ) -> Result<Vec<inventory_record::Model>, ServiceError> {
        let records = self.fetch_records(warehouse_id).await?;
        Ok(records
            .into_iter()
            .filter(|r| r.quantity > r.maximum_stock_level)
            .collect())
    }

    /// Builds a report over the current records and, for movements, the
    /// ledger entries inside the date window.
    #[instrument(skip(self))]
    pub async fn generate_inventory_report(
        &self,
        report_type: InventoryReportType,
        warehouse_id: Option<Uuid>,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<InventoryReport, ServiceError> {
        let records = self.fetch_records(warehouse_id).await?;

        let total_quantity: i64 = records.iter().map(|r| r.quantity as i64).sum();
        let total_reserved: i64 = records.iter().map(|r| r.reserved_quantity as i64).sum();
        let total_value: Decimal = records
            .iter()
            .map(|r| Decimal::from(r.quantity) * r.cost_price)
            .sum();

        let mut summary = ReportSummary {
            record_count: records.len(),
            total_quantity,
            total_reserved,
            total_value,
            ledger_entries: 0,
        };

        let details = match report_type {
            InventoryReportType::StockLevels => ReportDetails::StockLevels(
                records
                    .iter()
                    .map(|r| StockLevelLine {
                        record_id: r.id,
                        product_id: r.product_id,
                        warehouse_id: r.warehouse_id,
                        quantity: r.quantity,
                        reserved_quantity: r.reserved_quantity,
                        available_quantity: r.available_quantity(),
                        stock_status: r.stock_status().as_str().to_string(),
                        needs_reordering: r.needs_reordering(),
                    })
                    .collect(),
            ),
            InventoryReportType::Valuation => ReportDetails::Valuation(
                records
                    .iter()
                    .map(|r| ValuationLine {
                        record_id: r.id,
                        product_id: r.product_id,
                        warehouse_id: r.warehouse_id,
                        quantity: r.quantity,
                        cost_price: r.cost_price,
                        total_value: Decimal::from(r.quantity) * r.cost_price,
                    })
                    .collect(),
            ),
            InventoryReportType::Movements => {
                let entries = self
                    .fetch_movements(&records, start_date, end_date)
                    .await?;
                summary.ledger_entries = entries.iter().map(|m| m.entry_count).sum();
                ReportDetails::Movements(entries)
            }
        };

        Ok(InventoryReport {
            report_type,
            warehouse_id,
            start_date,
            end_date,
            generated_at: Utc::now(),
            summary,
            details,
        })
    }

    async fn fetch_movements(
        &self,
        records: &[inventory_record::Model],
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<Vec<MovementLine>, ServiceError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let record_ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        let mut query = InventoryTransaction::find()
            .filter(inventory_transaction::Column::InventoryId.is_in(record_ids));
        if let Some(start) = start_date {
            query = query.filter(inventory_transaction::Column::CreatedAt.gte(start));
        }
        if let Some(end) = end_date {
            query = query.filter(inventory_transaction::Column::CreatedAt.lte(end));
        }

        let entries = query
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::StorageUnavailable)?;

        let mut by_type: BTreeMap<String, MovementLine> = BTreeMap::new();
        for entry in entries {
            let line = by_type
                .entry(entry.transaction_type.clone())
                .or_insert_with(|| MovementLine {
                    transaction_type: entry.transaction_type.clone(),
                    entry_count: 0,
                    total_quantity: 0,
                });
            line.entry_count += 1;
            line.total_quantity += entry.quantity as i64;
        }

        Ok(by_type.into_values().collect())
    }
}
