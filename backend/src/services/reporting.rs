//! Reporting service for stock, farmer and valuation reports
//! Provides flat report rows and CSV export

use rust_decimal::Decimal;
use serde::Serialize;
use shared::models::{FarmerRow, ProductValuation};
use shared::money;
use shared::types::Session;

use crate::error::{AppError, AppResult};
use crate::services::ledger::LedgerService;

/// Reporting service
#[derive(Clone)]
pub struct ReportingService {
    ledger: LedgerService,
}

/// Stock report row (flat so it can be written as CSV)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockReportRow {
    pub product_id: i64,
    pub product: String,
    pub total_bought: i64,
    pub total_sold: i64,
    pub total_returned: i64,
    pub current_stock: i64,
}

/// Valuation report with its grand total
#[derive(Debug, Clone, Serialize)]
pub struct ValuationReport {
    pub items: Vec<ProductValuation>,
    pub total_value: Decimal,
    pub currency: String,
}

impl ReportingService {
    pub fn new(ledger: LedgerService) -> Self {
        Self { ledger }
    }

    /// Current stock of every product
    pub async fn stock_report(&self, session: &Session) -> AppResult<Vec<StockReportRow>> {
        let positions = self.ledger.stock_positions(session).await?;
        Ok(positions
            .into_iter()
            .map(|stock| StockReportRow {
                product_id: stock.product_id.0,
                product: stock.product_name,
                total_bought: stock.position.total_bought,
                total_sold: stock.position.total_sold,
                total_returned: stock.position.total_returned,
                current_stock: stock.position.current_stock,
            })
            .collect())
    }

    /// Spend and refund totals per farmer
    pub async fn farmer_report(&self, session: &Session) -> AppResult<Vec<FarmerRow>> {
        self.ledger.farmer_totals(session).await
    }

    /// Remaining stock value per product and overall
    pub async fn valuation_report(&self, session: &Session) -> AppResult<ValuationReport> {
        let items = self.ledger.valuation(session).await?;
        let total_value = items.iter().map(|item| item.total_value).sum::<Decimal>();
        Ok(ValuationReport {
            items,
            total_value: money::round_for_display(total_value),
            currency: money::CURRENCY.to_string(),
        })
    }

    /// Export data to CSV format
    pub fn export_to_csv<T: Serialize>(data: &[T]) -> AppResult<String> {
        let mut wtr = csv::Writer::from_writer(vec![]);
        for record in data {
            wtr.serialize(record)
                .map_err(|e| AppError::Internal(format!("CSV serialization error: {}", e)))?;
        }
        let bytes = wtr
            .into_inner()
            .map_err(|e| AppError::Internal(format!("CSV writer error: {}", e)))?;
        String::from_utf8(bytes)
            .map_err(|e| AppError::Internal(format!("UTF-8 conversion error: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_rows_export_with_header() {
        let rows = vec![StockReportRow {
            product_id: 1,
            product: "Tomato".to_string(),
            total_bought: 150,
            total_sold: 90,
            total_returned: 10,
            current_stock: 50,
        }];

        let csv = ReportingService::export_to_csv(&rows).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("product_id,product,total_bought,total_sold,total_returned,current_stock")
        );
        assert_eq!(lines.next(), Some("1,Tomato,150,90,10,50"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_empty_export_is_empty() {
        let rows: Vec<StockReportRow> = Vec::new();
        assert_eq!(ReportingService::export_to_csv(&rows).unwrap(), "");
    }
}
