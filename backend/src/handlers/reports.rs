//! Reporting handlers with optional CSV export

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::ReportingService;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    /// "json" (default) or "csv"
    pub format: Option<String>,
}

impl ReportQuery {
    fn wants_csv(&self) -> bool {
        self.format
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case("csv"))
    }
}

fn csv_response<T: Serialize>(rows: &[T], filename: &str) -> AppResult<Response> {
    let csv = ReportingService::export_to_csv(rows)?;
    let disposition = format!("attachment; filename=\"{}\"", filename);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv,
    )
        .into_response())
}

/// Current stock of every product
pub async fn get_stock_report(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Query(query): Query<ReportQuery>,
) -> AppResult<Response> {
    let service = ReportingService::new(state.ledger.clone());
    let rows = service.stock_report(&session).await?;

    if query.wants_csv() {
        csv_response(&rows, "stock.csv")
    } else {
        Ok(Json(rows).into_response())
    }
}

/// Spend and refund totals per farmer
pub async fn get_farmer_report(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Query(query): Query<ReportQuery>,
) -> AppResult<Response> {
    let service = ReportingService::new(state.ledger.clone());
    let rows = service.farmer_report(&session).await?;

    if query.wants_csv() {
        csv_response(&rows, "farmers.csv")
    } else {
        Ok(Json(rows).into_response())
    }
}

/// Remaining stock value at weighted-average cost
pub async fn get_valuation_report(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Query(query): Query<ReportQuery>,
) -> AppResult<Response> {
    let service = ReportingService::new(state.ledger.clone());
    let report = service.valuation_report(&session).await?;

    if query.wants_csv() {
        csv_response(&report.items, "valuation.csv")
    } else {
        Ok(Json(report).into_response())
    }
}
