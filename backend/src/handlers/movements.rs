//! HTTP handlers for direct sales, transfers and returns

use axum::{extract::State, http::StatusCode, Json};
use rust_decimal::Decimal;
use serde::Deserialize;
use shared::models::{DirectSale, NewDirectSale, NewReturn, NewTransfer, Return, Transfer};
use shared::types::{FarmerId, ProductId};
use validator::Validate;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct DirectSaleRequest {
    pub farmer_id: i64,
    pub product_id: i64,
    #[validate(range(min = 1, message = "Quantity must be a positive integer"))]
    pub quantity: i64,
    pub unit_price: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TransferRequest {
    pub from_farmer_id: i64,
    pub to_farmer_id: i64,
    pub product_id: i64,
    #[validate(range(min = 1, message = "Quantity must be a positive integer"))]
    pub quantity: i64,
    #[validate(length(max = 500, message = "Note must be at most 500 characters"))]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReturnRequest {
    pub farmer_id: i64,
    pub product_id: i64,
    #[validate(range(min = 1, message = "Quantity must be a positive integer"))]
    pub quantity: i64,
    #[serde(default)]
    pub refund_amount: Decimal,
    #[validate(length(max = 500, message = "Note must be at most 500 characters"))]
    pub note: Option<String>,
}

/// Record a direct sale
pub async fn create_sale(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Json(body): Json<DirectSaleRequest>,
) -> AppResult<(StatusCode, Json<DirectSale>)> {
    body.validate()?;
    let sale = NewDirectSale {
        farmer_id: FarmerId(body.farmer_id),
        product_id: ProductId(body.product_id),
        quantity: body.quantity,
        unit_price: body.unit_price,
    };
    let recorded = state.ledger.record_direct_sale(&session, sale).await?;
    Ok((StatusCode::CREATED, Json(recorded)))
}

/// List direct sales, most recent first
pub async fn list_sales(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
) -> AppResult<Json<Vec<DirectSale>>> {
    Ok(Json(state.ledger.list_direct_sales(&session).await?))
}

/// Record a transfer between farmers
pub async fn create_transfer(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Json(body): Json<TransferRequest>,
) -> AppResult<(StatusCode, Json<Transfer>)> {
    body.validate()?;
    let transfer = NewTransfer {
        from_farmer_id: FarmerId(body.from_farmer_id),
        to_farmer_id: FarmerId(body.to_farmer_id),
        product_id: ProductId(body.product_id),
        quantity: body.quantity,
        note: body.note,
    };
    let recorded = state.ledger.record_transfer(&session, transfer).await?;
    Ok((StatusCode::CREATED, Json(recorded)))
}

/// List transfers, most recent first
pub async fn list_transfers(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
) -> AppResult<Json<Vec<Transfer>>> {
    Ok(Json(state.ledger.list_transfers(&session).await?))
}

/// Record a return to the warehouse
pub async fn create_return(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Json(body): Json<ReturnRequest>,
) -> AppResult<(StatusCode, Json<Return>)> {
    body.validate()?;
    let ret = NewReturn {
        farmer_id: FarmerId(body.farmer_id),
        product_id: ProductId(body.product_id),
        quantity: body.quantity,
        refund_amount: body.refund_amount,
        note: body.note,
    };
    let recorded = state.ledger.record_return(&session, ret).await?;
    Ok((StatusCode::CREATED, Json(recorded)))
}

/// List returns, most recent first
pub async fn list_returns(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
) -> AppResult<Json<Vec<Return>>> {
    Ok(Json(state.ledger.list_returns(&session).await?))
}
