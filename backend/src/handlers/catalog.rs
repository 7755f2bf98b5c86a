//! HTTP handlers for products and farmers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use shared::models::{Farmer, FarmerProductHolding, Product, ProductRow, ProductStock, FarmerRow};
use shared::types::{FarmerId, ProductId};
use validator::Validate;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateNamedRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
}

/// Create a product
pub async fn create_product(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Json(body): Json<CreateNamedRequest>,
) -> AppResult<(StatusCode, Json<Product>)> {
    body.validate()?;
    let product = state.ledger.create_product(&session, &body.name).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

/// List products with purchase totals and current stock
pub async fn list_products(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
) -> AppResult<Json<Vec<ProductRow>>> {
    let products = state.ledger.product_totals(&session).await?;
    Ok(Json(products))
}

/// Stock position of one product
pub async fn get_product_stock(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(product_id): Path<i64>,
) -> AppResult<Json<ProductStock>> {
    let stock = state
        .ledger
        .stock_position(&session, ProductId(product_id))
        .await?;
    Ok(Json(stock))
}

/// Create a farmer
pub async fn create_farmer(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Json(body): Json<CreateNamedRequest>,
) -> AppResult<(StatusCode, Json<Farmer>)> {
    body.validate()?;
    let farmer = state.ledger.create_farmer(&session, &body.name).await?;
    Ok((StatusCode::CREATED, Json(farmer)))
}

/// List farmers with spend totals
pub async fn list_farmers(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
) -> AppResult<Json<Vec<FarmerRow>>> {
    let farmers = state.ledger.farmer_totals(&session).await?;
    Ok(Json(farmers))
}

/// Units of each product a farmer holds
pub async fn get_farmer_holdings(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(farmer_id): Path<i64>,
) -> AppResult<Json<Vec<FarmerProductHolding>>> {
    let holdings = state
        .ledger
        .farmer_holdings(&session, FarmerId(farmer_id))
        .await?;
    Ok(Json(holdings))
}
