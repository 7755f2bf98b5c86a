//! Post-sale stock movements: direct sales, transfers and returns

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{FarmerId, ProductId};

/// A warehouse-to-farmer sale not tied to a shipment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectSale {
    pub id: i64,
    pub farmer_id: FarmerId,
    pub farmer_name: String,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub total_paid: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Redistribution of already-sold units between two farmers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: i64,
    pub from_farmer_id: FarmerId,
    pub from_farmer_name: String,
    pub to_farmer_id: FarmerId,
    pub to_farmer_name: String,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: i64,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Units given back by a farmer to the warehouse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Return {
    pub id: i64,
    pub farmer_id: FarmerId,
    pub farmer_name: String,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: i64,
    pub refund_amount: Decimal,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for recording a direct sale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDirectSale {
    pub farmer_id: FarmerId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Decimal,
}

/// Input for recording a transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransfer {
    pub from_farmer_id: FarmerId,
    pub to_farmer_id: FarmerId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub note: Option<String>,
}

/// Input for recording a return
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReturn {
    pub farmer_id: FarmerId,
    pub product_id: ProductId,
    pub quantity: i64,
    #[serde(default)]
    pub refund_amount: Decimal,
    pub note: Option<String>,
}
