//! Reference data: products and farmers

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{FarmerId, ProductId};

/// A product the warehouse buys and resells
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A farmer who buys produce for resale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Farmer {
    pub id: FarmerId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Product listing row with purchase and stock figures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRow {
    pub id: ProductId,
    pub name: String,
    pub date_added: DateTime<Utc>,
    pub total_bought: i64,
    /// Sum of line item subtotals, rounded for display
    pub total_cost: Decimal,
    pub current_stock: i64,
}

/// Farmer listing row with spend totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmerRow {
    pub id: FarmerId,
    pub name: String,
    pub date_added: DateTime<Utc>,
    /// Sum of `total_paid` over allocations and direct sales
    pub total_bought: Decimal,
    pub total_refunded: Decimal,
    pub units_purchased: i64,
    pub units_returned: i64,
}
