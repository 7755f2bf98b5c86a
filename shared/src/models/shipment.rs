//! Shipments, their line items and farmer allocations

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{FarmerId, ProductId, ShipmentId};

/// A committed shipment header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
    pub id: ShipmentId,
    pub created_at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// One product entry within a shipment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    /// Purchase price per unit
    pub unit_price: Decimal,
    pub quantity: i64,
    pub subtotal: Decimal,
}

/// The part of a line item sold to one farmer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub farmer_id: FarmerId,
    pub product_id: ProductId,
    pub quantity: i64,
    /// Resale price per unit, independent of the purchase price
    pub unit_price: Decimal,
    pub total_paid: Decimal,
}

/// Shipment listing row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentSummary {
    pub id: ShipmentId,
    pub date: DateTime<Utc>,
    pub notes: Option<String>,
    pub product_count: i64,
    pub farmer_count: i64,
    pub total_cost: Decimal,
    pub total_paid: Decimal,
}

/// Line item row on the shipment detail view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentDetailRow {
    pub product_id: ProductId,
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: i64,
    pub subtotal: Decimal,
}

/// Allocation row on the shipment detail view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRow {
    pub farmer_id: FarmerId,
    pub farmer_name: String,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub total_paid: Decimal,
}

/// Full shipment view: header, line items, allocations and totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentDetail {
    pub shipment: Shipment,
    pub line_items: Vec<ShipmentDetailRow>,
    pub allocations: Vec<AllocationRow>,
    pub purchase_total: Decimal,
    pub sales_total: Decimal,
}

// ============================================================================
// Draft documents
// ============================================================================

/// A whole shipment draft submitted in one request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewShipment {
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub line_items: Vec<NewLineItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLineItem {
    pub product_id: ProductId,
    pub unit_price: Decimal,
    pub quantity: i64,
    #[serde(default)]
    pub allocations: Vec<NewAllocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAllocation {
    pub farmer_id: FarmerId,
    pub quantity: i64,
    pub unit_price: Decimal,
}
