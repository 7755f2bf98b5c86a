//! WebAssembly bindings for the produce ledger
//!
//! Runs the shipment allocation builder in the browser so an operator sees
//! remaining allocatable quantities and totals before submitting a shipment.
//! Drafts cross the boundary as JSON in the same shape the API accepts.

use std::str::FromStr;

use rust_decimal::Decimal;
use shared::builder::{check_draft, DraftReport, ShipmentBuilder};
use shared::models::NewShipment;
use shared::money;
use shared::types::ProductId;
use shared::validation;
use wasm_bindgen::prelude::*;

/// Initialize the WASM module
#[wasm_bindgen(start)]
pub fn init() {
    web_sys::console::log_1(&JsValue::from_str("produce ledger bindings loaded"));
}

fn parse_draft(draft_json: &str) -> Result<NewShipment, String> {
    serde_json::from_str(draft_json).map_err(|e| format!("Invalid shipment JSON: {}", e))
}

fn parse_amount(amount: &str) -> Result<Decimal, String> {
    Decimal::from_str(amount.trim()).map_err(|e| format!("Invalid amount '{}': {}", amount, e))
}

/// Allocation progress and totals of a draft
pub fn draft_report(draft_json: &str) -> Result<DraftReport, String> {
    Ok(check_draft(&parse_draft(draft_json)?))
}

/// Units of a line item not yet assigned to a farmer
pub fn remaining_for(draft_json: &str, product_id: i64) -> Result<i64, String> {
    let draft = parse_draft(draft_json)?;
    let (builder, _) = ShipmentBuilder::replay(&draft);
    builder
        .remaining(ProductId(product_id))
        .ok_or_else(|| format!("{} is not in this shipment", ProductId(product_id)))
}

/// `unit_price × quantity` rendered for display
pub fn line_total_text(unit_price: &str, quantity: i64) -> Result<String, String> {
    let price = parse_amount(unit_price)?;
    let total = money::line_total(price, quantity).map_err(|e| e.to_string())?;
    Ok(money::format_amount(total))
}

/// Check a shipment draft; returns the report as a plain JS object
#[wasm_bindgen]
pub fn check_shipment_draft(draft_json: &str) -> Result<JsValue, JsValue> {
    let report = draft_report(draft_json).map_err(|e| JsValue::from_str(&e))?;
    let json = serde_json::to_string(&report).map_err(|e| JsValue::from_str(&e.to_string()))?;
    js_sys::JSON::parse(&json)
}

/// Remaining allocatable units of one line item
#[wasm_bindgen]
pub fn remaining_allocatable(draft_json: &str, product_id: i64) -> Result<i64, JsValue> {
    remaining_for(draft_json, product_id).map_err(|e| JsValue::from_str(&e))
}

/// Format an amount as `1,234.50`
#[wasm_bindgen]
pub fn format_money(amount: &str) -> Result<String, JsValue> {
    parse_amount(amount)
        .map(money::format_amount)
        .map_err(|e| JsValue::from_str(&e))
}

/// Line subtotal formatted for display
#[wasm_bindgen]
pub fn line_total(unit_price: &str, quantity: i64) -> Result<String, JsValue> {
    line_total_text(unit_price, quantity).map_err(|e| JsValue::from_str(&e))
}

/// Validate a product or farmer name; returns the problem, if any
#[wasm_bindgen]
pub fn name_problem(name: &str) -> Option<String> {
    validation::validate_name(name).err().map(str::to_string)
}

/// Currency label shown next to amounts
#[wasm_bindgen]
pub fn currency() -> String {
    money::CURRENCY.to_string()
}
