//! Stock reconciliation across the four event streams
//!
//! Nothing here is stored. Positions are derived from per-product sums of
//! line items, farmer purchases (allocations and direct sales) and returns.
//! Transfers move units between farmers and leave warehouse stock untouched.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::money;
use crate::types::{FarmerId, ProductId};

/// Derived on-hand quantity for one product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockPosition {
    pub total_bought: i64,
    pub total_sold: i64,
    pub total_returned: i64,
    pub current_stock: i64,
}

impl StockPosition {
    /// `current_stock = bought - sold - returned`
    pub fn reconcile(total_bought: i64, total_sold: i64, total_returned: i64) -> Self {
        Self {
            total_bought,
            total_sold,
            total_returned,
            current_stock: total_bought - total_sold - total_returned,
        }
    }

    /// Position of a product with no events yet
    pub fn empty() -> Self {
        Self::reconcile(0, 0, 0)
    }

    /// Whether `quantity` more units can leave stock without going negative
    pub fn can_release(&self, quantity: i64) -> bool {
        quantity <= self.current_stock
    }
}

/// Stock position labelled with its product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductStock {
    pub product_id: ProductId,
    pub product_name: String,
    #[serde(flatten)]
    pub position: StockPosition,
}

/// Units of one product currently held by one farmer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarmerHolding {
    pub purchased: i64,
    pub transferred_in: i64,
    pub transferred_out: i64,
    pub returned: i64,
    pub held: i64,
}

impl FarmerHolding {
    pub fn reconcile(purchased: i64, transferred_in: i64, transferred_out: i64, returned: i64) -> Self {
        Self {
            purchased,
            transferred_in,
            transferred_out,
            returned,
            held: purchased + transferred_in - transferred_out - returned,
        }
    }
}

/// Holding labelled with farmer and product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmerProductHolding {
    pub farmer_id: FarmerId,
    pub product_id: ProductId,
    pub product_name: String,
    #[serde(flatten)]
    pub holding: FarmerHolding,
}

/// Value of remaining stock at weighted-average purchase cost
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductValuation {
    pub product_id: ProductId,
    pub product_name: String,
    pub current_stock: i64,
    pub unit_cost: Decimal,
    pub total_value: Decimal,
    pub currency: String,
}

impl ProductValuation {
    /// Value `current_stock` at `total_cost / total_bought`, rounding only the result
    pub fn compute(
        product_id: ProductId,
        product_name: String,
        position: &StockPosition,
        total_cost: Decimal,
    ) -> Self {
        let unit_cost = if position.total_bought > 0 {
            total_cost / Decimal::from(position.total_bought)
        } else {
            Decimal::ZERO
        };
        let total_value = unit_cost * Decimal::from(position.current_stock);

        Self {
            product_id,
            product_name,
            current_stock: position.current_stock,
            unit_cost: money::round_for_display(unit_cost),
            total_value: money::round_for_display(total_value),
            currency: money::CURRENCY.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_stock_formula() {
        let position = StockPosition::reconcile(150, 90, 10);
        assert_eq!(position.current_stock, 50);
    }

    #[test]
    fn test_new_product_has_zero_position() {
        let position = StockPosition::empty();
        assert_eq!(position.total_bought, 0);
        assert_eq!(position.total_sold, 0);
        assert_eq!(position.total_returned, 0);
        assert_eq!(position.current_stock, 0);
    }

    #[test]
    fn test_can_release_up_to_current_stock() {
        let position = StockPosition::reconcile(100, 60, 0);
        assert!(position.can_release(40));
        assert!(!position.can_release(41));
    }

    #[test]
    fn test_farmer_holding() {
        let holding = FarmerHolding::reconcile(60, 5, 20, 10);
        assert_eq!(holding.held, 35);
    }

    #[test]
    fn test_valuation_uses_weighted_average_cost() {
        // 100 units at 50 + 50 units at 20 = 6000 over 150 units = 40 each
        let position = StockPosition::reconcile(150, 100, 0);
        let valuation = ProductValuation::compute(
            ProductId(1),
            "Tomato".into(),
            &position,
            Decimal::from(6000),
        );
        assert_eq!(valuation.unit_cost, Decimal::from_str("40.00").unwrap());
        assert_eq!(valuation.total_value, Decimal::from_str("2000.00").unwrap());
    }

    #[test]
    fn test_valuation_of_unbought_product_is_zero() {
        let valuation = ProductValuation::compute(ProductId(1), "Onion".into(), &StockPosition::empty(), Decimal::ZERO);
        assert_eq!(valuation.unit_cost, Decimal::ZERO);
        assert_eq!(valuation.total_value, Decimal::ZERO);
    }
}
