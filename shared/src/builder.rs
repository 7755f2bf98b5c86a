//! Shipment allocation builder
//!
//! In-memory staging area for one shipment. Line items are added, their
//! quantity is split across farmers, and the draft may only be committed once
//! every purchased unit belongs to exactly one farmer.
//!
//! ```text
//! Empty -> Assembling -> Validated -> Committed
//!   \__________\____________\______-> Abandoned
//! ```
//!
//! A failed persistence attempt leaves the builder in `Validated` so the same
//! draft can be committed again.

use std::fmt;
use std::future::Future;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Allocation, LineItem, NewShipment};
use crate::money::{self, MoneyError};
use crate::types::{FarmerId, ProductId, ShipmentId};
use crate::validation;

/// Lifecycle state of a shipment draft
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "shipment_id", rename_all = "snake_case")]
pub enum DraftState {
    Empty,
    Assembling,
    Validated,
    Committed(ShipmentId),
    Abandoned,
}

impl DraftState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DraftState::Committed(_) | DraftState::Abandoned)
    }
}

impl fmt::Display for DraftState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DraftState::Empty => write!(f, "empty"),
            DraftState::Assembling => write!(f, "assembling"),
            DraftState::Validated => write!(f, "validated"),
            DraftState::Committed(id) => write!(f, "committed as {}", id),
            DraftState::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Rejections raised while composing a shipment
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftError {
    #[error("Invalid {field}: {message}")]
    Invalid {
        field: &'static str,
        message: &'static str,
    },

    #[error("{product} is already in this shipment")]
    DuplicateLineItem { product: ProductId },

    #[error("{product} is not in this shipment")]
    UnknownLineItem { product: ProductId },

    #[error("{farmer} already has an allocation for {product}")]
    DuplicateAllocation {
        product: ProductId,
        farmer: FarmerId,
    },

    #[error("{farmer} has no allocation for {product}")]
    UnknownAllocation {
        product: ProductId,
        farmer: FarmerId,
    },

    #[error("Cannot allocate {requested} units of {product}: only {remaining} units remaining")]
    OverAllocation {
        product: ProductId,
        requested: i64,
        remaining: i64,
    },

    #[error("{product} has {unallocated} units not assigned to farmers")]
    IncompleteAllocation {
        product: ProductId,
        unallocated: i64,
    },

    #[error("Shipment must contain at least one product")]
    EmptyShipment,

    #[error("Shipment draft is {state} and can no longer change")]
    Closed { state: DraftState },

    #[error(transparent)]
    Money(#[from] MoneyError),
}

impl DraftError {
    /// Product the rejection is about
    pub fn product(&self) -> Option<ProductId> {
        match self {
            DraftError::DuplicateLineItem { product }
            | DraftError::UnknownLineItem { product }
            | DraftError::DuplicateAllocation { product, .. }
            | DraftError::UnknownAllocation { product, .. }
            | DraftError::OverAllocation { product, .. }
            | DraftError::IncompleteAllocation { product, .. } => Some(*product),
            _ => None,
        }
    }

    /// Farmer the rejection is about
    pub fn farmer(&self) -> Option<FarmerId> {
        match self {
            DraftError::DuplicateAllocation { farmer, .. }
            | DraftError::UnknownAllocation { farmer, .. } => Some(*farmer),
            _ => None,
        }
    }

    /// Render the rejection with display names in place of ids
    pub fn describe(&self, product: &str, farmer: &str) -> String {
        match self {
            DraftError::DuplicateLineItem { .. } => {
                format!("{} is already in this shipment", product)
            }
            DraftError::UnknownLineItem { .. } => format!("{} is not in this shipment", product),
            DraftError::DuplicateAllocation { .. } => {
                format!("{} already has an allocation for {}", farmer, product)
            }
            DraftError::UnknownAllocation { .. } => {
                format!("{} has no allocation for {}", farmer, product)
            }
            DraftError::OverAllocation {
                requested,
                remaining,
                ..
            } => format!(
                "Cannot allocate {} units of {}: only {} units remaining",
                requested, product, remaining
            ),
            DraftError::IncompleteAllocation { unallocated, .. } => {
                format!("{} has {} units not assigned to farmers", product, unallocated)
            }
            other => other.to_string(),
        }
    }
}

/// Outcome of [`ShipmentBuilder::commit_with`]
#[derive(Debug)]
pub enum CommitError<E> {
    /// The draft failed validation; nothing was persisted
    Draft(DraftError),
    /// Persistence failed; the builder is still `Validated`
    Persist(E),
}

/// A line item being composed, with its farmer allocations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftLineItem {
    pub product_id: ProductId,
    pub unit_price: Decimal,
    pub quantity: i64,
    pub allocations: Vec<Allocation>,
}

impl DraftLineItem {
    pub fn allocated(&self) -> i64 {
        self.allocations.iter().map(|a| a.quantity).sum()
    }

    pub fn remaining(&self) -> i64 {
        self.quantity - self.allocated()
    }

    pub fn is_fully_allocated(&self) -> bool {
        self.remaining() == 0
    }

    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }

    pub fn sales_total(&self) -> Decimal {
        self.allocations.iter().map(|a| a.total_paid).sum()
    }

    fn has_farmer(&self, farmer_id: FarmerId) -> bool {
        self.allocations.iter().any(|a| a.farmer_id == farmer_id)
    }
}

/// A line item together with the allocations that cover it exactly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedLineItem {
    pub item: LineItem,
    pub allocations: Vec<Allocation>,
}

/// A draft that passed validation, ready to be written in one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedShipment {
    pub notes: Option<String>,
    pub line_items: Vec<ValidatedLineItem>,
}

/// Allocation progress of one line item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemStatus {
    pub product_id: ProductId,
    pub quantity: i64,
    pub allocated: i64,
    pub remaining: i64,
    pub farmer_count: usize,
    pub subtotal: Decimal,
    pub sales_total: Decimal,
}

/// Dry-run outcome of a draft document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftReport {
    pub state: DraftState,
    pub line_items: Vec<LineItemStatus>,
    pub purchase_total: Decimal,
    pub sales_total: Decimal,
    /// True when the draft would commit as submitted
    pub ready: bool,
    /// First rejection, rendered for the operator
    pub problem: Option<String>,
}

/// Replay and validate a draft without committing it
pub fn check_draft(request: &NewShipment) -> DraftReport {
    inspect_draft(request).0
}

/// Like [`check_draft`], also handing back the first rejection
pub fn inspect_draft(request: &NewShipment) -> (DraftReport, Option<DraftError>) {
    let (mut builder, replay_error) = ShipmentBuilder::replay(request);
    let problem = match replay_error {
        Some(err) => Some(err),
        None => builder.validate().err(),
    };

    let mut report = builder.report();
    report.problem = problem.as_ref().map(|err| err.to_string());
    (report, problem)
}

/// Stateful staging area for a single shipment
#[derive(Debug, Clone)]
pub struct ShipmentBuilder {
    notes: Option<String>,
    line_items: Vec<DraftLineItem>,
    state: DraftState,
}

impl Default for ShipmentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ShipmentBuilder {
    pub fn new() -> Self {
        Self {
            notes: None,
            line_items: Vec::new(),
            state: DraftState::Empty,
        }
    }

    /// Replay a whole draft document through the builder
    pub fn from_request(request: &NewShipment) -> Result<Self, DraftError> {
        match Self::replay(request) {
            (builder, None) => Ok(builder),
            (_, Some(err)) => Err(err),
        }
    }

    /// Replay a draft document, stopping at the first rejected step
    pub fn replay(request: &NewShipment) -> (Self, Option<DraftError>) {
        let mut builder = Self::new();
        let outcome = builder.apply(request);
        (builder, outcome.err())
    }

    fn apply(&mut self, request: &NewShipment) -> Result<(), DraftError> {
        self.set_notes(request.notes.clone())?;
        for line in &request.line_items {
            self.add_line_item(line.product_id, line.unit_price, line.quantity)?;
            for allocation in &line.allocations {
                self.allocate_to_farmer(
                    line.product_id,
                    allocation.farmer_id,
                    allocation.quantity,
                    allocation.unit_price,
                )?;
            }
        }
        Ok(())
    }

    /// Presenter view of the draft
    pub fn report(&self) -> DraftReport {
        DraftReport {
            state: self.state,
            line_items: self
                .line_items
                .iter()
                .map(|line| LineItemStatus {
                    product_id: line.product_id,
                    quantity: line.quantity,
                    allocated: line.allocated(),
                    remaining: line.remaining(),
                    farmer_count: line.allocations.len(),
                    subtotal: line.subtotal(),
                    sales_total: line.sales_total(),
                })
                .collect(),
            purchase_total: self.purchase_total(),
            sales_total: self.sales_total(),
            ready: self.state == DraftState::Validated,
            problem: None,
        }
    }

    pub fn state(&self) -> DraftState {
        self.state
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn line_items(&self) -> &[DraftLineItem] {
        &self.line_items
    }

    pub fn line_item(&self, product_id: ProductId) -> Option<&DraftLineItem> {
        self.line_items.iter().find(|l| l.product_id == product_id)
    }

    /// Units of a line item not yet assigned to a farmer
    pub fn remaining(&self, product_id: ProductId) -> Option<i64> {
        self.line_item(product_id).map(DraftLineItem::remaining)
    }

    /// Sum of purchase subtotals
    pub fn purchase_total(&self) -> Decimal {
        self.line_items.iter().map(DraftLineItem::subtotal).sum()
    }

    /// Sum of farmer resale totals
    pub fn sales_total(&self) -> Decimal {
        self.line_items.iter().map(DraftLineItem::sales_total).sum()
    }

    pub fn set_notes(&mut self, notes: Option<String>) -> Result<(), DraftError> {
        self.ensure_open()?;
        self.notes = notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        self.touch();
        Ok(())
    }

    /// Add a product to the shipment
    pub fn add_line_item(
        &mut self,
        product_id: ProductId,
        unit_price: Decimal,
        quantity: i64,
    ) -> Result<(), DraftError> {
        self.ensure_open()?;
        check_quantity(quantity)?;
        check_price(unit_price)?;
        money::line_total_minor(money::to_minor_units(unit_price)?, quantity)?;

        if self.line_item(product_id).is_some() {
            return Err(DraftError::DuplicateLineItem {
                product: product_id,
            });
        }

        self.line_items.push(DraftLineItem {
            product_id,
            unit_price,
            quantity,
            allocations: Vec::new(),
        });
        self.state = DraftState::Assembling;
        Ok(())
    }

    /// Assign part of a line item to a farmer at a resale price
    pub fn allocate_to_farmer(
        &mut self,
        product_id: ProductId,
        farmer_id: FarmerId,
        quantity: i64,
        unit_price: Decimal,
    ) -> Result<(), DraftError> {
        self.ensure_open()?;
        check_quantity(quantity)?;
        check_price(unit_price)?;
        money::line_total_minor(money::to_minor_units(unit_price)?, quantity)?;

        let line = self
            .line_items
            .iter_mut()
            .find(|l| l.product_id == product_id)
            .ok_or(DraftError::UnknownLineItem {
                product: product_id,
            })?;

        if line.has_farmer(farmer_id) {
            return Err(DraftError::DuplicateAllocation {
                product: product_id,
                farmer: farmer_id,
            });
        }

        let remaining = line.remaining();
        if quantity > remaining {
            return Err(DraftError::OverAllocation {
                product: product_id,
                requested: quantity,
                remaining,
            });
        }

        line.allocations.push(Allocation {
            farmer_id,
            product_id,
            quantity,
            unit_price,
            total_paid: money::line_total(unit_price, quantity)?,
        });
        self.state = DraftState::Assembling;
        Ok(())
    }

    /// Drop a line item and its allocations
    pub fn remove_line_item(&mut self, product_id: ProductId) -> Result<(), DraftError> {
        self.ensure_open()?;
        let before = self.line_items.len();
        self.line_items.retain(|l| l.product_id != product_id);
        if self.line_items.len() == before {
            return Err(DraftError::UnknownLineItem {
                product: product_id,
            });
        }
        self.touch();
        Ok(())
    }

    /// Drop one farmer's allocation from a line item
    pub fn remove_allocation(
        &mut self,
        product_id: ProductId,
        farmer_id: FarmerId,
    ) -> Result<(), DraftError> {
        self.ensure_open()?;
        let line = self
            .line_items
            .iter_mut()
            .find(|l| l.product_id == product_id)
            .ok_or(DraftError::UnknownLineItem {
                product: product_id,
            })?;
        if !line.has_farmer(farmer_id) {
            return Err(DraftError::UnknownAllocation {
                product: product_id,
                farmer: farmer_id,
            });
        }
        line.allocations.retain(|a| a.farmer_id != farmer_id);
        self.touch();
        Ok(())
    }

    /// Check that every line item is allocated exactly
    pub fn validate(&mut self) -> Result<ValidatedShipment, DraftError> {
        self.ensure_open()?;
        if self.line_items.is_empty() {
            return Err(DraftError::EmptyShipment);
        }

        if let Some(line) = self.line_items.iter().find(|l| !l.is_fully_allocated()) {
            return Err(DraftError::IncompleteAllocation {
                product: line.product_id,
                unallocated: line.remaining(),
            });
        }

        let line_items = self
            .line_items
            .iter()
            .map(|line| -> Result<ValidatedLineItem, DraftError> {
                Ok(ValidatedLineItem {
                    item: LineItem {
                        product_id: line.product_id,
                        unit_price: line.unit_price,
                        quantity: line.quantity,
                        subtotal: money::line_total(line.unit_price, line.quantity)?,
                    },
                    allocations: line.allocations.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.state = DraftState::Validated;
        Ok(ValidatedShipment {
            notes: self.notes.clone(),
            line_items,
        })
    }

    /// Validate, then hand the shipment to `persist`.
    ///
    /// On success the builder becomes `Committed` and rejects further
    /// changes. If `persist` fails the builder stays `Validated`.
    pub async fn commit_with<F, Fut, E>(&mut self, persist: F) -> Result<ShipmentId, CommitError<E>>
    where
        F: FnOnce(ValidatedShipment) -> Fut,
        Fut: Future<Output = Result<ShipmentId, E>>,
    {
        let shipment = self.validate().map_err(CommitError::Draft)?;
        let shipment_id = persist(shipment).await.map_err(CommitError::Persist)?;
        self.state = DraftState::Committed(shipment_id);
        Ok(shipment_id)
    }

    /// Discard the draft without writing anything
    pub fn abandon(&mut self) -> Result<(), DraftError> {
        self.ensure_open()?;
        self.state = DraftState::Abandoned;
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), DraftError> {
        if self.state.is_terminal() {
            return Err(DraftError::Closed { state: self.state });
        }
        Ok(())
    }

    /// Any edit invalidates a previous validation
    fn touch(&mut self) {
        self.state = if self.line_items.is_empty() {
            DraftState::Empty
        } else {
            DraftState::Assembling
        };
    }
}

fn check_quantity(quantity: i64) -> Result<(), DraftError> {
    validation::validate_quantity(quantity).map_err(|message| DraftError::Invalid {
        field: "quantity",
        message,
    })
}

fn check_price(price: Decimal) -> Result<(), DraftError> {
    validation::validate_unit_price(price).map_err(|message| DraftError::Invalid {
        field: "unit_price",
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewAllocation, NewLineItem};
    use std::str::FromStr;

    const TOMATO: ProductId = ProductId(1);
    const POTATO: ProductId = ProductId(2);
    const FARMER_A: FarmerId = FarmerId(1);
    const FARMER_B: FarmerId = FarmerId(2);

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn tomato_draft() -> ShipmentBuilder {
        let mut builder = ShipmentBuilder::new();
        builder.add_line_item(TOMATO, dec("50"), 100).unwrap();
        builder
    }

    #[test]
    fn test_new_builder_is_empty() {
        let builder = ShipmentBuilder::new();
        assert_eq!(builder.state(), DraftState::Empty);
        assert!(builder.line_items().is_empty());
    }

    #[test]
    fn test_add_line_item_moves_to_assembling() {
        let builder = tomato_draft();
        assert_eq!(builder.state(), DraftState::Assembling);
        assert_eq!(builder.remaining(TOMATO), Some(100));
        assert_eq!(builder.purchase_total(), dec("5000"));
    }

    #[test]
    fn test_duplicate_line_item_rejected() {
        let mut builder = tomato_draft();
        let err = builder.add_line_item(TOMATO, dec("40"), 10).unwrap_err();
        assert_eq!(err, DraftError::DuplicateLineItem { product: TOMATO });
    }

    #[test]
    fn test_line_item_requires_positive_values() {
        let mut builder = ShipmentBuilder::new();
        assert!(matches!(
            builder.add_line_item(TOMATO, dec("50"), 0),
            Err(DraftError::Invalid { field: "quantity", .. })
        ));
        assert!(matches!(
            builder.add_line_item(TOMATO, dec("0"), 10),
            Err(DraftError::Invalid { field: "unit_price", .. })
        ));
        assert_eq!(builder.state(), DraftState::Empty);
    }

    #[test]
    fn test_allocation_against_unknown_line_item() {
        let mut builder = tomato_draft();
        let err = builder
            .allocate_to_farmer(POTATO, FARMER_A, 1, dec("10"))
            .unwrap_err();
        assert_eq!(err, DraftError::UnknownLineItem { product: POTATO });
    }

    #[test]
    fn test_second_allocation_for_same_farmer_rejected() {
        let mut builder = tomato_draft();
        builder.allocate_to_farmer(TOMATO, FARMER_A, 10, dec("65")).unwrap();
        let err = builder
            .allocate_to_farmer(TOMATO, FARMER_A, 1, dec("65"))
            .unwrap_err();
        assert_eq!(
            err,
            DraftError::DuplicateAllocation {
                product: TOMATO,
                farmer: FARMER_A
            }
        );
        assert_eq!(builder.remaining(TOMATO), Some(90));
    }

    #[test]
    fn test_over_allocation_reports_remaining() {
        let mut builder = tomato_draft();
        builder.allocate_to_farmer(TOMATO, FARMER_A, 60, dec("65")).unwrap();

        let err = builder
            .allocate_to_farmer(TOMATO, FARMER_B, 50, dec("70"))
            .unwrap_err();
        assert_eq!(
            err,
            DraftError::OverAllocation {
                product: TOMATO,
                requested: 50,
                remaining: 40
            }
        );
        assert!(err.to_string().contains("only 40 units remaining"));

        builder.allocate_to_farmer(TOMATO, FARMER_B, 40, dec("70")).unwrap();
        assert_eq!(builder.remaining(TOMATO), Some(0));
    }

    #[test]
    fn test_validate_rejects_empty_shipment() {
        let mut builder = ShipmentBuilder::new();
        assert_eq!(builder.validate().unwrap_err(), DraftError::EmptyShipment);
    }

    #[test]
    fn test_validate_rejects_partial_allocation() {
        let mut builder = tomato_draft();
        builder.allocate_to_farmer(TOMATO, FARMER_A, 60, dec("65")).unwrap();
        assert_eq!(
            builder.validate().unwrap_err(),
            DraftError::IncompleteAllocation {
                product: TOMATO,
                unallocated: 40
            }
        );
        assert_eq!(builder.state(), DraftState::Assembling);
    }

    #[test]
    fn test_validate_produces_exact_totals() {
        let mut builder = tomato_draft();
        builder.allocate_to_farmer(TOMATO, FARMER_A, 60, dec("65")).unwrap();
        builder.allocate_to_farmer(TOMATO, FARMER_B, 40, dec("70")).unwrap();

        let shipment = builder.validate().unwrap();
        assert_eq!(builder.state(), DraftState::Validated);
        assert_eq!(shipment.line_items.len(), 1);
        assert_eq!(shipment.line_items[0].item.subtotal, dec("5000"));
        assert_eq!(shipment.line_items[0].allocations[0].total_paid, dec("3900"));
        assert_eq!(shipment.line_items[0].allocations[1].total_paid, dec("2800"));
        assert_eq!(builder.sales_total(), dec("6700"));
    }

    #[test]
    fn test_edit_after_validation_returns_to_assembling() {
        let mut builder = tomato_draft();
        builder.allocate_to_farmer(TOMATO, FARMER_A, 100, dec("65")).unwrap();
        builder.validate().unwrap();

        builder.add_line_item(POTATO, dec("30"), 10).unwrap();
        assert_eq!(builder.state(), DraftState::Assembling);
        assert!(builder.validate().is_err());
    }

    #[test]
    fn test_remove_allocation_frees_quantity() {
        let mut builder = tomato_draft();
        builder.allocate_to_farmer(TOMATO, FARMER_A, 70, dec("65")).unwrap();
        builder.remove_allocation(TOMATO, FARMER_A).unwrap();
        assert_eq!(builder.remaining(TOMATO), Some(100));
        builder.allocate_to_farmer(TOMATO, FARMER_A, 100, dec("60")).unwrap();
        assert!(builder.validate().is_ok());
    }

    #[test]
    fn test_remove_missing_allocation_rejected() {
        let mut builder = tomato_draft();
        builder.allocate_to_farmer(TOMATO, FARMER_A, 100, dec("65")).unwrap();
        builder.validate().unwrap();

        assert_eq!(
            builder.remove_allocation(TOMATO, FARMER_B),
            Err(DraftError::UnknownAllocation {
                product: TOMATO,
                farmer: FARMER_B,
            })
        );
        assert_eq!(builder.state(), DraftState::Validated);
        assert_eq!(builder.remaining(TOMATO), Some(0));
    }

    #[test]
    fn test_describe_matches_display_with_id_labels() {
        let errors = [
            DraftError::DuplicateLineItem { product: TOMATO },
            DraftError::UnknownLineItem { product: TOMATO },
            DraftError::DuplicateAllocation { product: TOMATO, farmer: FARMER_A },
            DraftError::UnknownAllocation { product: TOMATO, farmer: FARMER_A },
            DraftError::OverAllocation { product: TOMATO, requested: 50, remaining: 40 },
            DraftError::IncompleteAllocation { product: TOMATO, unallocated: 40 },
            DraftError::EmptyShipment,
        ];
        for err in errors {
            let product = TOMATO.to_string();
            let farmer = FARMER_A.to_string();
            assert_eq!(err.describe(&product, &farmer), err.to_string());
        }
    }

    #[test]
    fn test_describe_uses_names() {
        let err = DraftError::IncompleteAllocation { product: TOMATO, unallocated: 40 };
        assert_eq!(err.product(), Some(TOMATO));
        assert_eq!(err.farmer(), None);
        assert_eq!(
            err.describe("Tomato", ""),
            "Tomato has 40 units not assigned to farmers"
        );
    }

    #[test]
    fn test_remove_last_line_item_returns_to_empty() {
        let mut builder = tomato_draft();
        builder.remove_line_item(TOMATO).unwrap();
        assert_eq!(builder.state(), DraftState::Empty);
        assert!(builder.remove_line_item(TOMATO).is_err());
    }

    #[test]
    fn test_abandoned_builder_is_closed() {
        let mut builder = tomato_draft();
        builder.abandon().unwrap();
        assert_eq!(builder.state(), DraftState::Abandoned);
        assert!(matches!(
            builder.add_line_item(POTATO, dec("1"), 1),
            Err(DraftError::Closed { .. })
        ));
    }

    #[tokio::test]
    async fn test_commit_transitions_to_committed() {
        let mut builder = tomato_draft();
        builder.allocate_to_farmer(TOMATO, FARMER_A, 100, dec("65")).unwrap();

        let id = builder
            .commit_with(|shipment| async move {
                assert_eq!(shipment.line_items.len(), 1);
                Ok::<_, String>(ShipmentId(9))
            })
            .await
            .unwrap();

        assert_eq!(id, ShipmentId(9));
        assert_eq!(builder.state(), DraftState::Committed(ShipmentId(9)));
        assert!(matches!(
            builder.allocate_to_farmer(TOMATO, FARMER_B, 1, dec("1")),
            Err(DraftError::Closed { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_builder_validated() {
        let mut builder = tomato_draft();
        builder.allocate_to_farmer(TOMATO, FARMER_A, 100, dec("65")).unwrap();

        let result = builder
            .commit_with(|_| async { Err::<ShipmentId, _>("disk full") })
            .await;
        assert!(matches!(result, Err(CommitError::Persist("disk full"))));
        assert_eq!(builder.state(), DraftState::Validated);

        let retried = builder
            .commit_with(|_| async { Ok::<_, &str>(ShipmentId(1)) })
            .await;
        assert!(matches!(retried, Ok(ShipmentId(1))));
    }

    #[tokio::test]
    async fn test_commit_of_incomplete_draft_never_persists() {
        let mut builder = tomato_draft();
        let result = builder
            .commit_with(|_| async { Err::<ShipmentId, _>("persist must not run") })
            .await;
        assert!(matches!(
            result,
            Err(CommitError::Draft(DraftError::IncompleteAllocation { .. }))
        ));
    }

    #[test]
    fn test_from_request_replays_draft() {
        let request = NewShipment {
            notes: Some("  Morning delivery ".into()),
            line_items: vec![NewLineItem {
                product_id: TOMATO,
                unit_price: dec("50"),
                quantity: 100,
                allocations: vec![
                    NewAllocation {
                        farmer_id: FARMER_A,
                        quantity: 60,
                        unit_price: dec("65"),
                    },
                    NewAllocation {
                        farmer_id: FARMER_B,
                        quantity: 40,
                        unit_price: dec("70"),
                    },
                ],
            }],
        };

        let mut builder = ShipmentBuilder::from_request(&request).unwrap();
        assert_eq!(builder.notes(), Some("Morning delivery"));
        assert!(builder.validate().is_ok());
    }

    #[test]
    fn test_check_draft_reports_remaining() {
        let request = NewShipment {
            notes: None,
            line_items: vec![NewLineItem {
                product_id: TOMATO,
                unit_price: dec("50"),
                quantity: 100,
                allocations: vec![NewAllocation {
                    farmer_id: FARMER_A,
                    quantity: 60,
                    unit_price: dec("65"),
                }],
            }],
        };

        let report = check_draft(&request);
        assert!(!report.ready);
        assert_eq!(report.line_items[0].remaining, 40);
        assert_eq!(report.line_items[0].farmer_count, 1);
        assert_eq!(
            report.problem.as_deref(),
            Some("product #1 has 40 units not assigned to farmers")
        );
    }

    #[test]
    fn test_check_draft_stops_at_first_rejection() {
        let request = NewShipment {
            notes: None,
            line_items: vec![
                NewLineItem {
                    product_id: TOMATO,
                    unit_price: dec("50"),
                    quantity: 10,
                    allocations: vec![],
                },
                NewLineItem {
                    product_id: TOMATO,
                    unit_price: dec("55"),
                    quantity: 5,
                    allocations: vec![],
                },
            ],
        };

        let report = check_draft(&request);
        assert!(!report.ready);
        assert_eq!(report.line_items.len(), 1);
        assert_eq!(
            report.problem.as_deref(),
            Some("product #1 is already in this shipment")
        );
    }

    #[test]
    fn test_check_draft_ready_when_complete() {
        let request = NewShipment {
            notes: Some("ok".into()),
            line_items: vec![NewLineItem {
                product_id: POTATO,
                unit_price: dec("12.5"),
                quantity: 4,
                allocations: vec![NewAllocation {
                    farmer_id: FARMER_B,
                    quantity: 4,
                    unit_price: dec("15"),
                }],
            }],
        };

        let report = check_draft(&request);
        assert!(report.ready);
        assert_eq!(report.state, DraftState::Validated);
        assert_eq!(report.purchase_total, dec("50"));
        assert_eq!(report.sales_total, dec("60"));
        assert!(report.problem.is_none());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        /// Split `total` into `parts` positive integers
        fn partition(total: i64, cuts: &[i64]) -> Vec<i64> {
            let mut points: Vec<i64> = cuts.iter().map(|c| c % total).filter(|c| *c > 0).collect();
            points.sort_unstable();
            points.dedup();
            let mut parts = Vec::new();
            let mut last = 0;
            for p in points {
                parts.push(p - last);
                last = p;
            }
            parts.push(total - last);
            parts
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            /// Every validated line item is covered exactly by its allocations
            #[test]
            fn prop_allocation_closure(
                quantity in 1i64..5000,
                cuts in prop::collection::vec(1i64..5000, 0..8),
                cents in 1i64..100_000,
            ) {
                let parts = partition(quantity, &cuts);
                let mut builder = ShipmentBuilder::new();
                builder.add_line_item(TOMATO, Decimal::new(cents, 2), quantity).unwrap();
                for (i, part) in parts.iter().enumerate() {
                    builder
                        .allocate_to_farmer(TOMATO, FarmerId(i as i64 + 1), *part, Decimal::new(cents + 1, 2))
                        .unwrap();
                }

                let shipment = builder.validate().unwrap();
                for line in &shipment.line_items {
                    let allocated: i64 = line.allocations.iter().map(|a| a.quantity).sum();
                    prop_assert_eq!(allocated, line.item.quantity);
                }
            }

            /// A request beyond the remainder is rejected and reports it exactly
            #[test]
            fn prop_over_allocation_rejected(
                quantity in 2i64..1000,
                first in 1i64..1000,
                extra in 1i64..1000,
            ) {
                let first = first % quantity + 1;
                prop_assume!(first < quantity);
                let remaining = quantity - first;

                let mut builder = ShipmentBuilder::new();
                builder.add_line_item(TOMATO, Decimal::ONE, quantity).unwrap();
                builder.allocate_to_farmer(TOMATO, FARMER_A, first, Decimal::ONE).unwrap();

                let err = builder
                    .allocate_to_farmer(TOMATO, FARMER_B, remaining + extra, Decimal::ONE)
                    .unwrap_err();
                prop_assert_eq!(
                    err,
                    DraftError::OverAllocation { product: TOMATO, requested: remaining + extra, remaining }
                );
                prop_assert!(builder.allocate_to_farmer(TOMATO, FARMER_B, remaining, Decimal::ONE).is_ok());
            }

            /// The same farmer can never be allocated twice on a line item
            #[test]
            fn prop_no_double_allocation(first in 1i64..50, second in 1i64..50) {
                let mut builder = ShipmentBuilder::new();
                builder.add_line_item(TOMATO, Decimal::ONE, 100).unwrap();
                builder.allocate_to_farmer(TOMATO, FARMER_A, first, Decimal::ONE).unwrap();
                let is_duplicate = matches!(
                    builder.allocate_to_farmer(TOMATO, FARMER_A, second, Decimal::ONE),
                    Err(DraftError::DuplicateAllocation { .. })
                );
                prop_assert!(is_duplicate);
            }
        }
    }
}
