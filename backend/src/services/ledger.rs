//! Ledger facade
//!
//! The operation surface used by the presentation layer. Every call takes the
//! caller's [`Session`]; mutations require a role that can write. Inputs are
//! validated and normalized here before reaching the store.

use shared::builder::{inspect_draft, CommitError, DraftError, DraftReport, ShipmentBuilder};
use shared::models::{
    DirectSale, Farmer, FarmerProductHolding, FarmerRow, NewDirectSale, NewReturn, NewShipment,
    NewTransfer, Product, ProductRow, ProductStock, ProductValuation, Return, ShipmentDetail,
    ShipmentSummary, Transfer,
};
use shared::types::{FarmerId, ProductId, Session, ShipmentId};
use shared::validation;

use crate::error::{AppError, AppResult};
use crate::services::ledger_store::LedgerStore;

/// Ledger operations gated by the caller's role
#[derive(Clone)]
pub struct LedgerService {
    store: LedgerStore,
}

impl LedgerService {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    fn require_writer(session: &Session, action: &'static str) -> AppResult<()> {
        if session.role.can_write() {
            return Ok(());
        }
        tracing::warn!(
            "Permission denied: {} ({}) tried to {}",
            session.username,
            session.role,
            action
        );
        Err(AppError::PermissionDenied {
            role: session.role,
            action,
        })
    }

    // ========================================================================
    // Reference data
    // ========================================================================

    pub async fn create_product(&self, session: &Session, name: &str) -> AppResult<Product> {
        Self::require_writer(session, "create products")?;
        let name = clean_name(name)?;

        let product = self.store.create_product(&name).await?;
        tracing::info!(
            product_id = product.id.0,
            "Product '{}' created by {}",
            product.name,
            session.username
        );
        Ok(product)
    }

    pub async fn create_farmer(&self, session: &Session, name: &str) -> AppResult<Farmer> {
        Self::require_writer(session, "create farmers")?;
        let name = clean_name(name)?;

        let farmer = self.store.create_farmer(&name).await?;
        tracing::info!(
            farmer_id = farmer.id.0,
            "Farmer '{}' created by {}",
            farmer.name,
            session.username
        );
        Ok(farmer)
    }

    pub async fn list_products(&self, session: &Session) -> AppResult<Vec<Product>> {
        tracing::debug!("{} listing products", session.username);
        self.store.list_products().await
    }

    pub async fn list_farmers(&self, session: &Session) -> AppResult<Vec<Farmer>> {
        tracing::debug!("{} listing farmers", session.username);
        self.store.list_farmers().await
    }

    // ========================================================================
    // Shipments
    // ========================================================================

    /// Start an empty shipment draft for a caller allowed to record one
    pub fn begin_shipment(&self, session: &Session) -> AppResult<ShipmentBuilder> {
        Self::require_writer(session, "record shipments")?;
        Ok(ShipmentBuilder::new())
    }

    /// Validate the draft and persist it in one transaction.
    ///
    /// The builder is left `Validated` when the store fails, so the caller can
    /// retry with the same draft.
    pub async fn commit_shipment(
        &self,
        session: &Session,
        builder: &mut ShipmentBuilder,
    ) -> AppResult<ShipmentId> {
        Self::require_writer(session, "record shipments")?;
        self.commit_draft(session, builder).await
    }

    async fn commit_draft(
        &self,
        session: &Session,
        builder: &mut ShipmentBuilder,
    ) -> AppResult<ShipmentId> {
        let store = &self.store;
        let outcome = builder
            .commit_with(|shipment| async move { store.commit_shipment(&shipment).await })
            .await;

        match outcome {
            Ok(shipment_id) => {
                tracing::info!(
                    shipment_id = shipment_id.0,
                    line_items = builder.line_items().len(),
                    "Shipment committed by {} (purchase {}, sales {})",
                    session.username,
                    builder.purchase_total(),
                    builder.sales_total()
                );
                Ok(shipment_id)
            }
            Err(CommitError::Draft(err)) => Err(self.name_draft_error(err).await),
            Err(CommitError::Persist(err)) => {
                tracing::error!("Shipment commit failed, draft kept for retry: {}", err);
                Err(err)
            }
        }
    }

    /// Replay a whole draft document, commit it and return the stored view
    pub async fn record_shipment(
        &self,
        session: &Session,
        request: &NewShipment,
    ) -> AppResult<ShipmentDetail> {
        Self::require_writer(session, "record shipments")?;
        let mut builder = match ShipmentBuilder::from_request(request) {
            Ok(builder) => builder,
            Err(err) => return Err(self.name_draft_error(err).await),
        };
        let shipment_id = self.commit_draft(session, &mut builder).await?;
        self.store.query_shipment_detail(shipment_id).await
    }

    /// Dry-run a draft document without writing anything
    pub async fn check_shipment(
        &self,
        session: &Session,
        request: &NewShipment,
    ) -> AppResult<DraftReport> {
        tracing::debug!("{} checking a shipment draft", session.username);
        let (mut report, problem) = inspect_draft(request);
        if let Some(err) = problem {
            report.problem = Some(self.draft_message(&err).await?);
        }
        Ok(report)
    }

    /// Attach display names to a draft rejection. Lookup failures keep the
    /// id-based message.
    async fn name_draft_error(&self, error: DraftError) -> AppError {
        let message = match self.draft_message(&error).await {
            Ok(message) => message,
            Err(lookup) => {
                tracing::warn!("Could not name draft rejection: {}", lookup);
                error.to_string()
            }
        };
        AppError::Draft { error, message }
    }

    async fn draft_message(&self, error: &DraftError) -> AppResult<String> {
        let product = match error.product() {
            Some(id) => self.store.find_product_name(id).await?.unwrap_or_else(|| id.to_string()),
            None => String::new(),
        };
        let farmer = match error.farmer() {
            Some(id) => self.store.find_farmer_name(id).await?.unwrap_or_else(|| id.to_string()),
            None => String::new(),
        };
        Ok(error.describe(&product, &farmer))
    }

    pub async fn list_shipments(&self, session: &Session) -> AppResult<Vec<ShipmentSummary>> {
        tracing::debug!("{} listing shipments", session.username);
        self.store.query_shipments().await
    }

    pub async fn shipment_detail(
        &self,
        session: &Session,
        shipment_id: ShipmentId,
    ) -> AppResult<ShipmentDetail> {
        tracing::debug!("{} viewing {}", session.username, shipment_id);
        self.store.query_shipment_detail(shipment_id).await
    }

    // ========================================================================
    // Stock movements
    // ========================================================================

    pub async fn record_direct_sale(
        &self,
        session: &Session,
        sale: NewDirectSale,
    ) -> AppResult<DirectSale> {
        Self::require_writer(session, "record direct sales")?;
        check_quantity(sale.quantity)?;
        validation::validate_unit_price(sale.unit_price)
            .map_err(|message| AppError::validation("unit_price", message))?;

        let recorded = self.store.record_direct_sale(&sale).await?;
        tracing::info!(
            sale_id = recorded.id,
            "Direct sale of {} x {} to {} recorded by {}",
            recorded.quantity,
            recorded.product_name,
            recorded.farmer_name,
            session.username
        );
        Ok(recorded)
    }

    pub async fn record_transfer(
        &self,
        session: &Session,
        mut transfer: NewTransfer,
    ) -> AppResult<Transfer> {
        Self::require_writer(session, "record transfers")?;
        check_quantity(transfer.quantity)?;
        if transfer.from_farmer_id == transfer.to_farmer_id {
            return Err(AppError::validation(
                "to_farmer_id",
                "Cannot transfer to the same farmer",
            ));
        }
        transfer.note = clean_note(transfer.note);

        let recorded = self.store.record_transfer(&transfer).await?;
        tracing::info!(
            transfer_id = recorded.id,
            "Transfer of {} x {} from {} to {} recorded by {}",
            recorded.quantity,
            recorded.product_name,
            recorded.from_farmer_name,
            recorded.to_farmer_name,
            session.username
        );
        Ok(recorded)
    }

    pub async fn record_return(&self, session: &Session, mut ret: NewReturn) -> AppResult<Return> {
        Self::require_writer(session, "record returns")?;
        check_quantity(ret.quantity)?;
        validation::validate_refund(ret.refund_amount)
            .map_err(|message| AppError::validation("refund_amount", message))?;
        ret.note = clean_note(ret.note);

        let recorded = self.store.record_return(&ret).await?;
        tracing::info!(
            return_id = recorded.id,
            "Return of {} x {} from {} (refund {}) recorded by {}",
            recorded.quantity,
            recorded.product_name,
            recorded.farmer_name,
            recorded.refund_amount,
            session.username
        );
        Ok(recorded)
    }

    pub async fn list_direct_sales(&self, session: &Session) -> AppResult<Vec<DirectSale>> {
        tracing::debug!("{} listing direct sales", session.username);
        self.store.list_direct_sales().await
    }

    pub async fn list_transfers(&self, session: &Session) -> AppResult<Vec<Transfer>> {
        tracing::debug!("{} listing transfers", session.username);
        self.store.list_transfers().await
    }

    pub async fn list_returns(&self, session: &Session) -> AppResult<Vec<Return>> {
        tracing::debug!("{} listing returns", session.username);
        self.store.list_returns().await
    }

    // ========================================================================
    // Reports
    // ========================================================================

    pub async fn product_totals(&self, session: &Session) -> AppResult<Vec<ProductRow>> {
        tracing::debug!("{} reading product totals", session.username);
        self.store.query_product_totals().await
    }

    pub async fn farmer_totals(&self, session: &Session) -> AppResult<Vec<FarmerRow>> {
        tracing::debug!("{} reading farmer totals", session.username);
        self.store.query_farmer_totals().await
    }

    pub async fn stock_positions(&self, session: &Session) -> AppResult<Vec<ProductStock>> {
        tracing::debug!("{} reading stock positions", session.username);
        self.store.query_stock_positions().await
    }

    pub async fn stock_position(
        &self,
        session: &Session,
        product_id: ProductId,
    ) -> AppResult<ProductStock> {
        tracing::debug!("{} reading stock of {}", session.username, product_id);
        self.store.query_stock_position(product_id).await
    }

    pub async fn valuation(&self, session: &Session) -> AppResult<Vec<ProductValuation>> {
        tracing::debug!("{} reading stock valuation", session.username);
        self.store.query_valuation().await
    }

    pub async fn farmer_holdings(
        &self,
        session: &Session,
        farmer_id: FarmerId,
    ) -> AppResult<Vec<FarmerProductHolding>> {
        tracing::debug!("{} reading holdings of {}", session.username, farmer_id);
        self.store.query_farmer_holdings(farmer_id).await
    }
}

fn clean_name(name: &str) -> AppResult<String> {
    validation::validate_name(name).map_err(|message| AppError::validation("name", message))?;
    Ok(validation::normalize_name(name))
}

fn clean_note(note: Option<String>) -> Option<String> {
    note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

fn check_quantity(quantity: i64) -> AppResult<()> {
    validation::validate_quantity(quantity)
        .map_err(|message| AppError::validation("quantity", message))
}
