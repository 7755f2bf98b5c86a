//! Ledger store: durable persistence of reference data and the stock event streams
//!
//! Writes are serialized through one async gate and each logical operation
//! runs in a single transaction, so check-then-insert sequences (stock and
//! holding availability) cannot interleave. Reads go straight to the pool.
//!
//! Stock and totals are never stored; every query reconciles the event tables
//! with per-table grouped subqueries so no stream multiplies another's rows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use shared::builder::ValidatedShipment;
use shared::models::{
    AllocationRow, DirectSale, Farmer, FarmerHolding, FarmerProductHolding, FarmerRow,
    NewDirectSale, NewReturn, NewTransfer, Product, ProductRow, ProductStock, ProductValuation,
    Return, Shipment, ShipmentDetail, ShipmentDetailRow, ShipmentSummary, StockPosition, Transfer,
    User,
};
use shared::money::{self, MoneyError};
use shared::types::{FarmerId, ProductId, Role, ShipmentId, UserId};
use shared::validation;
use sqlx::{SqliteExecutor, SqlitePool};
use tokio::sync::Mutex;

use crate::error::{AppError, AppResult};

/// Persistence for products, farmers, shipments and stock movements
#[derive(Clone)]
pub struct LedgerStore {
    db: SqlitePool,
    write_gate: Arc<Mutex<()>>,
}

// ============================================================================
// Database records
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct NamedRecord {
    id: i64,
    name: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct ProductTotalsRecord {
    id: i64,
    name: String,
    created_at: DateTime<Utc>,
    total_bought: i64,
    cost_high: i64,
    cost_low: i64,
    total_sold: i64,
    total_returned: i64,
}

impl ProductTotalsRecord {
    fn position(&self) -> StockPosition {
        StockPosition::reconcile(self.total_bought, self.total_sold, self.total_returned)
    }

    fn total_cost(&self) -> AppResult<Decimal> {
        exact_total(self.cost_high, self.cost_low)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FarmerTotalsRecord {
    id: i64,
    name: String,
    created_at: DateTime<Utc>,
    paid_high: i64,
    paid_low: i64,
    units_purchased: i64,
    refund_high: i64,
    refund_low: i64,
    units_returned: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct ShipmentSummaryRecord {
    id: i64,
    created_at: DateTime<Utc>,
    notes: Option<String>,
    product_count: i64,
    farmer_count: i64,
    cost_high: i64,
    cost_low: i64,
    paid_high: i64,
    paid_low: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct ShipmentRecord {
    id: i64,
    created_at: DateTime<Utc>,
    notes: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct LineItemRecord {
    product_id: i64,
    product_name: String,
    unit_price_minor: i64,
    quantity: i64,
    subtotal_minor: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct AllocationRecord {
    farmer_id: i64,
    farmer_name: String,
    product_id: i64,
    product_name: String,
    quantity: i64,
    unit_price_minor: i64,
    total_paid_minor: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct DirectSaleRecord {
    id: i64,
    farmer_id: i64,
    farmer_name: String,
    product_id: i64,
    product_name: String,
    quantity: i64,
    unit_price_minor: i64,
    total_paid_minor: i64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct TransferRecord {
    id: i64,
    from_farmer_id: i64,
    from_farmer_name: String,
    to_farmer_id: i64,
    to_farmer_name: String,
    product_id: i64,
    product_name: String,
    quantity: i64,
    note: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct ReturnRecord {
    id: i64,
    farmer_id: i64,
    farmer_name: String,
    product_id: i64,
    product_name: String,
    quantity: i64,
    refund_minor: i64,
    note: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct HoldingRecord {
    product_id: i64,
    product_name: String,
    purchased: i64,
    transferred_in: i64,
    transferred_out: i64,
    returned: i64,
}

/// Stored account with its password hash
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserCredentials {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

impl UserCredentials {
    pub fn to_user(&self) -> AppResult<User> {
        let role = Role::parse(&self.role).ok_or_else(|| {
            AppError::Internal(format!("user {} has unknown role '{}'", self.id, self.role))
        })?;
        Ok(User {
            id: UserId(self.id),
            username: self.username.clone(),
            role,
            created_at: self.created_at,
        })
    }
}

// ============================================================================
// Queries
// ============================================================================

const PRODUCT_TOTALS_SQL: &str = r#"
    SELECT p.id, p.name, p.created_at,
           COALESCE(b.quantity, 0)  AS total_bought,
           COALESCE(b.cost_high, 0) AS cost_high,
           COALESCE(b.cost_low, 0)  AS cost_low,
           COALESCE(s.quantity, 0) AS total_sold,
           COALESCE(r.quantity, 0) AS total_returned
    FROM products p
    LEFT JOIN (SELECT product_id, SUM(quantity) AS quantity,
                      SUM(subtotal_minor / 100000000) AS cost_high,
                      SUM(subtotal_minor % 100000000) AS cost_low
               FROM shipment_line_items GROUP BY product_id) b ON b.product_id = p.id
    LEFT JOIN (SELECT product_id, SUM(quantity) AS quantity
               FROM farmer_purchases GROUP BY product_id) s ON s.product_id = p.id
    LEFT JOIN (SELECT product_id, SUM(quantity) AS quantity
               FROM returns GROUP BY product_id) r ON r.product_id = p.id
"#;

const DIRECT_SALES_SQL: &str = r#"
    SELECT fp.id, fp.farmer_id, f.name AS farmer_name, fp.product_id, p.name AS product_name,
           fp.quantity, fp.unit_price_minor, fp.total_paid_minor, fp.created_at
    FROM farmer_purchases fp
    JOIN farmers f ON f.id = fp.farmer_id
    JOIN products p ON p.id = fp.product_id
    WHERE fp.shipment_id IS NULL
    ORDER BY fp.created_at DESC, fp.id DESC
"#;

const TRANSFERS_SQL: &str = r#"
    SELECT t.id, t.from_farmer_id, ff.name AS from_farmer_name,
           t.to_farmer_id, tf.name AS to_farmer_name,
           t.product_id, p.name AS product_name, t.quantity, t.note, t.created_at
    FROM transfers t
    JOIN farmers ff ON ff.id = t.from_farmer_id
    JOIN farmers tf ON tf.id = t.to_farmer_id
    JOIN products p ON p.id = t.product_id
    ORDER BY t.created_at DESC, t.id DESC
"#;

const RETURNS_SQL: &str = r#"
    SELECT r.id, r.farmer_id, f.name AS farmer_name, r.product_id, p.name AS product_name,
           r.quantity, r.refund_minor, r.note, r.created_at
    FROM returns r
    JOIN farmers f ON f.id = r.farmer_id
    JOIN products p ON p.id = r.product_id
    ORDER BY r.created_at DESC, r.id DESC
"#;

/// Money totals are aggregated in SQL as `SUM(x / SUM_SPLIT)` and
/// `SUM(x % SUM_SPLIT)` and joined here without leaving exact arithmetic
fn exact_total(high: i64, low: i64) -> AppResult<Decimal> {
    money::from_split_sum(high, low)
        .map(money::round_for_display)
        .map_err(|e: MoneyError| AppError::Internal(format!("Total out of range: {}", e)))
}

/// Map a unique violation on a name column to a named duplicate
fn name_taken(entity: &'static str, name: &str) -> impl FnOnce(sqlx::Error) -> AppError {
    let name = name.to_string();
    move |err| {
        let unique = matches!(&err, sqlx::Error::Database(db) if db.is_unique_violation());
        if unique {
            AppError::Duplicate { entity, name }
        } else {
            AppError::from(err)
        }
    }
}

async fn product_name<'e, E: SqliteExecutor<'e>>(
    executor: E,
    product_id: ProductId,
) -> AppResult<String> {
    sqlx::query_scalar::<_, String>("SELECT name FROM products WHERE id = ?")
        .bind(product_id.0)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| AppError::Referential(format!("{} does not exist", product_id)))
}

async fn farmer_name<'e, E: SqliteExecutor<'e>>(
    executor: E,
    farmer_id: FarmerId,
) -> AppResult<String> {
    sqlx::query_scalar::<_, String>("SELECT name FROM farmers WHERE id = ?")
        .bind(farmer_id.0)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| AppError::Referential(format!("{} does not exist", farmer_id)))
}

async fn stock_position<'e, E: SqliteExecutor<'e>>(
    executor: E,
    product_id: ProductId,
) -> AppResult<StockPosition> {
    let (bought, sold, returned) = sqlx::query_as::<_, (i64, i64, i64)>(
        r#"
        SELECT
            (SELECT COALESCE(SUM(quantity), 0) FROM shipment_line_items WHERE product_id = ?),
            (SELECT COALESCE(SUM(quantity), 0) FROM farmer_purchases WHERE product_id = ?),
            (SELECT COALESCE(SUM(quantity), 0) FROM returns WHERE product_id = ?)
        "#,
    )
    .bind(product_id.0)
    .bind(product_id.0)
    .bind(product_id.0)
    .fetch_one(executor)
    .await?;

    Ok(StockPosition::reconcile(bought, sold, returned))
}

async fn farmer_holding<'e, E: SqliteExecutor<'e>>(
    executor: E,
    farmer_id: FarmerId,
    product_id: ProductId,
) -> AppResult<FarmerHolding> {
    let (purchased, transferred_in, transferred_out, returned) =
        sqlx::query_as::<_, (i64, i64, i64, i64)>(
            r#"
            SELECT
                (SELECT COALESCE(SUM(quantity), 0) FROM farmer_purchases
                 WHERE farmer_id = ? AND product_id = ?),
                (SELECT COALESCE(SUM(quantity), 0) FROM transfers
                 WHERE to_farmer_id = ? AND product_id = ?),
                (SELECT COALESCE(SUM(quantity), 0) FROM transfers
                 WHERE from_farmer_id = ? AND product_id = ?),
                (SELECT COALESCE(SUM(quantity), 0) FROM returns
                 WHERE farmer_id = ? AND product_id = ?)
            "#,
        )
        .bind(farmer_id.0)
        .bind(product_id.0)
        .bind(farmer_id.0)
        .bind(product_id.0)
        .bind(farmer_id.0)
        .bind(product_id.0)
        .bind(farmer_id.0)
        .bind(product_id.0)
        .fetch_one(executor)
        .await?;

    Ok(FarmerHolding::reconcile(
        purchased,
        transferred_in,
        transferred_out,
        returned,
    ))
}

impl LedgerStore {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            db,
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    // ------------------------------------------------------------------------
    // Reference data
    // ------------------------------------------------------------------------

    /// Insert a product; names collide case-insensitively
    pub async fn create_product(&self, name: &str) -> AppResult<Product> {
        let _gate = self.write_gate.lock().await;
        let created_at = Utc::now();

        let id = sqlx::query("INSERT INTO products (name, name_key, created_at) VALUES (?, ?, ?)")
            .bind(name)
            .bind(validation::name_key(name))
            .bind(created_at)
            .execute(&self.db)
            .await
            .map_err(name_taken("Product", name))?
            .last_insert_rowid();

        Ok(Product {
            id: ProductId(id),
            name: name.to_string(),
            created_at,
        })
    }

    /// Insert a farmer; names collide case-insensitively
    pub async fn create_farmer(&self, name: &str) -> AppResult<Farmer> {
        let _gate = self.write_gate.lock().await;
        let created_at = Utc::now();

        let id = sqlx::query("INSERT INTO farmers (name, name_key, created_at) VALUES (?, ?, ?)")
            .bind(name)
            .bind(validation::name_key(name))
            .bind(created_at)
            .execute(&self.db)
            .await
            .map_err(name_taken("Farmer", name))?
            .last_insert_rowid();

        Ok(Farmer {
            id: FarmerId(id),
            name: name.to_string(),
            created_at,
        })
    }

    /// Display name of a product, if it exists
    pub async fn find_product_name(&self, product_id: ProductId) -> AppResult<Option<String>> {
        Ok(sqlx::query_scalar::<_, String>("SELECT name FROM products WHERE id = ?")
            .bind(product_id.0)
            .fetch_optional(&self.db)
            .await?)
    }

    /// Display name of a farmer, if it exists
    pub async fn find_farmer_name(&self, farmer_id: FarmerId) -> AppResult<Option<String>> {
        Ok(sqlx::query_scalar::<_, String>("SELECT name FROM farmers WHERE id = ?")
            .bind(farmer_id.0)
            .fetch_optional(&self.db)
            .await?)
    }

    pub async fn list_products(&self) -> AppResult<Vec<Product>> {
        let records = sqlx::query_as::<_, NamedRecord>(
            "SELECT id, name, created_at FROM products ORDER BY name, id",
        )
        .fetch_all(&self.db)
        .await?;

        Ok(records
            .into_iter()
            .map(|r| Product {
                id: ProductId(r.id),
                name: r.name,
                created_at: r.created_at,
            })
            .collect())
    }

    pub async fn list_farmers(&self) -> AppResult<Vec<Farmer>> {
        let records = sqlx::query_as::<_, NamedRecord>(
            "SELECT id, name, created_at FROM farmers ORDER BY name, id",
        )
        .fetch_all(&self.db)
        .await?;

        Ok(records
            .into_iter()
            .map(|r| Farmer {
                id: FarmerId(r.id),
                name: r.name,
                created_at: r.created_at,
            })
            .collect())
    }

    // ------------------------------------------------------------------------
    // Shipments
    // ------------------------------------------------------------------------

    /// Write a shipment with all its line items and allocations, or nothing
    pub async fn commit_shipment(&self, shipment: &ValidatedShipment) -> AppResult<ShipmentId> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.db.begin().await?;
        let created_at = Utc::now();

        let shipment_id = sqlx::query("INSERT INTO shipments (notes, created_at) VALUES (?, ?)")
            .bind(&shipment.notes)
            .bind(created_at)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

        for line in &shipment.line_items {
            let item = &line.item;
            product_name(&mut *tx, item.product_id).await?;

            let unit_price_minor = money::to_minor_units(item.unit_price)?;
            let subtotal_minor = money::line_total_minor(unit_price_minor, item.quantity)?;

            sqlx::query(
                r#"
                INSERT INTO shipment_line_items
                    (shipment_id, product_id, unit_price_minor, quantity, subtotal_minor)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(shipment_id)
            .bind(item.product_id.0)
            .bind(unit_price_minor)
            .bind(item.quantity)
            .bind(subtotal_minor)
            .execute(&mut *tx)
            .await?;

            for allocation in &line.allocations {
                farmer_name(&mut *tx, allocation.farmer_id).await?;

                let resale_minor = money::to_minor_units(allocation.unit_price)?;
                let paid_minor = money::line_total_minor(resale_minor, allocation.quantity)?;

                sqlx::query(
                    r#"
                    INSERT INTO farmer_purchases
                        (shipment_id, farmer_id, product_id, quantity,
                         unit_price_minor, total_paid_minor, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(shipment_id)
                .bind(allocation.farmer_id.0)
                .bind(item.product_id.0)
                .bind(allocation.quantity)
                .bind(resale_minor)
                .bind(paid_minor)
                .bind(created_at)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(ShipmentId(shipment_id))
    }

    /// Shipment listing, most recent first
    pub async fn query_shipments(&self) -> AppResult<Vec<ShipmentSummary>> {
        let records = sqlx::query_as::<_, ShipmentSummaryRecord>(
            r#"
            SELECT s.id, s.created_at, s.notes,
                   (SELECT COUNT(*) FROM shipment_line_items li
                    WHERE li.shipment_id = s.id) AS product_count,
                   (SELECT COUNT(DISTINCT fp.farmer_id) FROM farmer_purchases fp
                    WHERE fp.shipment_id = s.id) AS farmer_count,
                   (SELECT COALESCE(SUM(li.subtotal_minor / 100000000), 0)
                    FROM shipment_line_items li WHERE li.shipment_id = s.id) AS cost_high,
                   (SELECT COALESCE(SUM(li.subtotal_minor % 100000000), 0)
                    FROM shipment_line_items li WHERE li.shipment_id = s.id) AS cost_low,
                   (SELECT COALESCE(SUM(fp.total_paid_minor / 100000000), 0)
                    FROM farmer_purchases fp WHERE fp.shipment_id = s.id) AS paid_high,
                   (SELECT COALESCE(SUM(fp.total_paid_minor % 100000000), 0)
                    FROM farmer_purchases fp WHERE fp.shipment_id = s.id) AS paid_low
            FROM shipments s
            ORDER BY s.created_at DESC, s.id DESC
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        records
            .into_iter()
            .map(|r| {
                Ok(ShipmentSummary {
                    id: ShipmentId(r.id),
                    date: r.created_at,
                    notes: r.notes,
                    product_count: r.product_count,
                    farmer_count: r.farmer_count,
                    total_cost: exact_total(r.cost_high, r.cost_low)?,
                    total_paid: exact_total(r.paid_high, r.paid_low)?,
                })
            })
            .collect()
    }

    pub async fn query_shipment_detail(&self, shipment_id: ShipmentId) -> AppResult<ShipmentDetail> {
        let header = sqlx::query_as::<_, ShipmentRecord>(
            "SELECT id, created_at, notes FROM shipments WHERE id = ?",
        )
        .bind(shipment_id.0)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(shipment_id.to_string()))?;

        let line_items = sqlx::query_as::<_, LineItemRecord>(
            r#"
            SELECT li.product_id, p.name AS product_name, li.unit_price_minor,
                   li.quantity, li.subtotal_minor
            FROM shipment_line_items li
            JOIN products p ON p.id = li.product_id
            WHERE li.shipment_id = ?
            ORDER BY li.id
            "#,
        )
        .bind(shipment_id.0)
        .fetch_all(&self.db)
        .await?;

        let allocations = self.query_shipment_allocations(shipment_id).await?;

        let purchase_minor: i128 = line_items
            .iter()
            .map(|li| i128::from(li.subtotal_minor))
            .sum();
        let purchase_total = money::from_wide_minor_units(purchase_minor)
            .map_err(|e| AppError::Internal(format!("Total out of range: {}", e)))?;
        let sales_total = allocations.iter().map(|a| a.total_paid).sum::<Decimal>();

        Ok(ShipmentDetail {
            shipment: Shipment {
                id: ShipmentId(header.id),
                created_at: header.created_at,
                notes: header.notes,
            },
            line_items: line_items
                .into_iter()
                .map(|li| ShipmentDetailRow {
                    product_id: ProductId(li.product_id),
                    product_name: li.product_name,
                    unit_price: money::from_minor_units(li.unit_price_minor),
                    quantity: li.quantity,
                    subtotal: money::display_from_minor(li.subtotal_minor),
                })
                .collect(),
            allocations,
            purchase_total: money::round_for_display(purchase_total),
            sales_total: money::round_for_display(sales_total),
        })
    }

    /// Farmer allocations of one shipment in entry order
    pub async fn query_shipment_allocations(
        &self,
        shipment_id: ShipmentId,
    ) -> AppResult<Vec<AllocationRow>> {
        let records = sqlx::query_as::<_, AllocationRecord>(
            r#"
            SELECT fp.farmer_id, f.name AS farmer_name, fp.product_id, p.name AS product_name,
                   fp.quantity, fp.unit_price_minor, fp.total_paid_minor
            FROM farmer_purchases fp
            JOIN farmers f ON f.id = fp.farmer_id
            JOIN products p ON p.id = fp.product_id
            WHERE fp.shipment_id = ?
            ORDER BY fp.id
            "#,
        )
        .bind(shipment_id.0)
        .fetch_all(&self.db)
        .await?;

        Ok(records
            .into_iter()
            .map(|r| AllocationRow {
                farmer_id: FarmerId(r.farmer_id),
                farmer_name: r.farmer_name,
                product_id: ProductId(r.product_id),
                product_name: r.product_name,
                quantity: r.quantity,
                unit_price: money::from_minor_units(r.unit_price_minor),
                total_paid: money::from_minor_units(r.total_paid_minor),
            })
            .collect())
    }

    // ------------------------------------------------------------------------
    // Stock movements
    // ------------------------------------------------------------------------

    /// Sell warehouse stock to a farmer outside any shipment
    pub async fn record_direct_sale(&self, sale: &NewDirectSale) -> AppResult<DirectSale> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.db.begin().await?;

        let farmer = farmer_name(&mut *tx, sale.farmer_id).await?;
        let product = product_name(&mut *tx, sale.product_id).await?;

        let position = stock_position(&mut *tx, sale.product_id).await?;
        if !position.can_release(sale.quantity) {
            return Err(AppError::InsufficientStock {
                product,
                requested: sale.quantity,
                available: position.current_stock,
            });
        }

        let unit_price_minor = money::to_minor_units(sale.unit_price)?;
        let paid_minor = money::line_total_minor(unit_price_minor, sale.quantity)?;
        let created_at = Utc::now();

        let id = sqlx::query(
            r#"
            INSERT INTO farmer_purchases
                (shipment_id, farmer_id, product_id, quantity,
                 unit_price_minor, total_paid_minor, created_at)
            VALUES (NULL, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(sale.farmer_id.0)
        .bind(sale.product_id.0)
        .bind(sale.quantity)
        .bind(unit_price_minor)
        .bind(paid_minor)
        .bind(created_at)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;

        Ok(DirectSale {
            id,
            farmer_id: sale.farmer_id,
            farmer_name: farmer,
            product_id: sale.product_id,
            product_name: product,
            quantity: sale.quantity,
            unit_price: money::from_minor_units(unit_price_minor),
            total_paid: money::display_from_minor(paid_minor),
            created_at,
        })
    }

    /// Move units a farmer holds to another farmer
    pub async fn record_transfer(&self, transfer: &NewTransfer) -> AppResult<Transfer> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.db.begin().await?;

        let from_name = farmer_name(&mut *tx, transfer.from_farmer_id).await?;
        let to_name = farmer_name(&mut *tx, transfer.to_farmer_id).await?;
        let product = product_name(&mut *tx, transfer.product_id).await?;

        let holding = farmer_holding(&mut *tx, transfer.from_farmer_id, transfer.product_id).await?;
        if transfer.quantity > holding.held {
            return Err(AppError::InsufficientHolding {
                farmer: from_name,
                product,
                requested: transfer.quantity,
                held: holding.held,
            });
        }

        let created_at = Utc::now();
        let id = sqlx::query(
            r#"
            INSERT INTO transfers
                (from_farmer_id, to_farmer_id, product_id, quantity, note, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(transfer.from_farmer_id.0)
        .bind(transfer.to_farmer_id.0)
        .bind(transfer.product_id.0)
        .bind(transfer.quantity)
        .bind(&transfer.note)
        .bind(created_at)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;

        Ok(Transfer {
            id,
            from_farmer_id: transfer.from_farmer_id,
            from_farmer_name: from_name,
            to_farmer_id: transfer.to_farmer_id,
            to_farmer_name: to_name,
            product_id: transfer.product_id,
            product_name: product,
            quantity: transfer.quantity,
            note: transfer.note.clone(),
            created_at,
        })
    }

    /// Record units a farmer gives back to the warehouse
    pub async fn record_return(&self, ret: &NewReturn) -> AppResult<Return> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.db.begin().await?;

        let farmer = farmer_name(&mut *tx, ret.farmer_id).await?;
        let product = product_name(&mut *tx, ret.product_id).await?;

        let holding = farmer_holding(&mut *tx, ret.farmer_id, ret.product_id).await?;
        if ret.quantity > holding.held {
            return Err(AppError::InsufficientHolding {
                farmer,
                product,
                requested: ret.quantity,
                held: holding.held,
            });
        }

        // Returns are subtracted from stock, which must stay non-negative
        let position = stock_position(&mut *tx, ret.product_id).await?;
        if !position.can_release(ret.quantity) {
            return Err(AppError::InsufficientStock {
                product,
                requested: ret.quantity,
                available: position.current_stock,
            });
        }

        let refund_minor = money::to_minor_units(ret.refund_amount)?;
        let created_at = Utc::now();

        let id = sqlx::query(
            r#"
            INSERT INTO returns (farmer_id, product_id, quantity, refund_minor, note, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(ret.farmer_id.0)
        .bind(ret.product_id.0)
        .bind(ret.quantity)
        .bind(refund_minor)
        .bind(&ret.note)
        .bind(created_at)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;

        Ok(Return {
            id,
            farmer_id: ret.farmer_id,
            farmer_name: farmer,
            product_id: ret.product_id,
            product_name: product,
            quantity: ret.quantity,
            refund_amount: money::display_from_minor(refund_minor),
            note: ret.note.clone(),
            created_at,
        })
    }

    pub async fn list_direct_sales(&self) -> AppResult<Vec<DirectSale>> {
        let records = sqlx::query_as::<_, DirectSaleRecord>(DIRECT_SALES_SQL)
            .fetch_all(&self.db)
            .await?;

        Ok(records
            .into_iter()
            .map(|r| DirectSale {
                id: r.id,
                farmer_id: FarmerId(r.farmer_id),
                farmer_name: r.farmer_name,
                product_id: ProductId(r.product_id),
                product_name: r.product_name,
                quantity: r.quantity,
                unit_price: money::from_minor_units(r.unit_price_minor),
                total_paid: money::display_from_minor(r.total_paid_minor),
                created_at: r.created_at,
            })
            .collect())
    }

    pub async fn list_transfers(&self) -> AppResult<Vec<Transfer>> {
        let records = sqlx::query_as::<_, TransferRecord>(TRANSFERS_SQL)
            .fetch_all(&self.db)
            .await?;

        Ok(records
            .into_iter()
            .map(|r| Transfer {
                id: r.id,
                from_farmer_id: FarmerId(r.from_farmer_id),
                from_farmer_name: r.from_farmer_name,
                to_farmer_id: FarmerId(r.to_farmer_id),
                to_farmer_name: r.to_farmer_name,
                product_id: ProductId(r.product_id),
                product_name: r.product_name,
                quantity: r.quantity,
                note: r.note,
                created_at: r.created_at,
            })
            .collect())
    }

    pub async fn list_returns(&self) -> AppResult<Vec<Return>> {
        let records = sqlx::query_as::<_, ReturnRecord>(RETURNS_SQL)
            .fetch_all(&self.db)
            .await?;

        Ok(records
            .into_iter()
            .map(|r| Return {
                id: r.id,
                farmer_id: FarmerId(r.farmer_id),
                farmer_name: r.farmer_name,
                product_id: ProductId(r.product_id),
                product_name: r.product_name,
                quantity: r.quantity,
                refund_amount: money::display_from_minor(r.refund_minor),
                note: r.note,
                created_at: r.created_at,
            })
            .collect())
    }

    // ------------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------------

    async fn product_totals(&self) -> AppResult<Vec<ProductTotalsRecord>> {
        let sql = format!("{} ORDER BY p.name, p.id", PRODUCT_TOTALS_SQL);
        Ok(sqlx::query_as::<_, ProductTotalsRecord>(&sql)
            .fetch_all(&self.db)
            .await?)
    }

    /// Product listing with purchase totals and current stock, by name
    pub async fn query_product_totals(&self) -> AppResult<Vec<ProductRow>> {
        self.product_totals()
            .await?
            .into_iter()
            .map(|r| {
                Ok(ProductRow {
                    id: ProductId(r.id),
                    current_stock: r.position().current_stock,
                    total_cost: r.total_cost()?,
                    name: r.name,
                    date_added: r.created_at,
                    total_bought: r.total_bought,
                })
            })
            .collect()
    }

    /// Stock position of every product, by name
    pub async fn query_stock_positions(&self) -> AppResult<Vec<ProductStock>> {
        Ok(self
            .product_totals()
            .await?
            .into_iter()
            .map(|r| ProductStock {
                product_id: ProductId(r.id),
                position: r.position(),
                product_name: r.name,
            })
            .collect())
    }

    pub async fn query_stock_position(&self, product_id: ProductId) -> AppResult<ProductStock> {
        let sql = format!("{} WHERE p.id = ?", PRODUCT_TOTALS_SQL);
        let record = sqlx::query_as::<_, ProductTotalsRecord>(&sql)
            .bind(product_id.0)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound(product_id.to_string()))?;

        Ok(ProductStock {
            product_id,
            position: record.position(),
            product_name: record.name,
        })
    }

    /// Remaining stock valued at weighted-average purchase cost
    pub async fn query_valuation(&self) -> AppResult<Vec<ProductValuation>> {
        self.product_totals()
            .await?
            .into_iter()
            .map(|r| {
                let position = r.position();
                let total_cost = money::from_split_sum(r.cost_high, r.cost_low)
                    .map_err(|e| AppError::Internal(format!("Total out of range: {}", e)))?;
                Ok(ProductValuation::compute(
                    ProductId(r.id),
                    r.name,
                    &position,
                    total_cost,
                ))
            })
            .collect()
    }

    /// Farmer listing with spend and refund totals, by name
    pub async fn query_farmer_totals(&self) -> AppResult<Vec<FarmerRow>> {
        let records = sqlx::query_as::<_, FarmerTotalsRecord>(
            r#"
            SELECT f.id, f.name, f.created_at,
                   COALESCE(fp.paid_high, 0)  AS paid_high,
                   COALESCE(fp.paid_low, 0)   AS paid_low,
                   COALESCE(fp.quantity, 0)   AS units_purchased,
                   COALESCE(r.refund_high, 0) AS refund_high,
                   COALESCE(r.refund_low, 0)  AS refund_low,
                   COALESCE(r.quantity, 0)    AS units_returned
            FROM farmers f
            LEFT JOIN (SELECT farmer_id, SUM(quantity) AS quantity,
                              SUM(total_paid_minor / 100000000) AS paid_high,
                              SUM(total_paid_minor % 100000000) AS paid_low
                       FROM farmer_purchases GROUP BY farmer_id) fp ON fp.farmer_id = f.id
            LEFT JOIN (SELECT farmer_id, SUM(quantity) AS quantity,
                              SUM(refund_minor / 100000000) AS refund_high,
                              SUM(refund_minor % 100000000) AS refund_low
                       FROM returns GROUP BY farmer_id) r ON r.farmer_id = f.id
            ORDER BY f.name, f.id
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        records
            .into_iter()
            .map(|r| {
                Ok(FarmerRow {
                    id: FarmerId(r.id),
                    name: r.name,
                    date_added: r.created_at,
                    total_bought: exact_total(r.paid_high, r.paid_low)?,
                    total_refunded: exact_total(r.refund_high, r.refund_low)?,
                    units_purchased: r.units_purchased,
                    units_returned: r.units_returned,
                })
            })
            .collect()
    }

    /// Units of each product a farmer currently holds
    pub async fn query_farmer_holdings(
        &self,
        farmer_id: FarmerId,
    ) -> AppResult<Vec<FarmerProductHolding>> {
        farmer_name(&self.db, farmer_id).await.map_err(|err| match err {
            AppError::Referential(_) => AppError::NotFound(farmer_id.to_string()),
            other => other,
        })?;

        let records = sqlx::query_as::<_, HoldingRecord>(
            r#"
            SELECT p.id AS product_id, p.name AS product_name,
                   COALESCE(fp.quantity, 0) AS purchased,
                   COALESCE(ti.quantity, 0) AS transferred_in,
                   COALESCE(tx.quantity, 0) AS transferred_out,
                   COALESCE(r.quantity, 0)  AS returned
            FROM products p
            LEFT JOIN (SELECT product_id, SUM(quantity) AS quantity FROM farmer_purchases
                       WHERE farmer_id = ? GROUP BY product_id) fp ON fp.product_id = p.id
            LEFT JOIN (SELECT product_id, SUM(quantity) AS quantity FROM transfers
                       WHERE to_farmer_id = ? GROUP BY product_id) ti ON ti.product_id = p.id
            LEFT JOIN (SELECT product_id, SUM(quantity) AS quantity FROM transfers
                       WHERE from_farmer_id = ? GROUP BY product_id) tx ON tx.product_id = p.id
            LEFT JOIN (SELECT product_id, SUM(quantity) AS quantity FROM returns
                       WHERE farmer_id = ? GROUP BY product_id) r ON r.product_id = p.id
            WHERE fp.quantity IS NOT NULL OR ti.quantity IS NOT NULL
               OR tx.quantity IS NOT NULL OR r.quantity IS NOT NULL
            ORDER BY p.name, p.id
            "#,
        )
        .bind(farmer_id.0)
        .bind(farmer_id.0)
        .bind(farmer_id.0)
        .bind(farmer_id.0)
        .fetch_all(&self.db)
        .await?;

        Ok(records
            .into_iter()
            .map(|r| FarmerProductHolding {
                farmer_id,
                product_id: ProductId(r.product_id),
                product_name: r.product_name,
                holding: FarmerHolding::reconcile(
                    r.purchased,
                    r.transferred_in,
                    r.transferred_out,
                    r.returned,
                ),
            })
            .collect())
    }

    // ------------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------------

    pub async fn insert_user(&self, username: &str, password_hash: &str, role: Role) -> AppResult<User> {
        let _gate = self.write_gate.lock().await;
        let created_at = Utc::now();

        let id = sqlx::query(
            "INSERT INTO users (username, password_hash, role, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(username)
        .bind(password_hash)
        .bind(role.as_str())
        .bind(created_at)
        .execute(&self.db)
        .await
        .map_err(name_taken("User", username))?
        .last_insert_rowid();

        Ok(User {
            id: UserId(id),
            username: username.to_string(),
            role,
            created_at,
        })
    }

    pub async fn find_user(&self, username: &str) -> AppResult<Option<UserCredentials>> {
        Ok(sqlx::query_as::<_, UserCredentials>(
            "SELECT id, username, password_hash, role, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?)
    }

    pub async fn count_users(&self) -> AppResult<i64> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.db)
            .await?)
    }
}
